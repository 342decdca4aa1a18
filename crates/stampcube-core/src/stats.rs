use std::cmp::Ordering;

use num_traits::Float;

fn cmp<T: Float>(a: &T, b: &T) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

/// Median of `values` (reordered in place). `None` when empty.
///
/// Uses `select_nth_unstable_by` for O(n) selection without a full sort.
pub fn median<T: Float>(values: &mut [T]) -> Option<T> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let mid = n / 2;
    let upper = *values.select_nth_unstable_by(mid, cmp).1;
    if n % 2 == 1 {
        Some(upper)
    } else {
        let lower = values[..mid]
            .iter()
            .copied()
            .fold(T::neg_infinity(), T::max);
        Some((lower + upper) / (T::one() + T::one()))
    }
}

/// Population mean and standard deviation. `None` when empty.
pub fn mean_std<T: Float>(values: &[T]) -> Option<(T, T)> {
    if values.is_empty() {
        return None;
    }
    let n = T::from(values.len())?;
    let mean = values.iter().fold(T::zero(), |acc, &v| acc + v) / n;
    let var = values
        .iter()
        .fold(T::zero(), |acc, &v| acc + (v - mean) * (v - mean))
        / n;
    Some((mean, var.sqrt()))
}

/// Result of iterative sigma clipping.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClippedStats<T> {
    pub median: T,
    pub std_dev: T,
    pub kept: usize,
}

/// Iteratively reject values further than `sigma` standard deviations from
/// the median. Stops early once nothing is rejected or the spread vanishes.
pub fn sigma_clipped_stats<T: Float>(
    values: &mut Vec<T>,
    sigma: T,
    iterations: usize,
) -> Option<ClippedStats<T>> {
    values.retain(|v| v.is_finite());
    let mut center = median(values)?;
    let mut spread = mean_std(values)?.1;

    for _ in 0..iterations {
        if spread <= T::epsilon() {
            break;
        }
        let lo = center - sigma * spread;
        let hi = center + sigma * spread;
        let before = values.len();
        values.retain(|&v| v >= lo && v <= hi);
        if values.is_empty() {
            return None;
        }
        center = median(values)?;
        spread = mean_std(values)?.1;
        if values.len() == before {
            break;
        }
    }

    Some(ClippedStats {
        median: center,
        std_dev: spread,
        kept: values.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_even() {
        assert_eq!(median(&mut [3.0f64, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0f64, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median::<f32>(&mut []), None);
    }

    #[test]
    fn test_mean_std() {
        let (mean, std) = mean_std(&[2.0f64, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((mean - 5.0).abs() < 1e-12);
        assert!((std - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_sigma_clip_rejects_outlier() {
        let mut values: Vec<f32> = vec![1.0, 1.1, 0.9, 1.0, 1.05, 0.95, 1.0, 50.0];
        let stats = sigma_clipped_stats(&mut values, 2.0, 5).unwrap();
        assert!((stats.median - 1.0).abs() < 0.06);
        assert_eq!(stats.kept, 7);
    }

    #[test]
    fn test_sigma_clip_ignores_nan() {
        let mut values = vec![f32::NAN, 2.0, 2.0, 2.0];
        let stats = sigma_clipped_stats(&mut values, 3.0, 3).unwrap();
        assert_eq!(stats.median, 2.0);
        assert_eq!(stats.kept, 3);
    }
}
