mod common;

use std::sync::Arc;

use stampcube_core::catalog::Picid;
use stampcube_core::error::StampError;
use stampcube_core::similarity::{SimilarMatch, SimilarityResult};
use stampcube_core::store::{ResultKind, ResultValue, StampStore};
use stampcube_core::variance::VarianceResult;

use common::{attrs, gaussian_stamp};

fn similarity(target: u64, metric: &str, ids: &[u64]) -> SimilarityResult {
    SimilarityResult {
        target: Picid(target),
        metric: metric.to_string(),
        matches: ids
            .iter()
            .enumerate()
            .map(|(i, &id)| SimilarMatch {
                picid: Picid(id),
                score: -(i as f64) * 0.25,
            })
            .collect(),
    }
}

#[test]
fn test_round_trip_preserves_shape_and_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seq.stamps");

    let stamp = gaussian_stamp(5, 1.2, &[Some(1.0), None, Some(0.8), Some(1.1)]);
    let store = StampStore::create(&path);
    store.put(Picid(42), stamp.clone(), attrs(2, 11.5)).unwrap();
    store.flush().unwrap();

    let reopened = StampStore::open(&path).unwrap();
    assert_eq!(reopened.stamp_shape(), Some((5, 5, 4)));
    let read = reopened.get(Picid(42)).unwrap();
    assert_eq!(read.shape(), (5, 5, 4));
    for (a, b) in read.data().iter().zip(stamp.data().iter()) {
        assert!(a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan()));
    }
    assert_eq!(read.valid_frames(), vec![0, 2, 3]);

    let a = reopened.attrs(Picid(42)).unwrap();
    assert_eq!(a.flags, 2);
    assert_eq!(a.vmag, 11.5);
    assert_eq!(a.snr, 50.0);
}

#[test]
fn test_put_rejects_existing_entry() {
    let store = StampStore::in_memory();
    let stamp = gaussian_stamp(3, 1.0, &[Some(1.0), Some(1.0)]);
    store.put(Picid(1), stamp.clone(), attrs(0, 10.0)).unwrap();
    assert!(matches!(
        store.put(Picid(1), stamp, attrs(0, 9.0)),
        Err(StampError::EntryExists(Picid(1)))
    ));
    // Attributes are those of the first write.
    assert_eq!(store.attrs(Picid(1)).unwrap().vmag, 10.0);
}

#[test]
fn test_stamp_shape_is_fixed_by_first_entry() {
    let store = StampStore::in_memory();
    store
        .put(Picid(1), gaussian_stamp(3, 1.0, &[Some(1.0), Some(1.0)]), attrs(0, 10.0))
        .unwrap();
    let err = store.put(Picid(2), gaussian_stamp(5, 1.0, &[Some(1.0), Some(1.0)]), attrs(0, 10.0));
    assert!(matches!(err, Err(StampError::ShapeMismatch { .. })));
    let err = store.replace(Picid(1), gaussian_stamp(3, 1.0, &[Some(1.0)]), attrs(0, 10.0));
    assert!(matches!(err, Err(StampError::ShapeMismatch { .. })));
}

#[test]
fn test_missing_source() {
    let store = StampStore::in_memory();
    assert!(matches!(store.get(Picid(9)), Err(StampError::SourceNotFound(Picid(9)))));
    assert!(!store.has_result(Picid(9), ResultKind::Similarity));
    let err = store.set_result(Picid(9), ResultValue::Similarity(similarity(9, "m", &[1])));
    assert!(matches!(err, Err(StampError::SourceNotFound(_))));
}

#[test]
fn test_similarity_overwrite_stays_aligned_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seq.stamps");
    let store = StampStore::create(&path);
    store
        .put(Picid(1), gaussian_stamp(3, 1.0, &[Some(1.0), Some(2.0)]), attrs(0, 10.0))
        .unwrap();

    store
        .set_result(Picid(1), ResultValue::Similarity(similarity(1, "morphology", &[5, 6, 7, 8])))
        .unwrap();
    store
        .set_result(Picid(1), ResultValue::Similarity(similarity(1, "morphology", &[9, 3])))
        .unwrap();
    store.flush().unwrap();

    let reopened = StampStore::open(&path).unwrap();
    let result = reopened.similarity(Picid(1)).unwrap();
    assert_eq!(result.similar_stars(), vec![Picid(9), Picid(3)]);
    assert_eq!(result.similar_star_scores(), vec![0.0, -0.25]);
    assert_eq!(result.similar_stars().len(), result.similar_star_scores().len());
    assert_eq!(result.metric, "morphology");
}

#[test]
fn test_variance_results_persist_per_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seq.stamps");
    let store = StampStore::create(&path);
    store
        .put(Picid(3), gaussian_stamp(3, 1.0, &[Some(1.0), Some(2.0), Some(1.5)]), attrs(0, 10.0))
        .unwrap();

    for (key, variance) in [("sum;min=2;refs=auto", 0.01), ("aperture:2.00;min=2;refs=auto", 0.02)] {
        store
            .set_result(
                Picid(3),
                ResultValue::Variance(VarianceResult {
                    target: Picid(3),
                    params_key: key.to_string(),
                    reference_count: 4,
                    frame_indices: vec![0, 2],
                    ratio: vec![0.9, 1.1],
                    variance,
                }),
            )
            .unwrap();
    }
    store.flush().unwrap();

    let reopened = StampStore::open(&path).unwrap();
    assert!(reopened.has_result(Picid(3), ResultKind::Variance));
    let sum = reopened.variance(Picid(3), "sum;min=2;refs=auto").unwrap();
    assert_eq!(sum.variance, 0.01);
    assert_eq!(sum.frame_indices, vec![0, 2]);
    assert_eq!(sum.ratio, vec![0.9, 1.1]);
    assert_eq!(sum.reference_count, 4);
    let ap = reopened.variance(Picid(3), "aperture:2.00;min=2;refs=auto").unwrap();
    assert_eq!(ap.variance, 0.02);
}

#[test]
fn test_replace_discards_derived_results() {
    let store = StampStore::in_memory();
    let stamp = gaussian_stamp(3, 1.0, &[Some(1.0), Some(2.0)]);
    store.put(Picid(1), stamp.clone(), attrs(0, 10.0)).unwrap();
    store
        .set_result(Picid(1), ResultValue::Similarity(similarity(1, "m", &[2])))
        .unwrap();
    assert!(store.has_result(Picid(1), ResultKind::Similarity));

    store.replace(Picid(1), stamp, attrs(0, 10.0)).unwrap();
    assert!(!store.has_result(Picid(1), ResultKind::Similarity));
}

#[test]
fn test_replacing_a_reference_clears_dependent_results() {
    let store = StampStore::in_memory();
    let flux = [Some(1.0), Some(2.0)];
    for id in 1..=3 {
        store.put(Picid(id), gaussian_stamp(3, 1.0, &flux), attrs(0, 10.0)).unwrap();
    }
    store
        .set_result(Picid(1), ResultValue::Similarity(similarity(1, "m", &[2, 3])))
        .unwrap();
    store
        .set_result(
            Picid(1),
            ResultValue::Variance(VarianceResult {
                target: Picid(1),
                params_key: "sum;min=2;refs=auto".to_string(),
                reference_count: 2,
                frame_indices: vec![0, 1],
                ratio: vec![1.0, 1.0],
                variance: 0.0,
            }),
        )
        .unwrap();

    // Source 2 was both a candidate and a reference for source 1.
    store.replace(Picid(2), gaussian_stamp(3, 2.0, &flux), attrs(0, 10.0)).unwrap();
    assert!(!store.has_result(Picid(1), ResultKind::Similarity));
    assert!(!store.has_result(Picid(1), ResultKind::Variance));
    assert!(store.variance(Picid(1), "sum;min=2;refs=auto").is_none());
    // The stamps themselves are untouched.
    assert_eq!(store.len(), 3);
    assert_eq!(store.get(Picid(1)).unwrap().shape(), (3, 3, 2));
}

#[test]
fn test_empty_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.stamps");
    StampStore::create(&path).flush().unwrap();

    let reopened = StampStore::open(&path).unwrap();
    assert!(reopened.is_empty());
    assert_eq!(reopened.stamp_shape(), None);
}

#[test]
fn test_flush_leaves_no_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seq.stamps");
    let store = StampStore::create(&path);
    store
        .put(Picid(1), gaussian_stamp(3, 1.0, &[Some(1.0)]), attrs(0, 10.0))
        .unwrap();
    store.flush().unwrap();

    let names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, vec!["seq.stamps".to_string()]);
}

#[test]
fn test_corrupt_container_rejected() {
    let dir = tempfile::tempdir().unwrap();

    let garbage = dir.path().join("garbage.stamps");
    std::fs::write(&garbage, b"not a stamp container").unwrap();
    assert!(matches!(StampStore::open(&garbage), Err(StampError::InvalidContainer(_))));

    let path = dir.path().join("seq.stamps");
    let store = StampStore::create(&path);
    store
        .put(Picid(1), gaussian_stamp(3, 1.0, &[Some(1.0), Some(1.0)]), attrs(0, 10.0))
        .unwrap();
    store.flush().unwrap();
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
    assert!(matches!(StampStore::open(&path), Err(StampError::InvalidContainer(_))));

    assert!(StampStore::open(&dir.path().join("missing.stamps")).is_err());
}

#[test]
fn test_open_or_create() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seq.stamps");
    let store = StampStore::open_or_create(&path).unwrap();
    assert!(store.is_empty());
    assert!(!path.exists());

    store
        .put(Picid(8), gaussian_stamp(3, 1.0, &[Some(1.0)]), attrs(0, 10.0))
        .unwrap();
    store.flush().unwrap();
    assert_eq!(StampStore::open_or_create(&path).unwrap().keys(), vec![Picid(8)]);
}

#[test]
fn test_readers_see_whole_results_during_overwrites() {
    let store = Arc::new(StampStore::in_memory());
    store
        .put(Picid(1), gaussian_stamp(3, 1.0, &[Some(1.0), Some(2.0)]), attrs(0, 10.0))
        .unwrap();
    store
        .set_result(Picid(1), ResultValue::Similarity(similarity(1, "short", &[2, 3, 4])))
        .unwrap();

    let writer = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for i in 0..500 {
                let result = if i % 2 == 0 {
                    similarity(1, "long", &[5, 6, 7, 8, 9])
                } else {
                    similarity(1, "short", &[2, 3, 4])
                };
                store.set_result(Picid(1), ResultValue::Similarity(result)).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let r = store.similarity(Picid(1)).unwrap();
                    match r.metric.as_str() {
                        "short" => assert_eq!(r.len(), 3),
                        "long" => assert_eq!(r.len(), 5),
                        other => panic!("unexpected metric {other}"),
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
}
