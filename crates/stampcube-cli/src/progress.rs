use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use stampcube_core::pipeline::{PipelineStage, ProgressReporter};

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{msg:26} [{bar:40}] {pos}/{len}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// A bar counting `total` work items, labelled with `message`.
pub fn counter_bar(message: impl Into<String>, total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(bar_style());
    pb.set_message(message.into());
    pb
}

/// Move the bar forward to `done`. Parallel workers report out of order.
pub fn advance_to(pb: &ProgressBar, done: usize) {
    if done as u64 > pb.position() {
        pb.set_position(done as u64);
    }
}

/// Drives one indicatif bar per pipeline stage.
pub struct BarReporter {
    current: Mutex<Option<ProgressBar>>,
    hidden: bool,
}

impl BarReporter {
    pub fn new(hidden: bool) -> Self {
        Self {
            current: Mutex::new(None),
            hidden,
        }
    }
}

impl ProgressReporter for BarReporter {
    fn begin_stage(&self, stage: PipelineStage, total_items: Option<usize>) {
        let pb = if self.hidden {
            ProgressBar::hidden()
        } else {
            match total_items {
                Some(total) => counter_bar(stage.to_string(), total),
                None => {
                    let pb = ProgressBar::new_spinner();
                    pb.set_style(spinner_style());
                    pb.set_message(stage.to_string());
                    pb
                }
            }
        };
        if let Some(previous) = self.current.lock().replace(pb) {
            previous.finish_and_clear();
        }
    }

    fn advance(&self, items_done: usize) {
        if let Some(pb) = self.current.lock().as_ref() {
            advance_to(pb, items_done);
        }
    }

    fn finish_stage(&self) {
        if let Some(pb) = self.current.lock().take() {
            pb.finish();
        }
    }
}
