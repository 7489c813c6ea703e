use burn::train::renderer::{MetricState, MetricsRenderer, TrainingProgress};
use std::collections::BTreeMap;

/// Renders training progress through the `log` facade instead of a terminal UI.
///
/// Metric values are buffered and written every `interval` iterations and at the end of
/// each epoch.
pub struct LogRenderer {
    interval: usize,
    train: BTreeMap<String, String>,
    valid: BTreeMap<String, String>,
}

impl Default for LogRenderer {
    fn default() -> Self {
        Self::new(100)
    }
}

impl LogRenderer {
    pub fn new(interval: usize) -> Self {
        Self {
            interval: interval.max(1),
            train: BTreeMap::new(),
            valid: BTreeMap::new(),
        }
    }
}

fn record(metrics: &mut BTreeMap<String, String>, state: MetricState) {
    let entry = match state {
        MetricState::Generic(entry) => entry,
        MetricState::Numeric(entry, _) => entry,
    };
    metrics.insert(entry.name.to_string(), entry.formatted);
}

fn should_log(interval: usize, item: &TrainingProgress) -> bool {
    let end_of_epoch = item.progress.items_total > 0
        && item.progress.items_processed >= item.progress.items_total;

    end_of_epoch || item.iteration % interval == 0
}

fn summary(metrics: &BTreeMap<String, String>) -> String {
    metrics.values().cloned().collect::<Vec<_>>().join(" | ")
}

impl MetricsRenderer for LogRenderer {
    fn update_train(&mut self, state: MetricState) {
        record(&mut self.train, state);
    }

    fn update_valid(&mut self, state: MetricState) {
        record(&mut self.valid, state);
    }

    fn render_train(&mut self, item: TrainingProgress) {
        if should_log(self.interval, &item) {
            log::info!(
                "[train] epoch {}/{} iteration {} ({}/{}) {}",
                item.epoch,
                item.epoch_total,
                item.iteration,
                item.progress.items_processed,
                item.progress.items_total,
                summary(&self.train)
            );
        }
    }

    fn render_valid(&mut self, item: TrainingProgress) {
        if should_log(self.interval, &item) {
            log::info!(
                "[valid] epoch {}/{} ({}/{}) {}",
                item.epoch,
                item.epoch_total,
                item.progress.items_processed,
                item.progress.items_total,
                summary(&self.valid)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::data::dataloader::Progress;

    fn progress(iteration: usize, items_processed: usize, items_total: usize) -> TrainingProgress {
        TrainingProgress {
            progress: Progress {
                items_processed,
                items_total,
            },
            epoch: 1,
            epoch_total: 5,
            iteration,
        }
    }

    #[test]
    fn logs_on_interval_and_at_the_end_of_the_epoch() {
        assert!(should_log(10, &progress(10, 1280, 6000)));
        assert!(!should_log(10, &progress(11, 1408, 6000)));
        assert!(should_log(10, &progress(47, 6000, 6000)));
    }

    #[test]
    fn summary_joins_metrics_by_name() {
        let mut metrics = BTreeMap::new();
        metrics.insert("Loss".to_string(), "Loss 0.250".to_string());
        metrics.insert("Accuracy".to_string(), "Accuracy 91.2 %".to_string());

        assert_eq!(summary(&metrics), "Accuracy 91.2 % | Loss 0.250");
    }
}
