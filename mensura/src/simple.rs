//! An in-memory backend keeping cumulative statistics per meter.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::meter::{
    CounterCore, DistributionSummaryCore, GaugeCore, GaugeFn, LongTaskTimerCore, MeterCore,
    MeterFactory, TimerCore,
};
use crate::{DistributionStatisticConfig, Id};

/// Samples kept per meter to compute client-side percentiles.
const SAMPLE_WINDOW: usize = 1024;

/// Creates cores holding their statistics in memory, readable through the
/// meter handles.
///
/// Percentiles are computed over the most recent recordings, and only for
/// meters whose configuration asks for them.
#[derive(Debug, Default)]
pub struct SimpleMeterFactory {
    _private: (),
}

impl SimpleMeterFactory {
    /// Create a new factory.
    pub fn new() -> Self {
        SimpleMeterFactory::default()
    }
}

impl MeterFactory for SimpleMeterFactory {
    fn new_counter(&self, _id: &Id) -> Arc<dyn CounterCore> {
        Arc::new(SimpleCounter::default())
    }

    fn new_gauge(&self, _id: &Id, value: GaugeFn) -> Arc<dyn GaugeCore> {
        Arc::new(SimpleGauge { value })
    }

    fn new_timer(&self, _id: &Id, config: &DistributionStatisticConfig) -> Arc<dyn TimerCore> {
        Arc::new(SimpleTimer {
            stats: Stats::new(config),
        })
    }

    fn new_distribution_summary(
        &self,
        _id: &Id,
        config: &DistributionStatisticConfig,
        _scale: f64,
    ) -> Arc<dyn DistributionSummaryCore> {
        Arc::new(SimpleDistributionSummary {
            stats: Stats::new(config),
        })
    }

    fn new_long_task_timer(
        &self,
        _id: &Id,
        _config: &DistributionStatisticConfig,
    ) -> Arc<dyn LongTaskTimerCore> {
        Arc::new(SimpleLongTaskTimer::default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct SimpleCounter {
    // floats have no atomics
    count: Mutex<f64>,
}

impl MeterCore for SimpleCounter {}

impl CounterCore for SimpleCounter {
    fn increment(&self, amount: f64) {
        *lock(&self.count) += amount;
    }

    fn count(&self) -> f64 {
        *lock(&self.count)
    }
}

struct SimpleGauge {
    value: GaugeFn,
}

impl std::fmt::Debug for SimpleGauge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleGauge").finish_non_exhaustive()
    }
}

impl MeterCore for SimpleGauge {}

impl GaugeCore for SimpleGauge {
    fn value(&self) -> f64 {
        (self.value)()
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    count: u64,
    total: f64,
    max: f64,
    // `None` when no percentiles are configured
    window: Option<VecDeque<f64>>,
}

#[derive(Debug)]
struct Stats {
    inner: Mutex<Snapshot>,
}

impl Stats {
    fn new(config: &DistributionStatisticConfig) -> Self {
        let window = (!config.percentiles().is_empty()).then(VecDeque::new);
        Stats {
            inner: Mutex::new(Snapshot {
                window,
                ..Snapshot::default()
            }),
        }
    }

    fn record(&self, value: f64) {
        let mut snapshot = lock(&self.inner);
        snapshot.count += 1;
        snapshot.total += value;
        if value > snapshot.max {
            snapshot.max = value;
        }
        if let Some(window) = snapshot.window.as_mut() {
            if window.len() == SAMPLE_WINDOW {
                window.pop_front();
            }
            window.push_back(value);
        }
    }

    fn count(&self) -> u64 {
        lock(&self.inner).count
    }

    fn total(&self) -> f64 {
        lock(&self.inner).total
    }

    fn max(&self) -> f64 {
        lock(&self.inner).max
    }

    /// Nearest-rank percentile over the sample window.
    fn percentile(&self, phi: f64) -> Option<f64> {
        let snapshot = lock(&self.inner);
        let window = snapshot.window.as_ref()?;
        if window.is_empty() || !(0.0..=1.0).contains(&phi) {
            return None;
        }
        let mut sorted: Vec<f64> = window.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let rank = (phi * sorted.len() as f64).ceil() as usize;
        sorted.get(rank.saturating_sub(1)).copied()
    }
}

#[derive(Debug)]
struct SimpleTimer {
    // nanoseconds
    stats: Stats,
}

impl MeterCore for SimpleTimer {}

impl TimerCore for SimpleTimer {
    fn record(&self, duration: Duration) {
        self.stats.record(duration.as_nanos() as f64);
    }

    fn count(&self) -> u64 {
        self.stats.count()
    }

    fn total_time(&self) -> Duration {
        nanos(self.stats.total())
    }

    fn max(&self) -> Duration {
        nanos(self.stats.max())
    }

    fn percentile(&self, phi: f64) -> Option<Duration> {
        self.stats.percentile(phi).map(nanos)
    }
}

fn nanos(value: f64) -> Duration {
    Duration::from_nanos(value as u64)
}

#[derive(Debug)]
struct SimpleDistributionSummary {
    stats: Stats,
}

impl MeterCore for SimpleDistributionSummary {}

impl DistributionSummaryCore for SimpleDistributionSummary {
    fn record(&self, amount: f64) {
        self.stats.record(amount);
    }

    fn count(&self) -> u64 {
        self.stats.count()
    }

    fn total_amount(&self) -> f64 {
        self.stats.total()
    }

    fn max(&self) -> f64 {
        self.stats.max()
    }

    fn percentile(&self, phi: f64) -> Option<f64> {
        self.stats.percentile(phi)
    }
}

#[derive(Debug, Default)]
struct SimpleLongTaskTimer {
    next_task: AtomicU64,
    active: Mutex<HashMap<u64, Instant>>,
}

impl MeterCore for SimpleLongTaskTimer {}

impl LongTaskTimerCore for SimpleLongTaskTimer {
    fn start_task(&self) -> u64 {
        let task = self.next_task.fetch_add(1, Ordering::Relaxed) + 1;
        lock(&self.active).insert(task, Instant::now());
        task
    }

    fn stop_task(&self, task: u64) -> Option<Duration> {
        lock(&self.active)
            .remove(&task)
            .map(|started| started.elapsed())
    }

    fn active_tasks(&self) -> usize {
        lock(&self.active).len()
    }

    fn duration(&self) -> Duration {
        let now = Instant::now();
        lock(&self.active)
            .values()
            .map(|started| now.saturating_duration_since(*started))
            .sum()
    }

    fn max(&self) -> Duration {
        let now = Instant::now();
        lock(&self.active)
            .values()
            .map(|started| now.saturating_duration_since(*started))
            .max()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MeterKind, Tags};

    fn id(kind: MeterKind) -> Id {
        Id::new("test", Tags::empty(), kind)
    }

    #[test]
    fn timer_keeps_count_total_and_max() {
        let timer = SimpleMeterFactory::new()
            .new_timer(&id(MeterKind::Timer), &DistributionStatisticConfig::defaults());
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(30));

        assert_eq!(timer.count(), 2);
        assert_eq!(timer.total_time(), Duration::from_millis(40));
        assert_eq!(timer.max(), Duration::from_millis(30));
        // no percentiles configured
        assert_eq!(timer.percentile(0.5), None);
    }

    #[test]
    fn nearest_rank_percentiles() {
        let config = DistributionStatisticConfig::defaults().with_percentiles([0.5, 0.9]);
        let summary = SimpleMeterFactory::new().new_distribution_summary(
            &id(MeterKind::DistributionSummary),
            &config,
            1.0,
        );
        assert_eq!(summary.percentile(0.5), None);

        for amount in 1..=10 {
            summary.record(f64::from(amount));
        }
        assert_eq!(summary.percentile(0.5), Some(5.0));
        assert_eq!(summary.percentile(0.9), Some(9.0));
        assert_eq!(summary.percentile(1.0), Some(10.0));
        assert_eq!(summary.percentile(1.5), None);
    }

    #[test]
    fn sample_window_is_bounded() {
        let config = DistributionStatisticConfig::none().with_percentiles([0.0]);
        let summary = SimpleMeterFactory::new().new_distribution_summary(
            &id(MeterKind::DistributionSummary),
            &config,
            1.0,
        );
        for amount in 0..(SAMPLE_WINDOW + 10) {
            summary.record(amount as f64);
        }
        assert_eq!(summary.count(), (SAMPLE_WINDOW + 10) as u64);
        // the oldest ten samples were evicted
        assert_eq!(summary.percentile(0.0), Some(10.0));
    }

    #[test]
    fn long_task_timer_tracks_active_tasks() {
        let ltt = SimpleMeterFactory::new()
            .new_long_task_timer(&id(MeterKind::LongTaskTimer), &DistributionStatisticConfig::none());
        let first = ltt.start_task();
        let second = ltt.start_task();
        assert_ne!(first, second);
        assert_eq!(ltt.active_tasks(), 2);
        assert!(ltt.max() <= ltt.duration());

        assert!(ltt.stop_task(first).is_some());
        assert!(ltt.stop_task(first).is_none());
        assert_eq!(ltt.active_tasks(), 1);
    }
}
