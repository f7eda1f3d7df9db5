use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{same_core, TimerCore};
use crate::{DistributionStatisticConfig, Id, MeterKind, MeterRegistry, MeterResult, Tag, Tags};

/// Measures the latency and frequency of short-running events.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use mensura::{MeterRegistry, Timer};
///
/// let registry = MeterRegistry::simple();
/// let timer = Timer::builder("http.server.requests")
///     .tag("uri", "/orders")
///     .publish_percentiles([0.5, 0.99])
///     .register(&registry)
///     .unwrap();
///
/// timer.record(Duration::from_millis(12));
/// let sample = Timer::start();
/// sample.stop(&timer);
/// assert_eq!(timer.count(), 2);
/// ```
#[derive(Clone, Debug)]
pub struct Timer {
    id: Arc<Id>,
    core: Arc<dyn TimerCore>,
}

impl Timer {
    /// Starts building a timer named `name`.
    pub fn builder(name: impl Into<Cow<'static, str>>) -> TimerBuilder {
        TimerBuilder {
            name: name.into(),
            tags: Tags::empty(),
            description: None,
            config: DistributionStatisticConfig::none(),
        }
    }

    /// Starts a sample to be recorded into a timer later.
    pub fn start() -> TimerSample {
        TimerSample {
            started: Instant::now(),
        }
    }

    pub(crate) fn new(id: Id, core: Arc<dyn TimerCore>) -> Self {
        Timer {
            id: Arc::new(id),
            core,
        }
    }

    /// The id the timer was registered under.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Records one event of the given duration.
    pub fn record(&self, duration: Duration) {
        self.core.record(duration);
    }

    /// Runs `f` and records how long it took, also when it panics.
    pub fn record_fn<T>(&self, f: impl FnOnce() -> T) -> T {
        let _recording = RecordOnDrop {
            timer: self,
            started: Instant::now(),
        };
        f()
    }

    /// Number of recorded events.
    pub fn count(&self) -> u64 {
        self.core.count()
    }

    /// Sum of the recorded durations.
    pub fn total_time(&self) -> Duration {
        self.core.total_time()
    }

    /// Longest recorded duration.
    pub fn max(&self) -> Duration {
        self.core.max()
    }

    /// Average duration, zero before the first event.
    pub fn mean(&self) -> Duration {
        match u32::try_from(self.count()) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total_time() / count,
            Err(_) => Duration::from_secs_f64(self.total_time().as_secs_f64() / self.count() as f64),
        }
    }

    /// The `phi` percentile of recent durations, when the backend computes
    /// percentiles for this timer.
    pub fn percentile(&self, phi: f64) -> Option<Duration> {
        self.core.percentile(phi)
    }

    /// Whether this timer discards recordings.
    pub fn is_noop(&self) -> bool {
        self.core.is_noop()
    }

    pub(crate) fn close(&self) {
        self.core.close();
    }
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        same_core(&self.core, &other.core)
    }
}

struct RecordOnDrop<'a> {
    timer: &'a Timer,
    started: Instant,
}

impl Drop for RecordOnDrop<'_> {
    fn drop(&mut self) {
        self.timer.record(self.started.elapsed());
    }
}

/// A started measurement, recorded into a [`Timer`] when stopped.
#[derive(Clone, Copy, Debug)]
pub struct TimerSample {
    started: Instant,
}

impl TimerSample {
    /// Records the time elapsed since the sample started into `timer`.
    pub fn stop(self, timer: &Timer) -> Duration {
        let elapsed = self.started.elapsed();
        timer.record(elapsed);
        elapsed
    }

    /// Time elapsed since the sample started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Builder of a [`Timer`].
#[derive(Clone, Debug)]
pub struct TimerBuilder {
    name: Cow<'static, str>,
    tags: Tags,
    description: Option<Cow<'static, str>>,
    config: DistributionStatisticConfig,
}

impl TimerBuilder {
    /// Adds a tag.
    pub fn tag(mut self, key: impl Into<Cow<'static, str>>, value: impl Into<Cow<'static, str>>) -> Self {
        self.tags = self.tags.and(Tag::new(key, value));
        self
    }

    /// Adds tags.
    pub fn tags(mut self, tags: Tags) -> Self {
        self.tags = self.tags.concat(&tags);
        self
    }

    /// Sets the description.
    pub fn description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Publishes the given percentiles, each in `[0, 1]`, as gauges named
    /// `<name>.percentile` tagged with `phi`.
    pub fn publish_percentiles(mut self, percentiles: impl Into<Vec<f64>>) -> Self {
        self.config = self.config.with_percentiles(percentiles);
        self
    }

    /// Publishes a percentile histogram.
    pub fn publish_percentile_histogram(mut self, enabled: bool) -> Self {
        self.config = self.config.with_percentile_histogram(enabled);
        self
    }

    /// Service level objective boundaries.
    pub fn service_level_objectives(mut self, slos: &[Duration]) -> Self {
        let nanos: Vec<f64> = slos.iter().map(|d| d.as_nanos() as f64).collect();
        self.config = self.config.with_service_level_objectives(nanos);
        self
    }

    /// The shortest duration expected to be recorded.
    pub fn minimum_expected_value(mut self, min: Duration) -> Self {
        self.config = self.config.with_minimum_expected_value(min.as_nanos() as f64);
        self
    }

    /// The longest duration expected to be recorded.
    pub fn maximum_expected_value(mut self, max: Duration) -> Self {
        self.config = self.config.with_maximum_expected_value(max.as_nanos() as f64);
        self
    }

    /// How long samples are kept for decaying statistics.
    pub fn distribution_statistic_expiry(mut self, expiry: Duration) -> Self {
        self.config = self.config.with_expiry(expiry);
        self
    }

    /// Number of rotating buffers over the expiry window.
    pub fn distribution_statistic_buffer_length(mut self, buffer_length: u32) -> Self {
        self.config = self.config.with_buffer_length(buffer_length);
        self
    }

    /// Registers the timer, or returns the one already registered under the
    /// same id.
    pub fn register(self, registry: &MeterRegistry) -> MeterResult<Timer> {
        let mut id = Id::new(self.name, self.tags, MeterKind::Timer).with_base_unit("seconds");
        if let Some(description) = self.description {
            id = id.with_description(description);
        }
        registry.register(id, Some(self.config), |factory, id, config| {
            Timer::new(id.clone(), factory.new_timer(id, config))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn record_fn_records_also_on_panic() {
        let registry = MeterRegistry::simple();
        let timer = Timer::builder("work").register(&registry).unwrap();

        assert_eq!(timer.record_fn(|| 42), 42);
        let result = panic::catch_unwind(AssertUnwindSafe(|| timer.record_fn(|| panic!("boom"))));
        assert!(result.is_err());
        assert_eq!(timer.count(), 2);
    }

    #[test]
    fn mean_and_max() {
        let registry = MeterRegistry::simple();
        let timer = Timer::builder("work").register(&registry).unwrap();
        assert_eq!(timer.mean(), Duration::ZERO);

        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(30));
        assert_eq!(timer.mean(), Duration::from_millis(20));
        assert_eq!(timer.max(), Duration::from_millis(30));
        assert_eq!(timer.id().base_unit(), Some("seconds"));
    }

    #[test]
    fn sample_records_elapsed_time() {
        let registry = MeterRegistry::simple();
        let timer = Timer::builder("work").register(&registry).unwrap();
        let sample = Timer::start();
        let elapsed = sample.stop(&timer);
        assert_eq!(timer.count(), 1);
        assert_eq!(timer.total_time(), elapsed);
    }
}
