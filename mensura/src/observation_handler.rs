use mensura_commons::mensura_warn;
use mensura_observation::{Event, ObservationContext, ObservationError, ObservationHandler};

use crate::{
    Counter, LongTaskSample, LongTaskTimer, MeterRegistry, MeterResult, Tag, Tags, Timer,
    TimerSample,
};

/// Turns observations into meters.
///
/// For an observation named `name`, with its low cardinality key-values as
/// tags:
///
/// * a `<name>.active` long task timer tracks it while it runs,
/// * every event increments a `<name>.<event name>` counter,
/// * stopping records the `name` timer, additionally tagged `error` with the
///   kind of the recorded error or `none`.
///
/// # Examples
///
/// ```
/// use mensura::{DefaultMeterObservationHandler, MeterRegistry};
/// use mensura_observation::{Observation, ObservationRegistry};
///
/// let meters = MeterRegistry::simple();
/// let observations = ObservationRegistry::create();
/// observations
///     .observation_config()
///     .observation_handler(DefaultMeterObservationHandler::new(meters.clone()));
///
/// Observation::create_not_started("orders.fetch", Some(&observations))
///     .low_cardinality_key_value("source", "db")
///     .observe(|| { /* fetch orders */ });
///
/// let timer = meters.get("orders.fetch").tag("error", "none").timer().unwrap();
/// assert_eq!(timer.count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct DefaultMeterObservationHandler {
    registry: MeterRegistry,
}

// Per-observation state kept in the context between start and stop.
#[derive(Debug)]
struct Samples {
    sample: TimerSample,
    long_task: Option<LongTaskSample>,
}

impl DefaultMeterObservationHandler {
    /// Create a new handler registering meters in `registry`.
    pub fn new(registry: MeterRegistry) -> Self {
        DefaultMeterObservationHandler { registry }
    }

    fn tags(context: &ObservationContext) -> Tags {
        context.low_cardinality_key_values().clone()
    }
}

fn warn_on_failure<T>(name: &str, result: MeterResult<T>) -> Option<T> {
    match result {
        Ok(meter) => Some(meter),
        Err(err) => {
            mensura_warn!(
                name: "DefaultMeterObservationHandler.MeterUnavailable",
                meter_name = name,
                reason = format!("{}", err)
            );
            None
        }
    }
}

/// The leading identifier of the error's debug output, e.g. the struct or
/// variant name.
fn error_kind(error: Option<&ObservationError>) -> String {
    let Some(error) = error else {
        return "none".to_owned();
    };
    let debug = format!("{:?}", error);
    let kind: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if kind.is_empty() {
        "error".to_owned()
    } else {
        kind
    }
}

impl ObservationHandler for DefaultMeterObservationHandler {
    fn on_start(&self, context: &mut ObservationContext) {
        let name = format!("{}.active", context.name());
        let long_task = warn_on_failure(
            &name,
            LongTaskTimer::builder(name.clone())
                .tags(Self::tags(context))
                .register(&self.registry),
        )
        .map(|timer| timer.start());
        context.put(Samples {
            sample: Timer::start(),
            long_task,
        });
    }

    fn on_event(&self, event: &Event, context: &mut ObservationContext) {
        let name = format!("{}.{}", context.name(), event.name());
        let counter = Counter::builder(name.clone())
            .tags(Self::tags(context))
            .register(&self.registry);
        if let Some(counter) = warn_on_failure(&name, counter) {
            counter.increment();
        }
    }

    fn on_stop(&self, context: &mut ObservationContext) {
        let Some(samples) = context.remove::<Samples>() else {
            return;
        };
        if let Some(long_task) = samples.long_task {
            long_task.stop();
        }
        let name = context.name().to_owned();
        let tags = Self::tags(context).and(Tag::new("error", error_kind(context.error())));
        let timer = Timer::builder(name.clone())
            .tags(tags)
            .register(&self.registry);
        if let Some(timer) = warn_on_failure(&name, timer) {
            samples.sample.stop(&timer);
        }
    }

    fn supports_context(&self, _context: &ObservationContext) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mensura_observation::{Observation, ObservationRegistry};
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;

    fn registries() -> (MeterRegistry, ObservationRegistry) {
        let meters = MeterRegistry::simple();
        let observations = ObservationRegistry::create();
        observations
            .observation_config()
            .observation_handler(DefaultMeterObservationHandler::new(meters.clone()));
        (meters, observations)
    }

    #[test]
    fn records_timer_long_task_and_events() {
        let (meters, observations) = registries();
        let observation = Observation::create_not_started("orders.fetch", Some(&observations));
        observation.low_cardinality_key_value("source", "db");
        observation.start();

        let active = meters.get("orders.fetch.active").long_task_timer().unwrap();
        assert_eq!(active.id().tag("source"), Some("db"));
        assert_eq!(active.active_tasks(), 1);

        observation.event(Event::of("cache.miss"));
        observation.event(Event::of("cache.miss"));
        observation.stop();

        assert_eq!(active.active_tasks(), 0);
        let misses = meters.get("orders.fetch.cache.miss").counter().unwrap();
        assert_eq!(misses.count(), 2.0);
        let timer = meters
            .get("orders.fetch")
            .tag("source", "db")
            .tag("error", "none")
            .timer()
            .unwrap();
        assert_eq!(timer.count(), 1);
    }

    #[test]
    fn tags_the_timer_with_the_error_kind() {
        let (meters, observations) = registries();
        let observation = Observation::create_not_started("jobs.run", Some(&observations));
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            observation.observe(|| panic!("boom"));
        }));
        assert!(result.is_err());

        let timer = meters.get("jobs.run").timer().unwrap();
        assert_eq!(timer.id().tag("error"), Some("PanicError"));
    }

    #[derive(Debug)]
    struct Timeout;

    impl std::fmt::Display for Timeout {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("timed out")
        }
    }

    impl std::error::Error for Timeout {}

    #[test]
    fn error_kind_names_the_error_type() {
        let timeout: ObservationError = Arc::new(Timeout);
        assert_eq!(error_kind(Some(&timeout)), "Timeout");
        assert_eq!(error_kind(None), "none");

        let plain: ObservationError =
            Arc::from(Box::<dyn std::error::Error + Send + Sync>::from("plain"));
        assert_eq!(error_kind(Some(&plain)), "error");
    }

    #[test]
    fn meter_conflicts_do_not_break_the_observation() {
        let (meters, observations) = registries();
        meters
            .counter("jobs.run", Tags::of([("error", "none")]))
            .unwrap();

        Observation::create_not_started("jobs.run", Some(&observations)).observe(|| ());
        // the conflicting timer was not registered
        assert!(meters.find("jobs.run").timer().is_none());
        assert!(meters.find("jobs.run.active").long_task_timer().is_some());
    }
}
