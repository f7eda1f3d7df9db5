use std::fmt;
use std::sync::Arc;

use mensura_commons::mensura_info;

use crate::{Event, ObservationContext, ObservationHandler};

type Consumer = Arc<dyn Fn(&str) + Send + Sync>;
type Supports = Arc<dyn Fn(&ObservationContext) -> bool + Send + Sync>;

/// Publishes every lifecycle callback as a line of text.
///
/// Lines look like `START - name='http', ...`. By default they are logged at
/// info level.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use mensura_observation::{Observation, ObservationRegistry, ObservationTextPublisher};
///
/// let lines = Arc::new(Mutex::new(Vec::new()));
/// let sink = lines.clone();
/// let registry = ObservationRegistry::create();
/// registry.observation_config().observation_handler(ObservationTextPublisher::with_consumer(
///     move |line: &str| sink.lock().unwrap().push(line.to_string()),
/// ));
///
/// Observation::start_new("job", Some(&registry)).stop();
/// assert_eq!(lines.lock().unwrap().len(), 2);
/// ```
#[derive(Clone)]
pub struct ObservationTextPublisher {
    consumer: Consumer,
    supports: Supports,
}

impl ObservationTextPublisher {
    /// A publisher logging every observation.
    pub fn new() -> Self {
        Self::with_consumer(|line: &str| {
            mensura_info!(name: "ObservationTextPublisher.Publish", line = line);
        })
    }

    /// A publisher handing every line to `consumer`.
    pub fn with_consumer<C>(consumer: C) -> Self
    where
        C: Fn(&str) + Send + Sync + 'static,
    {
        ObservationTextPublisher {
            consumer: Arc::new(consumer),
            supports: Arc::new(|_| true),
        }
    }

    /// Restricts the observations this publisher handles.
    pub fn supporting<F>(mut self, supports: F) -> Self
    where
        F: Fn(&ObservationContext) -> bool + Send + Sync + 'static,
    {
        self.supports = Arc::new(supports);
        self
    }

    fn publish(&self, prefix: &str, context: &ObservationContext) {
        (self.consumer)(&format!("{:<5} - {}", prefix, context));
    }
}

impl Default for ObservationTextPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObservationTextPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ObservationTextPublisher")
    }
}

impl ObservationHandler for ObservationTextPublisher {
    fn on_start(&self, context: &mut ObservationContext) {
        self.publish("START", context);
    }

    fn on_error(&self, context: &mut ObservationContext) {
        self.publish("ERROR", context);
    }

    fn on_event(&self, event: &Event, context: &mut ObservationContext) {
        (self.consumer)(&format!("EVENT - {} - {}", event, context));
    }

    fn on_scope_opened(&self, context: &mut ObservationContext) {
        self.publish("OPEN", context);
    }

    fn on_scope_closed(&self, context: &mut ObservationContext) {
        self.publish("CLOSE", context);
    }

    fn on_scope_reset(&self, context: &mut ObservationContext) {
        self.publish("RESET", context);
    }

    fn on_stop(&self, context: &mut ObservationContext) {
        self.publish("STOP", context);
    }

    fn supports_context(&self, context: &ObservationContext) -> bool {
        (self.supports)(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Observation, ObservationRegistry};
    use std::sync::Mutex;

    #[test]
    fn publishes_each_callback() {
        let lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = lines.clone();
        let registry = ObservationRegistry::create();
        registry.observation_config().observation_handler(
            ObservationTextPublisher::with_consumer(move |line: &str| {
                sink.lock().unwrap().push(line.to_string())
            })
            .supporting(|ctx| ctx.name() != "hidden"),
        );

        let observation = Observation::start_new("job", Some(&registry));
        observation.scoped(|| {
            observation.event(Event::of("retry"));
        });
        observation.stop();
        Observation::start_new("hidden", Some(&registry)).stop();

        let lines = lines.lock().unwrap();
        let prefixes: Vec<_> = lines.iter().map(|l| l.split(" - ").next().unwrap().trim()).collect();
        assert_eq!(prefixes, vec!["START", "OPEN", "EVENT", "CLOSE", "STOP"]);
        assert!(lines[2].starts_with("EVENT - event.name='retry' - name='job'"));
    }
}
