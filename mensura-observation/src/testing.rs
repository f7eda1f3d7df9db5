//! Handlers that record the callbacks they receive, for tests.
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::{Event, ObservationContext, ObservationHandler};

/// A recorded handler callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Callback {
    /// `on_start`
    Start,
    /// `on_error`, with the error message
    Error(String),
    /// `on_event`, with the event name
    Event(String),
    /// `on_scope_opened`
    ScopeOpened,
    /// `on_scope_closed`
    ScopeClosed,
    /// `on_scope_reset`
    ScopeReset,
    /// `on_stop`
    Stop,
}

/// One callback as seen by a [`RecordingHandler`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recorded {
    /// Label of the handler that received it.
    pub handler: String,
    /// The callback.
    pub callback: Callback,
    /// Name of the observation's context at the time of the callback.
    pub observation: String,
}

/// A shared, append-only log of callbacks, in the order they happened.
///
/// Several handlers can write to one log to assert ordering across handlers.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    records: Arc<Mutex<Vec<Recorded>>>,
}

impl EventLog {
    /// An empty log.
    pub fn new() -> Self {
        EventLog::default()
    }

    /// Every record so far.
    pub fn records(&self) -> Vec<Recorded> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// `(handler, callback)` pairs, in order.
    pub fn callbacks(&self) -> Vec<(String, Callback)> {
        self.records()
            .into_iter()
            .map(|r| (r.handler, r.callback))
            .collect()
    }

    /// Callbacks received for observations named `observation`, in order.
    pub fn callbacks_for(&self, observation: &str) -> Vec<Callback> {
        self.records()
            .into_iter()
            .filter(|r| r.observation == observation)
            .map(|r| r.callback)
            .collect()
    }

    /// Forgets every record.
    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }

    fn push(&self, handler: &str, callback: Callback, context: &ObservationContext) {
        if let Ok(mut records) = self.records.lock() {
            records.push(Recorded {
                handler: handler.to_string(),
                callback,
                observation: context.name().to_string(),
            });
        }
    }
}

type SupportsFn = Arc<dyn Fn(&ObservationContext) -> bool + Send + Sync>;

/// An [`ObservationHandler`] writing every callback to an [`EventLog`].
///
/// Supports every context unless narrowed with
/// [`supporting`](RecordingHandler::supporting).
#[derive(Clone)]
pub struct RecordingHandler {
    label: String,
    log: EventLog,
    supports: SupportsFn,
}

impl RecordingHandler {
    /// Create a handler labelled `label`, writing to `log`.
    pub fn new(label: impl Into<String>, log: &EventLog) -> Self {
        RecordingHandler {
            label: label.into(),
            log: log.clone(),
            supports: Arc::new(|_| true),
        }
    }

    /// Restricts the contexts this handler supports.
    pub fn supporting<F>(mut self, supports: F) -> Self
    where
        F: Fn(&ObservationContext) -> bool + Send + Sync + 'static,
    {
        self.supports = Arc::new(supports);
        self
    }

    fn record(&self, callback: Callback, context: &ObservationContext) {
        self.log.push(&self.label, callback, context);
    }
}

impl fmt::Debug for RecordingHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingHandler")
            .field("label", &self.label)
            .finish()
    }
}

impl ObservationHandler for RecordingHandler {
    fn on_start(&self, context: &mut ObservationContext) {
        self.record(Callback::Start, context);
    }

    fn on_error(&self, context: &mut ObservationContext) {
        let message = context
            .error()
            .map(|e| e.to_string())
            .unwrap_or_default();
        self.record(Callback::Error(message), context);
    }

    fn on_event(&self, event: &Event, context: &mut ObservationContext) {
        self.record(Callback::Event(event.name().to_string()), context);
    }

    fn on_scope_opened(&self, context: &mut ObservationContext) {
        self.record(Callback::ScopeOpened, context);
    }

    fn on_scope_closed(&self, context: &mut ObservationContext) {
        self.record(Callback::ScopeClosed, context);
    }

    fn on_scope_reset(&self, context: &mut ObservationContext) {
        self.record(Callback::ScopeReset, context);
    }

    fn on_stop(&self, context: &mut ObservationContext) {
        self.record(Callback::Stop, context);
    }

    fn supports_context(&self, context: &ObservationContext) -> bool {
        (self.supports)(context)
    }
}
