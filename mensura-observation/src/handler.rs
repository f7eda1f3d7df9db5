//! Lifecycle callbacks and composite handlers.
use std::fmt::Debug;
use std::sync::Arc;

use crate::{Event, ObservationContext};

/// Receives lifecycle callbacks for the observations it supports.
///
/// Callbacks run synchronously on the thread driving the observation and
/// receive the context mutably; a handler may keep per-observation state in it
/// through the typed entries.
///
/// Handlers are notified in registration order, except for
/// [`on_stop`](ObservationHandler::on_stop) and
/// [`on_scope_closed`](ObservationHandler::on_scope_closed) which run in
/// reverse registration order.
///
/// The context passed to a callback is the observation's own, held for the
/// duration of the callback. Reaching the same observation again from inside
/// the callback, e.g. through
/// [`ObservationRegistry::current_observation`](crate::ObservationRegistry::current_observation)
/// in [`on_scope_opened`](ObservationHandler::on_scope_opened), finds it held:
/// `with_context` returns `None` and mutations are skipped with a warning.
/// Use the `context` argument instead.
///
/// Panics raised by a callback are not caught and reach the caller of the
/// observation method that triggered it.
pub trait ObservationHandler: Send + Sync + Debug {
    /// The observation started.
    fn on_start(&self, _context: &mut ObservationContext) {}

    /// An error was recorded; it is available through
    /// [`ObservationContext::error`].
    fn on_error(&self, _context: &mut ObservationContext) {}

    /// An event was signalled.
    fn on_event(&self, _event: &Event, _context: &mut ObservationContext) {}

    /// A scope was opened and the observation became current on this thread.
    fn on_scope_opened(&self, _context: &mut ObservationContext) {}

    /// A scope was closed.
    fn on_scope_closed(&self, _context: &mut ObservationContext) {}

    /// The thread's scope chain was reset and this observation is no longer
    /// current.
    fn on_scope_reset(&self, _context: &mut ObservationContext) {}

    /// The observation stopped.
    fn on_stop(&self, _context: &mut ObservationContext) {}

    /// Whether this handler wants callbacks for `context`.
    ///
    /// Evaluated once, when the observation is created.
    fn supports_context(&self, context: &ObservationContext) -> bool;
}

/// Delegates every callback to the first handler that supports the context.
///
/// Useful when several handlers cover the same context kind and only one
/// should handle it, e.g. a dedicated handler followed by a generic fallback.
#[derive(Debug, Default)]
pub struct FirstMatchingCompositeHandler {
    handlers: Vec<Arc<dyn ObservationHandler>>,
}

impl FirstMatchingCompositeHandler {
    /// Create a new composite over `handlers`, in priority order.
    pub fn new(handlers: Vec<Arc<dyn ObservationHandler>>) -> Self {
        FirstMatchingCompositeHandler { handlers }
    }

    /// Appends a handler with the lowest priority.
    pub fn with_handler<H: ObservationHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// The wrapped handlers.
    pub fn handlers(&self) -> &[Arc<dyn ObservationHandler>] {
        &self.handlers
    }

    fn first(&self, context: &ObservationContext) -> Option<&Arc<dyn ObservationHandler>> {
        self.handlers.iter().find(|h| h.supports_context(context))
    }
}

impl ObservationHandler for FirstMatchingCompositeHandler {
    fn on_start(&self, context: &mut ObservationContext) {
        if let Some(handler) = self.first(context) {
            handler.on_start(context);
        }
    }

    fn on_error(&self, context: &mut ObservationContext) {
        if let Some(handler) = self.first(context) {
            handler.on_error(context);
        }
    }

    fn on_event(&self, event: &Event, context: &mut ObservationContext) {
        if let Some(handler) = self.first(context) {
            handler.on_event(event, context);
        }
    }

    fn on_scope_opened(&self, context: &mut ObservationContext) {
        if let Some(handler) = self.first(context) {
            handler.on_scope_opened(context);
        }
    }

    fn on_scope_closed(&self, context: &mut ObservationContext) {
        if let Some(handler) = self.first(context) {
            handler.on_scope_closed(context);
        }
    }

    fn on_scope_reset(&self, context: &mut ObservationContext) {
        if let Some(handler) = self.first(context) {
            handler.on_scope_reset(context);
        }
    }

    fn on_stop(&self, context: &mut ObservationContext) {
        if let Some(handler) = self.first(context) {
            handler.on_stop(context);
        }
    }

    fn supports_context(&self, context: &ObservationContext) -> bool {
        self.first(context).is_some()
    }
}

/// Delegates every callback to all handlers that support the context, in
/// order.
#[derive(Debug, Default)]
pub struct AllMatchingCompositeHandler {
    handlers: Vec<Arc<dyn ObservationHandler>>,
}

impl AllMatchingCompositeHandler {
    /// Create a new composite over `handlers`.
    pub fn new(handlers: Vec<Arc<dyn ObservationHandler>>) -> Self {
        AllMatchingCompositeHandler { handlers }
    }

    /// Appends a handler.
    pub fn with_handler<H: ObservationHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// The wrapped handlers.
    pub fn handlers(&self) -> &[Arc<dyn ObservationHandler>] {
        &self.handlers
    }

    fn for_each(
        &self,
        context: &mut ObservationContext,
        mut f: impl FnMut(&dyn ObservationHandler, &mut ObservationContext),
    ) {
        for handler in &self.handlers {
            if handler.supports_context(context) {
                f(handler.as_ref(), context);
            }
        }
    }
}

impl ObservationHandler for AllMatchingCompositeHandler {
    fn on_start(&self, context: &mut ObservationContext) {
        self.for_each(context, |h, ctx| h.on_start(ctx));
    }

    fn on_error(&self, context: &mut ObservationContext) {
        self.for_each(context, |h, ctx| h.on_error(ctx));
    }

    fn on_event(&self, event: &Event, context: &mut ObservationContext) {
        self.for_each(context, |h, ctx| h.on_event(event, ctx));
    }

    fn on_scope_opened(&self, context: &mut ObservationContext) {
        self.for_each(context, |h, ctx| h.on_scope_opened(ctx));
    }

    fn on_scope_closed(&self, context: &mut ObservationContext) {
        self.for_each(context, |h, ctx| h.on_scope_closed(ctx));
    }

    fn on_scope_reset(&self, context: &mut ObservationContext) {
        self.for_each(context, |h, ctx| h.on_scope_reset(ctx));
    }

    fn on_stop(&self, context: &mut ObservationContext) {
        self.for_each(context, |h, ctx| h.on_stop(ctx));
    }

    fn supports_context(&self, context: &ObservationContext) -> bool {
        self.handlers.iter().any(|h| h.supports_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Callback, EventLog, RecordingHandler};

    fn named(name: &'static str) -> ObservationContext {
        let mut ctx = ObservationContext::new();
        ctx.set_name(name);
        ctx
    }

    #[test]
    fn first_matching_delegates_to_one_handler() {
        let log = EventLog::new();
        let composite = FirstMatchingCompositeHandler::default()
            .with_handler(RecordingHandler::new("never", &log).supporting(|_| false))
            .with_handler(RecordingHandler::new("first", &log))
            .with_handler(RecordingHandler::new("second", &log));

        let mut ctx = named("op");
        assert!(composite.supports_context(&ctx));
        composite.on_start(&mut ctx);
        composite.on_stop(&mut ctx);

        assert_eq!(
            log.callbacks(),
            vec![("first".into(), Callback::Start), ("first".into(), Callback::Stop)]
        );
    }

    #[test]
    fn all_matching_skips_unsupporting_handlers() {
        let log = EventLog::new();
        let composite = AllMatchingCompositeHandler::default()
            .with_handler(RecordingHandler::new("a", &log))
            .with_handler(RecordingHandler::new("b", &log).supporting(|ctx| ctx.name() == "other"))
            .with_handler(RecordingHandler::new("c", &log));

        let mut ctx = named("op");
        composite.on_event(&Event::of("retry"), &mut ctx);

        assert_eq!(
            log.callbacks(),
            vec![
                ("a".into(), Callback::Event("retry".into())),
                ("c".into(), Callback::Event("retry".into())),
            ]
        );
    }

    #[test]
    fn empty_composites_support_nothing() {
        let ctx = named("op");
        assert!(!FirstMatchingCompositeHandler::default().supports_context(&ctx));
        assert!(!AllMatchingCompositeHandler::default().supports_context(&ctx));
    }
}
