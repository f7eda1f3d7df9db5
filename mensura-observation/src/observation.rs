use std::borrow::Cow;
use std::cell::RefCell;
use std::error::Error;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use mensura_commons::{mensura_debug, mensura_warn, KeyValue, KeyValues};

use crate::convention::non_blank;
use crate::error::PanicError;
use crate::scope;
use crate::{
    Event, ObservationContext, ObservationConvention, ObservationError, ObservationHandler,
    ObservationRegistry, Scope,
};

static NEXT_OBSERVATION_ID: AtomicU64 = AtomicU64::new(1);

const NOT_STARTED: u8 = 0;
const STARTED: u8 = 1;
const STOPPED: u8 = 2;

thread_local! {
    // ids of the observations whose context is held on this thread
    static HELD_CONTEXTS: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Lifecycle state of an [`Observation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObservationState {
    /// Created, handlers not yet notified.
    NotStarted,
    /// `start` was called.
    Started,
    /// `stop` was called; further mutation is ignored.
    Stopped,
}

/// A unit of work whose lifecycle is broadcast to the handlers of an
/// [`ObservationRegistry`].
///
/// An observation is either *live* or the shared *noop* observation. Creation
/// yields the noop observation when there is no registry, when a predicate
/// rejects the observation, or when no handler supports its context. Every
/// operation on the noop observation does nothing, which keeps disabled
/// instrumentation cheap.
///
/// Cloning is cheap; clones refer to the same observation and may be sent to
/// other threads. Scopes, however, are per thread.
///
/// # Examples
///
/// ```
/// use mensura_observation::{Observation, ObservationRegistry};
///
/// let registry = ObservationRegistry::create();
/// let total = Observation::create_not_started("sum", Some(&registry))
///     .low_cardinality_key_value("kind", "demo")
///     .observe(|| (1..=10).sum::<u32>());
/// assert_eq!(total, 55);
/// ```
#[derive(Clone, Default)]
pub struct Observation {
    inner: Option<Arc<ObservationInner>>,
}

struct ObservationInner {
    id: u64,
    registry: ObservationRegistry,
    context: Mutex<ObservationContext>,
    convention: Mutex<Option<Arc<dyn ObservationConvention>>>,
    handlers: Vec<Arc<dyn ObservationHandler>>,
    state: AtomicU8,
}

impl Observation {
    /// The noop observation.
    pub const fn noop() -> Self {
        Observation { inner: None }
    }

    /// Whether this is the noop observation.
    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    /// Creates an observation named `name` with an empty context.
    pub fn create_not_started(
        name: impl Into<Cow<'static, str>>,
        registry: Option<&ObservationRegistry>,
    ) -> Self {
        Self::create_not_started_with_context(name, ObservationContext::new, registry)
    }

    /// Creates an observation named `name` with the context built by
    /// `context`.
    ///
    /// `context` is only invoked when the registry can produce a live
    /// observation.
    pub fn create_not_started_with_context<F>(
        name: impl Into<Cow<'static, str>>,
        context: F,
        registry: Option<&ObservationRegistry>,
    ) -> Self
    where
        F: FnOnce() -> ObservationContext,
    {
        let Some(registry) = live_registry(registry) else {
            return Self::noop();
        };
        let mut context = context();
        context.set_name(name);
        let config = registry.observation_config();
        if !config.is_observation_enabled(context.name(), &context) {
            return Self::noop();
        }
        let convention = config.first_matching_convention(&context);
        Self::live(registry, context, convention)
    }

    /// Creates an observation whose name and key-values come from a
    /// convention.
    ///
    /// `custom` wins when given and it supports the context. Otherwise the
    /// first convention registered on the registry that supports the context
    /// is used, falling back to `default`.
    pub fn create_not_started_with_convention<F>(
        custom: Option<Arc<dyn ObservationConvention>>,
        default: Arc<dyn ObservationConvention>,
        context: F,
        registry: Option<&ObservationRegistry>,
    ) -> Self
    where
        F: FnOnce() -> ObservationContext,
    {
        let Some(registry) = live_registry(registry) else {
            return Self::noop();
        };
        let mut context = context();
        let config = registry.observation_config();
        let convention = match custom {
            Some(custom) if custom.supports_context(&context) => custom,
            Some(_) => {
                mensura_warn!(
                    name: "Observation.ConventionNotSupported",
                    observation_name = context.name()
                );
                config.observation_convention_for(&context, default)
            }
            None => config.observation_convention_for(&context, default),
        };
        if let Some(name) = non_blank(convention.name()) {
            context.set_name(name);
        }
        if !config.is_observation_enabled(context.name(), &context) {
            return Self::noop();
        }
        Self::live(registry, context, Some(convention))
    }

    /// Creates and starts an observation named `name`.
    pub fn start_new(
        name: impl Into<Cow<'static, str>>,
        registry: Option<&ObservationRegistry>,
    ) -> Self {
        let observation = Self::create_not_started(name, registry);
        observation.start();
        observation
    }

    fn live(
        registry: &ObservationRegistry,
        mut context: ObservationContext,
        convention: Option<Arc<dyn ObservationConvention>>,
    ) -> Self {
        if context.parent_observation().is_none() {
            context.set_parent_observation(registry.current_observation());
        }
        let handlers = registry.observation_config().handlers_supporting(&context);
        if handlers.is_empty() {
            mensura_debug!(
                name: "Observation.NoSupportingHandler",
                observation_name = context.name()
            );
            return Self::noop();
        }
        Observation {
            inner: Some(Arc::new(ObservationInner {
                id: NEXT_OBSERVATION_ID.fetch_add(1, Ordering::Relaxed),
                registry: registry.clone(),
                context: Mutex::new(context),
                convention: Mutex::new(convention),
                handlers,
                state: AtomicU8::new(NOT_STARTED),
            })),
        }
    }

    /// The current lifecycle state. The noop observation is always
    /// [`ObservationState::NotStarted`].
    pub fn state(&self) -> ObservationState {
        match self.inner.as_ref().map(|i| i.state.load(Ordering::Acquire)) {
            Some(STARTED) => ObservationState::Started,
            Some(STOPPED) => ObservationState::Stopped,
            _ => ObservationState::NotStarted,
        }
    }

    /// Runs `f` with a view of the context.
    ///
    /// Returns `None` for the noop observation, and when called from a
    /// handler callback of this same observation on this thread: the handler
    /// already holds the context.
    pub fn with_context<R>(&self, f: impl FnOnce(&ObservationContext) -> R) -> Option<R> {
        let ctx = self.inner.as_ref()?.enter_context("with_context")?;
        Some(f(&ctx))
    }

    /// Sets the contextual name.
    pub fn contextual_name(&self, contextual_name: impl Into<Cow<'static, str>>) -> &Self {
        self.mutate("contextual_name", |ctx| {
            ctx.set_contextual_name(Some(contextual_name));
        })
    }

    /// Sets the parent observation explicitly.
    pub fn parent_observation(&self, parent: Option<&Observation>) -> &Self {
        self.mutate("parent_observation", |ctx| {
            ctx.set_parent_observation(parent.cloned());
        })
    }

    /// Adds a low cardinality key-value.
    pub fn low_cardinality_key_value(
        &self,
        key: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
    ) -> &Self {
        self.mutate("low_cardinality_key_value", |ctx| {
            ctx.add_low_cardinality_key_value(KeyValue::new(key, value));
        })
    }

    /// Adds low cardinality key-values.
    pub fn low_cardinality_key_values(&self, key_values: KeyValues) -> &Self {
        self.mutate("low_cardinality_key_values", |ctx| {
            ctx.add_low_cardinality_key_values(key_values);
        })
    }

    /// Adds a high cardinality key-value.
    pub fn high_cardinality_key_value(
        &self,
        key: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
    ) -> &Self {
        self.mutate("high_cardinality_key_value", |ctx| {
            ctx.add_high_cardinality_key_value(KeyValue::new(key, value));
        })
    }

    /// Adds high cardinality key-values.
    pub fn high_cardinality_key_values(&self, key_values: KeyValues) -> &Self {
        self.mutate("high_cardinality_key_values", |ctx| {
            ctx.add_high_cardinality_key_values(key_values);
        })
    }

    /// Replaces the convention, if it supports this observation's context.
    pub fn observation_convention(&self, convention: Arc<dyn ObservationConvention>) -> &Self {
        if let Some(inner) = self.inner_unless_stopped("observation_convention") {
            let supported = inner
                .enter_context("observation_convention")
                .is_some_and(|ctx| convention.supports_context(&ctx));
            if supported {
                *inner
                    .convention
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(convention);
            }
        }
        self
    }

    /// Records an error and notifies handlers' `on_error`.
    ///
    /// The state does not change; the observation still has to be stopped.
    pub fn error<E>(&self, error: E) -> &Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let error: ObservationError = Arc::from(error.into());
        if let Some(inner) = self.inner_unless_stopped("error") {
            let Some(mut guard) = inner.enter_context("error") else {
                return self;
            };
            let ctx = &mut *guard;
            ctx.set_error(error);
            for handler in &inner.handlers {
                handler.on_error(ctx);
            }
        }
        self
    }

    /// Signals an event to handlers' `on_event`.
    pub fn event(&self, event: Event) -> &Self {
        if let Some(inner) = self.inner_unless_stopped("event") {
            let Some(mut guard) = inner.enter_context("event") else {
                return self;
            };
            let ctx = &mut *guard;
            for handler in &inner.handlers {
                handler.on_event(&event, ctx);
            }
        }
        self
    }

    /// Starts the observation.
    ///
    /// Applies the convention's key-values and name, then notifies handlers'
    /// `on_start` in registration order. Only the first call has an effect.
    pub fn start(&self) -> &Self {
        let Some(inner) = &self.inner else {
            return self;
        };
        if !inner.transition(NOT_STARTED, STARTED) {
            mensura_debug!(name: "Observation.AlreadyStarted", observation_id = inner.id);
            return self;
        }
        let convention = inner.convention();
        let Some(mut guard) = inner.enter_context("start") else {
            return self;
        };
        let ctx = &mut *guard;
        if let Some(convention) = &convention {
            apply_key_values(convention.as_ref(), ctx);
            if let Some(name) = non_blank(convention.name()) {
                ctx.set_name(name);
            }
        }
        for handler in &inner.handlers {
            handler.on_start(ctx);
        }
        self
    }

    /// Stops the observation.
    ///
    /// Re-applies the convention's key-values and contextual name, runs the
    /// registry's filters over the context, then notifies handlers' `on_stop`
    /// in reverse registration order. Only valid once started; later calls
    /// are ignored.
    pub fn stop(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        if !inner.transition(STARTED, STOPPED) {
            mensura_warn!(
                name: "Observation.StopIgnored",
                observation_id = inner.id,
                state = format!("{:?}", self.state())
            );
            return;
        }
        let convention = inner.convention();
        let filters = inner.registry.observation_config().filters();
        if let Some(mut guard) = inner.enter_context("stop") {
            let ctx = &mut *guard;
            if let Some(convention) = &convention {
                apply_key_values(convention.as_ref(), ctx);
                if let Some(contextual_name) = non_blank(convention.contextual_name(ctx)) {
                    ctx.set_contextual_name(Some(contextual_name));
                }
            }
            for filter in &filters {
                filter.map(ctx);
            }
            for handler in inner.handlers.iter().rev() {
                handler.on_stop(ctx);
            }
        }
        scope::clear_enclosing(inner.id);
    }

    /// Opens a scope, making this observation current on the calling thread
    /// until the scope is closed.
    ///
    /// The noop observation returns the noop scope.
    pub fn open_scope(&self) -> Scope {
        match &self.inner {
            Some(inner) => scope::open(self.clone(), inner.registry.clone(), inner.id),
            None => Scope::noop(),
        }
    }

    /// The scope that was current when this observation last opened a scope
    /// on this thread, if it is still open.
    pub fn enclosing_scope(&self) -> Option<Scope> {
        self.inner
            .as_ref()
            .and_then(|inner| scope::enclosing(inner.id))
    }

    /// Starts the observation, runs `f` in a scope and stops the observation.
    ///
    /// A panic in `f` is recorded as a [`PanicError`] before the observation
    /// stops, then resumed.
    pub fn observe<T>(&self, f: impl FnOnce() -> T) -> T {
        self.start();
        let scope = self.open_scope();
        let result = panic::catch_unwind(AssertUnwindSafe(f));
        scope.close();
        match result {
            Ok(value) => {
                self.stop();
                value
            }
            Err(payload) => {
                self.error(PanicError::from_payload(payload.as_ref()));
                self.stop();
                panic::resume_unwind(payload)
            }
        }
    }

    /// Like [`observe`](Observation::observe), additionally recording an
    /// `Err` returned by `f` as the observation's error.
    pub fn observe_result<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: Error + Clone + Send + Sync + 'static,
    {
        self.observe(|| {
            let result = f();
            if let Err(error) = &result {
                self.error(error.clone());
            }
            result
        })
    }

    /// Runs `f` in a scope of this observation without starting or stopping
    /// it.
    ///
    /// A panic in `f` is recorded as a [`PanicError`], then resumed.
    pub fn scoped<T>(&self, f: impl FnOnce() -> T) -> T {
        let scope = self.open_scope();
        let result = panic::catch_unwind(AssertUnwindSafe(f));
        scope.close();
        match result {
            Ok(value) => value,
            Err(payload) => {
                self.error(PanicError::from_payload(payload.as_ref()));
                panic::resume_unwind(payload)
            }
        }
    }

    /// Runs `f` in a scope of `parent` when given, otherwise runs it directly.
    pub fn try_scoped<T>(parent: Option<&Observation>, f: impl FnOnce() -> T) -> T {
        match parent {
            Some(parent) => parent.scoped(f),
            None => f(),
        }
    }

    pub(crate) fn notify_scope_opened(&self) {
        let Some(inner) = self.inner.as_deref() else {
            return;
        };
        if let Some(mut ctx) = inner.enter_context("scope_opened") {
            for handler in &inner.handlers {
                handler.on_scope_opened(&mut *ctx);
            }
        }
    }

    pub(crate) fn notify_scope_closed(&self) {
        let Some(inner) = self.inner.as_deref() else {
            return;
        };
        if let Some(mut ctx) = inner.enter_context("scope_closed") {
            for handler in inner.handlers.iter().rev() {
                handler.on_scope_closed(&mut *ctx);
            }
        }
    }

    pub(crate) fn notify_scope_reset(&self) {
        let Some(inner) = self.inner.as_deref() else {
            return;
        };
        if let Some(mut ctx) = inner.enter_context("scope_reset") {
            for handler in &inner.handlers {
                handler.on_scope_reset(&mut *ctx);
            }
        }
    }

    fn mutate(&self, op: &'static str, f: impl FnOnce(&mut ObservationContext)) -> &Self {
        if let Some(mut ctx) = self.inner_unless_stopped(op).and_then(|i| i.enter_context(op)) {
            f(&mut *ctx);
        }
        self
    }

    fn inner_unless_stopped(&self, op: &'static str) -> Option<&ObservationInner> {
        let inner = self.inner.as_deref()?;
        if inner.state.load(Ordering::Acquire) == STOPPED {
            mensura_debug!(name: "Observation.MutationAfterStop", observation_id = inner.id, operation = op);
            return None;
        }
        Some(inner)
    }
}

fn live_registry(registry: Option<&ObservationRegistry>) -> Option<&ObservationRegistry> {
    registry.filter(|r| !r.is_noop())
}

fn apply_key_values(convention: &dyn ObservationConvention, ctx: &mut ObservationContext) {
    let low = convention.low_cardinality_key_values(ctx);
    let high = convention.high_cardinality_key_values(ctx);
    ctx.add_low_cardinality_key_values(low)
        .add_high_cardinality_key_values(high);
}

impl ObservationInner {
    /// Locks the context, or returns `None` if this thread already holds it.
    ///
    /// A poisoned context is recovered; a panicking handler leaves it usable.
    fn enter_context(&self, op: &'static str) -> Option<HeldContext<'_>> {
        if HELD_CONTEXTS.with(|held| held.borrow().contains(&self.id)) {
            mensura_warn!(
                name: "Observation.ReentrantContextAccess",
                observation_id = self.id,
                operation = op
            );
            return None;
        }
        let guard = self
            .context
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        HELD_CONTEXTS.with(|held| held.borrow_mut().push(self.id));
        Some(HeldContext { guard, id: self.id })
    }

    fn convention(&self) -> Option<Arc<dyn ObservationConvention>> {
        self.convention
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

// The context of one observation, held by the current thread.
struct HeldContext<'a> {
    guard: MutexGuard<'a, ObservationContext>,
    id: u64,
}

impl Deref for HeldContext<'_> {
    type Target = ObservationContext;

    fn deref(&self) -> &ObservationContext {
        &self.guard
    }
}

impl DerefMut for HeldContext<'_> {
    fn deref_mut(&mut self) -> &mut ObservationContext {
        &mut self.guard
    }
}

impl Drop for HeldContext<'_> {
    fn drop(&mut self) {
        // runs during unwinding too, so a panicking handler does not leave
        // the id behind
        let _ = HELD_CONTEXTS.try_with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|id| *id == self.id) {
                held.remove(pos);
            }
        });
    }
}

impl PartialEq for Observation {
    fn eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for Observation {}

impl fmt::Debug for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            None => f.write_str("NoopObservation"),
            Some(inner) => f
                .debug_struct("Observation")
                .field("id", &inner.id)
                .field("state", &self.state())
                .field("handlers", &inner.handlers)
                .finish(),
        }
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(inner) = &self.inner else {
            return f.write_str("{NoopObservation}");
        };
        // the context may be locked by a handler running on this thread
        match inner.context.try_lock() {
            Ok(ctx) => write!(f, "{{{}}}", ctx),
            Err(TryLockError::Poisoned(poisoned)) => write!(f, "{{{}}}", poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => write!(f, "{{id={}}}", inner.id),
        }
    }
}
