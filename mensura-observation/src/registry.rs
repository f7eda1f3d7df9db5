use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use mensura_commons::mensura_debug;

use crate::scope;
use crate::{
    Observation, ObservationContext, ObservationConvention, ObservationFilter,
    ObservationHandler, ObservationPredicate, Scope,
};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Holds the configuration observations are created against and tracks the
/// current observation of each thread.
///
/// Cloning is cheap and yields a handle to the same registry.
///
/// # Examples
///
/// ```
/// use mensura_observation::{Observation, ObservationRegistry};
/// # use mensura_observation::{ObservationContext, ObservationHandler};
/// # #[derive(Debug)]
/// # struct PrintingHandler;
/// # impl ObservationHandler for PrintingHandler {
/// #     fn supports_context(&self, _: &ObservationContext) -> bool { true }
/// # }
///
/// let registry = ObservationRegistry::create();
/// registry.observation_config().observation_handler(PrintingHandler);
///
/// let observation = Observation::start_new("checkout", Some(&registry));
/// {
///     let scope = observation.open_scope();
///     assert!(registry.current_observation().is_some());
///     scope.close();
/// }
/// observation.stop();
/// ```
#[derive(Clone)]
pub struct ObservationRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    id: u64,
    config: ObservationConfig,
}

impl ObservationRegistry {
    /// Create a new registry with an empty configuration.
    pub fn create() -> Self {
        let id = NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed);
        mensura_debug!(name: "ObservationRegistry.Created", registry_id = id);
        ObservationRegistry {
            inner: Arc::new(RegistryInner {
                id,
                config: ObservationConfig::new(true),
            }),
        }
    }

    /// The registry that never produces live observations.
    ///
    /// Configuration changes on it are ignored and it never has a current
    /// observation.
    pub fn noop() -> Self {
        static NOOP: OnceLock<ObservationRegistry> = OnceLock::new();
        NOOP.get_or_init(|| ObservationRegistry {
            inner: Arc::new(RegistryInner {
                id: 0,
                config: ObservationConfig::new(false),
            }),
        })
        .clone()
    }

    /// Whether observations created against this registry are noops, i.e.
    /// it is the noop registry or has no handlers.
    pub fn is_noop(&self) -> bool {
        !self.inner.config.accepts_changes || !self.inner.config.has_handlers()
    }

    /// The configuration of this registry.
    pub fn observation_config(&self) -> &ObservationConfig {
        &self.inner.config
    }

    /// The observation of the innermost open scope on this thread.
    pub fn current_observation(&self) -> Option<Observation> {
        self.current_observation_scope().map(|s| s.observation())
    }

    /// The innermost open scope on this thread.
    pub fn current_observation_scope(&self) -> Option<Scope> {
        if !self.inner.config.accepts_changes {
            return None;
        }
        scope::current(self.id())
    }

    /// Replaces this thread's current scope without notifying handlers.
    ///
    /// Scopes normally manage this themselves; this is meant for propagating a
    /// scope chain into code that does not open scopes.
    pub fn set_current_observation_scope(&self, scope: Option<Scope>) {
        if self.inner.config.accepts_changes {
            scope::set_current(self.id(), scope);
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }
}

impl PartialEq for ObservationRegistry {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ObservationRegistry {}

impl fmt::Debug for ObservationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationRegistry")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Handlers, predicates, filters and conventions of a registry.
///
/// Every list keeps registration order. Observations take a snapshot of the
/// matching handlers when they are created, so registering a handler later
/// does not affect observations already in flight.
pub struct ObservationConfig {
    handlers: RwLock<Vec<Arc<dyn ObservationHandler>>>,
    predicates: RwLock<Vec<Arc<dyn ObservationPredicate>>>,
    filters: RwLock<Vec<Arc<dyn ObservationFilter>>>,
    conventions: RwLock<Vec<Arc<dyn ObservationConvention>>>,
    accepts_changes: bool,
}

impl ObservationConfig {
    fn new(accepts_changes: bool) -> Self {
        ObservationConfig {
            handlers: RwLock::new(Vec::new()),
            predicates: RwLock::new(Vec::new()),
            filters: RwLock::new(Vec::new()),
            conventions: RwLock::new(Vec::new()),
            accepts_changes,
        }
    }

    /// Registers a handler.
    pub fn observation_handler<H: ObservationHandler + 'static>(&self, handler: H) -> &Self {
        self.push(&self.handlers, Arc::new(handler), "handler")
    }

    /// Registers a predicate; all predicates must match for an observation to
    /// be created.
    pub fn observation_predicate<P: ObservationPredicate + 'static>(&self, predicate: P) -> &Self {
        self.push(&self.predicates, Arc::new(predicate), "predicate")
    }

    /// Registers a filter, applied when observations stop.
    pub fn observation_filter<F: ObservationFilter + 'static>(&self, filter: F) -> &Self {
        self.push(&self.filters, Arc::new(filter), "filter")
    }

    /// Registers a global convention, preferred over an instrumentation's
    /// default convention when it supports the context.
    pub fn observation_convention<C: ObservationConvention + 'static>(
        &self,
        convention: C,
    ) -> &Self {
        self.push(&self.conventions, Arc::new(convention), "convention")
    }

    /// Whether any handler is registered.
    pub fn has_handlers(&self) -> bool {
        !read(&self.handlers).is_empty()
    }

    /// Whether an observation named `name` with `context` passes every
    /// predicate.
    pub fn is_observation_enabled(&self, name: &str, context: &ObservationContext) -> bool {
        read(&self.predicates)
            .iter()
            .all(|predicate| predicate.test(name, context))
    }

    /// The first registered convention supporting `context`, else `default`.
    pub fn observation_convention_for(
        &self,
        context: &ObservationContext,
        default: Arc<dyn ObservationConvention>,
    ) -> Arc<dyn ObservationConvention> {
        self.first_matching_convention(context).unwrap_or(default)
    }

    pub(crate) fn first_matching_convention(
        &self,
        context: &ObservationContext,
    ) -> Option<Arc<dyn ObservationConvention>> {
        read(&self.conventions)
            .iter()
            .find(|c| c.supports_context(context))
            .cloned()
    }

    pub(crate) fn handlers_supporting(
        &self,
        context: &ObservationContext,
    ) -> Vec<Arc<dyn ObservationHandler>> {
        read(&self.handlers)
            .iter()
            .filter(|h| h.supports_context(context))
            .cloned()
            .collect()
    }

    pub(crate) fn filters(&self) -> Vec<Arc<dyn ObservationFilter>> {
        read(&self.filters).clone()
    }

    fn push<T: ?Sized>(&self, list: &RwLock<Vec<Arc<T>>>, item: Arc<T>, kind: &'static str) -> &Self {
        if !self.accepts_changes {
            mensura_debug!(name: "ObservationConfig.IgnoredOnNoop", kind = kind);
            return self;
        }
        list.write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(item);
        self
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl fmt::Debug for ObservationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationConfig")
            .field("handlers", &read(&self.handlers).len())
            .field("predicates", &read(&self.predicates).len())
            .field("filters", &read(&self.filters).len())
            .field("conventions", &read(&self.conventions).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EventLog, RecordingHandler};

    #[test]
    fn noop_registry_ignores_configuration() {
        let registry = ObservationRegistry::noop();
        registry
            .observation_config()
            .observation_handler(RecordingHandler::new("h", &EventLog::new()));
        assert!(registry.is_noop());
        assert!(!registry.observation_config().has_handlers());
        assert_eq!(registry, ObservationRegistry::noop());
    }

    #[test]
    fn registry_without_handlers_is_noop() {
        let registry = ObservationRegistry::create();
        assert!(registry.is_noop());
        registry
            .observation_config()
            .observation_handler(RecordingHandler::new("h", &EventLog::new()));
        assert!(!registry.is_noop());
    }

    #[test]
    fn all_predicates_must_match() {
        let registry = ObservationRegistry::create();
        let config = registry.observation_config();
        config
            .observation_predicate(|name: &str, _: &ObservationContext| name != "ignored")
            .observation_predicate(|name: &str, _: &ObservationContext| !name.starts_with("internal."));

        let ctx = ObservationContext::new();
        assert!(config.is_observation_enabled("http", &ctx));
        assert!(!config.is_observation_enabled("ignored", &ctx));
        assert!(!config.is_observation_enabled("internal.gc", &ctx));
    }

    #[test]
    fn registries_are_distinct() {
        let a = ObservationRegistry::create();
        let b = ObservationRegistry::create();
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
        assert_eq!(a, a.clone());
    }
}
