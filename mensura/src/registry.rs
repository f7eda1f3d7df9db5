use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use mensura_commons::{mensura_debug, mensura_error, mensura_info, mensura_warn};

use crate::filter::{self, MeterFilter, MeterFilterReply};
use crate::meter::{
    Counter, DistributionSummary, Gauge, LongTaskTimer, Meter, MeterFactory, MeterType, Timer,
};
use crate::search::{RequiredSearch, Search};
use crate::simple::SimpleMeterFactory;
use crate::{DistributionStatisticConfig, Id, MeterError, MeterResult, Tags};

/// Callback fired with a meter that was added to or removed from a registry.
pub type MeterListener = Arc<dyn Fn(&Meter) + Send + Sync>;

/// Callback fired with the id and the reason of a failed registration.
pub type FailureListener = Arc<dyn Fn(&Id, &MeterError) + Send + Sync>;

// Resolved once per attempted creation; `None` when the filters denied it.
type Slot = Arc<OnceLock<Option<Meter>>>;

/// Creates, de-duplicates and tracks meters.
///
/// Every meter is registered under its id after the registry's
/// [`MeterFilter`]s mapped it; at most one meter exists per mapped id, even
/// when several threads register the same id at once. Registrations that are
/// denied by a filter, or that happen after [`close`](MeterRegistry::close),
/// return working no-op meters.
///
/// Cloning a registry returns a new handle to the same registry.
///
/// # Examples
///
/// ```
/// use mensura::{filter, MeterRegistry, Tags};
///
/// let registry = MeterRegistry::builder()
///     .with_common_tags(Tags::of([("region", "eu-west")]))
///     .with_meter_filter(filter::deny_name_starts_with("jvm."))
///     .build();
///
/// let requests = registry.counter("http.requests", Tags::of([("uri", "/")])).unwrap();
/// requests.increment();
/// assert_eq!(requests.id().tag("region"), Some("eu-west"));
///
/// let gc = registry.counter("jvm.gc.pause", Tags::empty()).unwrap();
/// assert!(gc.is_noop());
/// assert_eq!(registry.get_meters().len(), 1);
/// ```
#[derive(Clone)]
pub struct MeterRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    factory: Arc<dyn MeterFactory>,
    meters: RwLock<HashMap<Id, Meter>>,
    // registry-wide write lock; taken before `meters` is written
    state: Mutex<RegistrationState>,
    filters: RwLock<Arc<[Arc<dyn MeterFilter>]>>,
    listeners: RwLock<Listeners>,
    default_distribution: DistributionStatisticConfig,
    closed: AtomicBool,
}

#[derive(Default)]
struct RegistrationState {
    // parent id -> ids of the synthetic meters derived from it
    synthetic_associations: HashMap<Id, HashSet<Id>>,
    in_flight: HashMap<Id, Slot>,
    // pre-filter id -> mapped id
    pre_filter_ids: HashMap<Id, Id>,
    // mapped id -> pre-filter ids
    mapped_ids: HashMap<Id, HashSet<Id>>,
}

#[derive(Clone, Default)]
struct Listeners {
    added: Vec<MeterListener>,
    removed: Vec<MeterListener>,
    failed: Vec<FailureListener>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MeterRegistry {
    /// Return a default [`MeterRegistryBuilder`].
    pub fn builder() -> MeterRegistryBuilder {
        MeterRegistryBuilder::default()
    }

    /// A registry keeping meters in memory with [`SimpleMeterFactory`].
    pub fn simple() -> Self {
        MeterRegistry::builder().build()
    }

    /// A closed registry: every registration returns a no-op meter.
    pub fn noop() -> Self {
        static NOOP: OnceLock<MeterRegistry> = OnceLock::new();
        NOOP.get_or_init(|| {
            let registry = MeterRegistry::simple();
            registry.inner.closed.store(true, Ordering::SeqCst);
            registry
        })
        .clone()
    }

    /// A view to change the registry's filters, common tags and listeners.
    pub fn config(&self) -> Config<'_> {
        Config { registry: self }
    }

    /// The distribution statistics every Timer and DistributionSummary starts
    /// from.
    pub fn default_distribution_statistic_config(&self) -> &DistributionStatisticConfig {
        &self.inner.default_distribution
    }

    /// Registers or looks up a meter of type `M` under `id`.
    ///
    /// `build` runs at most once per mapped id, without the registry-wide
    /// lock held, and receives the factory, the mapped id and the final
    /// distribution statistics.
    pub(crate) fn register<M, F>(
        &self,
        id: Id,
        config: Option<DistributionStatisticConfig>,
        build: F,
    ) -> MeterResult<M>
    where
        M: MeterType,
        F: FnOnce(&dyn MeterFactory, &Id, &DistributionStatisticConfig) -> M,
    {
        let filters = self.filters();
        let (pre_filter_id, mapped) = if id.synthetic_association().is_some() {
            (None, id)
        } else {
            let mapped = filters.iter().fold(id.clone(), |id, filter| filter.map(id));
            (Some(id), mapped)
        };

        if let Some(existing) = self.lookup(&mapped) {
            mensura_debug!(name: "MeterRegistry.ReturnedExisting", meter_name = mapped.name());
            return self.check_kind(&mapped, &existing);
        }
        if self.is_closed() {
            mensura_debug!(name: "MeterRegistry.NoopAfterClose", meter_name = mapped.name());
            return Ok(M::noop(mapped));
        }

        let slot = {
            let mut state = lock(&self.inner.state);
            if let Some(existing) = self.lookup(&mapped) {
                drop(state);
                return self.check_kind(&mapped, &existing);
            }
            state.in_flight.entry(mapped.clone()).or_default().clone()
        };

        let created = slot.get_or_init(|| {
            self.create::<M, F>(&filters, pre_filter_id.as_ref(), &mapped, config, build)
        });
        match created {
            Some(meter) => self.check_kind(&mapped, meter),
            None => Ok(M::noop(mapped)),
        }
    }

    fn create<M, F>(
        &self,
        filters: &[Arc<dyn MeterFilter>],
        pre_filter_id: Option<&Id>,
        id: &Id,
        config: Option<DistributionStatisticConfig>,
        build: F,
    ) -> Option<Meter>
    where
        M: MeterType,
        F: FnOnce(&dyn MeterFactory, &Id, &DistributionStatisticConfig) -> M,
    {
        if self.is_closed() || !accept(filters, id) {
            lock(&self.inner.state).in_flight.remove(id);
            mensura_debug!(name: "MeterRegistry.MeterDenied", meter_name = id.name());
            return None;
        }

        let config = match config {
            Some(config) => {
                let merged = config.merge(&self.inner.default_distribution);
                filters
                    .iter()
                    .fold(merged, |config, filter| filter.configure(id, &config).unwrap_or(config))
            }
            None => DistributionStatisticConfig::none(),
        };
        let meter = build(self.inner.factory.as_ref(), id, &config).into_meter();

        {
            let mut state = lock(&self.inner.state);
            // close() may have run while the factory was building
            if self.is_closed() {
                state.in_flight.remove(id);
                drop(state);
                meter.close();
                mensura_debug!(name: "MeterRegistry.NoopAfterClose", meter_name = id.name());
                return None;
            }
            if let Some(parent) = id.synthetic_association() {
                state
                    .synthetic_associations
                    .entry(parent.clone())
                    .or_default()
                    .insert(id.clone());
            }
            if let Some(pre_filter_id) = pre_filter_id {
                state.pre_filter_ids.insert(pre_filter_id.clone(), id.clone());
                state
                    .mapped_ids
                    .entry(id.clone())
                    .or_default()
                    .insert(pre_filter_id.clone());
            }
            write(&self.inner.meters).insert(id.clone(), meter.clone());
            state.in_flight.remove(id);
        }
        mensura_debug!(
            name: "MeterRegistry.MeterCreated",
            meter_name = id.name(),
            kind = format!("{}", meter.kind())
        );

        let added = read(&self.inner.listeners).added.clone();
        for listener in &added {
            listener(&meter);
        }
        self.register_percentile_gauges(&meter, &config);
        Some(meter)
    }

    fn register_percentile_gauges(&self, meter: &Meter, config: &DistributionStatisticConfig) {
        for &phi in config.percentiles() {
            match meter {
                Meter::Timer(timer) => {
                    let timer = timer.clone();
                    self.register_percentile_gauge(meter.id(), phi, move || {
                        timer.percentile(phi).map_or(f64::NAN, |d| d.as_secs_f64())
                    });
                }
                Meter::DistributionSummary(summary) => {
                    let summary = summary.clone();
                    self.register_percentile_gauge(meter.id(), phi, move || {
                        summary.percentile(phi).unwrap_or(f64::NAN)
                    });
                }
                _ => {}
            }
        }
    }

    fn register_percentile_gauge<F>(&self, parent: &Id, phi: f64, value: F)
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        let mut builder = Gauge::builder(format!("{}.percentile", parent.name()), value)
            .tags(parent.tags().clone())
            .tag("phi", format!("{}", phi))
            .synthetic_association(parent);
        if let Some(base_unit) = parent.base_unit() {
            builder = builder.base_unit(base_unit.to_owned());
        }
        if let Err(err) = builder.register(self) {
            mensura_warn!(
                name: "MeterRegistry.PercentileGaugeFailed",
                meter_name = parent.name(),
                reason = format!("{}", err)
            );
        }
    }

    fn check_kind<M: MeterType>(&self, id: &Id, meter: &Meter) -> MeterResult<M> {
        if let Some(handle) = M::from_meter(meter) {
            return Ok(handle);
        }
        let err = MeterError::KindMismatch {
            name: id.name().to_owned(),
            existing: meter.kind(),
            requested: M::KIND,
        };
        mensura_error!(
            name: "MeterRegistry.KindMismatch",
            meter_name = id.name(),
            existing = format!("{}", meter.kind()),
            requested = format!("{}", M::KIND)
        );
        let failed = read(&self.inner.listeners).failed.clone();
        for listener in &failed {
            listener(id, &err);
        }
        Err(err)
    }

    fn lookup(&self, id: &Id) -> Option<Meter> {
        read(&self.inner.meters).get(id).cloned()
    }

    fn filters(&self) -> Arc<[Arc<dyn MeterFilter>]> {
        read(&self.inner.filters).clone()
    }

    /// Removes the meter registered under the mapped `id`, along with every
    /// synthetic meter derived from it.
    ///
    /// Remove-listeners fire once per removed meter, synthetic meters first.
    pub fn remove(&self, id: &Id) -> Option<Meter> {
        let (removed, synthetics) = {
            let mut state = lock(&self.inner.state);
            let removed = write(&self.inner.meters).remove(id)?;
            let synthetics = state.synthetic_associations.remove(id).unwrap_or_default();
            if let Some(parent) = removed.id().synthetic_association() {
                if let Some(siblings) = state.synthetic_associations.get_mut(parent) {
                    siblings.remove(id);
                    if siblings.is_empty() {
                        state.synthetic_associations.remove(parent);
                    }
                }
            }
            for pre_filter_id in state.mapped_ids.remove(id).unwrap_or_default() {
                state.pre_filter_ids.remove(&pre_filter_id);
            }
            (removed, synthetics)
        };

        for synthetic in &synthetics {
            self.remove(synthetic);
        }
        mensura_debug!(
            name: "MeterRegistry.MeterRemoved",
            meter_name = id.name(),
            synthetic_count = synthetics.len()
        );
        let listeners = read(&self.inner.listeners).removed.clone();
        for listener in &listeners {
            listener(&removed);
        }
        Some(removed)
    }

    /// Removes `meter` and the synthetic meters derived from it.
    pub fn remove_meter(&self, meter: &Meter) -> Option<Meter> {
        self.remove(meter.id())
    }

    /// Removes the meter that was registered with `id` before the filters
    /// mapped it.
    pub fn remove_by_pre_filter_id(&self, id: &Id) -> Option<Meter> {
        let mapped = lock(&self.inner.state).pre_filter_ids.get(id).cloned()?;
        self.remove(&mapped)
    }

    /// Removes every meter.
    pub fn clear(&self) {
        let ids: Vec<Id> = read(&self.inner.meters).keys().cloned().collect();
        for id in &ids {
            self.remove(id);
        }
    }

    /// Closes every registered meter. Later registrations return no-op meters;
    /// removal, search and iteration keep working.
    ///
    /// Only the first call has an effect.
    pub fn close(&self) {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let _state = lock(&self.inner.state);
        let meters = read(&self.inner.meters);
        for meter in meters.values() {
            meter.close();
        }
        mensura_info!(name: "MeterRegistry.Closed", meter_count = meters.len());
    }

    /// Whether [`close`](MeterRegistry::close) was called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// A snapshot of the registered meters.
    pub fn get_meters(&self) -> Vec<Meter> {
        read(&self.inner.meters).values().cloned().collect()
    }

    /// Calls `f` with every meter registered when the call started.
    pub fn for_each_meter(&self, mut f: impl FnMut(&Meter)) {
        for meter in self.get_meters() {
            f(&meter);
        }
    }

    /// Searches meters named `name`; misses return `None` or empty lists.
    pub fn find(&self, name: impl Into<Cow<'static, str>>) -> Search<'_> {
        Search::new(self, name.into())
    }

    /// Searches meters named `name`; misses fail with
    /// [`MeterError::NotFound`].
    pub fn get(&self, name: impl Into<Cow<'static, str>>) -> RequiredSearch<'_> {
        RequiredSearch::new(self, name.into())
    }

    /// Registers or returns the counter `name` with `tags`.
    pub fn counter(&self, name: impl Into<Cow<'static, str>>, tags: Tags) -> MeterResult<Counter> {
        Counter::builder(name).tags(tags).register(self)
    }

    /// Registers or returns the gauge `name` with `tags`, sampling `value`.
    pub fn gauge<F>(&self, name: impl Into<Cow<'static, str>>, tags: Tags, value: F) -> MeterResult<Gauge>
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Gauge::builder(name, value).tags(tags).register(self)
    }

    /// Registers or returns the timer `name` with `tags`.
    pub fn timer(&self, name: impl Into<Cow<'static, str>>, tags: Tags) -> MeterResult<Timer> {
        Timer::builder(name).tags(tags).register(self)
    }

    /// Registers or returns the distribution summary `name` with `tags`.
    pub fn summary(
        &self,
        name: impl Into<Cow<'static, str>>,
        tags: Tags,
    ) -> MeterResult<DistributionSummary> {
        DistributionSummary::builder(name).tags(tags).register(self)
    }

    /// Registers or returns the long task timer `name` with `tags`.
    pub fn long_task_timer(
        &self,
        name: impl Into<Cow<'static, str>>,
        tags: Tags,
    ) -> MeterResult<LongTaskTimer> {
        LongTaskTimer::builder(name).tags(tags).register(self)
    }
}

fn accept(filters: &[Arc<dyn MeterFilter>], id: &Id) -> bool {
    for filter in filters {
        match filter.accept(id) {
            MeterFilterReply::Deny => return false,
            MeterFilterReply::Accept => return true,
            MeterFilterReply::Neutral => {}
        }
    }
    true
}

impl PartialEq for MeterRegistry {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for MeterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterRegistry")
            .field("factory", &self.inner.factory)
            .field("meters", &read(&self.inner.meters).len())
            .field("filters", &read(&self.inner.filters).len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Changes the configuration of a live [`MeterRegistry`].
///
/// Filters only apply to meters registered after they were added.
pub struct Config<'a> {
    registry: &'a MeterRegistry,
}

impl Config<'_> {
    /// Appends `filter` to the filter pipeline.
    pub fn meter_filter(&self, filter: impl MeterFilter + 'static) -> &Self {
        let inner = &self.registry.inner;
        let _state = lock(&inner.state);
        let meter_count = read(&inner.meters).len();
        if meter_count > 0 {
            mensura_warn!(
                name: "MeterRegistry.LateMeterFilter",
                meter_count = meter_count,
                message = "meters registered before this filter are not affected by it"
            );
        }
        let mut filters = write(&inner.filters);
        let mut next: Vec<Arc<dyn MeterFilter>> = filters.iter().cloned().collect();
        next.push(Arc::new(filter));
        *filters = next.into();
        self
    }

    /// Adds `tags` to every meter registered from now on, unless the meter
    /// has a tag with the same key.
    pub fn common_tags(&self, tags: Tags) -> &Self {
        self.meter_filter(filter::common_tags(tags))
    }

    /// Calls `listener` with every meter created from now on.
    pub fn on_meter_added(&self, listener: impl Fn(&Meter) + Send + Sync + 'static) -> &Self {
        write(&self.registry.inner.listeners).added.push(Arc::new(listener));
        self
    }

    /// Calls `listener` with every meter removed from now on.
    pub fn on_meter_removed(&self, listener: impl Fn(&Meter) + Send + Sync + 'static) -> &Self {
        write(&self.registry.inner.listeners).removed.push(Arc::new(listener));
        self
    }

    /// Calls `listener` when a registration fails.
    pub fn on_meter_registration_failed(
        &self,
        listener: impl Fn(&Id, &MeterError) + Send + Sync + 'static,
    ) -> &Self {
        write(&self.registry.inner.listeners).failed.push(Arc::new(listener));
        self
    }
}

impl fmt::Debug for Config<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config").field("registry", self.registry).finish()
    }
}

/// Configuration options for a [`MeterRegistry`].
#[derive(Default)]
pub struct MeterRegistryBuilder {
    factory: Option<Arc<dyn MeterFactory>>,
    filters: Vec<Arc<dyn MeterFilter>>,
    default_distribution: Option<DistributionStatisticConfig>,
}

impl MeterRegistryBuilder {
    /// The backend creating meter cores. Defaults to [`SimpleMeterFactory`].
    pub fn with_factory(mut self, factory: impl MeterFactory + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Appends `filter` to the filter pipeline. Filters run in the order they
    /// were added.
    pub fn with_meter_filter(mut self, filter: impl MeterFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Adds `tags` to every meter, unless the meter has a tag with the same
    /// key.
    pub fn with_common_tags(self, tags: Tags) -> Self {
        self.with_meter_filter(filter::common_tags(tags))
    }

    /// Distribution statistics merged into every Timer and
    /// DistributionSummary before the filters configure them. Unset fields
    /// fall back to [`DistributionStatisticConfig::defaults`].
    pub fn with_default_distribution_statistic_config(
        mut self,
        config: DistributionStatisticConfig,
    ) -> Self {
        self.default_distribution = Some(config);
        self
    }

    /// Create a new registry from this configuration.
    pub fn build(self) -> MeterRegistry {
        let default_distribution = self
            .default_distribution
            .map(|config| config.merge(&DistributionStatisticConfig::defaults()))
            .unwrap_or_else(DistributionStatisticConfig::defaults);
        MeterRegistry {
            inner: Arc::new(RegistryInner {
                factory: self
                    .factory
                    .unwrap_or_else(|| Arc::new(SimpleMeterFactory::new())),
                meters: RwLock::new(HashMap::new()),
                state: Mutex::new(RegistrationState::default()),
                filters: RwLock::new(self.filters.into()),
                listeners: RwLock::new(Listeners::default()),
                default_distribution,
                closed: AtomicBool::new(false),
            }),
        }
    }
}

impl fmt::Debug for MeterRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterRegistryBuilder")
            .field("factory", &self.factory)
            .field("filters", &self.filters.len())
            .field("default_distribution", &self.default_distribution)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::{
        CounterCore, DistributionSummaryCore, GaugeCore, GaugeFn, LongTaskTimerCore, TimerCore,
    };
    use crate::MeterKind;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[derive(Clone, Debug, Default)]
    struct RecordingFactory {
        simple: Arc<SimpleMeterFactory>,
        created: Arc<AtomicUsize>,
        timer_configs: Arc<Mutex<Vec<DistributionStatisticConfig>>>,
    }

    impl RecordingFactory {
        fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }
    }

    impl MeterFactory for RecordingFactory {
        fn new_counter(&self, id: &Id) -> Arc<dyn CounterCore> {
            self.created.fetch_add(1, Ordering::SeqCst);
            // widen the race window for concurrent registrations
            thread::sleep(Duration::from_millis(5));
            self.simple.new_counter(id)
        }

        fn new_gauge(&self, id: &Id, value: GaugeFn) -> Arc<dyn GaugeCore> {
            self.created.fetch_add(1, Ordering::SeqCst);
            self.simple.new_gauge(id, value)
        }

        fn new_timer(&self, id: &Id, config: &DistributionStatisticConfig) -> Arc<dyn TimerCore> {
            self.created.fetch_add(1, Ordering::SeqCst);
            lock(&self.timer_configs).push(config.clone());
            self.simple.new_timer(id, config)
        }

        fn new_distribution_summary(
            &self,
            id: &Id,
            config: &DistributionStatisticConfig,
            scale: f64,
        ) -> Arc<dyn DistributionSummaryCore> {
            self.created.fetch_add(1, Ordering::SeqCst);
            self.simple.new_distribution_summary(id, config, scale)
        }

        fn new_long_task_timer(
            &self,
            id: &Id,
            config: &DistributionStatisticConfig,
        ) -> Arc<dyn LongTaskTimerCore> {
            self.created.fetch_add(1, Ordering::SeqCst);
            self.simple.new_long_task_timer(id, config)
        }
    }

    // Holds every counter build until the test releases it.
    #[derive(Debug)]
    struct GatedFactory {
        simple: SimpleMeterFactory,
        building: Arc<Barrier>,
        release: Arc<Barrier>,
    }

    impl MeterFactory for GatedFactory {
        fn new_counter(&self, id: &Id) -> Arc<dyn CounterCore> {
            self.building.wait();
            self.release.wait();
            self.simple.new_counter(id)
        }

        fn new_gauge(&self, id: &Id, value: GaugeFn) -> Arc<dyn GaugeCore> {
            self.simple.new_gauge(id, value)
        }

        fn new_timer(&self, id: &Id, config: &DistributionStatisticConfig) -> Arc<dyn TimerCore> {
            self.simple.new_timer(id, config)
        }

        fn new_distribution_summary(
            &self,
            id: &Id,
            config: &DistributionStatisticConfig,
            scale: f64,
        ) -> Arc<dyn DistributionSummaryCore> {
            self.simple.new_distribution_summary(id, config, scale)
        }

        fn new_long_task_timer(
            &self,
            id: &Id,
            config: &DistributionStatisticConfig,
        ) -> Arc<dyn LongTaskTimerCore> {
            self.simple.new_long_task_timer(id, config)
        }
    }

    fn counting(listener: &Arc<AtomicUsize>) -> impl Fn(&Meter) + Send + Sync + 'static + use<> {
        let listener = listener.clone();
        move |_| {
            listener.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn concurrent_registration_creates_one_meter() {
        const THREADS: usize = 8;
        let factory = RecordingFactory::default();
        let registry = MeterRegistry::builder().with_factory(factory.clone()).build();
        let added = Arc::new(AtomicUsize::new(0));
        registry.config().on_meter_added(counting(&added));

        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.counter("foo", Tags::empty()).unwrap()
                })
            })
            .collect();
        let counters: Vec<Counter> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(factory.created(), 1);
        assert_eq!(added.load(Ordering::SeqCst), 1);
        assert!(counters.iter().all(|c| *c == counters[0]));
        assert_eq!(registry.get_meters().len(), 1);
    }

    #[test]
    fn same_name_returns_same_meter_and_other_kind_fails() {
        let registry = MeterRegistry::builder()
            .with_meter_filter(filter::accept_all())
            .build();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let recorded = failures.clone();
        registry
            .config()
            .on_meter_registration_failed(move |id, err| {
                lock(&recorded).push((id.name().to_owned(), err.clone()));
            });

        let first = registry.counter("foo", Tags::empty()).unwrap();
        let second = registry.counter("foo", Tags::empty()).unwrap();
        assert_eq!(first, second);
        first.increment();
        assert_eq!(second.count(), 1.0);

        let err = registry.timer("foo", Tags::empty()).unwrap_err();
        assert_eq!(
            err,
            MeterError::KindMismatch {
                name: "foo".into(),
                existing: MeterKind::Counter,
                requested: MeterKind::Timer,
            }
        );
        assert!(err.to_string().contains("foo"));
        assert!(err.to_string().contains("Counter vs. Timer"));
        assert_eq!(lock(&failures).len(), 1);
        assert_eq!(lock(&failures)[0].0, "foo");
    }

    #[test]
    fn denied_meters_are_noop_and_never_stored() {
        let factory = RecordingFactory::default();
        let registry = MeterRegistry::builder()
            .with_factory(factory.clone())
            .with_meter_filter(filter::deny_all())
            .build();

        for _ in 0..3 {
            let counter = registry.counter("foo", Tags::empty()).unwrap();
            assert!(counter.is_noop());
            counter.increment();
            assert_eq!(counter.count(), 0.0);
        }
        assert!(registry.get_meters().is_empty());
        assert_eq!(factory.created(), 0);
    }

    #[test]
    fn accept_short_circuits_before_later_deny() {
        let registry = MeterRegistry::builder()
            .with_meter_filter(filter::accept_name_starts_with("http"))
            .with_meter_filter(filter::deny_all())
            .build();

        assert!(!registry.counter("http.requests", Tags::empty()).unwrap().is_noop());
        assert!(registry.counter("db.queries", Tags::empty()).unwrap().is_noop());
    }

    #[test]
    fn closed_registry_returns_noop_without_mutation() {
        let registry = MeterRegistry::simple();
        let before = registry.counter("before", Tags::empty()).unwrap();
        registry.close();
        registry.close();
        assert!(registry.is_closed());

        let after = registry.counter("after", Tags::empty()).unwrap();
        assert!(after.is_noop());
        assert_eq!(registry.get_meters().len(), 1);

        // hits still return the registered meter
        assert_eq!(registry.counter("before", Tags::empty()).unwrap(), before);
        assert!(registry.remove(before.id()).is_some());
        assert!(registry.get_meters().is_empty());
    }

    #[test]
    fn noop_registry_is_closed() {
        let registry = MeterRegistry::noop();
        assert!(registry.is_closed());
        assert!(registry.timer("t", Tags::empty()).unwrap().is_noop());
        assert_eq!(registry, MeterRegistry::noop());
    }

    #[test]
    fn removing_a_parent_cascades_to_synthetic_meters() {
        let registry = MeterRegistry::simple();
        let removed = Arc::new(Mutex::new(Vec::new()));
        let recorded = removed.clone();
        registry.config().on_meter_removed(move |meter| {
            lock(&recorded).push(meter.id().name().to_owned());
        });

        let parent = registry.counter("cache.gets", Tags::empty()).unwrap();
        let child = Gauge::builder("cache.gets.rate", || 1.0)
            .synthetic_association(parent.id())
            .register(&registry)
            .unwrap();
        Gauge::builder("cache.gets.rate.max", || 2.0)
            .synthetic_association(child.id())
            .register(&registry)
            .unwrap();
        assert_eq!(registry.get_meters().len(), 3);

        let meter = registry.remove(parent.id()).unwrap();
        assert_eq!(meter.kind(), MeterKind::Counter);
        assert!(registry.get_meters().is_empty());
        assert_eq!(
            *lock(&removed),
            vec!["cache.gets.rate.max", "cache.gets.rate", "cache.gets"]
        );
        assert!(registry.remove(parent.id()).is_none());
    }

    #[test]
    fn synthetic_ids_bypass_mapping() {
        let registry = MeterRegistry::builder()
            .with_common_tags(Tags::of([("env", "prod")]))
            .build();
        let parent = registry.counter("jobs", Tags::empty()).unwrap();
        assert_eq!(parent.id().tag("env"), Some("prod"));

        let derived = Gauge::builder("jobs.rate", || 0.0)
            .synthetic_association(parent.id())
            .register(&registry)
            .unwrap();
        assert_eq!(derived.id().tag("env"), None);
    }

    #[test]
    fn percentiles_register_synthetic_gauges() {
        let registry = MeterRegistry::simple();
        let timer = Timer::builder("latency")
            .tag("uri", "/")
            .publish_percentiles([0.5, 0.95])
            .register(&registry)
            .unwrap();
        assert_eq!(registry.get_meters().len(), 3);

        let median = registry
            .get("latency.percentile")
            .tag("phi", "0.5")
            .gauge()
            .unwrap();
        assert_eq!(median.id().tag("uri"), Some("/"));
        assert_eq!(median.id().synthetic_association(), Some(timer.id()));
        assert!(median.value().is_nan());

        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        assert_eq!(median.value(), 0.01);

        registry.remove(timer.id());
        assert!(registry.get_meters().is_empty());
    }

    #[test]
    fn filters_map_in_registration_order() {
        let common_first = MeterRegistry::builder()
            .with_common_tags(Tags::of([("env", "prod")]))
            .with_meter_filter(filter::rename_tag("", "env", "environment"))
            .build();
        let counter = common_first.counter("jobs", Tags::empty()).unwrap();
        assert_eq!(counter.id().tag("environment"), Some("prod"));

        let rename_first = MeterRegistry::builder()
            .with_meter_filter(filter::rename_tag("", "env", "environment"))
            .with_common_tags(Tags::of([("env", "prod")]))
            .build();
        let counter = rename_first.counter("jobs", Tags::empty()).unwrap();
        assert_eq!(counter.id().tag("env"), Some("prod"));
    }

    #[test]
    fn configure_chains_with_last_value_winning() {
        let factory = RecordingFactory::default();
        let registry = MeterRegistry::builder()
            .with_factory(factory.clone())
            .with_meter_filter(filter::max_expected("latency", Duration::from_secs(1)))
            .with_meter_filter(filter::max_expected("latency", Duration::from_secs(2)))
            .build();
        Timer::builder("latency")
            .minimum_expected_value(Duration::from_millis(1))
            .register(&registry)
            .unwrap();

        let configs = lock(&factory.timer_configs);
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].maximum_expected_value(), Some(2e9));
        assert_eq!(configs[0].minimum_expected_value(), Some(1e6));
        // unset fields come from the registry defaults
        assert_eq!(configs[0].buffer_length(), Some(3));
    }

    #[test]
    fn close_during_build_discards_the_meter() {
        let building = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let registry = MeterRegistry::builder()
            .with_factory(GatedFactory {
                simple: SimpleMeterFactory::new(),
                building: building.clone(),
                release: release.clone(),
            })
            .build();
        let added = Arc::new(AtomicUsize::new(0));
        registry.config().on_meter_added(counting(&added));

        let worker = {
            let registry = registry.clone();
            thread::spawn(move || registry.counter("slow", Tags::empty()).unwrap())
        };
        building.wait();
        registry.close();
        release.wait();
        let counter = worker.join().unwrap();

        assert!(counter.is_noop());
        assert!(registry.get_meters().is_empty());
        assert!(registry.find("slow").counter().is_none());
        assert_eq!(added.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn late_filters_only_affect_new_registrations() {
        let registry = MeterRegistry::simple();
        let untagged = registry.counter("jobs", Tags::empty()).unwrap();
        registry.config().common_tags(Tags::of([("env", "prod")]));

        let tagged = registry.counter("jobs", Tags::empty()).unwrap();
        assert_ne!(untagged, tagged);
        assert_eq!(tagged.id().tag("env"), Some("prod"));
        assert_eq!(registry.get_meters().len(), 2);
    }

    #[test]
    fn remove_by_pre_filter_id() {
        let registry = MeterRegistry::builder()
            .with_common_tags(Tags::of([("env", "prod")]))
            .build();
        registry.counter("jobs", Tags::empty()).unwrap();

        let pre_filter = Id::new("jobs", Tags::empty(), MeterKind::Counter);
        assert!(registry.remove(&pre_filter).is_none());
        let removed = registry.remove_by_pre_filter_id(&pre_filter).unwrap();
        assert_eq!(removed.id().tag("env"), Some("prod"));
        assert!(registry.remove_by_pre_filter_id(&pre_filter).is_none());
    }

    #[test]
    fn removing_a_meter_forgets_only_its_pre_filter_ids() {
        let registry = MeterRegistry::builder()
            .with_common_tags(Tags::of([("env", "prod")]))
            .build();
        let jobs = registry.counter("jobs", Tags::empty()).unwrap();
        registry.counter("tasks", Tags::empty()).unwrap();

        registry.remove(jobs.id()).unwrap();
        let jobs_pre_filter = Id::new("jobs", Tags::empty(), MeterKind::Counter);
        assert!(registry.remove_by_pre_filter_id(&jobs_pre_filter).is_none());

        let tasks_pre_filter = Id::new("tasks", Tags::empty(), MeterKind::Counter);
        let removed = registry.remove_by_pre_filter_id(&tasks_pre_filter).unwrap();
        assert_eq!(removed.id().name(), "tasks");
        assert!(registry.get_meters().is_empty());
    }

    #[test]
    fn clear_removes_everything_and_notifies() {
        let registry = MeterRegistry::simple();
        let removed = Arc::new(AtomicUsize::new(0));
        registry.config().on_meter_removed(counting(&removed));
        registry.counter("a", Tags::empty()).unwrap();
        registry.summary("b", Tags::empty()).unwrap();
        registry.long_task_timer("c", Tags::empty()).unwrap();

        registry.clear();
        assert!(registry.get_meters().is_empty());
        assert_eq!(removed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn for_each_meter_sees_a_snapshot() {
        let registry = MeterRegistry::simple();
        registry.counter("a", Tags::empty()).unwrap();
        registry.gauge("b", Tags::empty(), || 1.0).unwrap();

        let mut names = Vec::new();
        registry.for_each_meter(|meter| {
            // registering while iterating does not deadlock
            registry.counter("c", Tags::empty()).unwrap();
            names.push(meter.id().name().to_owned());
        });
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(registry.get_meters().len(), 3);
    }
}
