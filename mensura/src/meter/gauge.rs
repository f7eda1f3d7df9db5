use std::borrow::Cow;
use std::sync::Arc;

use super::{same_core, GaugeCore, GaugeFn};
use crate::{Id, MeterKind, MeterRegistry, MeterResult, Tag, Tags};

/// A value sampled on demand.
///
/// The gauge holds the sampling function, not a value; the function is called
/// every time the gauge is read.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use mensura::{Gauge, MeterRegistry};
///
/// let registry = MeterRegistry::simple();
/// let queue_len = Arc::new(AtomicUsize::new(3));
/// let observed = queue_len.clone();
/// let gauge = Gauge::builder("queue.size", move || observed.load(Ordering::Relaxed) as f64)
///     .register(&registry)
///     .unwrap();
/// assert_eq!(gauge.value(), 3.0);
/// ```
#[derive(Clone, Debug)]
pub struct Gauge {
    id: Arc<Id>,
    core: Arc<dyn GaugeCore>,
}

impl Gauge {
    /// Starts building a gauge named `name`, sampling `value`.
    pub fn builder<F>(name: impl Into<Cow<'static, str>>, value: F) -> GaugeBuilder
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        GaugeBuilder {
            name: name.into(),
            tags: Tags::empty(),
            description: None,
            base_unit: None,
            synthetic_association: None,
            value: Arc::new(value),
        }
    }

    pub(crate) fn new(id: Id, core: Arc<dyn GaugeCore>) -> Self {
        Gauge {
            id: Arc::new(id),
            core,
        }
    }

    /// The id the gauge was registered under.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Samples the current value.
    pub fn value(&self) -> f64 {
        self.core.value()
    }

    /// Whether this gauge always reads `NaN`.
    pub fn is_noop(&self) -> bool {
        self.core.is_noop()
    }

    pub(crate) fn close(&self) {
        self.core.close();
    }
}

impl PartialEq for Gauge {
    fn eq(&self, other: &Self) -> bool {
        same_core(&self.core, &other.core)
    }
}

/// Builder of a [`Gauge`].
#[derive(Clone)]
pub struct GaugeBuilder {
    name: Cow<'static, str>,
    tags: Tags,
    description: Option<Cow<'static, str>>,
    base_unit: Option<Cow<'static, str>>,
    synthetic_association: Option<Id>,
    value: GaugeFn,
}

impl GaugeBuilder {
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

    /// Sets the base unit.
    pub fn base_unit(mut self, base_unit: impl Into<Cow<'static, str>>) -> Self {
        self.base_unit = Some(base_unit.into());
        self
    }

    /// Marks the gauge as derived from the meter `parent`: it is not mapped by
    /// filters and is removed together with `parent`.
    pub fn synthetic_association(mut self, parent: &Id) -> Self {
        self.synthetic_association = Some(parent.clone());
        self
    }

    /// Registers the gauge, or returns the one already registered under the
    /// same id. The existing gauge keeps its sampling function.
    pub fn register(self, registry: &MeterRegistry) -> MeterResult<Gauge> {
        let mut id = Id::new(self.name, self.tags, MeterKind::Gauge);
        if let Some(description) = self.description {
            id = id.with_description(description);
        }
        if let Some(base_unit) = self.base_unit {
            id = id.with_base_unit(base_unit);
        }
        if let Some(parent) = &self.synthetic_association {
            id = id.with_synthetic_association(parent);
        }
        let value = self.value;
        registry.register(id, None, move |factory, id, _| {
            Gauge::new(id.clone(), factory.new_gauge(id, value))
        })
    }
}

impl std::fmt::Debug for GaugeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GaugeBuilder")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("synthetic_association", &self.synthetic_association)
            .finish()
    }
}
