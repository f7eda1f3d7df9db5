use std::borrow::Cow;
use std::sync::Arc;

use super::{same_core, CounterCore};
use crate::{Id, MeterKind, MeterRegistry, MeterResult, Tag, Tags};

/// A monotonically increasing count.
///
/// # Examples
///
/// ```
/// use mensura::{Counter, MeterRegistry};
///
/// let registry = MeterRegistry::simple();
/// let counter = Counter::builder("jobs.completed")
///     .tag("queue", "emails")
///     .register(&registry)
///     .unwrap();
/// counter.increment();
/// counter.increment_by(2.0);
/// assert_eq!(counter.count(), 3.0);
/// ```
#[derive(Clone, Debug)]
pub struct Counter {
    id: Arc<Id>,
    core: Arc<dyn CounterCore>,
}

impl Counter {
    /// Starts building a counter named `name`.
    pub fn builder(name: impl Into<Cow<'static, str>>) -> CounterBuilder {
        CounterBuilder {
            name: name.into(),
            tags: Tags::empty(),
            description: None,
            base_unit: None,
        }
    }

    pub(crate) fn new(id: Id, core: Arc<dyn CounterCore>) -> Self {
        Counter {
            id: Arc::new(id),
            core,
        }
    }

    /// The id the counter was registered under.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Adds one.
    pub fn increment(&self) {
        self.core.increment(1.0);
    }

    /// Adds `amount`.
    pub fn increment_by(&self, amount: f64) {
        self.core.increment(amount);
    }

    /// The cumulative count.
    pub fn count(&self) -> f64 {
        self.core.count()
    }

    /// Whether this counter discards increments.
    pub fn is_noop(&self) -> bool {
        self.core.is_noop()
    }

    pub(crate) fn close(&self) {
        self.core.close();
    }
}

impl PartialEq for Counter {
    fn eq(&self, other: &Self) -> bool {
        same_core(&self.core, &other.core)
    }
}

/// Builder of a [`Counter`].
#[derive(Clone, Debug)]
pub struct CounterBuilder {
    name: Cow<'static, str>,
    tags: Tags,
    description: Option<Cow<'static, str>>,
    base_unit: Option<Cow<'static, str>>,
}

impl CounterBuilder {
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

    /// Registers the counter, or returns the one already registered under the
    /// same id.
    pub fn register(self, registry: &MeterRegistry) -> MeterResult<Counter> {
        let mut id = Id::new(self.name, self.tags, MeterKind::Counter);
        if let Some(description) = self.description {
            id = id.with_description(description);
        }
        if let Some(base_unit) = self.base_unit {
            id = id.with_base_unit(base_unit);
        }
        registry.register(id, None, |factory, id, _| {
            Counter::new(id.clone(), factory.new_counter(id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_id_fields() {
        let registry = MeterRegistry::simple();
        let counter = Counter::builder("jobs")
            .tag("queue", "emails")
            .description("completed jobs")
            .base_unit("jobs")
            .register(&registry)
            .unwrap();
        let id = counter.id();
        assert_eq!(id.kind(), MeterKind::Counter);
        assert_eq!(id.tag("queue"), Some("emails"));
        assert_eq!(id.description(), Some("completed jobs"));
        assert_eq!(id.base_unit(), Some("jobs"));
    }

    #[test]
    fn clones_share_the_count() {
        let registry = MeterRegistry::simple();
        let counter = Counter::builder("jobs").register(&registry).unwrap();
        let clone = counter.clone();
        clone.increment_by(2.5);
        counter.increment();
        assert_eq!(counter.count(), 3.5);
        assert!(!counter.is_noop());
    }
}
