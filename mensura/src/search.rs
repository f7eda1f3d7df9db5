//! Lookup of registered meters by name and tags.
use std::borrow::Cow;
use std::fmt;

use crate::meter::{
    Counter, DistributionSummary, Gauge, LongTaskTimer, Meter, MeterType, Timer,
};
use crate::{MeterError, MeterRegistry, MeterResult, Tag, Tags};

/// A search over the meters of a registry, started with
/// [`MeterRegistry::find`].
///
/// A meter matches when its name equals the searched name, it carries every
/// searched tag and it has a tag for every searched key.
///
/// # Examples
///
/// ```
/// use mensura::{MeterRegistry, Tags};
///
/// let registry = MeterRegistry::simple();
/// registry.counter("jobs", Tags::of([("queue", "emails")])).unwrap().increment();
///
/// let counter = registry.find("jobs").tag("queue", "emails").counter().unwrap();
/// assert_eq!(counter.count(), 1.0);
/// assert!(registry.find("jobs").tag("queue", "sms").counter().is_none());
/// ```
pub struct Search<'a> {
    registry: &'a MeterRegistry,
    name: Cow<'static, str>,
    tags: Tags,
    tag_keys: Vec<Cow<'static, str>>,
}

impl<'a> Search<'a> {
    pub(crate) fn new(registry: &'a MeterRegistry, name: Cow<'static, str>) -> Self {
        Search {
            registry,
            name,
            tags: Tags::empty(),
            tag_keys: Vec::new(),
        }
    }

    /// Requires the tag `key` with `value`.
    pub fn tag(mut self, key: impl Into<Cow<'static, str>>, value: impl Into<Cow<'static, str>>) -> Self {
        self.tags = self.tags.and(Tag::new(key, value));
        self
    }

    /// Requires every tag of `tags`.
    pub fn tags(mut self, tags: Tags) -> Self {
        self.tags = self.tags.concat(&tags);
        self
    }

    /// Requires a tag with each of `keys`, whatever its value.
    pub fn tag_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Cow<'static, str>>,
    {
        self.tag_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    fn matches(&self, meter: &Meter) -> bool {
        let id = meter.id();
        id.name() == self.name
            && self.tags.iter().all(|tag| id.tag(tag.key()) == Some(tag.value()))
            && self.tag_keys.iter().all(|key| id.tags().contains_key(key))
    }

    /// Every matching meter.
    pub fn meters(&self) -> Vec<Meter> {
        self.registry
            .get_meters()
            .into_iter()
            .filter(|meter| self.matches(meter))
            .collect()
    }

    /// Any matching meter.
    pub fn meter(&self) -> Option<Meter> {
        self.registry
            .get_meters()
            .into_iter()
            .find(|meter| self.matches(meter))
    }

    fn first<M: MeterType>(&self) -> Option<M> {
        self.registry
            .get_meters()
            .iter()
            .filter(|meter| self.matches(meter))
            .find_map(M::from_meter)
    }

    /// A matching counter.
    pub fn counter(&self) -> Option<Counter> {
        self.first()
    }

    /// A matching gauge.
    pub fn gauge(&self) -> Option<Gauge> {
        self.first()
    }

    /// A matching timer.
    pub fn timer(&self) -> Option<Timer> {
        self.first()
    }

    /// A matching distribution summary.
    pub fn summary(&self) -> Option<DistributionSummary> {
        self.first()
    }

    /// A matching long task timer.
    pub fn long_task_timer(&self) -> Option<LongTaskTimer> {
        self.first()
    }
}

impl fmt::Display for Search<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "name '{}' and tags {}", self.name, self.tags)?;
        if !self.tag_keys.is_empty() {
            write!(f, " and tag keys {:?}", self.tag_keys)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Search<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Search")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("tag_keys", &self.tag_keys)
            .finish()
    }
}

/// A search that fails with [`MeterError::NotFound`] when nothing matches,
/// started with [`MeterRegistry::get`].
#[derive(Debug)]
pub struct RequiredSearch<'a> {
    search: Search<'a>,
}

impl<'a> RequiredSearch<'a> {
    pub(crate) fn new(registry: &'a MeterRegistry, name: Cow<'static, str>) -> Self {
        RequiredSearch {
            search: Search::new(registry, name),
        }
    }

    /// Requires the tag `key` with `value`.
    pub fn tag(self, key: impl Into<Cow<'static, str>>, value: impl Into<Cow<'static, str>>) -> Self {
        RequiredSearch {
            search: self.search.tag(key, value),
        }
    }

    /// Requires every tag of `tags`.
    pub fn tags(self, tags: Tags) -> Self {
        RequiredSearch {
            search: self.search.tags(tags),
        }
    }

    /// Requires a tag with each of `keys`, whatever its value.
    pub fn tag_keys<I, K>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Cow<'static, str>>,
    {
        RequiredSearch {
            search: self.search.tag_keys(keys),
        }
    }

    fn not_found(&self) -> MeterError {
        MeterError::NotFound(self.search.to_string())
    }

    /// Every matching meter, at least one.
    pub fn meters(&self) -> MeterResult<Vec<Meter>> {
        let meters = self.search.meters();
        if meters.is_empty() {
            return Err(self.not_found());
        }
        Ok(meters)
    }

    /// Any matching meter.
    pub fn meter(&self) -> MeterResult<Meter> {
        self.search.meter().ok_or_else(|| self.not_found())
    }

    /// A matching counter.
    pub fn counter(&self) -> MeterResult<Counter> {
        self.search.counter().ok_or_else(|| self.not_found())
    }

    /// A matching gauge.
    pub fn gauge(&self) -> MeterResult<Gauge> {
        self.search.gauge().ok_or_else(|| self.not_found())
    }

    /// A matching timer.
    pub fn timer(&self) -> MeterResult<Timer> {
        self.search.timer().ok_or_else(|| self.not_found())
    }

    /// A matching distribution summary.
    pub fn summary(&self) -> MeterResult<DistributionSummary> {
        self.search.summary().ok_or_else(|| self.not_found())
    }

    /// A matching long task timer.
    pub fn long_task_timer(&self) -> MeterResult<LongTaskTimer> {
        self.search.long_task_timer().ok_or_else(|| self.not_found())
    }
}
