//! Meter filters and ready-made filter factories.
//!
//! Filters run in registration order. For each new meter the registry first
//! [`map`](MeterFilter::map)s the id through every filter, then asks each
//! filter to [`accept`](MeterFilter::accept) the mapped id (the first `Deny`
//! or `Accept` decides, no opinion means accept) and finally lets every
//! filter [`configure`](MeterFilter::configure) the distribution statistics.
use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{DistributionStatisticConfig, Id, MeterKind, Tag, Tags};

/// The verdict of [`MeterFilter::accept`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeterFilterReply {
    /// The meter is suppressed; later filters are not consulted.
    Deny,
    /// No opinion; the next filter decides.
    Neutral,
    /// The meter is registered; later filters are not consulted.
    Accept,
}

/// Transforms, accepts or configures meters as they are registered.
pub trait MeterFilter: Send + Sync {
    /// Decides whether a meter with the (mapped) `id` is registered.
    fn accept(&self, _id: &Id) -> MeterFilterReply {
        MeterFilterReply::Neutral
    }

    /// Rewrites the id of a meter before it is looked up.
    fn map(&self, id: Id) -> Id {
        id
    }

    /// Overrides the distribution statistics of a Timer or
    /// DistributionSummary. `None` keeps `config` unchanged.
    fn configure(
        &self,
        _id: &Id,
        _config: &DistributionStatisticConfig,
    ) -> Option<DistributionStatisticConfig> {
        None
    }
}

impl<F: MeterFilter + ?Sized> MeterFilter for Arc<F> {
    fn accept(&self, id: &Id) -> MeterFilterReply {
        (**self).accept(id)
    }

    fn map(&self, id: Id) -> Id {
        (**self).map(id)
    }

    fn configure(
        &self,
        id: &Id,
        config: &DistributionStatisticConfig,
    ) -> Option<DistributionStatisticConfig> {
        (**self).configure(id, config)
    }
}

impl<F: MeterFilter + ?Sized> MeterFilter for Box<F> {
    fn accept(&self, id: &Id) -> MeterFilterReply {
        (**self).accept(id)
    }

    fn map(&self, id: Id) -> Id {
        (**self).map(id)
    }

    fn configure(
        &self,
        id: &Id,
        config: &DistributionStatisticConfig,
    ) -> Option<DistributionStatisticConfig> {
        (**self).configure(id, config)
    }
}

type IdPredicate = Box<dyn Fn(&Id) -> bool + Send + Sync>;

/// Adds `tags` to every meter; tags already on the meter win.
pub fn common_tags(tags: Tags) -> impl MeterFilter {
    CommonTags { tags }
}

struct CommonTags {
    tags: Tags,
}

impl MeterFilter for CommonTags {
    fn map(&self, id: Id) -> Id {
        let tags = self.tags.concat(id.tags());
        id.replace_tags(tags)
    }
}

/// Renames the tag key `from` to `to` on meters whose name starts with
/// `prefix`.
pub fn rename_tag(
    prefix: impl Into<Cow<'static, str>>,
    from: impl Into<Cow<'static, str>>,
    to: impl Into<Cow<'static, str>>,
) -> impl MeterFilter {
    RenameTag {
        prefix: prefix.into(),
        from: from.into(),
        to: to.into(),
    }
}

struct RenameTag {
    prefix: Cow<'static, str>,
    from: Cow<'static, str>,
    to: Cow<'static, str>,
}

impl MeterFilter for RenameTag {
    fn map(&self, id: Id) -> Id {
        if !id.name().starts_with(self.prefix.as_ref()) {
            return id;
        }
        let Some(value) = id.tag(&self.from).map(str::to_owned) else {
            return id;
        };
        let tags: Tags = id
            .tags()
            .iter()
            .filter(|t| t.key() != self.from)
            .cloned()
            .chain(std::iter::once(Tag::new(self.to.clone(), value)))
            .collect();
        id.replace_tags(tags)
    }
}

/// Drops the tags with the given keys from every meter.
pub fn ignore_tags<I, K>(keys: I) -> impl MeterFilter
where
    I: IntoIterator<Item = K>,
    K: Into<Cow<'static, str>>,
{
    IgnoreTags {
        keys: keys.into_iter().map(Into::into).collect(),
    }
}

struct IgnoreTags {
    keys: Vec<Cow<'static, str>>,
}

impl MeterFilter for IgnoreTags {
    fn map(&self, id: Id) -> Id {
        if !id.tags().iter().any(|t| self.keys.iter().any(|k| k == t.key())) {
            return id;
        }
        let tags: Tags = id
            .tags()
            .iter()
            .filter(|t| !self.keys.iter().any(|k| k == t.key()))
            .cloned()
            .collect();
        id.replace_tags(tags)
    }
}

/// Replaces the value of tag `key` with `replacement(value)`, unless the
/// value is one of `exceptions`.
pub fn replace_tag_values<F, I, E>(
    key: impl Into<Cow<'static, str>>,
    replacement: F,
    exceptions: I,
) -> impl MeterFilter
where
    F: Fn(&str) -> String + Send + Sync + 'static,
    I: IntoIterator<Item = E>,
    E: Into<String>,
{
    ReplaceTagValues {
        key: key.into(),
        replacement: Box::new(replacement),
        exceptions: exceptions.into_iter().map(Into::into).collect(),
    }
}

struct ReplaceTagValues {
    key: Cow<'static, str>,
    replacement: Box<dyn Fn(&str) -> String + Send + Sync>,
    exceptions: HashSet<String>,
}

impl MeterFilter for ReplaceTagValues {
    fn map(&self, id: Id) -> Id {
        match id.tag(&self.key) {
            Some(value) if !self.exceptions.contains(value) => {
                let replaced = (self.replacement)(value);
                id.with_tag(Tag::new(self.key.clone(), replaced))
            }
            _ => id,
        }
    }
}

/// Denies every meter not matching `predicate`; matching meters are left to
/// the following filters.
pub fn deny_unless<P>(predicate: P) -> impl MeterFilter
where
    P: Fn(&Id) -> bool + Send + Sync + 'static,
{
    Verdict {
        predicate: Box::new(predicate),
        on_match: MeterFilterReply::Neutral,
        otherwise: MeterFilterReply::Deny,
    }
}

/// Accepts every meter matching `predicate`.
pub fn accept_if<P>(predicate: P) -> impl MeterFilter
where
    P: Fn(&Id) -> bool + Send + Sync + 'static,
{
    Verdict {
        predicate: Box::new(predicate),
        on_match: MeterFilterReply::Accept,
        otherwise: MeterFilterReply::Neutral,
    }
}

/// Denies every meter matching `predicate`.
pub fn deny_if<P>(predicate: P) -> impl MeterFilter
where
    P: Fn(&Id) -> bool + Send + Sync + 'static,
{
    Verdict {
        predicate: Box::new(predicate),
        on_match: MeterFilterReply::Deny,
        otherwise: MeterFilterReply::Neutral,
    }
}

/// Accepts every meter.
pub fn accept_all() -> impl MeterFilter {
    accept_if(|_| true)
}

/// Denies every meter.
pub fn deny_all() -> impl MeterFilter {
    deny_if(|_| true)
}

/// Denies meters whose name starts with `prefix`.
pub fn deny_name_starts_with(prefix: impl Into<Cow<'static, str>>) -> impl MeterFilter {
    let prefix = prefix.into();
    deny_if(move |id| id.name().starts_with(prefix.as_ref()))
}

/// Accepts meters whose name starts with `prefix`.
pub fn accept_name_starts_with(prefix: impl Into<Cow<'static, str>>) -> impl MeterFilter {
    let prefix = prefix.into();
    accept_if(move |id| id.name().starts_with(prefix.as_ref()))
}

struct Verdict {
    predicate: IdPredicate,
    on_match: MeterFilterReply,
    otherwise: MeterFilterReply,
}

impl MeterFilter for Verdict {
    fn accept(&self, id: &Id) -> MeterFilterReply {
        if (self.predicate)(id) {
            self.on_match
        } else {
            self.otherwise
        }
    }
}

/// Caps the number of distinct meter ids to `maximum`; ids beyond it are
/// denied.
pub fn maximum_allowable_metrics(maximum: usize) -> impl MeterFilter {
    MaximumAllowableMetrics {
        maximum,
        seen: Mutex::new(HashSet::new()),
    }
}

struct MaximumAllowableMetrics {
    maximum: usize,
    seen: Mutex<HashSet<Id>>,
}

impl MeterFilter for MaximumAllowableMetrics {
    fn accept(&self, id: &Id) -> MeterFilterReply {
        let mut seen = self
            .seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if seen.contains(id) {
            return MeterFilterReply::Neutral;
        }
        if seen.len() >= self.maximum {
            return MeterFilterReply::Deny;
        }
        seen.insert(id.clone());
        MeterFilterReply::Neutral
    }
}

/// Caps the number of distinct values of tag `key` on meters whose name
/// starts with `prefix`. Once `maximum` values have been seen, meters with a
/// new value are handed to `on_max_reached`.
pub fn maximum_allowable_tags<F>(
    prefix: impl Into<Cow<'static, str>>,
    key: impl Into<Cow<'static, str>>,
    maximum: usize,
    on_max_reached: F,
) -> impl MeterFilter
where
    F: MeterFilter + 'static,
{
    MaximumAllowableTags {
        prefix: prefix.into(),
        key: key.into(),
        maximum,
        observed: Mutex::new(HashSet::new()),
        on_max_reached: Box::new(on_max_reached),
    }
}

struct MaximumAllowableTags {
    prefix: Cow<'static, str>,
    key: Cow<'static, str>,
    maximum: usize,
    observed: Mutex<HashSet<String>>,
    on_max_reached: Box<dyn MeterFilter>,
}

impl MaximumAllowableTags {
    fn tag_value<'a>(&self, id: &'a Id) -> Option<&'a str> {
        if id.name().starts_with(self.prefix.as_ref()) {
            id.tag(&self.key)
        } else {
            None
        }
    }

    fn observed(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.observed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MeterFilter for MaximumAllowableTags {
    fn accept(&self, id: &Id) -> MeterFilterReply {
        let Some(value) = self.tag_value(id) else {
            return MeterFilterReply::Neutral;
        };
        let mut observed = self.observed();
        if observed.contains(value) {
            return MeterFilterReply::Neutral;
        }
        if observed.len() >= self.maximum {
            drop(observed);
            return self.on_max_reached.accept(id);
        }
        observed.insert(value.to_string());
        MeterFilterReply::Neutral
    }

    fn configure(
        &self,
        id: &Id,
        config: &DistributionStatisticConfig,
    ) -> Option<DistributionStatisticConfig> {
        let value = self.tag_value(id)?;
        let over_limit = {
            let observed = self.observed();
            !observed.contains(value) && observed.len() >= self.maximum
        };
        if over_limit {
            self.on_max_reached.configure(id, config)
        } else {
            None
        }
    }
}

/// An expected value for [`max_expected`] and [`min_expected`].
///
/// A duration applies to timers, an amount to distribution summaries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ExpectedValue {
    /// Applies to timers.
    Duration(Duration),
    /// Applies to distribution summaries.
    Amount(f64),
}

impl From<Duration> for ExpectedValue {
    fn from(duration: Duration) -> Self {
        ExpectedValue::Duration(duration)
    }
}

impl From<f64> for ExpectedValue {
    fn from(amount: f64) -> Self {
        ExpectedValue::Amount(amount)
    }
}

impl ExpectedValue {
    fn kind_and_value(self) -> (MeterKind, f64) {
        match self {
            ExpectedValue::Duration(d) => (MeterKind::Timer, d.as_nanos() as f64),
            ExpectedValue::Amount(a) => (MeterKind::DistributionSummary, a),
        }
    }
}

/// Sets the maximum expected value of timers or distribution summaries whose
/// name starts with `prefix`.
pub fn max_expected(
    prefix: impl Into<Cow<'static, str>>,
    max: impl Into<ExpectedValue>,
) -> impl MeterFilter {
    Expected {
        prefix: prefix.into(),
        value: max.into(),
        bound: Bound::Max,
    }
}

/// Sets the minimum expected value of timers or distribution summaries whose
/// name starts with `prefix`.
pub fn min_expected(
    prefix: impl Into<Cow<'static, str>>,
    min: impl Into<ExpectedValue>,
) -> impl MeterFilter {
    Expected {
        prefix: prefix.into(),
        value: min.into(),
        bound: Bound::Min,
    }
}

#[derive(Clone, Copy, Debug)]
enum Bound {
    Min,
    Max,
}

struct Expected {
    prefix: Cow<'static, str>,
    value: ExpectedValue,
    bound: Bound,
}

impl MeterFilter for Expected {
    fn configure(
        &self,
        id: &Id,
        config: &DistributionStatisticConfig,
    ) -> Option<DistributionStatisticConfig> {
        let (kind, value) = self.value.kind_and_value();
        if id.kind() != kind || !id.name().starts_with(self.prefix.as_ref()) {
            return None;
        }
        let overrides = match self.bound {
            Bound::Min => DistributionStatisticConfig::none().with_minimum_expected_value(value),
            Bound::Max => DistributionStatisticConfig::none().with_maximum_expected_value(value),
        };
        Some(overrides.merge(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn counter(name: &'static str, tags: &[(&'static str, &'static str)]) -> Id {
        Id::new(name, Tags::of(tags.iter().copied()), MeterKind::Counter)
    }

    #[test]
    fn common_tags_do_not_override_meter_tags() {
        let filter = common_tags(Tags::of([("env", "prod"), ("region", "eu")]));
        let id = filter.map(counter("jobs", &[("env", "dev")]));
        assert_eq!(id.tag("env"), Some("dev"));
        assert_eq!(id.tag("region"), Some("eu"));
    }

    #[test]
    fn rename_tag_only_under_prefix() {
        let filter = rename_tag("http", "uri", "path");
        let renamed = filter.map(counter("http.requests", &[("uri", "/a")]));
        assert_eq!(renamed.tag("path"), Some("/a"));
        assert_eq!(renamed.tag("uri"), None);

        let untouched = filter.map(counter("db.queries", &[("uri", "/a")]));
        assert_eq!(untouched.tag("uri"), Some("/a"));
    }

    #[test]
    fn ignore_and_replace_tags() {
        let id = ignore_tags(["user"]).map(counter("jobs", &[("user", "u1"), ("queue", "q")]));
        assert_eq!(id.tags().len(), 1);

        let filter = replace_tag_values("status", |v: &str| format!("{}xx", &v[..1]), ["404"]);
        assert_eq!(filter.map(counter("http", &[("status", "503")])).tag("status"), Some("5xx"));
        assert_eq!(filter.map(counter("http", &[("status", "404")])).tag("status"), Some("404"));
    }

    #[rstest]
    #[case("jvm.memory", MeterFilterReply::Deny)]
    #[case("http.requests", MeterFilterReply::Neutral)]
    fn deny_by_prefix(#[case] name: &'static str, #[case] reply: MeterFilterReply) {
        assert_eq!(deny_name_starts_with("jvm").accept(&counter(name, &[])), reply);
    }

    #[rstest]
    #[case("http.requests", MeterFilterReply::Neutral)]
    #[case("db.queries", MeterFilterReply::Deny)]
    fn deny_unless_prefix(#[case] name: &'static str, #[case] reply: MeterFilterReply) {
        let filter = deny_unless(|id: &Id| id.name().starts_with("http"));
        assert_eq!(filter.accept(&counter(name, &[])), reply);
    }

    #[test]
    fn accept_and_deny_all() {
        let id = counter("jobs", &[]);
        assert_eq!(accept_all().accept(&id), MeterFilterReply::Accept);
        assert_eq!(deny_all().accept(&id), MeterFilterReply::Deny);
        assert_eq!(accept_name_starts_with("jo").accept(&id), MeterFilterReply::Accept);
    }

    #[test]
    fn maximum_allowable_metrics_remembers_admitted_ids() {
        let filter = maximum_allowable_metrics(2);
        let a = counter("a", &[]);
        assert_eq!(filter.accept(&a), MeterFilterReply::Neutral);
        assert_eq!(filter.accept(&counter("b", &[])), MeterFilterReply::Neutral);
        assert_eq!(filter.accept(&counter("c", &[])), MeterFilterReply::Deny);
        assert_eq!(filter.accept(&a), MeterFilterReply::Neutral);
    }

    #[test]
    fn maximum_allowable_tags_delegates_once_full() {
        let filter = maximum_allowable_tags("http", "uri", 1, deny_all());
        assert_eq!(filter.accept(&counter("http", &[("uri", "/a")])), MeterFilterReply::Neutral);
        assert_eq!(filter.accept(&counter("http", &[("uri", "/a")])), MeterFilterReply::Neutral);
        assert_eq!(filter.accept(&counter("http", &[("uri", "/b")])), MeterFilterReply::Deny);
        assert_eq!(filter.accept(&counter("db", &[("uri", "/b")])), MeterFilterReply::Neutral);
    }

    #[test]
    fn expected_values_apply_per_kind() {
        let timer = Id::new("http.latency", Tags::empty(), MeterKind::Timer);
        let summary = Id::new("http.size", Tags::empty(), MeterKind::DistributionSummary);
        let config = DistributionStatisticConfig::defaults();

        let max = max_expected("http", Duration::from_secs(1));
        let configured = max.configure(&timer, &config).unwrap();
        assert_eq!(configured.maximum_expected_value(), Some(1e9));
        assert_eq!(configured.buffer_length(), Some(3));
        assert!(max.configure(&summary, &config).is_none());

        let min = min_expected("http", 512.0);
        assert_eq!(
            min.configure(&summary, &config).unwrap().minimum_expected_value(),
            Some(512.0)
        );
        assert!(min.configure(&timer, &config).is_none());
    }
}
