use std::borrow::Cow;
use std::sync::Arc;

use super::{same_core, DistributionSummaryCore};
use crate::{DistributionStatisticConfig, Id, MeterKind, MeterRegistry, MeterResult, Tag, Tags};

/// Tracks the distribution of recorded amounts, e.g. payload sizes.
#[derive(Clone, Debug)]
pub struct DistributionSummary {
    id: Arc<Id>,
    core: Arc<dyn DistributionSummaryCore>,
    scale: f64,
}

impl DistributionSummary {
    /// Starts building a summary named `name`.
    pub fn builder(name: impl Into<Cow<'static, str>>) -> DistributionSummaryBuilder {
        DistributionSummaryBuilder {
            name: name.into(),
            tags: Tags::empty(),
            description: None,
            base_unit: None,
            scale: 1.0,
            config: DistributionStatisticConfig::none(),
        }
    }

    pub(crate) fn new(id: Id, core: Arc<dyn DistributionSummaryCore>) -> Self {
        DistributionSummary {
            id: Arc::new(id),
            core,
            scale: 1.0,
        }
    }

    fn scaled(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// The id the summary was registered under.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Records `amount`, multiplied by the summary's scale. Negative amounts
    /// are ignored.
    pub fn record(&self, amount: f64) {
        if amount >= 0.0 {
            self.core.record(amount * self.scale);
        }
    }

    /// Number of recorded amounts.
    pub fn count(&self) -> u64 {
        self.core.count()
    }

    /// Sum of the recorded, scaled amounts.
    pub fn total_amount(&self) -> f64 {
        self.core.total_amount()
    }

    /// Largest recorded, scaled amount.
    pub fn max(&self) -> f64 {
        self.core.max()
    }

    /// Average recorded amount, zero before the first record.
    pub fn mean(&self) -> f64 {
        match self.count() {
            0 => 0.0,
            count => self.total_amount() / count as f64,
        }
    }

    /// The `phi` percentile of recent amounts, when the backend computes
    /// percentiles for this summary.
    pub fn percentile(&self, phi: f64) -> Option<f64> {
        self.core.percentile(phi)
    }

    /// Whether this summary discards recordings.
    pub fn is_noop(&self) -> bool {
        self.core.is_noop()
    }

    pub(crate) fn close(&self) {
        self.core.close();
    }
}

impl PartialEq for DistributionSummary {
    fn eq(&self, other: &Self) -> bool {
        same_core(&self.core, &other.core)
    }
}

/// Builder of a [`DistributionSummary`].
#[derive(Clone, Debug)]
pub struct DistributionSummaryBuilder {
    name: Cow<'static, str>,
    tags: Tags,
    description: Option<Cow<'static, str>>,
    base_unit: Option<Cow<'static, str>>,
    scale: f64,
    config: DistributionStatisticConfig,
}

impl DistributionSummaryBuilder {
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

    /// Sets the base unit, e.g. `bytes`.
    pub fn base_unit(mut self, base_unit: impl Into<Cow<'static, str>>) -> Self {
        self.base_unit = Some(base_unit.into());
        self
    }

    /// Multiplies every recorded amount by `scale`.
    pub fn scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Publishes the given percentiles, each in `[0, 1]`, as gauges named
    /// `<name>.percentile` tagged with `phi`.
    pub fn publish_percentiles(mut self, percentiles: impl Into<Vec<f64>>) -> Self {
        self.config = self.config.with_percentiles(percentiles);
        self
    }

    /// Publishes a percentile histogram.
    pub fn publish_percentile_histogram(mut self, enabled: bool) -> Self {
        self.config = self.config.with_percentile_histogram(enabled);
        self
    }

    /// Service level objective boundaries.
    pub fn service_level_objectives(mut self, slos: impl Into<Vec<f64>>) -> Self {
        self.config = self.config.with_service_level_objectives(slos);
        self
    }

    /// The smallest amount expected to be recorded.
    pub fn minimum_expected_value(mut self, min: f64) -> Self {
        self.config = self.config.with_minimum_expected_value(min);
        self
    }

    /// The largest amount expected to be recorded.
    pub fn maximum_expected_value(mut self, max: f64) -> Self {
        self.config = self.config.with_maximum_expected_value(max);
        self
    }

    /// Registers the summary, or returns the one already registered under the
    /// same id.
    pub fn register(self, registry: &MeterRegistry) -> MeterResult<DistributionSummary> {
        let mut id = Id::new(self.name, self.tags, MeterKind::DistributionSummary);
        if let Some(description) = self.description {
            id = id.with_description(description);
        }
        if let Some(base_unit) = self.base_unit {
            id = id.with_base_unit(base_unit);
        }
        let scale = self.scale;
        registry.register(id, Some(self.config), move |factory, id, config| {
            DistributionSummary::new(id.clone(), factory.new_distribution_summary(id, config, scale))
                .scaled(scale)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_applies_to_recorded_amounts() {
        let registry = MeterRegistry::simple();
        let summary = DistributionSummary::builder("payload")
            .base_unit("bytes")
            .scale(1024.0)
            .register(&registry)
            .unwrap();

        summary.record(1.0);
        summary.record(3.0);
        summary.record(-1.0);
        assert_eq!(summary.count(), 2);
        assert_eq!(summary.total_amount(), 4096.0);
        assert_eq!(summary.max(), 3072.0);
        assert_eq!(summary.mean(), 2048.0);
        assert_eq!(summary.id().base_unit(), Some("bytes"));
    }

    #[test]
    fn existing_summary_keeps_its_scale() {
        let registry = MeterRegistry::simple();
        let first = DistributionSummary::builder("payload")
            .scale(2.0)
            .register(&registry)
            .unwrap();
        let second = DistributionSummary::builder("payload")
            .scale(10.0)
            .register(&registry)
            .unwrap();
        assert_eq!(first, second);
        second.record(1.0);
        assert_eq!(first.total_amount(), 2.0);
    }
}
