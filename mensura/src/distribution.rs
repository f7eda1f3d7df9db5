use std::time::Duration;

/// Configuration of the distribution statistics a Timer or
/// DistributionSummary publishes.
///
/// Every field is optional. Unset fields are filled from a parent with
/// [`merge`](DistributionStatisticConfig::merge): meter builders set what the
/// instrumentation asks for, the registry merges in its defaults and meter
/// filters may then override any field.
///
/// Expected values are plain numbers: nanoseconds for timers, recorded
/// amounts for distribution summaries.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DistributionStatisticConfig {
    percentile_histogram: Option<bool>,
    percentiles: Option<Vec<f64>>,
    service_level_objectives: Option<Vec<f64>>,
    minimum_expected_value: Option<f64>,
    maximum_expected_value: Option<f64>,
    expiry: Option<Duration>,
    buffer_length: Option<u32>,
}

impl DistributionStatisticConfig {
    /// A configuration with every field unset.
    pub fn none() -> Self {
        DistributionStatisticConfig::default()
    }

    /// The registry-wide defaults: no histogram, no percentiles, expected
    /// values between 1 and infinity, two minute expiry over three buffers.
    pub fn defaults() -> Self {
        DistributionStatisticConfig {
            percentile_histogram: Some(false),
            percentiles: None,
            service_level_objectives: None,
            minimum_expected_value: Some(1.0),
            maximum_expected_value: Some(f64::INFINITY),
            expiry: Some(Duration::from_secs(120)),
            buffer_length: Some(3),
        }
    }

    /// Whether to publish a percentile histogram.
    pub fn with_percentile_histogram(mut self, enabled: bool) -> Self {
        self.percentile_histogram = Some(enabled);
        self
    }

    /// Client-side percentiles to publish, each in `[0, 1]`.
    pub fn with_percentiles(mut self, percentiles: impl Into<Vec<f64>>) -> Self {
        self.percentiles = Some(percentiles.into());
        self
    }

    /// Service level objective boundaries.
    pub fn with_service_level_objectives(mut self, slos: impl Into<Vec<f64>>) -> Self {
        self.service_level_objectives = Some(slos.into());
        self
    }

    /// The smallest value expected to be recorded.
    pub fn with_minimum_expected_value(mut self, min: f64) -> Self {
        self.minimum_expected_value = Some(min);
        self
    }

    /// The largest value expected to be recorded.
    pub fn with_maximum_expected_value(mut self, max: f64) -> Self {
        self.maximum_expected_value = Some(max);
        self
    }

    /// How long samples are kept for decaying statistics.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Number of rotating buffers over the expiry window.
    pub fn with_buffer_length(mut self, buffer_length: u32) -> Self {
        self.buffer_length = Some(buffer_length);
        self
    }

    /// Returns a copy where every unset field is taken from `parent`.
    pub fn merge(&self, parent: &DistributionStatisticConfig) -> Self {
        DistributionStatisticConfig {
            percentile_histogram: self.percentile_histogram.or(parent.percentile_histogram),
            percentiles: self
                .percentiles
                .clone()
                .or_else(|| parent.percentiles.clone()),
            service_level_objectives: self
                .service_level_objectives
                .clone()
                .or_else(|| parent.service_level_objectives.clone()),
            minimum_expected_value: self.minimum_expected_value.or(parent.minimum_expected_value),
            maximum_expected_value: self.maximum_expected_value.or(parent.maximum_expected_value),
            expiry: self.expiry.or(parent.expiry),
            buffer_length: self.buffer_length.or(parent.buffer_length),
        }
    }

    /// Whether a percentile histogram is published.
    pub fn is_percentile_histogram(&self) -> bool {
        self.percentile_histogram.unwrap_or(false)
    }

    /// Client-side percentiles, empty when unset.
    pub fn percentiles(&self) -> &[f64] {
        self.percentiles.as_deref().unwrap_or(&[])
    }

    /// Service level objective boundaries, empty when unset.
    pub fn service_level_objectives(&self) -> &[f64] {
        self.service_level_objectives.as_deref().unwrap_or(&[])
    }

    /// The smallest expected value.
    pub fn minimum_expected_value(&self) -> Option<f64> {
        self.minimum_expected_value
    }

    /// The largest expected value.
    pub fn maximum_expected_value(&self) -> Option<f64> {
        self.maximum_expected_value
    }

    /// The expiry of decaying statistics.
    pub fn expiry(&self) -> Option<Duration> {
        self.expiry
    }

    /// The number of rotating buffers.
    pub fn buffer_length(&self) -> Option<u32> {
        self.buffer_length
    }

    /// Whether any distribution statistic beyond count, total and max is
    /// requested.
    pub fn is_publishing_distribution(&self) -> bool {
        self.is_percentile_histogram()
            || !self.percentiles().is_empty()
            || !self.service_level_objectives().is_empty()
    }
}
