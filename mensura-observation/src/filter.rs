use crate::ObservationContext;

/// Mutates an observation's context right before its handlers are stopped.
///
/// Filters run in registration order. Closures taking `&mut ObservationContext`
/// implement this trait.
///
/// # Examples
///
/// ```
/// use mensura_commons::KeyValue;
/// use mensura_observation::{ObservationContext, ObservationRegistry};
///
/// let registry = ObservationRegistry::create();
/// registry.observation_config().observation_filter(|ctx: &mut ObservationContext| {
///     ctx.add_low_cardinality_key_value(KeyValue::new("region", "eu-west-1"));
/// });
/// ```
pub trait ObservationFilter: Send + Sync {
    /// Mutates `context` in place.
    fn map(&self, context: &mut ObservationContext);
}

impl<F> ObservationFilter for F
where
    F: Fn(&mut ObservationContext) + Send + Sync,
{
    fn map(&self, context: &mut ObservationContext) {
        self(context)
    }
}

/// Decides whether an observation is created at all.
///
/// Every registered predicate must return `true`; otherwise creation yields
/// the noop observation. Closures taking `(&str, &ObservationContext)`
/// implement this trait.
pub trait ObservationPredicate: Send + Sync {
    /// Tests the observation `name` together with its initial `context`.
    fn test(&self, name: &str, context: &ObservationContext) -> bool;
}

impl<F> ObservationPredicate for F
where
    F: Fn(&str, &ObservationContext) -> bool + Send + Sync,
{
    fn test(&self, name: &str, context: &ObservationContext) -> bool {
        self(name, context)
    }
}
