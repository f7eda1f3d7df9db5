use std::borrow::Cow;

use mensura_commons::KeyValues;

use crate::ObservationContext;

/// Supplies names and key-values for observations of a given context kind.
///
/// A convention is consulted when an observation starts and again when it
/// stops; key-values it returns are merged into the context each time.
///
/// Conventions registered on an [`ObservationConfig`] override the default
/// convention an instrumentation passes to
/// [`Observation::create_not_started_with_convention`].
///
/// [`ObservationConfig`]: crate::ObservationConfig
/// [`Observation::create_not_started_with_convention`]: crate::Observation::create_not_started_with_convention
pub trait ObservationConvention: Send + Sync {
    /// Whether this convention applies to `context`.
    fn supports_context(&self, context: &ObservationContext) -> bool;

    /// Low cardinality key-values to add to the context.
    fn low_cardinality_key_values(&self, _context: &ObservationContext) -> KeyValues {
        KeyValues::empty()
    }

    /// High cardinality key-values to add to the context.
    fn high_cardinality_key_values(&self, _context: &ObservationContext) -> KeyValues {
        KeyValues::empty()
    }

    /// The technical name observations get under this convention.
    ///
    /// A blank name leaves the observation's name unchanged.
    fn name(&self) -> Option<Cow<'static, str>> {
        None
    }

    /// A contextual name computed when the observation stops.
    fn contextual_name(&self, _context: &ObservationContext) -> Option<Cow<'static, str>> {
        None
    }
}

pub(crate) fn non_blank(name: Option<Cow<'static, str>>) -> Option<Cow<'static, str>> {
    name.filter(|n| !n.trim().is_empty())
}
