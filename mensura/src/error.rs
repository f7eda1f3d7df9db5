use thiserror::Error;

use crate::MeterKind;

/// A specialized `Result` type for meter registration and search.
pub type MeterResult<T> = Result<T, MeterError>;

/// Errors returned by the meter registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MeterError {
    /// A meter of another kind is already registered under the same name and
    /// tags.
    #[error(
        "There is already a registered meter of a different type ({existing} vs. {requested}) with the same name: {name}"
    )]
    KindMismatch {
        /// Name of the colliding meter.
        name: String,
        /// Kind of the registered meter.
        existing: MeterKind,
        /// Kind that was requested.
        requested: MeterKind,
    },
    /// A required search found nothing.
    #[error("Unable to find a meter matching {0}")]
    NotFound(String),
}
