use std::any::Any;
use std::error::Error;
use std::sync::Arc;
use thiserror::Error;

/// An error recorded on an observation.
///
/// Shared by reference so that handlers and the caller can both hold it.
pub type ObservationError = Arc<dyn Error + Send + Sync + 'static>;

/// A specialized `Result` type for context lookups.
pub type ContextResult<T> = Result<T, ContextError>;

/// Errors returned by [`ObservationContext`] lookups.
///
/// [`ObservationContext`]: crate::ObservationContext
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContextError {
    /// A required entry was not present in the context.
    #[error("Context does not have an entry for key [{key}]")]
    MissingRequired {
        /// The type name used as the entry key.
        key: &'static str,
    },
}

/// A panic raised by observed code, recorded as the observation's error.
///
/// The original panic payload is resumed unchanged after recording.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("observed code panicked: {message}")]
pub struct PanicError {
    message: String,
}

impl PanicError {
    pub(crate) fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };
        PanicError { message }
    }

    /// The panic message, when the payload was a string.
    pub fn message(&self) -> &str {
        &self.message
    }
}
