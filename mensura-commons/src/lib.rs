//! # mensura commons
//!
//! Building blocks shared by the [`mensura`] meter registry and the
//! [`mensura-observation`] lifecycle engine:
//!
//! * [`KeyValue`] / [`KeyValues`]: sorted, key-unique string pairs used both as
//!   meter tags and as observation key-values.
//! * The internal logging macros [`mensura_debug!`], [`mensura_info!`],
//!   [`mensura_warn!`] and [`mensura_error!`].
//!
//! ## Feature Flags
//!
//! * `internal-logs`: Enables internal logging via `tracing` (default).
//!
//! [`mensura`]: https://crates.io/crates/mensura
//! [`mensura-observation`]: https://crates.io/crates/mensura-observation
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]
#![cfg_attr(test, deny(warnings))]

mod internal_logging;
mod key_value;

pub use key_value::{KeyValue, KeyValues};

#[cfg(feature = "internal-logs")]
#[doc(hidden)]
pub mod _private {
    pub use tracing::{debug, error, info, warn};
}
