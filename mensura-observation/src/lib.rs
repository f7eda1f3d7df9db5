//! # mensura observation
//!
//! Instrument a unit of work once and let pluggable handlers turn it into
//! metrics, traces or logs.
//!
//! An [`Observation`] is created against an [`ObservationRegistry`], started,
//! optionally scoped to the current thread, tagged, and stopped. Every step is
//! broadcast to the [`ObservationHandler`]s registered on the registry whose
//! [`supports_context`](ObservationHandler::supports_context) accepts the
//! observation's [`ObservationContext`].
//!
//! ```
//! use mensura_observation::{Event, Observation, ObservationRegistry, ObservationTextPublisher};
//!
//! let registry = ObservationRegistry::create();
//! registry
//!     .observation_config()
//!     .observation_handler(ObservationTextPublisher::new());
//!
//! let observation = Observation::create_not_started("orders.fetch", Some(&registry))
//!     .low_cardinality_key_value("source", "db")
//!     .clone();
//! observation.start();
//! {
//!     let _scope = observation.open_scope().guard();
//!     // code running here sees `observation` as current
//!     assert!(registry.current_observation().is_some());
//!     observation.event(Event::of("cache.miss"));
//! }
//! observation.stop();
//! ```
//!
//! ## Noop observations
//!
//! Without a registry, when a registered [`ObservationPredicate`] rejects an
//! observation, or when no handler supports its context, creation returns the
//! noop observation. All operations on it are no-ops and its scopes leave the
//! thread-local state untouched.
//!
//! ## Scopes
//!
//! [`Scope`]s are thread-local and form a chain through their previous
//! scope. Besides nested open/close they support [`Scope::reset`] and
//! [`Scope::make_current`] for moving a chain across a thread boundary.
//!
//! ## Feature Flags
//!
//! * `internal-logs`: Enables internal logging via `tracing` (default).
//! * `testing`: Exposes [`testing::RecordingHandler`] for downstream tests.
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

mod context;
mod convention;
mod error;
mod filter;
pub mod global;
pub mod handler;
mod observation;
mod registry;
mod scope;
mod text_publisher;

#[cfg(any(test, feature = "testing"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;

pub use context::{Event, ObservationContext};
pub use convention::ObservationConvention;
pub use error::{ContextError, ContextResult, ObservationError, PanicError};
pub use filter::{ObservationFilter, ObservationPredicate};
pub use handler::{AllMatchingCompositeHandler, FirstMatchingCompositeHandler, ObservationHandler};
pub use observation::{Observation, ObservationState};
pub use registry::{ObservationConfig, ObservationRegistry};
pub use scope::{Scope, ScopeGuard};
pub use text_publisher::ObservationTextPublisher;
