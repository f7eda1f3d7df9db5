//! # mensura
//!
//! A dimensional meter registry. Instrumented code registers counters,
//! gauges, timers, distribution summaries and long task timers in a
//! [`MeterRegistry`]; a pluggable [`MeterFactory`] backend decides what the
//! measurements turn into.
//!
//! ```
//! use std::time::Duration;
//! use mensura::{MeterRegistry, Tags, Timer};
//!
//! let registry = MeterRegistry::simple();
//!
//! let requests = registry
//!     .counter("http.server.requests", Tags::of([("method", "GET")]))
//!     .unwrap();
//! requests.increment();
//!
//! let latency = Timer::builder("http.server.latency")
//!     .publish_percentiles([0.99])
//!     .register(&registry)
//!     .unwrap();
//! latency.record(Duration::from_millis(7));
//!
//! // the timer and its synthetic percentile gauge
//! assert_eq!(registry.find("http.server.latency.percentile").meters().len(), 1);
//! ```
//!
//! ## Identity and filters
//!
//! A meter is identified by its name and tags ([`Id`]). Before a meter is
//! created, the registry's [`MeterFilter`]s may rewrite its id, deny it or
//! change its [`DistributionStatisticConfig`]; see [`filter`] for the
//! built-in filters. At most one meter exists per rewritten id. Registering
//! the same id with another meter kind fails with
//! [`MeterError::KindMismatch`].
//!
//! ## Noop meters
//!
//! Denied registrations, and registrations after [`MeterRegistry::close`],
//! return meters that discard everything instead of errors, so instrumented
//! code never has to branch on them.
//!
//! ## Observations
//!
//! [`DefaultMeterObservationHandler`] records `mensura_observation`
//! observations as timers, long task timers and counters.
//!
//! ## Feature Flags
//!
//! * `internal-logs`: Enables internal logging via `tracing` (default).
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

mod distribution;
mod error;
pub mod filter;
pub mod global;
mod id;
pub mod meter;
mod noop;
mod observation_handler;
mod registry;
mod search;
mod simple;

pub use distribution::DistributionStatisticConfig;
pub use error::{MeterError, MeterResult};
pub use filter::{MeterFilter, MeterFilterReply};
pub use id::{Id, MeterKind, Tag, Tags};
pub use meter::{
    Counter, CounterBuilder, DistributionSummary, DistributionSummaryBuilder, Gauge,
    GaugeBuilder, LongTaskSample, LongTaskTimer, LongTaskTimerBuilder, Meter, MeterFactory,
    MeterType, Timer, TimerBuilder, TimerSample,
};
pub use observation_handler::DefaultMeterObservationHandler;
pub use registry::{Config, FailureListener, MeterListener, MeterRegistry, MeterRegistryBuilder};
pub use search::{RequiredSearch, Search};
pub use simple::SimpleMeterFactory;
