//! Meter handles and the backend interface they delegate to.
//!
//! Every handle is a cheap clone of an id and a reference-counted *core*
//! created by a [`MeterFactory`]. The registry only ever sees the id and the
//! core's [`MeterCore::close`] hook; measurements are the backend's business.
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::{DistributionStatisticConfig, Id, MeterKind};

mod counter;
mod distribution_summary;
mod gauge;
mod long_task_timer;
mod timer;

pub use counter::{Counter, CounterBuilder};
pub use distribution_summary::{DistributionSummary, DistributionSummaryBuilder};
pub use gauge::{Gauge, GaugeBuilder};
pub use long_task_timer::{LongTaskSample, LongTaskTimer, LongTaskTimerBuilder};
pub use timer::{Timer, TimerBuilder, TimerSample};

/// A function sampled for a gauge's value.
pub type GaugeFn = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Lifecycle shared by every meter core.
pub trait MeterCore: Send + Sync + Debug {
    /// Releases backend resources. Called once when the registry closes.
    fn close(&self) {}

    /// Whether this core discards everything it is given.
    fn is_noop(&self) -> bool {
        false
    }
}

/// Backend of a [`Counter`].
pub trait CounterCore: MeterCore {
    /// Adds `amount` to the count.
    fn increment(&self, amount: f64);
    /// The cumulative count.
    fn count(&self) -> f64;
}

/// Backend of a [`Gauge`].
pub trait GaugeCore: MeterCore {
    /// Samples the current value.
    fn value(&self) -> f64;
}

/// Backend of a [`Timer`].
pub trait TimerCore: MeterCore {
    /// Records one event of the given duration.
    fn record(&self, duration: Duration);
    /// Number of recorded events.
    fn count(&self) -> u64;
    /// Sum of the recorded durations.
    fn total_time(&self) -> Duration;
    /// Longest recorded duration.
    fn max(&self) -> Duration;
    /// The `phi` percentile of recent durations, if computed.
    fn percentile(&self, _phi: f64) -> Option<Duration> {
        None
    }
}

/// Backend of a [`DistributionSummary`].
pub trait DistributionSummaryCore: MeterCore {
    /// Records one already scaled amount.
    fn record(&self, amount: f64);
    /// Number of recorded amounts.
    fn count(&self) -> u64;
    /// Sum of the recorded amounts.
    fn total_amount(&self) -> f64;
    /// Largest recorded amount.
    fn max(&self) -> f64;
    /// The `phi` percentile of recent amounts, if computed.
    fn percentile(&self, _phi: f64) -> Option<f64> {
        None
    }
}

/// Backend of a [`LongTaskTimer`].
pub trait LongTaskTimerCore: MeterCore {
    /// Begins tracking a task and returns its handle.
    fn start_task(&self) -> u64;
    /// Stops tracking `task`, returning how long it ran.
    fn stop_task(&self, task: u64) -> Option<Duration>;
    /// Number of tasks in flight.
    fn active_tasks(&self) -> usize;
    /// Combined duration of the tasks in flight.
    fn duration(&self) -> Duration;
    /// Duration of the longest task in flight.
    fn max(&self) -> Duration;
}

/// Creates meter cores; the seam between the registry and a backend.
///
/// Each method is called at most once per id and only after the registry's
/// filters admitted the meter.
pub trait MeterFactory: Send + Sync + Debug {
    /// A counter core.
    fn new_counter(&self, id: &Id) -> Arc<dyn CounterCore>;

    /// A gauge core sampling `value`.
    fn new_gauge(&self, id: &Id, value: GaugeFn) -> Arc<dyn GaugeCore>;

    /// A timer core with the final distribution statistics `config`.
    fn new_timer(&self, id: &Id, config: &DistributionStatisticConfig) -> Arc<dyn TimerCore>;

    /// A distribution summary core. `scale` has already been applied to the
    /// amounts it receives.
    fn new_distribution_summary(
        &self,
        id: &Id,
        config: &DistributionStatisticConfig,
        scale: f64,
    ) -> Arc<dyn DistributionSummaryCore>;

    /// A long task timer core.
    fn new_long_task_timer(
        &self,
        id: &Id,
        config: &DistributionStatisticConfig,
    ) -> Arc<dyn LongTaskTimerCore>;
}

/// A registered meter of any kind.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Meter {
    /// A counter.
    Counter(Counter),
    /// A gauge.
    Gauge(Gauge),
    /// A timer.
    Timer(Timer),
    /// A distribution summary.
    DistributionSummary(DistributionSummary),
    /// A long task timer.
    LongTaskTimer(LongTaskTimer),
}

impl Meter {
    /// The id the meter was registered under.
    pub fn id(&self) -> &Id {
        match self {
            Meter::Counter(m) => m.id(),
            Meter::Gauge(m) => m.id(),
            Meter::Timer(m) => m.id(),
            Meter::DistributionSummary(m) => m.id(),
            Meter::LongTaskTimer(m) => m.id(),
        }
    }

    /// The kind of the meter.
    pub fn kind(&self) -> MeterKind {
        match self {
            Meter::Counter(_) => MeterKind::Counter,
            Meter::Gauge(_) => MeterKind::Gauge,
            Meter::Timer(_) => MeterKind::Timer,
            Meter::DistributionSummary(_) => MeterKind::DistributionSummary,
            Meter::LongTaskTimer(_) => MeterKind::LongTaskTimer,
        }
    }

    /// Whether the meter discards everything it is given.
    pub fn is_noop(&self) -> bool {
        match self {
            Meter::Counter(m) => m.is_noop(),
            Meter::Gauge(m) => m.is_noop(),
            Meter::Timer(m) => m.is_noop(),
            Meter::DistributionSummary(m) => m.is_noop(),
            Meter::LongTaskTimer(m) => m.is_noop(),
        }
    }

    pub(crate) fn close(&self) {
        match self {
            Meter::Counter(m) => m.close(),
            Meter::Gauge(m) => m.close(),
            Meter::Timer(m) => m.close(),
            Meter::DistributionSummary(m) => m.close(),
            Meter::LongTaskTimer(m) => m.close(),
        }
    }
}

/// A typed meter handle the registry can create and check.
pub trait MeterType: Clone + Sized + private::Sealed {
    /// The kind stored in ids of this meter type.
    const KIND: MeterKind;

    /// Extracts a handle of this type, `None` on a kind mismatch.
    fn from_meter(meter: &Meter) -> Option<Self>;

    /// Wraps the handle.
    fn into_meter(self) -> Meter;

    /// A handle discarding everything, for suppressed registrations.
    fn noop(id: Id) -> Self;
}

mod private {
    #[allow(unreachable_pub)]
    pub trait Sealed {}
}

macro_rules! impl_meter_type {
    ($handle:ident, $variant:ident, $noop:expr) => {
        impl private::Sealed for $handle {}

        impl MeterType for $handle {
            const KIND: MeterKind = MeterKind::$variant;

            fn from_meter(meter: &Meter) -> Option<Self> {
                match meter {
                    Meter::$variant(m) => Some(m.clone()),
                    _ => None,
                }
            }

            fn into_meter(self) -> Meter {
                Meter::$variant(self)
            }

            fn noop(id: Id) -> Self {
                $handle::new(id, Arc::new($noop))
            }
        }
    };
}

impl_meter_type!(Counter, Counter, crate::noop::NoopCounter);
impl_meter_type!(Gauge, Gauge, crate::noop::NoopGauge);
impl_meter_type!(Timer, Timer, crate::noop::NoopTimer);
impl_meter_type!(
    DistributionSummary,
    DistributionSummary,
    crate::noop::NoopDistributionSummary
);
impl_meter_type!(LongTaskTimer, LongTaskTimer, crate::noop::NoopLongTaskTimer);

/// Compares two cores by address, ignoring vtables.
pub(crate) fn same_core<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
