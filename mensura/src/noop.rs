//! Cores that discard everything, handed out for denied registrations and by
//! closed registries.
use std::time::Duration;

use crate::meter::{
    CounterCore, DistributionSummaryCore, GaugeCore, LongTaskTimerCore, MeterCore, TimerCore,
};

macro_rules! noop_core {
    ($name:ident) => {
        #[derive(Debug, Default)]
        pub(crate) struct $name;

        impl MeterCore for $name {
            fn is_noop(&self) -> bool {
                true
            }
        }
    };
}

noop_core!(NoopCounter);
noop_core!(NoopGauge);
noop_core!(NoopTimer);
noop_core!(NoopDistributionSummary);
noop_core!(NoopLongTaskTimer);

impl CounterCore for NoopCounter {
    fn increment(&self, _amount: f64) {}

    fn count(&self) -> f64 {
        0.0
    }
}

impl GaugeCore for NoopGauge {
    fn value(&self) -> f64 {
        f64::NAN
    }
}

impl TimerCore for NoopTimer {
    fn record(&self, _duration: Duration) {}

    fn count(&self) -> u64 {
        0
    }

    fn total_time(&self) -> Duration {
        Duration::ZERO
    }

    fn max(&self) -> Duration {
        Duration::ZERO
    }
}

impl DistributionSummaryCore for NoopDistributionSummary {
    fn record(&self, _amount: f64) {}

    fn count(&self) -> u64 {
        0
    }

    fn total_amount(&self) -> f64 {
        0.0
    }

    fn max(&self) -> f64 {
        0.0
    }
}

impl LongTaskTimerCore for NoopLongTaskTimer {
    fn start_task(&self) -> u64 {
        0
    }

    fn stop_task(&self, _task: u64) -> Option<Duration> {
        None
    }

    fn active_tasks(&self) -> usize {
        0
    }

    fn duration(&self) -> Duration {
        Duration::ZERO
    }

    fn max(&self) -> Duration {
        Duration::ZERO
    }
}
