//! Process-wide meter registry.
//!
//! Libraries should receive a [`MeterRegistry`] from their caller. This
//! module is for applications that want one default registry; until
//! [`set_meter_registry`] is called, [`meter_registry`] returns the closed
//! [`MeterRegistry::noop`] registry, whose meters discard everything.
use std::sync::{OnceLock, RwLock};

use mensura_commons::{mensura_error, mensura_info};

use crate::MeterRegistry;

static GLOBAL_METER_REGISTRY: OnceLock<RwLock<MeterRegistry>> = OnceLock::new();

#[inline]
fn global_meter_registry() -> &'static RwLock<MeterRegistry> {
    GLOBAL_METER_REGISTRY.get_or_init(|| RwLock::new(MeterRegistry::noop()))
}

/// Sets `registry` as the global meter registry.
///
/// Libraries should NOT call this function. It is intended for applications.
pub fn set_meter_registry(registry: MeterRegistry) {
    match global_meter_registry().write() {
        Ok(mut global) => {
            *global = registry;
            mensura_info!(name: "MeterRegistry.GlobalSet");
        }
        Err(_) => {
            mensura_error!(
                name: "MeterRegistry.GlobalSetFailed",
                message = "the global registry lock is poisoned; meters from meter_registry() are no-ops"
            );
        }
    }
}

/// The global meter registry.
pub fn meter_registry() -> MeterRegistry {
    match global_meter_registry().read() {
        Ok(global) => global.clone(),
        Err(_) => {
            mensura_error!(name: "MeterRegistry.GlobalGetFailed");
            MeterRegistry::noop()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Tags;

    #[test]
    fn falls_back_to_noop_then_returns_installed() {
        assert_eq!(meter_registry(), MeterRegistry::noop());
        assert!(meter_registry().counter("jobs", Tags::empty()).unwrap().is_noop());

        let registry = MeterRegistry::simple();
        set_meter_registry(registry.clone());
        assert_eq!(meter_registry(), registry);
        assert!(!meter_registry().counter("jobs", Tags::empty()).unwrap().is_noop());
    }
}
