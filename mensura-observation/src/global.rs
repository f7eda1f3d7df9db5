//! Process-wide observation registry.
//!
//! Instrumented libraries that cannot be handed a registry look it up here.
//! Until one is installed, [`observation_registry`] returns the noop registry.
use std::sync::{OnceLock, RwLock};

use mensura_commons::mensura_info;

use crate::ObservationRegistry;

static GLOBAL_OBSERVATION_REGISTRY: OnceLock<RwLock<Option<ObservationRegistry>>> = OnceLock::new();

#[inline]
fn global() -> &'static RwLock<Option<ObservationRegistry>> {
    GLOBAL_OBSERVATION_REGISTRY.get_or_init(|| RwLock::new(None))
}

/// Installs `registry` as the global observation registry.
pub fn set_observation_registry(registry: ObservationRegistry) {
    let mut global = global()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *global = Some(registry);
    mensura_info!(name: "ObservationRegistry.GlobalSet");
}

/// The global observation registry, or the noop registry when none was
/// installed.
pub fn observation_registry() -> ObservationRegistry {
    global()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
        .unwrap_or_else(ObservationRegistry::noop)
}
