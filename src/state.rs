use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::wiser::{DeviceId, ShutterAction};

#[derive(Default)]
struct Inner {
    last_actions: HashMap<DeviceId, ShutterAction>,
    last_levels: HashMap<DeviceId, u8>,
}

/// Last-known shutter state, shared by the command dispatcher and the
/// event listener. Entries are never evicted.
#[derive(Default)]
pub struct DeviceCache {
    inner: Mutex<Inner>,
}

impl DeviceCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The maps stay consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_action(&self, id: &DeviceId) -> Option<ShutterAction> {
        self.lock().last_actions.get(id).cloned()
    }

    pub fn record_action(&self, id: DeviceId, action: ShutterAction) {
        self.lock().last_actions.insert(id, action);
    }

    /// Last reported level in percent.
    pub fn last_level(&self, id: &DeviceId) -> Option<u8> {
        self.lock().last_levels.get(id).copied()
    }

    pub fn record_level(&self, id: DeviceId, level_percent: u8) {
        self.lock().last_levels.insert(id, level_percent);
    }
}
