//! Handle-keyed detector bookkeeping, owned by the bridge instance.

use crate::{BridgeError, Result};
use iris_detect::AnyDetector;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps caller-assigned integer handles to live detectors.
///
/// Handles are unique until explicitly removed; adding a detector for an
/// existing handle is a programming error on the caller's side, not a
/// recoverable condition.
pub struct DetectorRegistry {
    detectors: HashMap<i64, Arc<AnyDetector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            detectors: HashMap::new(),
        }
    }

    pub fn add(&mut self, handle: i64, detector: Arc<AnyDetector>) -> Result<()> {
        if self.detectors.contains_key(&handle) {
            return Err(BridgeError::InvalidArgument(format!(
                "detector handle {handle} already in use"
            )));
        }
        self.detectors.insert(handle, detector);
        Ok(())
    }

    /// Idempotent removal; absent handles are not an error.
    pub fn remove(&mut self, handle: i64) {
        self.detectors.remove(&handle);
    }

    pub fn get(&self, handle: i64) -> Option<Arc<AnyDetector>> {
        self.detectors.get(&handle).cloned()
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
