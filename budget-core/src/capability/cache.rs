use super::CapabilityTable;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Process-wide holder for a capability table. Readers take a snapshot and
/// never observe a partially built table; writers swap in a complete one.
#[derive(Debug)]
pub struct CapabilityCache {
    current: RwLock<Arc<CapabilityTable>>,
}

impl CapabilityCache {
    pub fn new(table: CapabilityTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
        }
    }

    pub fn snapshot(&self) -> Arc<CapabilityTable> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn version(&self) -> String {
        self.snapshot().version().to_string()
    }

    /// Installs `table` unless it carries the version already installed.
    /// Returns whether the swap happened.
    pub fn replace(&self, table: CapabilityTable) -> bool {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if guard.version() == table.version() {
            return false;
        }
        info!(from = guard.version(), to = table.version(), "Replacing capability table");
        *guard = Arc::new(table);
        true
    }

    /// Installs `table` regardless of version.
    pub fn force_replace(&self, table: CapabilityTable) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityOverride, CapabilityRecord};
    use std::collections::HashMap;

    #[test]
    fn test_snapshot_survives_replace() {
        let cache = CapabilityCache::new(CapabilityTable::builtin().unwrap());
        let before = cache.snapshot();

        let next = CapabilityTable::new("next", HashMap::new());
        assert!(cache.replace(next));

        assert!(before.get("gpt-4").is_some());
        assert!(cache.snapshot().get("gpt-4").is_none());
        assert_eq!(cache.version(), "next");
    }

    #[test]
    fn test_same_version_not_replaced() {
        let cache = CapabilityCache::new(CapabilityTable::builtin().unwrap());
        assert!(!cache.replace(CapabilityTable::builtin().unwrap()));

        let patched = CapabilityTable::new("2025-02-01", HashMap::new())
            .with_overrides(&[CapabilityOverride::new("m", CapabilityRecord::with_max_tokens(1))]);
        cache.force_replace(CapabilityTable::new("2025-02-01", HashMap::new()));
        assert!(cache.snapshot().is_empty());
        assert!(cache.replace(patched));
    }

    #[test]
    fn test_concurrent_readers() {
        let cache = Arc::new(CapabilityCache::new(CapabilityTable::builtin().unwrap()));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    if i == 0 {
                        cache.replace(CapabilityTable::new("swapped", HashMap::new()));
                    }
                    let table = cache.snapshot();
                    // Either the full builtin table or the full replacement.
                    assert!(table.get("gpt-4").is_some() || table.version() == "swapped");
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
