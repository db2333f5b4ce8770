use std::sync::{Arc, Mutex};

use fnv::FnvHashMap;

use crate::pgrelay::cluster::Cluster;

/// Maps backend secret keys to the cluster that minted them, so a cancel
/// request arriving on a fresh connection can be routed to the right place.
///
/// An entry lives from the moment a session completes its handshake until
/// that session terminates; the KeyRegistration guard enforces the second
/// half. A single mutex serializes writers and readers, so cancel handlers
/// observe a consistent snapshot. The last insert wins on key collision
/// (a backend reused a key after reconnection; the prior session deletes
/// its entry on exit either way).
pub struct KeyRegistry {
    map: Mutex<FnvHashMap<i32, Arc<dyn Cluster>>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        KeyRegistry {
            map: Mutex::new(FnvHashMap::default()),
        }
    }

    /// Insert the key and return a guard that removes it again when dropped.
    pub fn register(&self, secret_key: i32, cluster: Arc<dyn Cluster>) -> KeyRegistration<'_> {
        self.map.lock().unwrap().insert(secret_key, cluster);
        KeyRegistration {
            registry: self,
            secret_key,
        }
    }

    pub fn get(&self, secret_key: i32) -> Option<Arc<dyn Cluster>> {
        self.map.lock().unwrap().get(&secret_key).cloned()
    }

    pub fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, secret_key: i32) {
        self.map.lock().unwrap().remove(&secret_key);
    }
}

impl Default for KeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped registry entry: dropping it removes the key, so no entry
/// survives its session on any exit path.
pub struct KeyRegistration<'a> {
    registry: &'a KeyRegistry,
    secret_key: i32,
}

impl Drop for KeyRegistration<'_> {
    fn drop(&mut self) {
        self.registry.remove(self.secret_key);
    }
}
