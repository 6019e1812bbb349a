use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Idle locks are dropped once the registry grows past this many sessions.
const PRUNE_THRESHOLD: usize = 1_024;

/// One async mutex per session id. Holding the guard serializes turns for that
/// session while other sessions proceed independently.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() >= PRUNE_THRESHOLD {
                // the map holds the only reference to an idle lock
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(session_id.to_string()).or_default().clone()
        };

        lock.lock_owned().await
    }

    pub fn tracked_sessions(&self) -> usize {
        self.locks.lock().len()
    }
}
