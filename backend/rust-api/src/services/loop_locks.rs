use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serialises loop mutations per (student, test) pair.
///
/// Reset, round generation, grading and ending all take the pair's guard, so
/// two overlapping rounds can never both commit to the same loop.
#[derive(Clone, Default)]
pub struct LoopLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl LoopLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, student_id: &str, test_id: &str) -> OwnedMutexGuard<()> {
        let key = format!("{}:{}", student_id, test_id);
        let lock = {
            let mut locks = self
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Entries only referenced by the map are idle.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(key)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
