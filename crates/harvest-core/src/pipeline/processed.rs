use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Ids of tasks that reached a terminal state in this run. In memory only.
#[derive(Debug, Clone, Default)]
pub struct SessionProcessedSet {
    inner: Arc<Mutex<HashSet<i64>>>,
}

impl SessionProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<i64>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn contains(&self, id: i64) -> bool {
        self.lock().contains(&id)
    }

    /// Returns false if the id was already present.
    pub fn insert(&self, id: i64) -> bool {
        self.lock().insert(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
