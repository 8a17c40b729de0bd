use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Compiled plans keyed by topology fingerprint.
pub(crate) struct PlanCache<V> {
    entries: Mutex<HashMap<u64, Arc<V>>>,
}

impl<V> PlanCache<V> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached plan and whether it was a hit. Compilation runs
    /// outside the lock; a racing insert wins over the local result.
    pub(crate) fn get_or_try_insert_with<E, F>(
        &self,
        fingerprint: u64,
        compile: F,
    ) -> Result<(Arc<V>, bool), E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(existing) = self
            .entries
            .lock()
            .expect("plan cache mutex poisoned")
            .get(&fingerprint)
            .cloned()
        {
            return Ok((existing, true));
        }

        let compiled = Arc::new(compile()?);
        let mut entries = self.entries.lock().expect("plan cache mutex poisoned");
        match entries.entry(fingerprint) {
            Entry::Occupied(entry) => Ok((Arc::clone(entry.get()), true)),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&compiled));
                Ok((compiled, false))
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().expect("plan cache mutex poisoned").len()
    }
}

impl<V> Default for PlanCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
