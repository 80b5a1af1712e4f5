//! Optimistic mutation coordinator.
//!
//! One generic implementation of the apply-then-reconcile write pattern:
//! snapshot the cached value, apply the predicted post-mutation value
//! synchronously, commit remotely, then either mark the slot stale for
//! refetch (success) or restore the snapshot exactly (failure).
//!
//! Overlapping mutations on one key resolve by last-write-to-cache-wins:
//! each mutation bumps the slot's generation, and a settled commit whose
//! generation has been superseded is ignored — no queuing and no
//! cancellation of the in-flight call.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;
use tracing::debug;

/// Why a coordinated mutation did not complete.
#[derive(Debug, thiserror::Error)]
pub enum MutationError<E> {
    /// No cached value exists for the mutation key.
    #[error("No cached value for mutation key")]
    MissingKey,

    /// The remote commit failed; the cache was rolled back.
    #[error("Remote commit failed: {0}")]
    Commit(E),
}

#[derive(Debug)]
struct Slot<V> {
    value: V,
    generation: u64,
    stale: bool,
}

/// Cache of authoritative values with optimistic write support.
#[derive(Debug)]
pub struct OptimisticCoordinator<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> OptimisticCoordinator<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Seed the cache with an authoritative value.
    pub fn prime(&self, key: K, value: V) {
        self.slots.lock().unwrap().insert(
            key,
            Slot {
                value,
                generation: 0,
                stale: false,
            },
        );
    }

    /// Replace a slot's value with a freshly fetched authoritative one.
    ///
    /// Bumps the generation so any still-outstanding older commit is
    /// ignored when it settles.
    pub fn replace(&self, key: &K, value: V) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(key) {
            slot.value = value;
            slot.generation += 1;
            slot.stale = false;
        } else {
            slots.insert(
                key.clone(),
                Slot {
                    value,
                    generation: 0,
                    stale: false,
                },
            );
        }
    }

    /// Current cached value for `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.slots.lock().unwrap().get(key).map(|s| s.value.clone())
    }

    /// Whether the slot needs a refetch to be authoritative again.
    pub fn is_stale(&self, key: &K) -> bool {
        self.slots
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|s| s.stale)
    }

    /// Mark a slot (e.g. a dependent of another mutation) as needing
    /// refetch.
    pub fn invalidate(&self, key: &K) {
        if let Some(slot) = self.slots.lock().unwrap().get_mut(key) {
            slot.stale = true;
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.slots.lock().unwrap().remove(key).map(|s| s.value)
    }

    pub fn clear(&self) {
        self.slots.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().unwrap().is_empty()
    }

    /// All cached keys.
    pub fn keys(&self) -> Vec<K> {
        self.slots.lock().unwrap().keys().cloned().collect()
    }

    /// All cached values.
    pub fn values(&self) -> Vec<V> {
        self.slots
            .lock()
            .unwrap()
            .values()
            .map(|s| s.value.clone())
            .collect()
    }

    /// Drive one optimistic mutation.
    ///
    /// The snapshot and predicted value are applied synchronously before
    /// the first await, which is what closes the guard-check race window
    /// for callers that validate against the cache immediately before
    /// mutating.
    pub async fn mutate<P, Fut, E>(
        &self,
        key: &K,
        predict: P,
        commit: Fut,
    ) -> Result<(), MutationError<E>>
    where
        P: FnOnce(&V) -> V,
        Fut: Future<Output = Result<(), E>>,
    {
        // Snapshot + apply, one synchronous step.
        let (snapshot, generation) = {
            let mut slots = self.slots.lock().unwrap();
            let Some(slot) = slots.get_mut(key) else {
                return Err(MutationError::MissingKey);
            };
            let snapshot = slot.value.clone();
            slot.generation += 1;
            slot.value = predict(&snapshot);
            (snapshot, slot.generation)
        };

        let result = commit.await;

        let mut slots = self.slots.lock().unwrap();
        let Some(slot) = slots.get_mut(key) else {
            // Slot dropped while in flight (session teardown); nothing to
            // reconcile.
            return result.map_err(MutationError::Commit);
        };

        if slot.generation != generation {
            debug!(?key, "Ignoring settled commit superseded by a newer mutation");
            return result.map_err(MutationError::Commit);
        }

        match result {
            Ok(()) => {
                // The optimistic value stands for display; the next read
                // must reconcile against ground truth.
                slot.stale = true;
                Ok(())
            }
            Err(e) => {
                slot.value = snapshot;
                Err(MutationError::Commit(e))
            }
        }
    }
}

impl<K, V> Default for OptimisticCoordinator<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
