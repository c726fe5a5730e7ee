// Entry Store Module
// Keyed, in-memory state for the rate limiter and account lockout

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Keyed storage used by the governance components.
///
/// Read-modify-write sequences must go through [`EntryStore::upsert`] or
/// [`EntryStore::remove_if`], which run under the key's lock.
pub trait EntryStore<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;

    fn set(&self, key: &str, value: V);

    /// Remove an entry, returning whether one existed
    fn delete(&self, key: &str) -> bool;

    /// Remove the entry only if `predicate` holds for its current value
    fn remove_if(&self, key: &str, predicate: &dyn Fn(&V) -> bool) -> bool;

    /// Replace the entry for `key` with the value computed from the current one
    fn upsert(&self, key: &str, update: &mut dyn FnMut(Option<&V>) -> V) -> V;

    /// Drop every entry for which `is_dead` holds, returning how many were removed
    fn sweep(&self, is_dead: &dyn Fn(&V) -> bool) -> usize;

    /// Point-in-time copy of all entries
    fn entries(&self) -> Vec<(String, V)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);
}

/// Sharded in-memory store
#[derive(Debug)]
pub struct MemoryStore<V> {
    entries: DashMap<String, V>,
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> EntryStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync,
{
    fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, value: V) {
        self.entries.insert(key.to_string(), value);
    }

    fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn remove_if(&self, key: &str, predicate: &dyn Fn(&V) -> bool) -> bool {
        self.entries
            .remove_if(key, |_, value| predicate(value))
            .is_some()
    }

    fn upsert(&self, key: &str, update: &mut dyn FnMut(Option<&V>) -> V) -> V {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let next = update(Some(occupied.get()));
                occupied.insert(next.clone());
                next
            }
            Entry::Vacant(vacant) => {
                let next = update(None);
                vacant.insert(next.clone());
                next
            }
        }
    }

    fn sweep(&self, is_dead: &dyn Fn(&V) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, value| !is_dead(value));
        before.saturating_sub(self.entries.len())
    }

    fn entries(&self) -> Vec<(String, V)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}
