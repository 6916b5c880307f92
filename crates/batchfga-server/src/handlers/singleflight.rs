//! Singleflight implementation for coalescing identical concurrent checks.

use std::hash::Hash;

use dashmap::DashMap;
use tokio::sync::broadcast;

/// Result of trying to acquire a singleflight slot.
pub enum SingleflightSlot<V> {
    /// We won the race and should execute the operation.
    /// Contains the sender to broadcast results.
    Leader(broadcast::Sender<V>),
    /// Another task is executing; wait for its result.
    Follower(broadcast::Receiver<V>),
}

/// Singleflight group.
///
/// When several callers ask for the same key concurrently, only the first
/// (the leader) runs the operation and the others receive its result.
///
/// Uses DashMap's entry API so checking for an in-flight operation and
/// registering a new one happen atomically.
pub struct Singleflight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Map of in-flight operations to their broadcast senders.
    in_flight: DashMap<K, broadcast::Sender<V>>,
}

impl<K, V> Singleflight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
        }
    }

    /// Atomically try to acquire a slot for this operation.
    ///
    /// Returns `Leader` if this caller should execute the operation,
    /// or `Follower` if another caller is already executing it.
    pub fn acquire(&self, key: K) -> SingleflightSlot<V> {
        use dashmap::mapref::entry::Entry;

        match self.in_flight.entry(key) {
            Entry::Occupied(entry) => SingleflightSlot::Follower(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                SingleflightSlot::Leader(tx)
            }
        }
    }

    /// Remove a completed in-flight operation.
    pub fn complete(&self, key: &K) {
        self.in_flight.remove(key);
    }

    /// Number of operations currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

impl<K, V> Default for Singleflight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that removes the in-flight entry even if the leader panics
/// or its future is dropped.
pub struct SingleflightGuard<'a, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    singleflight: &'a Singleflight<K, V>,
    key: K,
    completed: bool,
}

impl<'a, K, V> SingleflightGuard<'a, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(singleflight: &'a Singleflight<K, V>, key: K) -> Self {
        Self {
            singleflight,
            key,
            completed: false,
        }
    }

    /// Mark as completed (normal path).
    pub fn complete(mut self) {
        self.singleflight.complete(&self.key);
        self.completed = true;
    }
}

impl<K, V> Drop for SingleflightGuard<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if !self.completed {
            self.singleflight.complete(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_caller_leads_and_second_follows() {
        let sf: Singleflight<&str, u32> = Singleflight::new();

        let leader = sf.acquire("k");
        assert!(matches!(leader, SingleflightSlot::Leader(_)));
        assert!(matches!(sf.acquire("k"), SingleflightSlot::Follower(_)));
        assert!(matches!(sf.acquire("other"), SingleflightSlot::Leader(_)));
        assert_eq!(sf.in_flight(), 2);
    }

    #[tokio::test]
    async fn test_follower_receives_leader_result() {
        let sf: Singleflight<&str, u32> = Singleflight::new();

        let SingleflightSlot::Leader(tx) = sf.acquire("k") else {
            panic!("expected leader");
        };
        let SingleflightSlot::Follower(mut rx) = sf.acquire("k") else {
            panic!("expected follower");
        };

        tx.send(7).unwrap();
        assert_eq!(rx.recv().await.unwrap(), 7);
    }

    #[test]
    fn test_guard_cleans_up_on_drop() {
        let sf: Singleflight<&str, u32> = Singleflight::new();
        let _slot = sf.acquire("k");
        {
            let _guard = SingleflightGuard::new(&sf, "k");
        }
        assert_eq!(sf.in_flight(), 0);
        assert!(matches!(sf.acquire("k"), SingleflightSlot::Leader(_)));
    }

    #[test]
    fn test_guard_complete_removes_entry() {
        let sf: Singleflight<&str, u32> = Singleflight::new();
        let _slot = sf.acquire("k");
        SingleflightGuard::new(&sf, "k").complete();
        assert_eq!(sf.in_flight(), 0);
    }
}
