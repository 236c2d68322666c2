//! # Weak Registry
//!
//! Maps string ids to objects owned by somebody else. Each slot holds a
//! `std::sync::Weak` to the referent plus a piece of bookkeeping metadata
//! (`M`). The registry never extends a referent's lifetime: once the owner
//! drops its last `Arc`, [`WeakRegistry::get`] reports the entry as absent and
//! [`WeakRegistry::reap_stale`] will purge it.
//!
//! Liveness is checked with `Weak::strong_count`, which is O(1) and does not
//! allocate, so the registry can cheaply tell a stale id from a live one
//! without scanning.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};

struct Slot<V: ?Sized, M> {
    referent: Weak<V>,
    meta: M,
}

impl<V: ?Sized, M> Slot<V, M> {
    fn is_live(&self) -> bool {
        self.referent.strong_count() > 0
    }
}

/// A map from keys to non-owning references with attached metadata.
pub struct WeakRegistry<K, V: ?Sized, M = ()> {
    entries: HashMap<K, Slot<V, M>>,
}

impl<K, V: ?Sized, M> Default for WeakRegistry<K, V, M> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, V, M> WeakRegistry<K, V, M>
where
    K: Eq + Hash + Clone,
    V: ?Sized,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a weak reference to `referent` under `key`, replacing any prior
    /// entry. Returns the metadata of the replaced entry.
    pub fn insert(&mut self, key: K, referent: &Arc<V>, meta: M) -> Option<M> {
        let slot = Slot {
            referent: Arc::downgrade(referent),
            meta,
        };
        self.entries.insert(key, slot).map(|old| old.meta)
    }

    /// Returns the referent if `key` is known and the referent is still alive.
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).and_then(|slot| slot.referent.upgrade())
    }

    /// Returns the referent and its metadata when the entry is live.
    pub fn get_live<Q>(&self, key: &Q) -> Option<(Arc<V>, &M)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.entries.get(key)?;
        slot.referent.upgrade().map(|strong| (strong, &slot.meta))
    }

    /// Metadata for `key`, whether or not the referent is still alive.
    pub fn meta<Q>(&self, key: &Q) -> Option<&M>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|slot| &slot.meta)
    }

    /// Mutable metadata for `key`, whether or not the referent is alive.
    pub fn meta_mut<Q>(&mut self, key: &Q) -> Option<&mut M>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get_mut(key).map(|slot| &mut slot.meta)
    }

    /// `true` if `key` is present and its referent is alive.
    pub fn is_live<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).is_some_and(Slot::is_live)
    }

    /// `true` if `key` is present at all, live or stale.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Removes `key` and returns its metadata.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<M>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).map(|slot| slot.meta)
    }

    /// Removes every entry whose referent is dead and returns them.
    ///
    /// Live entries are left untouched. Stale entries also leave through
    /// [`remove`](Self::remove), which drops a key whatever its liveness.
    pub fn reap_stale(&mut self) -> Vec<(K, M)> {
        let stale: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, slot)| !slot.is_live())
            .map(|(key, _)| key.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|slot| (key, slot.meta)))
            .collect()
    }

    /// Total number of entries, including stale ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries whose referent is alive.
    pub fn live_len(&self) -> usize {
        self.entries.values().filter(|slot| slot.is_live()).count()
    }

    /// All keys, live and stale.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// Iterates `(key, metadata, is_live)` over every entry.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &M, bool)> {
        self.entries
            .iter()
            .map(|(key, slot)| (key, &slot.meta, slot.is_live()))
    }

    /// Mutable access to every entry's metadata, live or stale.
    pub fn metas_mut(&mut self) -> impl Iterator<Item = &mut M> {
        self.entries.values_mut().map(|slot| &mut slot.meta)
    }

    /// Removes every entry and returns the metadata.
    pub fn drain(&mut self) -> Vec<(K, M)> {
        self.entries
            .drain()
            .map(|(key, slot)| (key, slot.meta))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_live_referent() {
        let owner = Arc::new(7u32);
        let mut reg: WeakRegistry<String, u32> = WeakRegistry::new();
        reg.insert("a".to_string(), &owner, ());

        assert_eq!(reg.get("a").as_deref(), Some(&7));
        assert!(reg.is_live("a"));
        assert!(reg.get("missing").is_none());
    }

    #[test]
    fn test_registry_does_not_keep_referent_alive() {
        let owner = Arc::new(String::from("scene"));
        let mut reg: WeakRegistry<String, String> = WeakRegistry::new();
        reg.insert("a".to_string(), &owner, ());
        assert_eq!(Arc::strong_count(&owner), 1);

        drop(owner);
        assert!(reg.get("a").is_none());
        assert!(reg.contains_key("a"));
        assert!(!reg.is_live("a"));
    }

    #[test]
    fn test_insert_replaces_prior_entry() {
        let first = Arc::new(1u8);
        let second = Arc::new(2u8);
        let mut reg: WeakRegistry<String, u8, &str> = WeakRegistry::new();

        assert!(reg.insert("k".to_string(), &first, "first").is_none());
        assert_eq!(reg.insert("k".to_string(), &second, "second"), Some("first"));
        assert_eq!(reg.get("k").as_deref(), Some(&2));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_reap_stale_removes_exactly_dead_entries() {
        let keep_a = Arc::new(1);
        let dead_b = Arc::new(2);
        let keep_c = Arc::new(3);
        let dead_d = Arc::new(4);

        let mut reg: WeakRegistry<String, i32, i32> = WeakRegistry::new();
        reg.insert("a".into(), &keep_a, 10);
        reg.insert("b".into(), &dead_b, 20);
        reg.insert("c".into(), &keep_c, 30);
        reg.insert("d".into(), &dead_d, 40);

        drop(dead_b);
        drop(dead_d);

        let mut reaped = reg.reap_stale();
        reaped.sort();
        assert_eq!(reaped, vec![("b".to_string(), 20), ("d".to_string(), 40)]);
        assert_eq!(reg.len(), 2);
        assert!(reg.is_live("a"));
        assert!(reg.is_live("c"));

        // Nothing left to reap.
        assert!(reg.reap_stale().is_empty());
    }

    #[test]
    fn test_remove_takes_stale_entry_out_of_reaping() {
        let dead = Arc::new(5);
        let mut reg: WeakRegistry<String, i32, &str> = WeakRegistry::new();
        reg.insert("gone".into(), &dead, "meta");
        drop(dead);

        assert_eq!(reg.remove("gone"), Some("meta"));
        assert!(!reg.contains_key("gone"));
        assert!(reg.reap_stale().is_empty());
    }

    #[test]
    fn test_reap_after_reinsert_keeps_new_referent() {
        let old = Arc::new(1);
        let mut reg: WeakRegistry<String, i32> = WeakRegistry::new();
        reg.insert("x".into(), &old, ());
        drop(old);

        let fresh = Arc::new(2);
        reg.insert("x".into(), &fresh, ());
        assert!(reg.reap_stale().is_empty());
        assert_eq!(reg.get("x").as_deref(), Some(&2));
    }

    #[test]
    fn test_unsized_referents() {
        trait Named {
            fn name(&self) -> &str;
        }
        struct Node;
        impl Named for Node {
            fn name(&self) -> &str {
                "node"
            }
        }

        let owner: Arc<dyn Named> = Arc::new(Node);
        let mut reg: WeakRegistry<String, dyn Named> = WeakRegistry::new();
        reg.insert("n".into(), &owner, ());
        assert_eq!(reg.get("n").map(|n| n.name().to_string()), Some("node".into()));
        assert_eq!(reg.live_len(), 1);
    }
}
