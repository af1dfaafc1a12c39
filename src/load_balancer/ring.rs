// src/load_balancer/ring.rs
use crate::load_balancer::fnv1a_32;
use crate::proxy::Backend;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// Hash ring with virtual nodes.
///
/// Positions live in a `BTreeMap`, which keeps them sorted and gives
/// logarithmic insert, remove and successor lookup. The ring only holds weak
/// references: the backend pool owns the backends.
#[derive(Debug)]
pub struct ConsistentHashRing {
    virtual_nodes: usize,
    ring: BTreeMap<u32, Weak<Backend>>,
}

impl ConsistentHashRing {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes,
            ring: BTreeMap::new(),
        }
    }

    fn node_hash(backend_id: &str, replica: usize) -> u32 {
        fnv1a_32(format!("{backend_id}:{replica}").as_bytes())
    }

    pub fn add_backend(&mut self, backend: &Arc<Backend>) {
        for replica in 0..self.virtual_nodes {
            let hash = Self::node_hash(&backend.id, replica);
            self.ring.insert(hash, Arc::downgrade(backend));
        }
    }

    pub fn remove_backend(&mut self, backend: &Backend) {
        for replica in 0..self.virtual_nodes {
            let hash = Self::node_hash(&backend.id, replica);
            if let Entry::Occupied(entry) = self.ring.entry(hash) {
                // A colliding position may have been taken over by another backend.
                let owned = entry
                    .get()
                    .upgrade()
                    .map_or(true, |owner| owner.id == backend.id);
                if owned {
                    entry.remove();
                }
            }
        }
    }

    /// First position at or after `hash(key)`, wrapping to the start of the ring.
    pub fn get_backend(&self, key: &str) -> Option<Arc<Backend>> {
        let hash = fnv1a_32(key.as_bytes());
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .and_then(|(_, backend)| backend.upgrade())
    }

    /// Walks clockwise from `hash(key)` to the first backend accepted by `accept`.
    pub fn find_backend<F>(&self, key: &str, mut accept: F) -> Option<Arc<Backend>>
    where
        F: FnMut(&Backend) -> bool,
    {
        let hash = fnv1a_32(key.as_bytes());
        self.ring
            .range(hash..)
            .chain(self.ring.range(..hash))
            .filter_map(|(_, backend)| backend.upgrade())
            .find(|backend| accept(backend))
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
