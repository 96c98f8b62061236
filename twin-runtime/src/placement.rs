//! Entity-to-queue placement
//!
//! A sorted ring of queue ids. An entity id is hashed with Adler-32 and the
//! hash modulo the ring length selects its owning queue, so placement is a
//! pure function of the current topology.

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;
use twin_types::QueueInfo;

const MOD_ADLER: u32 = 65521;
/// Largest n such that 255n(n+1)/2 + (n+1)(MOD_ADLER-1) fits in u32
const NMAX: usize = 5552;

/// Adler-32 checksum of `key`
pub fn hash32(key: &str) -> u32 {
    let (mut a, mut b) = (1u32, 0u32);
    for chunk in key.as_bytes().chunks(NMAX) {
        for &byte in chunk {
            a += u32::from(byte);
            b += a;
        }
        a %= MOD_ADLER;
        b %= MOD_ADLER;
    }
    (b << 16) | a
}

#[derive(Debug, Default)]
struct Ring {
    /// Sorted, de-duplicated queue ids
    ids: Vec<String>,
    queues: HashMap<String, QueueInfo>,
}

/// Consistent placement of entities onto queues
#[derive(Debug, Default)]
pub struct Placement {
    ring: RwLock<Ring>,
}

impl Placement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a queue
    pub fn append(&self, queue: QueueInfo) {
        let mut ring = self.ring.write();
        if let Err(pos) = ring.ids.binary_search(&queue.id) {
            ring.ids.insert(pos, queue.id.clone());
        }
        debug!(queue_id = %queue.id, ring = ring.ids.len(), "append queue");
        ring.queues.insert(queue.id.clone(), queue);
    }

    pub fn remove(&self, queue_id: &str) -> Option<QueueInfo> {
        let mut ring = self.ring.write();
        if let Ok(pos) = ring.ids.binary_search_by(|id| id.as_str().cmp(queue_id)) {
            ring.ids.remove(pos);
        }
        ring.queues.remove(queue_id)
    }

    /// Owning queue of `key`; `None` on an empty ring
    pub fn select(&self, key: &str) -> Option<QueueInfo> {
        let ring = self.ring.read();
        if ring.ids.is_empty() {
            return None;
        }
        let index = hash32(key) as usize % ring.ids.len();
        ring.queues.get(&ring.ids[index]).cloned()
    }

    pub fn queue_ids(&self) -> Vec<String> {
        self.ring.read().ids.clone()
    }

    pub fn len(&self) -> usize {
        self.ring.read().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
