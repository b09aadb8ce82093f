//! Small fixed-capacity LRU block cache sitting between the engine and the
//! disk client.
//!
//! Shaped after the teacher's `MruArena` (`arena/mru_arena.rs`): a fixed
//! array of slots threaded together as a doubly-linked list by index rather
//! than by pointer, so recency order can be maintained without allocating on
//! every hit. Capacity is small (default 2) so a linear scan to find a
//! cached block by number costs nothing in practice; only the relinking is
//! done through the prev/next arrays.

use std::sync::Arc;

use crate::consts::BSIZE;
use crate::device::BlockDevice;

struct Slot {
    bno: u32,
    data: [u8; BSIZE],
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub accesses: u64,
    pub hits: u64,
}

/// Write-through LRU cache of `BSIZE` blocks. Any sequence of reads and
/// writes through this cache produces the same results a cache-less
/// implementation would, given the same underlying device.
pub struct BlockCache {
    device: Arc<dyn BlockDevice>,
    capacity: usize,
    slots: Vec<Option<Slot>>,
    prev: Vec<Option<usize>>,
    next: Vec<Option<usize>>,
    /// Most-recently-used slot index.
    head: Option<usize>,
    /// Least-recently-used slot index.
    tail: Option<usize>,
    stats: CacheStats,
}

impl BlockCache {
    pub fn new(device: Arc<dyn BlockDevice>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            device,
            capacity,
            slots: (0..capacity).map(|_| None).collect(),
            prev: vec![None; capacity],
            next: vec![None; capacity],
            head: None,
            tail: None,
            stats: CacheStats::default(),
        }
    }

    fn find(&self, bno: u32) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| matches!(s, Some(slot) if slot.bno == bno))
    }

    fn unlink(&mut self, idx: usize) {
        let p = self.prev[idx];
        let n = self.next[idx];
        match p {
            Some(p) => self.next[p] = n,
            None => self.head = n,
        }
        match n {
            Some(n) => self.prev[n] = p,
            None => self.tail = p,
        }
        self.prev[idx] = None;
        self.next[idx] = None;
    }

    fn push_front(&mut self, idx: usize) {
        self.prev[idx] = None;
        self.next[idx] = self.head;
        if let Some(h) = self.head {
            self.prev[h] = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    /// Finds a free slot, or evicts the LRU entry (tail of the list) if the
    /// cache is full.
    fn slot_for_insert(&mut self) -> usize {
        if let Some(idx) = self.slots.iter().position(|s| s.is_none()) {
            return idx;
        }
        let victim = self.tail.expect("full cache always has a tail");
        self.unlink(victim);
        victim
    }

    pub async fn get(&mut self, bno: u32) -> [u8; BSIZE] {
        self.stats.accesses += 1;
        if let Some(idx) = self.find(bno) {
            self.stats.hits += 1;
            self.touch(idx);
            return self.slots[idx].as_ref().unwrap().data;
        }
        let data = self.device.read_block(bno).await;
        let idx = self.slot_for_insert();
        self.slots[idx] = Some(Slot { bno, data });
        self.push_front(idx);
        data
    }

    pub async fn put(&mut self, bno: u32, data: &[u8; BSIZE]) {
        self.device.write_block(bno, data).await;
        if let Some(idx) = self.find(bno) {
            self.slots[idx].as_mut().unwrap().data = *data;
            self.touch(idx);
        } else {
            let idx = self.slot_for_insert();
            self.slots[idx] = Some(Slot { bno, data: *data });
            self.push_front(idx);
        }
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        for p in &mut self.prev {
            *p = None;
        }
        for n in &mut self.next {
            *n = None;
        }
        self.head = None;
        self.tail = None;
        self.stats = CacheStats::default();
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDisk;

    #[tokio::test]
    async fn hit_after_get_then_get_again() {
        let device = Arc::new(MemDisk::new(8));
        let mut cache = BlockCache::new(device, 2);
        let mut block = [0u8; BSIZE];
        block[0] = 9;
        cache.put(1, &block).await;
        let _ = cache.get(1).await;
        let _ = cache.get(1).await;
        let stats = cache.stats();
        assert_eq!(stats.accesses, 2);
        assert_eq!(stats.hits, 2);
    }

    #[tokio::test]
    async fn eviction_drops_the_least_recently_used_entry() {
        let device = Arc::new(MemDisk::new(8));
        let mut cache = BlockCache::new(device, 2);
        let z = [0u8; BSIZE];
        cache.put(1, &z).await;
        cache.put(2, &z).await;
        // touch 1 so 2 becomes LRU
        let _ = cache.get(1).await;
        cache.put(3, &z).await; // should evict 2, not 1
        cache.stats();
        assert!(cache.find(1).is_some());
        assert!(cache.find(2).is_none());
        assert!(cache.find(3).is_some());
    }

    #[tokio::test]
    async fn clear_resets_stats_and_contents() {
        let device = Arc::new(MemDisk::new(8));
        let mut cache = BlockCache::new(device, 2);
        let z = [0u8; BSIZE];
        cache.put(1, &z).await;
        let _ = cache.get(1).await;
        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.accesses, 0);
        assert!(cache.find(1).is_none());
    }
}
