//! Batched entity-id allocation.
//!
//! Slaves create graph entities locally but draw the entity ids from the
//! master, one batch per round-trip. Freed ids are handed out again before
//! the high watermark moves, keeping the stores dense.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use parking_lot::Mutex;

use vertex_common::types::IdType;

/// A batch of allocated ids: reclaimed ids first, then a contiguous range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdBatch {
    /// Previously freed ids handed out again.
    pub defragged: Vec<u64>,
    /// Start of the fresh contiguous range.
    pub range_start: u64,
    /// Length of the fresh contiguous range.
    pub range_len: u64,
}

impl IdBatch {
    /// Total number of ids in the batch.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.defragged.len() as u64 + self.range_len
    }

    /// Returns true when the batch contains no ids.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All ids in handout order: defragged first, then the fresh range.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.defragged
            .iter()
            .copied()
            .chain(self.range_start..self.range_start + self.range_len)
    }
}

/// The reply to one allocation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdAllocation {
    /// The allocated ids.
    pub batch: IdBatch,
    /// The allocator's high watermark after this batch.
    pub high_id: u64,
    /// How many freed ids remain queued for reuse.
    pub defrag_count: u64,
}

struct AllocatorInner {
    high_id: u64,
    free: VecDeque<u64>,
}

/// Allocates id batches for one entity id space.
pub struct IdAllocator {
    id_type: IdType,
    inner: Mutex<AllocatorInner>,
}

impl IdAllocator {
    /// Creates an allocator starting at id 0.
    pub fn new(id_type: IdType) -> Self {
        Self {
            id_type,
            inner: Mutex::new(AllocatorInner {
                high_id: 0,
                free: VecDeque::new(),
            }),
        }
    }

    /// Returns the id space this allocator serves.
    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    /// Hands out a batch of `size` ids.
    pub fn next_id_batch(&self, size: u64) -> IdAllocation {
        let mut inner = self.inner.lock();

        let mut defragged = Vec::new();
        while (defragged.len() as u64) < size {
            match inner.free.pop_front() {
                Some(id) => defragged.push(id),
                None => break,
            }
        }

        let range_len = size - defragged.len() as u64;
        let range_start = inner.high_id;
        inner.high_id += range_len;

        IdAllocation {
            batch: IdBatch {
                defragged,
                range_start,
                range_len,
            },
            high_id: inner.high_id,
            defrag_count: inner.free.len() as u64,
        }
    }

    /// Queues a freed id for reuse.
    pub fn free_id(&self, id: u64) {
        self.inner.lock().free.push_back(id);
    }

    /// Returns the current high watermark.
    pub fn high_id(&self) -> u64 {
        self.inner.lock().high_id
    }

    /// Returns how many freed ids are queued.
    pub fn defrag_count(&self) -> u64 {
        self.inner.lock().free.len() as u64
    }
}

impl fmt::Debug for IdAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdAllocator")
            .field("id_type", &self.id_type)
            .field("high_id", &self.high_id())
            .field("defrag_count", &self.defrag_count())
            .finish()
    }
}

/// One allocator per entity id space.
pub struct IdAllocatorSet {
    allocators: HashMap<IdType, IdAllocator>,
}

impl IdAllocatorSet {
    /// Creates allocators for every id space.
    pub fn new() -> Self {
        Self {
            allocators: IdType::ALL
                .into_iter()
                .map(|t| (t, IdAllocator::new(t)))
                .collect(),
        }
    }

    /// Returns the allocator for an id space.
    pub fn get(&self, id_type: IdType) -> &IdAllocator {
        &self.allocators[&id_type]
    }
}

impl Default for IdAllocatorSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdAllocatorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdAllocatorSet")
            .field("spaces", &self.allocators.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_batches() {
        let alloc = IdAllocator::new(IdType::Node);

        let first = alloc.next_id_batch(10);
        assert_eq!(first.batch.range_start, 0);
        assert_eq!(first.batch.range_len, 10);
        assert_eq!(first.high_id, 10);

        let second = alloc.next_id_batch(10);
        assert_eq!(second.batch.range_start, 10);
        assert_eq!(second.high_id, 20);
    }

    #[test]
    fn test_defragged_ids_first() {
        let alloc = IdAllocator::new(IdType::Node);
        alloc.next_id_batch(10);

        alloc.free_id(3);
        alloc.free_id(7);

        let batch = alloc.next_id_batch(5);
        assert_eq!(batch.batch.defragged, vec![3, 7]);
        assert_eq!(batch.batch.range_len, 3);
        assert_eq!(batch.batch.len(), 5);
        assert_eq!(batch.defrag_count, 0);

        let ids: Vec<u64> = batch.batch.ids().collect();
        assert_eq!(ids, vec![3, 7, 10, 11, 12]);
    }

    #[test]
    fn test_high_id_unmoved_by_pure_defrag_batch() {
        let alloc = IdAllocator::new(IdType::Relationship);
        alloc.next_id_batch(4);
        for id in 0..4 {
            alloc.free_id(id);
        }

        let batch = alloc.next_id_batch(4);
        assert_eq!(batch.batch.range_len, 0);
        assert_eq!(batch.high_id, 4);
    }

    #[test]
    fn test_allocator_set_covers_all_spaces() {
        let set = IdAllocatorSet::new();
        for id_type in IdType::ALL {
            assert_eq!(set.get(id_type).id_type(), id_type);
        }

        // Spaces are independent.
        set.get(IdType::Node).next_id_batch(5);
        assert_eq!(set.get(IdType::Node).high_id(), 5);
        assert_eq!(set.get(IdType::Property).high_id(), 0);
    }
}
