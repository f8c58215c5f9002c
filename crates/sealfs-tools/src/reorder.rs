//! Per-file write cursor with bounded reordering.
//!
//! Concurrent writers to one file may seal their entries out of offset
//! order. Each file keeps the offset it expects next; an entry that does
//! not start there is parked in a min-heap ordered by
//! `(offset << 21) + ratchet_offset` until the writes in front of it show
//! up.
//!
//! # Invariants
//!
//! - The cursor only ever moves forward, by the count of an entry that
//!   started exactly at it
//! - The heap holds fewer than `capacity` entries; parking the entry that
//!   would fill it fails
//! - An entry that overlaps or repeats already covered bytes is never
//!   popped, so it surfaces as an unresolved gap

use std::{cmp::Reverse, collections::BinaryHeap};

use sealfs_proto::LogEntry;

use crate::error::VerifyError;

/// Heap capacity used when none is configured.
pub const DEFAULT_REORDER_CAPACITY: usize = 1000;

/// Bits reserved for the ratchet offset in the combined ordering key.
const RATCHET_BITS: u32 = 21;

/// Combined ordering key for a parked entry.
pub fn unify(offset: u64, ratchet_offset: u64) -> u128 {
    (u128::from(offset) << RATCHET_BITS) + u128::from(ratchet_offset)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Parked {
    key: u128,
    offset: u64,
    count: u64,
}

/// Bounded min-heap of out-of-order writes.
#[derive(Debug)]
pub struct ReorderHeap {
    heap: BinaryHeap<Reverse<Parked>>,
    capacity: usize,
}

impl ReorderHeap {
    /// Heap that accepts up to `capacity - 1` parked entries.
    pub fn new(capacity: usize) -> Self {
        Self { heap: BinaryHeap::new(), capacity }
    }

    /// Parked entries.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Park `entry`. Returns false when the heap is full.
    pub fn park(&mut self, entry: &LogEntry) -> bool {
        if self.heap.len() + 1 >= self.capacity {
            return false;
        }
        self.heap.push(Reverse(Parked {
            key: unify(entry.offset(), entry.ratchet_offset()),
            offset: entry.offset(),
            count: entry.count(),
        }));
        true
    }

    /// Pop entries that continue exactly at `*cursor`, advancing it.
    pub fn pop_contiguous(&mut self, cursor: &mut u64) {
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.offset != *cursor {
                break;
            }
            *cursor = cursor.saturating_add(top.count);
            self.heap.pop();
        }
    }
}

/// Expected next offset and pending writes of one sealed file.
#[derive(Debug)]
pub struct FileCursor {
    inode: u64,
    offset: u64,
    pending: ReorderHeap,
}

impl FileCursor {
    /// Cursor at offset zero.
    pub fn new(inode: u64, capacity: usize) -> Self {
        Self { inode, offset: 0, pending: ReorderHeap::new(capacity) }
    }

    /// Inode the cursor tracks (after renames).
    pub fn inode(&self) -> u64 {
        self.inode
    }

    /// First byte not yet accounted for.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Start from `offset` instead of zero. Only meaningful before the
    /// first entry.
    pub fn start_at(&mut self, offset: u64) {
        self.offset = offset;
    }

    /// Account for `entry`, parking it if it is ahead of the cursor.
    pub fn advance(&mut self, entry: &LogEntry) -> Result<(), VerifyError> {
        if entry.offset() == self.offset {
            self.offset = entry.end();
        } else if !self.pending.park(entry) {
            return Err(VerifyError::ReorderOverflow {
                inode: self.inode,
                capacity: self.pending.capacity,
            });
        }
        self.pending.pop_contiguous(&mut self.offset);
        Ok(())
    }

    /// Final drain at the end of the log.
    pub fn finish(&mut self) -> Result<(), VerifyError> {
        self.pending.pop_contiguous(&mut self.offset);
        if !self.pending.is_empty() {
            return Err(VerifyError::UnresolvedGap {
                inode: self.inode,
                expected_offset: self.offset,
                pending: self.pending.len(),
            });
        }
        Ok(())
    }
}
