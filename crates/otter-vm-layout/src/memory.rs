//! Memory accounting for the layout engine
//!
//! The layout engine does not own a collector. It books every allocation it
//! makes (shapes, descriptor tables, field arrays, boxed doubles) with a
//! [`MemoryManager`], reports space freed by object shrinking as filler, and
//! records reference stores in a write-barrier buffer the collector drains.

use crate::error::{LayoutError, LayoutResult};
use crate::value::ObjectId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Size of a tagged slot in bytes
pub const TAGGED_SIZE: usize = 8;

/// Size of an object header (shape, properties, elements) in bytes
pub const OBJECT_HEADER_SIZE: usize = 3 * TAGGED_SIZE;

/// Size of a boxed double cell (header + payload) in bytes
pub const BOXED_DOUBLE_SIZE: usize = 2 * TAGGED_SIZE;

/// Size of one descriptor table entry (key, details, payload) in bytes
pub const DESCRIPTOR_ENTRY_SIZE: usize = 3 * TAGGED_SIZE;

/// Approximate size of a shape record in bytes
pub const SHAPE_SIZE: usize = 10 * TAGGED_SIZE;

/// Which slot of an object a barriered store went to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierSlot {
    /// Inline field slot
    InObject(u32),
    /// Out-of-line field slot
    OutOfLine(u32),
    /// Indexed element
    Element(u32),
    /// Property dictionary entry
    Dictionary,
}

/// A recorded reference store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierEntry {
    /// Object that was written
    pub object: ObjectId,
    /// Slot that received the reference
    pub slot: BarrierSlot,
}

/// Snapshot of allocation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationStats {
    /// Bytes currently booked
    pub allocated: usize,
    /// Number of successful allocations
    pub allocation_count: usize,
    /// Bytes handed back through fillers
    pub reclaimed: usize,
    /// Number of fillers created
    pub filler_count: usize,
    /// Pending write-barrier entries
    pub barrier_entries: usize,
}

/// Books allocations against a byte limit for one layout context
pub struct MemoryManager {
    /// Bytes booked by shapes, tables and object storage
    allocated: AtomicUsize,
    /// Budget past which bookings are refused
    limit: usize,
    /// Successful bookings since creation
    allocation_count: AtomicUsize,
    /// Bytes reclaimed through fillers
    reclaimed: AtomicUsize,
    /// Number of fillers created
    filler_count: AtomicUsize,
    /// Reference stores not yet seen by the collector
    barrier: Mutex<Vec<BarrierEntry>>,
}

impl MemoryManager {
    /// Manager that refuses bookings past `limit` bytes
    pub fn new(limit: usize) -> Self {
        Self {
            allocated: AtomicUsize::new(0),
            limit,
            allocation_count: AtomicUsize::new(0),
            reclaimed: AtomicUsize::new(0),
            filler_count: AtomicUsize::new(0),
            barrier: Mutex::new(Vec::new()),
        }
    }

    /// Manager whose budget layout tests never exhaust
    pub fn test() -> Self {
        Self::new(usize::MAX / 2)
    }

    /// Book `size` bytes for a shape, table, slot array or boxed double,
    /// or fail with `OutOfMemory` leaving the books unchanged
    pub fn alloc(&self, size: usize) -> LayoutResult<()> {
        let current = self.allocated.load(Ordering::Relaxed);
        if current.saturating_add(size) > self.limit {
            tracing::debug!(
                target: "otter::layout",
                requested = size,
                allocated = current,
                limit = self.limit,
                "allocation refused"
            );
            return Err(LayoutError::OutOfMemory {
                requested: size,
                limit: self.limit,
            });
        }
        self.allocated.fetch_add(size, Ordering::Relaxed);
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Return bytes released by migration, deletion or rollback to the budget
    pub fn free(&self, size: usize) {
        self.allocated.fetch_sub(size, Ordering::Relaxed);
    }

    /// Turn the tail of a shrunk object into a filler and hand the bytes back
    pub fn create_filler(&self, size: usize) {
        if size == 0 {
            return;
        }
        self.free(size);
        self.reclaimed.fetch_add(size, Ordering::Relaxed);
        self.filler_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Write-barrier hook for a reference store
    pub fn record_write(&self, object: ObjectId, slot: BarrierSlot) {
        self.barrier.lock().push(BarrierEntry { object, slot });
    }

    /// Take all pending barrier entries
    pub fn drain_barrier(&self) -> Vec<BarrierEntry> {
        std::mem::take(&mut *self.barrier.lock())
    }

    /// Bytes currently booked
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Budget in bytes
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Snapshot all counters
    pub fn stats(&self) -> AllocationStats {
        AllocationStats {
            allocated: self.allocated(),
            allocation_count: self.allocation_count.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            filler_count: self.filler_count.load(Ordering::Relaxed),
            barrier_entries: self.barrier.lock().len(),
        }
    }

    /// Start an all-or-nothing group of allocations
    pub fn reserve(&self) -> Reservation<'_> {
        Reservation {
            manager: self,
            bytes: 0,
            committed: false,
        }
    }
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("allocated", &self.allocated())
            .field("limit", &self.limit)
            .finish()
    }
}

/// Allocations that are returned to the manager on drop unless committed.
///
/// Migration books its scratch storage through a reservation so a failure
/// halfway through leaves the accounting exactly as it was.
pub struct Reservation<'a> {
    manager: &'a MemoryManager,
    bytes: usize,
    committed: bool,
}

impl Reservation<'_> {
    /// Book `size` more bytes as part of this reservation
    pub fn alloc(&mut self, size: usize) -> LayoutResult<()> {
        self.manager.alloc(size)?;
        self.bytes += size;
        Ok(())
    }

    /// Bytes booked so far
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Keep the booked bytes
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed && self.bytes > 0 {
            self.manager.free(self.bytes);
        }
    }
}
