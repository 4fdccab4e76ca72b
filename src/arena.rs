use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::pool::PooledBuf;

/// Kind of an in-flight operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    Read,
    Write,
}

/// One in-flight operation, keyed by the request ID stamped into the SQE's
/// user_data.
///
/// While the record exists, `buf` (for writes) keeps the payload alive; the
/// buffer returns to the pool only after the record is erased on terminal
/// completion.
#[derive(Clone)]
pub(crate) struct RequestRecord {
    pub(crate) id: u64,
    pub(crate) kind: RequestKind,
    pub(crate) fd: RawFd,
    /// Write payload; `None` for reads (reads target the engine read buffer).
    pub(crate) buf: Option<Arc<PooledBuf>>,
    /// Bytes already written, for partial-write continuation.
    pub(crate) offset: usize,
}

/// Fixed-capacity table mapping request IDs to in-flight records.
///
/// Slot index is `id % depth`. IDs are monotonically increasing and the ring
/// holds at most `depth` operations, so a live collision means a slot was
/// never reclaimed; callers handle that case with an overflow map.
/// Occupancy flags use acquire/release ordering; the record payload itself is
/// protected by the submission lock.
pub(crate) struct RequestArena {
    depth: u32,
    occupied: Box<[AtomicBool]>,
    records: Box<[Option<RequestRecord>]>,
}

impl RequestArena {
    pub(crate) fn new(depth: u32) -> Self {
        assert!(depth > 0, "arena depth must be non-zero");
        RequestArena {
            depth,
            occupied: (0..depth).map(|_| AtomicBool::new(false)).collect(),
            records: (0..depth).map(|_| None).collect(),
        }
    }

    #[inline]
    fn slot(&self, id: u64) -> usize {
        (id % self.depth as u64) as usize
    }

    /// Store `record` in its slot and publish occupancy.
    pub(crate) fn insert(&mut self, id: u64, record: RequestRecord) {
        let idx = self.slot(id);
        self.records[idx] = Some(record);
        self.occupied[idx].store(true, Ordering::Release);
    }

    /// Look up the record for `id`. Returns `None` if the slot is empty or
    /// holds a different ID.
    pub(crate) fn find(&self, id: u64) -> Option<&RequestRecord> {
        let idx = self.slot(id);
        if !self.occupied[idx].load(Ordering::Acquire) {
            return None;
        }
        self.records[idx].as_ref().filter(|rec| rec.id == id)
    }

    /// Mutable lookup, used to advance the write offset of a record that
    /// stays in flight across a partial-write continuation.
    pub(crate) fn find_mut(&mut self, id: u64) -> Option<&mut RequestRecord> {
        let idx = self.slot(id);
        if !self.occupied[idx].load(Ordering::Acquire) {
            return None;
        }
        self.records[idx].as_mut().filter(|rec| rec.id == id)
    }

    /// Clear the slot for `id`, dropping the record (and with it the write
    /// buffer handle).
    pub(crate) fn erase(&mut self, id: u64) {
        let idx = self.slot(id);
        self.occupied[idx].store(false, Ordering::Release);
        self.records[idx] = None;
    }

    /// Drop every record and clear all occupancy flags.
    pub(crate) fn clear(&mut self) {
        for idx in 0..self.records.len() {
            self.occupied[idx].store(false, Ordering::Relaxed);
            self.records[idx] = None;
        }
    }

    /// Number of occupied slots.
    pub(crate) fn in_flight(&self) -> usize {
        self.occupied
            .iter()
            .filter(|occ| occ.load(Ordering::Relaxed))
            .count()
    }
}
