use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::metrics;

/// Default capacity of each pooled write buffer.
pub(crate) const DEFAULT_BUF_CAPACITY: usize = 8192;

/// A write buffer checked out of the [`BufferPool`].
///
/// `slot` identifies the pool slot the buffer came from; `None` marks a
/// fallback allocation that is dropped instead of returned on release.
pub(crate) struct PooledBuf {
    slot: Option<u16>,
    pub(crate) data: Vec<u8>,
}

struct Slot {
    available: AtomicBool,
    // Empty while the buffer is checked out; exclusivity is granted by the
    // compare-exchange on `available`.
    buf: UnsafeCell<Vec<u8>>,
}

/// Bounded pool of reusable write buffers.
///
/// `send()` copies the caller's payload into a pooled buffer so the SQE points
/// to memory that outlives the completion. The buffer travels with the request
/// record as a shared handle and returns to its slot on terminal completion;
/// under bursty load, exhaustion falls back to a fresh allocation.
pub(crate) struct BufferPool {
    slots: Box<[Slot]>,
}

// Safety: slot buffers are only touched by the thread that won the
// availability compare-exchange (acquire) or, on release, by the thread that
// still holds the slot unavailable.
unsafe impl Sync for BufferPool {}

impl BufferPool {
    /// Create a pool of `pool_size` buffers, each with `buf_capacity` bytes
    /// pre-allocated.
    pub(crate) fn new(pool_size: usize, buf_capacity: usize) -> Self {
        let slots = (0..pool_size)
            .map(|_| Slot {
                available: AtomicBool::new(true),
                buf: UnsafeCell::new(Vec::with_capacity(buf_capacity)),
            })
            .collect();
        BufferPool { slots }
    }

    /// Check a buffer out of the pool, growing it to hold at least `needed`
    /// bytes. Falls back to a fresh allocation when every slot is taken.
    pub(crate) fn acquire(&self, needed: usize) -> PooledBuf {
        for (i, slot) in self.slots.iter().enumerate() {
            if slot
                .available
                .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                // Safety: the compare-exchange grants exclusive access.
                let mut data = unsafe { std::mem::take(&mut *slot.buf.get()) };
                data.clear();
                if data.capacity() < needed {
                    data.reserve(needed);
                }
                return PooledBuf {
                    slot: Some(i as u16),
                    data,
                };
            }
        }

        metrics::POOL_FALLBACK_ALLOCATIONS.increment();
        PooledBuf {
            slot: None,
            data: Vec::with_capacity(needed),
        }
    }

    /// Return a buffer to its slot. The handle must be the last clone; a
    /// still-shared handle means a request record was not erased first.
    pub(crate) fn release(&self, buf: Arc<PooledBuf>) {
        let Ok(buf) = Arc::try_unwrap(buf) else {
            log::warn!("write buffer released while still shared; dropping instead of pooling");
            return;
        };
        let Some(idx) = buf.slot else {
            // Fallback allocation — not pool-owned.
            return;
        };
        let slot = &self.slots[idx as usize];
        let mut data = buf.data;
        data.clear();
        // Safety: the slot is still marked unavailable from acquire, so no
        // other thread touches the cell until the release store below.
        unsafe {
            *slot.buf.get() = data;
        }
        slot.available.store(true, Ordering::Release);
    }

    /// Number of slots currently available.
    #[allow(dead_code)]
    pub(crate) fn available_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.available.load(Ordering::Relaxed))
            .count()
    }
}
