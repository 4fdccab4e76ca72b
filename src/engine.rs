use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use io_uring::{IoUring, opcode, squeue, types};

use crate::arena::{RequestArena, RequestKind, RequestRecord};
use crate::callback::{CallbackSlot, dispatch_guarded};
use crate::error::Error;
use crate::metrics;
use crate::pool::{BufferPool, DEFAULT_BUF_CAPACITY, PooledBuf};
use crate::sync::SpinLock;

/// Submission/completion queue depth.
pub(crate) const QUEUE_DEPTH: u32 = 256;

/// Default read buffer size for `start_read`.
pub(crate) const DEFAULT_READ_BUF_SIZE: usize = 4096;

/// user_data value reserved for the shutdown wake no-op. Request IDs start
/// at 1 and never collide with it.
const WAKE_USER_DATA: u64 = 0;

/// `-1` in kernel terms: read/write at the current file position.
const OFFSET_CURRENT: u64 = u64::MAX;

/// Request state shared between submitters and the completion worker,
/// guarded by the submission lock together with all SQ access.
struct Shared {
    arena: RequestArena,
    /// Fallback for the rare case where an arena slot is still occupied by a
    /// different live ID.
    overflow: HashMap<u64, RequestRecord>,
}

/// Outcome of re-arming a write after a partial completion or `-EINTR`.
enum ResubmitError {
    /// No SQE could be queued even after flushing.
    QueueFull,
    /// The flush or submit syscall itself failed; carries the negated errno.
    Submit(isize),
}

/// The I/O engine: owns the ring, the read buffer, the callback slots, the
/// request arena, and the write buffer pool.
///
/// Any thread may submit (`send`, `start_read`, `stop_read`, callback
/// installation); exactly one worker thread runs [`run`](Engine::run). The
/// submission lock serializes SQE acquisition, arena/overflow mutation, and
/// `submit`; callback slots and the atomic flags are touched lock-free.
pub(crate) struct Engine {
    ring: IoUring,
    queue_depth: u32,
    shared: SpinLock<Shared>,
    pool: BufferPool,
    /// Bound descriptor, or -1 when unbound.
    fd: AtomicI32,
    /// Engine-owned read buffer, reused across re-armed reads. Sized by
    /// `start_read`; read by the worker during dispatch. The facade contract
    /// forbids resizing it while reads are in flight.
    read_buf: UnsafeCell<Vec<u8>>,
    continue_read: AtomicBool,
    /// True while the worker is inside the completion loop.
    is_running: AtomicBool,
    /// Set by `stop()`. Kept separate from `is_running` so a stop issued
    /// before the worker enters the loop is not lost.
    stop_requested: AtomicBool,
    next_id: AtomicU64,
    read_cb: CallbackSlot<dyn Fn(&[u8]) + Send + Sync>,
    write_cb: CallbackSlot<dyn Fn(isize) + Send + Sync>,
    error_cb: CallbackSlot<dyn Fn(isize) + Send + Sync>,
}

// Safety: `read_buf` is the only field without its own synchronization. It is
// written solely by `start_read` (never concurrent with a pending read, per
// the facade's single-device contract) and read by the one worker thread and
// by `submit_read` under the submission lock.
unsafe impl Send for Engine {}
unsafe impl Sync for Engine {}

impl Engine {
    pub(crate) fn new(queue_depth: u32) -> Result<Self, Error> {
        let ring = IoUring::new(queue_depth)
            .map_err(|e| Error::UringInit(format!("io_uring setup failed: {e}")))?;
        Ok(Engine {
            ring,
            queue_depth,
            shared: SpinLock::new(Shared {
                arena: RequestArena::new(queue_depth),
                overflow: HashMap::new(),
            }),
            pool: BufferPool::new(queue_depth as usize * 2, DEFAULT_BUF_CAPACITY),
            fd: AtomicI32::new(-1),
            read_buf: UnsafeCell::new(Vec::new()),
            continue_read: AtomicBool::new(false),
            is_running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            read_cb: CallbackSlot::new(),
            write_cb: CallbackSlot::new(),
            error_cb: CallbackSlot::new(),
        })
    }

    /// Bind the engine to a descriptor. Must precede any submission.
    pub(crate) fn bind_fd(&self, fd: RawFd) {
        self.fd.store(fd, Ordering::Release);
    }

    pub(crate) fn set_read_callback(&self, cb: Arc<dyn Fn(&[u8]) + Send + Sync>) {
        self.read_cb.install(cb);
    }

    pub(crate) fn set_write_callback(&self, cb: Arc<dyn Fn(isize) + Send + Sync>) {
        self.write_cb.install(cb);
    }

    pub(crate) fn set_error_callback(&self, cb: Arc<dyn Fn(isize) + Send + Sync>) {
        self.error_cb.install(cb);
    }

    #[inline]
    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // ── Submission path ──────────────────────────────────────────────

    /// Install the read buffer, enable continuous reads, and submit the first
    /// read.
    pub(crate) fn start_read(&self, buf_size: usize) -> Result<(), Error> {
        let size = if buf_size == 0 {
            log::warn!("start_read with zero buffer size; using {DEFAULT_READ_BUF_SIZE}");
            DEFAULT_READ_BUF_SIZE
        } else {
            buf_size
        };
        // Safety: facade contract — start_read never runs concurrently with
        // the worker dispatching reads or with another start_read.
        unsafe {
            let buf = &mut *self.read_buf.get();
            buf.clear();
            buf.resize(size, 0);
        }
        self.continue_read.store(true, Ordering::Relaxed);
        self.submit_read()
            .map_err(|e| Error::UringSubmit(format!("io_uring submit failed: {e}")))
    }

    /// Disable continuous reads. An in-flight read completes naturally; the
    /// completion handler observes the flag and does not re-arm.
    pub(crate) fn stop_read(&self) {
        self.continue_read.store(false, Ordering::Relaxed);
    }

    /// Submit one read into the engine read buffer.
    fn submit_read(&self) -> io::Result<()> {
        let fd = self.fd.load(Ordering::Acquire);
        if fd < 0 {
            log::error!("submit_read called with no bound descriptor");
            return Ok(());
        }

        let id = self.alloc_id();
        // Safety: see `start_read`; the buffer is stable while reads run.
        let (buf_ptr, buf_len) = unsafe {
            let buf = &*self.read_buf.get();
            (buf.as_ptr() as *mut u8, buf.len() as u32)
        };
        let entry = opcode::Read::new(types::Fd(fd), buf_ptr, buf_len)
            .offset(OFFSET_CURRENT)
            .build()
            .user_data(id);

        let mut shared = self.shared.lock();
        Self::store_record(
            &mut shared,
            RequestRecord {
                id,
                kind: RequestKind::Read,
                fd,
                buf: None,
                offset: 0,
            },
        );
        match self.push_sqe(&entry) {
            Ok(true) => {}
            Ok(false) => {
                Self::erase_record(&mut shared, id);
                drop(shared);
                metrics::SUBMISSIONS_DROPPED.increment();
                log::warn!("read submission dropped: submission queue full");
                return Ok(());
            }
            Err(e) => {
                Self::erase_record(&mut shared, id);
                return Err(e);
            }
        }
        if let Err(e) = self.ring.submit() {
            Self::erase_record(&mut shared, id);
            return Err(e);
        }
        Ok(())
    }

    /// Copy `data` into a pooled buffer and submit an asynchronous write.
    ///
    /// Returns silently when no descriptor is bound. A zero-length payload is
    /// submitted like any other write and completes with `write_cb(0)`. On
    /// submission queue exhaustion the write is dropped and `error_cb`
    /// receives `-EAGAIN`; a kernel-rejected submit is fatal and surfaces as
    /// [`Error::UringSubmit`] after the record and buffer are rolled back.
    pub(crate) fn send(&self, data: &[u8]) -> Result<(), Error> {
        let fd = self.fd.load(Ordering::Acquire);
        if fd < 0 {
            return Ok(());
        }

        let mut buf = self.pool.acquire(data.len());
        buf.data.extend_from_slice(data);
        let buf = Arc::new(buf);

        let id = self.alloc_id();
        let entry = opcode::Write::new(types::Fd(fd), buf.data.as_ptr(), buf.data.len() as u32)
            .offset(OFFSET_CURRENT)
            .build()
            .user_data(id);

        let mut shared = self.shared.lock();
        Self::store_record(
            &mut shared,
            RequestRecord {
                id,
                kind: RequestKind::Write,
                fd,
                buf: Some(Arc::clone(&buf)),
                offset: 0,
            },
        );
        match self.push_sqe(&entry) {
            Ok(true) => {}
            Ok(false) => {
                Self::erase_record(&mut shared, id);
                drop(shared);
                self.pool.release(buf);
                metrics::SUBMISSIONS_DROPPED.increment();
                self.report_error(-(libc::EAGAIN as isize));
                return Ok(());
            }
            Err(e) => {
                Self::erase_record(&mut shared, id);
                drop(shared);
                self.pool.release(buf);
                return Err(Error::UringSubmit(format!("io_uring submit failed: {e}")));
            }
        }
        if let Err(e) = self.ring.submit() {
            Self::erase_record(&mut shared, id);
            drop(shared);
            self.pool.release(buf);
            return Err(Error::UringSubmit(format!("io_uring submit failed: {e}")));
        }
        Ok(())
    }

    /// Try to queue `entry`, flushing the SQ once to make room when full.
    /// `Ok(true)` = queued, `Ok(false)` = still full after the flush.
    ///
    /// Caller must hold the submission lock.
    fn push_sqe(&self, entry: &squeue::Entry) -> io::Result<bool> {
        // Safety: the submission lock serializes all SQ access; the entry's
        // buffers are kept alive by the request record until completion.
        unsafe {
            let mut sq = self.ring.submission_shared();
            if sq.push(entry).is_ok() {
                return Ok(true);
            }
        }
        self.ring.submit()?;
        unsafe {
            let mut sq = self.ring.submission_shared();
            if sq.push(entry).is_ok() {
                return Ok(true);
            }
        }
        metrics::SQE_SUBMIT_FAILURES.increment();
        Ok(false)
    }

    /// Record an in-flight request, falling back to the overflow map when the
    /// arena slot is still occupied by a different live ID.
    fn store_record(shared: &mut Shared, record: RequestRecord) {
        let id = record.id;
        if shared.arena.find(id).is_none() {
            shared.arena.insert(id, record);
        } else {
            log::warn!("arena slot for request {id} still occupied; using overflow map");
            shared.overflow.insert(id, record);
        }
    }

    fn erase_record(shared: &mut Shared, id: u64) {
        shared.arena.erase(id);
        shared.overflow.remove(&id);
    }

    // ── Completion loop ──────────────────────────────────────────────

    /// Run the completion loop until [`stop`](Engine::stop). Owned by exactly
    /// one worker thread.
    pub(crate) fn run(&self) {
        self.is_running.store(true, Ordering::Release);

        let mut batch: Vec<(u64, i32)> = Vec::with_capacity(self.queue_depth as usize);
        while !self.stop_requested.load(Ordering::Acquire) {
            match self.ring.submit_and_wait(1) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // A dead ring cannot be waited on again; report once and
                    // leave instead of spinning.
                    log::error!("completion wait failed: {e}");
                    self.report_error(-(e.raw_os_error().unwrap_or(libc::EIO) as isize));
                    break;
                }
            }

            batch.clear();
            {
                // Safety: only the worker thread drains the CQ.
                let cq = unsafe { self.ring.completion_shared() };
                for cqe in cq {
                    batch.push((cqe.user_data(), cqe.result()));
                }
            }
            metrics::CQE_PROCESSED.add(batch.len() as u64);

            let mut need_rearm = false;
            for &(id, res) in &batch {
                if id == WAKE_USER_DATA {
                    continue;
                }
                let record = {
                    let shared = self.shared.lock();
                    shared
                        .arena
                        .find(id)
                        .cloned()
                        .or_else(|| shared.overflow.get(&id).cloned())
                };
                let Some(record) = record else { continue };
                match record.kind {
                    RequestKind::Read => self.complete_read(id, res, &mut need_rearm),
                    RequestKind::Write => self.complete_write(id, res, record),
                }
            }

            // Re-arm after the batch: one submission lock round-trip per
            // batch instead of one per read completion.
            if need_rearm {
                if let Err(e) = self.submit_read() {
                    log::error!("read re-arm failed: {e}");
                    self.report_error(-(e.raw_os_error().unwrap_or(libc::EIO) as isize));
                }
            }
        }

        // Abandon whatever is still in flight; buffers drop with the records.
        let mut shared = self.shared.lock();
        shared.arena.clear();
        shared.overflow.clear();
        drop(shared);

        self.is_running.store(false, Ordering::Release);
    }

    fn complete_read(&self, id: u64, res: i32, need_rearm: &mut bool) {
        if res < 0 {
            self.report_error(res as isize);
            self.erase(id);
            return;
        }

        if let Some(cb) = self.read_cb.load() {
            // Safety: the worker is the only reader of read_buf during
            // dispatch, and start_read never runs concurrently with it.
            let data = unsafe {
                let buf = &*self.read_buf.get();
                &buf[..res as usize]
            };
            dispatch_guarded(|| cb(data), "read");
        }
        metrics::MESSAGES_RECEIVED.increment();
        metrics::BYTES_RECEIVED.add(res as u64);

        self.erase(id);
        if self.continue_read.load(Ordering::Relaxed) {
            *need_rearm = true;
        }
    }

    fn complete_write(&self, id: u64, res: i32, record: RequestRecord) {
        let Some(buf) = record.buf else {
            log::error!("write completion for request {id} carries no buffer");
            self.erase(id);
            return;
        };

        if res == -libc::EINTR {
            // Interrupted before any progress: retry the same tail, record
            // unchanged.
            if let Err(e) = self.resubmit_tail(id, &buf, record.offset, record.fd, None) {
                let errno = match e {
                    ResubmitError::QueueFull => -(libc::EINTR as isize),
                    ResubmitError::Submit(errno) => errno,
                };
                self.report_error(errno);
                self.erase(id);
                self.pool.release(buf);
            }
            return;
        }

        if res < 0 {
            self.report_error(res as isize);
            self.erase(id);
            self.pool.release(buf);
            return;
        }

        let new_offset = record.offset + res as usize;
        if new_offset < buf.data.len() {
            // Partial write: resubmit the remaining tail under the same ID.
            if let Err(e) = self.resubmit_tail(id, &buf, new_offset, record.fd, Some(new_offset)) {
                let errno = match e {
                    ResubmitError::QueueFull => -(libc::EAGAIN as isize),
                    ResubmitError::Submit(errno) => errno,
                };
                self.report_error(errno);
                self.erase(id);
                self.pool.release(buf);
            }
            return;
        }

        // Fully written.
        if let Some(cb) = self.write_cb.load() {
            dispatch_guarded(|| cb(new_offset as isize), "write");
        }
        metrics::MESSAGES_SENT.increment();
        metrics::BYTES_SENT.add(new_offset as u64);

        self.erase(id);
        self.pool.release(buf);
    }

    /// Queue a write of `buf[offset..]` under the same request ID. When
    /// `update_offset` is set and submission succeeds, the stored record's
    /// offset is advanced under the lock — in whichever store holds it.
    fn resubmit_tail(
        &self,
        id: u64,
        buf: &Arc<PooledBuf>,
        offset: usize,
        fd: RawFd,
        update_offset: Option<usize>,
    ) -> Result<(), ResubmitError> {
        let remaining = buf.data.len() - offset;
        // Safety: the record keeps `buf` alive until terminal completion.
        let ptr = unsafe { buf.data.as_ptr().add(offset) };
        let entry = opcode::Write::new(types::Fd(fd), ptr, remaining as u32)
            .offset(OFFSET_CURRENT)
            .build()
            .user_data(id);

        let mut shared = self.shared.lock();
        match self.push_sqe(&entry) {
            Ok(true) => {}
            Ok(false) => return Err(ResubmitError::QueueFull),
            Err(e) => {
                return Err(ResubmitError::Submit(
                    -(e.raw_os_error().unwrap_or(libc::EIO) as isize),
                ));
            }
        }
        if let Err(e) = self.ring.submit() {
            return Err(ResubmitError::Submit(
                -(e.raw_os_error().unwrap_or(libc::EIO) as isize),
            ));
        }
        if let Some(off) = update_offset {
            if let Some(rec) = shared.arena.find_mut(id) {
                rec.offset = off;
            } else if let Some(rec) = shared.overflow.get_mut(&id) {
                rec.offset = off;
            }
        }
        Ok(())
    }

    fn erase(&self, id: u64) {
        let mut shared = self.shared.lock();
        Self::erase_record(&mut shared, id);
    }

    fn report_error(&self, res: isize) {
        match self.error_cb.load() {
            Some(cb) => dispatch_guarded(|| cb(res), "error"),
            None => log::error!(
                "I/O error {res} ({}) with no error callback installed",
                io::Error::from_raw_os_error(-res as i32)
            ),
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Request loop termination and wake the worker with a no-op completion.
    /// Returns immediately; the owner joins the worker thread.
    pub(crate) fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);

        let entry = opcode::Nop::new().build().user_data(WAKE_USER_DATA);
        let _guard = self.shared.lock();
        if let Ok(true) = self.push_sqe(&entry) {
            let _ = self.ring.submit();
        }
    }

    /// Number of requests currently tracked. Used by shutdown assertions.
    #[allow(dead_code)]
    pub(crate) fn in_flight(&self) -> usize {
        let shared = self.shared.lock();
        shared.arena.in_flight() + shared.overflow.len()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        debug_assert!(
            !self.is_running.load(Ordering::Acquire),
            "engine dropped while the completion loop is running"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_without_bound_fd_is_silent() {
        let engine = Engine::new(8).unwrap();
        engine.send(b"dropped on the floor").unwrap();
        assert_eq!(engine.in_flight(), 0);
    }

    #[test]
    fn request_ids_start_after_wake_sentinel() {
        let engine = Engine::new(8).unwrap();
        let first = engine.alloc_id();
        assert_ne!(first, WAKE_USER_DATA);
        assert_eq!(engine.alloc_id(), first + 1);
    }

    #[test]
    fn stop_read_is_idempotent() {
        let engine = Engine::new(8).unwrap();
        engine.stop_read();
        engine.stop_read();
        assert!(!engine.continue_read.load(Ordering::Relaxed));
    }

    #[test]
    fn stop_before_run_is_not_lost() {
        let engine = Engine::new(8).unwrap();
        engine.stop();
        // A worker entering the loop after the stop exits immediately.
        engine.run();
        assert!(!engine.is_running.load(Ordering::Acquire));
    }
}
