use std::sync::Arc;

use crate::sync::SpinLock;

/// Callback invoked with the bytes of each completed read. The span is valid
/// only for the duration of the call.
pub type ReadCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;
/// Callback invoked with the total byte count of each completed write.
pub type WriteCallback = Arc<dyn Fn(isize) + Send + Sync>;
/// Callback invoked with a negative errno-equivalent result on I/O errors.
pub type ErrorCallback = Arc<dyn Fn(isize) + Send + Sync>;

/// A replaceable callback handle.
///
/// Installation swaps the owning `Arc`; dispatch clones it and invokes outside
/// the lock, so a completion observes either the previous or the new callback,
/// never a torn state. The lock is held only for the refcount bump — the
/// displaced handle is retired when the last in-flight dispatch drops its
/// clone.
pub(crate) struct CallbackSlot<T: ?Sized> {
    handle: SpinLock<Option<Arc<T>>>,
}

impl<T: ?Sized> CallbackSlot<T> {
    pub(crate) const fn new() -> Self {
        CallbackSlot {
            handle: SpinLock::new(None),
        }
    }

    /// Publish a new callback, replacing any previous one.
    pub(crate) fn install(&self, cb: Arc<T>) {
        let prev = self.handle.lock().replace(cb);
        // Dropped outside the lock: the old closure may own arbitrary state.
        drop(prev);
    }

    /// Clone the currently installed callback, if any.
    pub(crate) fn load(&self) -> Option<Arc<T>> {
        self.handle.lock().clone()
    }
}

/// Run a user callback, isolating panics from the completion loop.
pub(crate) fn dispatch_guarded<F: FnOnce()>(f: F, what: &str) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
        log::error!("panic in {what} callback isolated from the completion loop");
    }
}
