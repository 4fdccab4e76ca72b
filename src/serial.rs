use std::sync::Arc;
use std::thread;

use crate::config::SerialConfig;
use crate::device::SerialPort;
use crate::engine::{DEFAULT_READ_BUF_SIZE, Engine};
use crate::error::Error;

/// Handle to an open serial device with a running completion worker.
///
/// Built by [`SerialBuilder`](crate::SerialBuilder). All methods are callable
/// from any thread. Dropping the handle stops the engine, joins the worker,
/// and then tears down the engine and the device descriptor in that order.
pub struct Serial {
    config: SerialConfig,
    // Field order is teardown order: engine before the device descriptor.
    engine: Arc<Engine>,
    worker: Option<thread::JoinHandle<()>>,
    port: SerialPort,
}

impl Serial {
    pub(crate) fn new(
        config: SerialConfig,
        engine: Arc<Engine>,
        worker: thread::JoinHandle<()>,
        port: SerialPort,
    ) -> Self {
        Serial {
            config,
            engine,
            worker: Some(worker),
            port,
        }
    }

    /// Queue an asynchronous write of `data`. The payload is copied into a
    /// pooled buffer, so the slice only needs to live for this call; the
    /// write callback fires once the full payload is on the wire.
    ///
    /// Returns an error only for fatal submission failures. A write dropped
    /// on submission queue exhaustion is reported through the error callback
    /// as `-EAGAIN`.
    pub fn send(&self, data: &[u8]) -> Result<(), Error> {
        self.engine.send(data)
    }

    /// Begin continuous reading with a 4096-byte buffer.
    ///
    /// Received bytes are dispatched to the read callback; after each
    /// completion the read is re-armed until [`stop_read`](Serial::stop_read).
    /// Must not be called again while reads are in flight.
    pub fn start_read(&self) -> Result<(), Error> {
        self.start_read_with(DEFAULT_READ_BUF_SIZE)
    }

    /// Begin continuous reading with a caller-sized buffer.
    pub fn start_read_with(&self, buf_size: usize) -> Result<(), Error> {
        self.engine.start_read(buf_size)
    }

    /// Stop continuous reading. Idempotent. The read in flight at the moment
    /// the flag clears may still complete and dispatch once.
    pub fn stop_read(&self) {
        self.engine.stop_read();
    }

    /// Replace the read callback. Takes effect for the next completion.
    pub fn set_read_callback<F>(&self, f: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.engine.set_read_callback(Arc::new(f));
    }

    /// Replace the write-completion callback. Takes effect for the next
    /// completion.
    pub fn set_send_callback<F>(&self, f: F)
    where
        F: Fn(isize) + Send + Sync + 'static,
    {
        self.engine.set_write_callback(Arc::new(f));
    }

    /// Replace the error callback. Takes effect for the next completion.
    pub fn set_error_callback<F>(&self, f: F)
    where
        F: Fn(isize) + Send + Sync + 'static,
    {
        self.engine.set_error_callback(Arc::new(f));
    }

    /// Discard unread input and unsent output on the device.
    pub fn flush(&self) -> Result<(), Error> {
        self.port.flush()
    }

    /// The configuration this handle was built with.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }
}

impl Drop for Serial {
    fn drop(&mut self) {
        self.engine.stop();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
