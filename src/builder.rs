use std::sync::Arc;
use std::thread;

use crate::callback::{ErrorCallback, ReadCallback, WriteCallback};
use crate::config::{DataBits, FlowControl, Parity, SerialConfig, StopBits};
use crate::device::SerialPort;
use crate::engine::{Engine, QUEUE_DEPTH};
use crate::error::Error;
use crate::serial::Serial;

/// Builder for a [`Serial`] handle.
///
/// Configures the device, optionally installs callbacks, and on
/// [`build`](SerialBuilder::build) opens the device, creates the engine, and
/// spawns the completion worker.
///
/// # Example
///
/// ```rust,no_run
/// use serline::SerialBuilder;
///
/// let serial = SerialBuilder::new()
///     .device("/dev/ttyUSB0")
///     .baud_rate(115200)
///     .on_read(|data| println!("read {} bytes", data.len()))
///     .build()
///     .expect("failed to open serial device");
/// serial.start_read().expect("failed to start reading");
/// ```
#[derive(Default)]
pub struct SerialBuilder {
    config: SerialConfig,
    read_cb: Option<ReadCallback>,
    write_cb: Option<WriteCallback>,
    error_cb: Option<ErrorCallback>,
}

impl SerialBuilder {
    /// Create a builder with default config values (115200-8N1, no flow
    /// control).
    pub fn new() -> Self {
        Self::default()
    }

    // ── Line settings ────────────────────────────────────────────────

    /// Set the device path (e.g., `/dev/ttyUSB0`).
    pub fn device(mut self, path: impl Into<String>) -> Self {
        self.config.device_path = path.into();
        self
    }

    /// Set the line speed in baud. Must be one of the standard speeds.
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.config.baud_rate = baud;
        self
    }

    /// Set the number of data bits per frame.
    pub fn data_bits(mut self, bits: DataBits) -> Self {
        self.config.data_bits = bits;
        self
    }

    /// Set the parity mode.
    pub fn parity(mut self, parity: Parity) -> Self {
        self.config.parity = parity;
        self
    }

    /// Set the number of stop bits per frame.
    pub fn stop_bits(mut self, bits: StopBits) -> Self {
        self.config.stop_bits = bits;
        self
    }

    /// Set the flow control mode.
    pub fn flow_control(mut self, flow: FlowControl) -> Self {
        self.config.flow_control = flow;
        self
    }

    /// Assert RTS and DTR after configuring the line.
    pub fn rts_dtr_on(mut self, on: bool) -> Self {
        self.config.rts_dtr_on = on;
        self
    }

    // ── Callbacks ────────────────────────────────────────────────────

    /// Install the read callback before the worker starts.
    pub fn on_read<F>(mut self, f: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.read_cb = Some(Arc::new(f));
        self
    }

    /// Install the write-completion callback before the worker starts.
    pub fn on_write<F>(mut self, f: F) -> Self
    where
        F: Fn(isize) + Send + Sync + 'static,
    {
        self.write_cb = Some(Arc::new(f));
        self
    }

    /// Install the error callback before the worker starts.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(isize) + Send + Sync + 'static,
    {
        self.error_cb = Some(Arc::new(f));
        self
    }

    // ── Terminal ─────────────────────────────────────────────────────

    /// Validate the configuration, open and configure the device, create the
    /// engine, and spawn the completion worker.
    pub fn build(self) -> Result<Serial, Error> {
        self.config.validate()?;

        let port = SerialPort::open(&self.config)?;
        let engine = Arc::new(Engine::new(QUEUE_DEPTH)?);

        if let Some(cb) = self.read_cb {
            engine.set_read_callback(cb);
        }
        if let Some(cb) = self.write_cb {
            engine.set_write_callback(cb);
        }
        if let Some(cb) = self.error_cb {
            engine.set_error_callback(cb);
        }

        engine.bind_fd(port.raw_fd());

        let worker = {
            let engine = Arc::clone(&engine);
            thread::Builder::new()
                .name("serline-worker".to_string())
                .spawn(move || engine.run())
                .map_err(Error::Io)?
        };

        Ok(Serial::new(self.config, engine, worker, port))
    }
}
