//! serline — io_uring-native asynchronous serial port I/O for Linux.
//!
//! serline binds a single serial device to an io_uring instance and drives it
//! from one dedicated completion worker. Continuous reads dispatch received
//! bytes to a user callback, writes complete asynchronously with transparent
//! partial-write continuation, and errors surface through an error callback.
//! Any thread may submit; the engine is byte-transparent (framing is the
//! caller's responsibility).
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use serline::SerialBuilder;
//!
//! fn main() -> Result<(), serline::Error> {
//!     let serial = SerialBuilder::new()
//!         .device("/dev/ttyUSB0")
//!         .baud_rate(115200)
//!         .on_read(|data| println!("read {} bytes", data.len()))
//!         .on_write(|n| println!("wrote {n} bytes"))
//!         .on_error(|e| eprintln!("I/O error {e}"))
//!         .build()?;
//!
//!     serial.start_read()?;
//!     serial.send(b"hello")?;
//!     std::thread::sleep(std::time::Duration::from_secs(1));
//!     Ok(())
//! }
//! ```
//!
//! # Platform
//!
//! Linux only. Requires a kernel with io_uring read/write support (5.6+).

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod arena;
pub(crate) mod callback;
pub(crate) mod device;
pub(crate) mod engine;
pub(crate) mod pool;
pub(crate) mod sync;

// ── Public modules ──────────────────────────────────────────────────────
pub mod builder;
pub mod config;
pub mod error;
pub mod metrics;
pub mod serial;

// ── Re-exports ──────────────────────────────────────────────────────────

/// Builder for [`Serial`] handles.
pub use builder::SerialBuilder;
/// Read callback handle type (`Arc<dyn Fn(&[u8])>`).
pub use callback::ReadCallback;
/// Write-completion callback handle type (`Arc<dyn Fn(isize)>`).
pub use callback::WriteCallback;
/// Error callback handle type (`Arc<dyn Fn(isize)>`).
pub use callback::ErrorCallback;
/// Data bits per character frame.
pub use config::DataBits;
/// Flow control mode.
pub use config::FlowControl;
/// Parity mode.
pub use config::Parity;
/// Serial line configuration.
pub use config::SerialConfig;
/// Stop bits per character frame.
pub use config::StopBits;
/// Library errors.
pub use error::Error;
/// Handle to an open device with a running completion worker.
pub use serial::Serial;
