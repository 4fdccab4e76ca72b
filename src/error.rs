use std::io;

use thiserror::Error;

/// Errors returned by the serline builder, engine, and device layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Opening the serial device failed (bad path, permissions, missing node).
    #[error("socket create: {0}")]
    SocketCreate(String),
    /// Configuring the opened device failed (termios attributes, baud, line
    /// settings).
    #[error("socket bind: {0}")]
    SocketBind(String),
    /// Operation attempted on an invalid or unbound descriptor.
    #[error("invalid socket: {0}")]
    InvalidSocket(String),
    /// Flushing the device I/O buffers failed.
    #[error("socket flush: {0}")]
    SocketFlush(String),
    /// io_uring setup failed (e.g., unsupported kernel).
    #[error("ring init: {0}")]
    UringInit(String),
    /// The kernel rejected a submission batch at submit time.
    #[error("ring submit: {0}")]
    UringSubmit(String),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
