//! Transfer runtime errors

use imgxfer_io::SocketError;
use imgxfer_protocol::FragmentError;
use thiserror::Error;

/// Errors returned by the transfer runtime
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Frame is empty")]
    EmptyFrame,

    #[error("Transmit queue full, frame dropped")]
    QueueFull,

    #[error("Transfer is not running")]
    NotRunning,

    #[error("Transfer is already running")]
    AlreadyRunning,

    #[error("Transmit failed: {0}")]
    Transmit(#[from] SocketError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Cannot fragment frame: {0}")]
    Fragment(FragmentError),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(std::io::Error),
}

impl From<FragmentError> for TransferError {
    fn from(err: FragmentError) -> Self {
        match err {
            FragmentError::EmptyFrame => TransferError::EmptyFrame,
            FragmentError::FrameTooLarge { size, max } => TransferError::FrameTooLarge { size, max },
            other => TransferError::Fragment(other),
        }
    }
}
