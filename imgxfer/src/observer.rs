//! Callbacks from the transfer runtime
//!
//! Observers are invoked from the runtime's worker threads after every
//! internal lock has been released, so they may call back into the
//! `Transport`.

use crate::decode::DecodedFrame;
use imgxfer_protocol::ConnectionState;

/// Receives decoded frames and status changes
pub trait TransferObserver: Send + Sync {
    /// Called once per reassembled and decoded frame
    fn on_frame_decoded(&self, _frame: &DecodedFrame) {}

    /// Called on every connection state transition and on decode failures
    fn on_status_changed(&self, _state: ConnectionState, _info: &str) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {}
