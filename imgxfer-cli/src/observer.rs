//! Observers used by the command-line tools

use imgxfer::{ConnectionState, DecodedFrame, TransferObserver};
use std::fs;
use std::path::PathBuf;

/// Logs status changes and decoded frames
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl TransferObserver for LogObserver {
    fn on_frame_decoded(&self, frame: &DecodedFrame) {
        tracing::debug!(
            frame_id = frame.frame_id,
            bytes = frame.pixels.len(),
            width = frame.width,
            height = frame.height,
            format = %frame.format,
            "Frame decoded"
        );
    }

    fn on_status_changed(&self, state: ConnectionState, info: &str) {
        tracing::info!(%state, "{}", info);
    }
}

/// Writes every decoded frame into a directory
#[derive(Debug, Clone)]
pub struct FrameWriter {
    dir: PathBuf,
    extension: &'static str,
}

impl FrameWriter {
    /// Create the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FrameWriter {
            dir,
            extension: "jpg",
        })
    }

    pub fn path_for(&self, frame_id: u32) -> PathBuf {
        self.dir
            .join(format!("frame_{:08}.{}", frame_id, self.extension))
    }
}

impl TransferObserver for FrameWriter {
    fn on_frame_decoded(&self, frame: &DecodedFrame) {
        let path = self.path_for(frame.frame_id);
        match fs::write(&path, &frame.pixels) {
            Ok(()) => tracing::debug!(path = %path.display(), "Frame written"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to write frame"),
        }
    }

    fn on_status_changed(&self, state: ConnectionState, info: &str) {
        LogObserver.on_status_changed(state, info);
    }
}
