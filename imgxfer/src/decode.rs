//! Frame decoding seam
//!
//! Reassembled frames are opaque compressed bytes. A `FrameDecoder` turns
//! them into something presentable; it runs on the decode thread, outside
//! every protocol lock.

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// JPEG start-of-image marker
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Layout of `DecodedFrame::pixels`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PixelFormat {
    /// Still-compressed JPEG bytes
    Jpeg,
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Jpeg => write!(f, "jpeg"),
        }
    }
}

/// A decoded frame handed to the observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Identifier of the frame this came from
    pub frame_id: u32,
    pub pixels: Bytes,
    /// Width in pixels, 0 if unknown
    pub width: u16,
    /// Height in pixels, 0 if unknown
    pub height: u16,
    pub format: PixelFormat,
}

/// Decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame is empty")]
    Empty,

    #[error("Invalid start marker: {0:02x?}")]
    InvalidMarker([u8; 2]),

    #[error("Codec error: {0}")]
    Codec(String),
}

/// Turns reassembled frame bytes into a `DecodedFrame`
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, frame_id: u32, data: Bytes) -> Result<DecodedFrame, DecodeError>;
}

/// Checks the JPEG start marker and passes the bytes through undecoded
///
/// Dimensions are read from the first start-of-frame segment when one is
/// present before the scan data.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughDecoder;

impl FrameDecoder for PassthroughDecoder {
    fn decode(&self, frame_id: u32, data: Bytes) -> Result<DecodedFrame, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }
        if data.len() < 2 || data[..2] != JPEG_SOI {
            let mut marker = [0u8; 2];
            marker[..data.len().min(2)].copy_from_slice(&data[..data.len().min(2)]);
            return Err(DecodeError::InvalidMarker(marker));
        }

        let (width, height) = jpeg_dimensions(&data).unwrap_or((0, 0));
        Ok(DecodedFrame {
            frame_id,
            pixels: data,
            width,
            height,
            format: PixelFormat::Jpeg,
        })
    }
}

fn is_sof(marker: u8) -> bool {
    matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC)
}

/// Width and height from the first SOFn segment
pub fn jpeg_dimensions(data: &[u8]) -> Option<(u16, u16)> {
    let be16 = |at: usize| -> Option<u16> {
        Some(u16::from_be_bytes([*data.get(at)?, *data.get(at + 1)?]))
    };

    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        match marker {
            // Fill byte
            0xFF => {
                pos += 1;
                continue;
            }
            // Standalone markers carry no length
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            // Start of scan or end of image: no SOF seen
            0xDA | 0xD9 => return None,
            _ => {}
        }

        let len = usize::from(be16(pos + 2)?);
        if is_sof(marker) {
            // length(2) precision(1) height(2) width(2)
            let height = be16(pos + 5)?;
            let width = be16(pos + 7)?;
            return Some((width, height));
        }
        pos += 2 + len;
    }
    None
}
