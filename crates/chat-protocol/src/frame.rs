//! Newline-delimited JSON framing.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum size of a single frame in bytes (64 KiB).
///
/// Message content is capped at 1000 characters, so a legitimate frame is
/// far below this; anything larger is treated as a protocol violation.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Errors raised while encoding or decoding a frame.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Serializes a value into a single line, including the trailing newline.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<String, FrameError> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}

/// Parses one line (with or without its trailing newline).
pub fn decode_frame<T: DeserializeOwned>(line: &str) -> Result<T, FrameError> {
    if line.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: line.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(serde_json::from_str(line.trim_end_matches(['\r', '\n']))?)
}
