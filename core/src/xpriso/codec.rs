// Frame codec for XprisoMessages
//
// Frame layout: u32 big-endian payload length || bincode payload.

use super::{XprisoError, XprisoMessage};
use crate::codec::Encoding;

/// Largest payload accepted in one frame.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

pub fn encode_message(message: &XprisoMessage) -> Result<Vec<u8>, XprisoError> {
    let payload = Encoding::Bincode.encode(message)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(XprisoError::TooLarge(payload.len()));
    }
    Ok(payload)
}

pub fn decode_message(payload: &[u8]) -> Result<XprisoMessage, XprisoError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(XprisoError::TooLarge(payload.len()));
    }
    Ok(Encoding::Bincode.decode(payload)?)
}

/// Encodes `message` with its length prefix.
pub fn encode_frame(message: &XprisoMessage) -> Result<Vec<u8>, XprisoError> {
    let payload = encode_message(message)?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Reads the payload length from a frame header, rejecting oversized frames.
pub fn frame_len(header: [u8; 4]) -> Result<usize, XprisoError> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(XprisoError::TooLarge(len));
    }
    Ok(len)
}
