// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ledgrid contributors

//! Batch envelope encoder/decoder.
//!
//! A batch is the unit of on-wire delivery: an 18-byte header followed by
//! `frame_count` length-prefixed frame binaries.
//!
//! ```text
//! +0   u8   marker = 0x0B
//! +1   u32  frame_count
//! +5   u8   priority_flag (0|1)
//! +6   u32  sequence        // server-assigned, monotonic per controller
//! +10  u64  timestamp_ms    // Unix epoch millis
//! +18  repeated frame_count times:
//!        u32 frame_len
//!        frame binary
//! ```

use super::frame::{decode_frame, encode_frame};
use super::{DecodeError, EncodeError, Reader, BATCH_HEADER_LEN, BATCH_MARKER};
use crate::frame::Frame;

/// A decoded batch envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEnvelope {
    pub frames: Vec<Frame>,
    pub priority: bool,
    pub sequence: u32,
    pub timestamp_ms: u64,
}

/// Encode a batch envelope around the given frames.
///
/// Frame count saturates the header field at `u32::MAX`; in practice batch
/// composition caps counts at the configured batch size.
pub fn encode_batch(
    frames: &[Frame],
    priority: bool,
    sequence: u32,
    timestamp_ms: u64,
) -> Result<Vec<u8>, EncodeError> {
    let payload: usize = frames
        .iter()
        .map(|f| 4 + super::FRAME_HEADER_LEN + f.pixels.len())
        .sum();
    let mut buf = Vec::with_capacity(BATCH_HEADER_LEN + payload);

    buf.push(BATCH_MARKER);
    buf.extend_from_slice(&(u32::try_from(frames.len()).unwrap_or(u32::MAX)).to_le_bytes());
    buf.push(u8::from(priority));
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.extend_from_slice(&timestamp_ms.to_le_bytes());

    for frame in frames {
        let encoded = encode_frame(frame)?;
        buf.extend_from_slice(&(u32::try_from(encoded.len()).unwrap_or(u32::MAX)).to_le_bytes());
        buf.extend_from_slice(&encoded);
    }

    Ok(buf)
}

/// Decode a batch envelope, walking the length-prefixed frames.
pub fn decode_batch(buf: &[u8]) -> Result<BatchEnvelope, DecodeError> {
    let mut reader = Reader::new(buf);

    let marker = reader.read_u8()?;
    if marker != BATCH_MARKER {
        return Err(DecodeError::BadMarker { found: marker });
    }

    let frame_count = reader.read_u32_le()?;
    let priority_flag = reader.read_u8()?;
    let sequence = reader.read_u32_le()?;
    let timestamp_ms = reader.read_u64_le()?;

    let mut frames = Vec::with_capacity(frame_count.min(4096) as usize);
    for _ in 0..frame_count {
        let frame_len = reader.read_u32_le()? as usize;
        let frame_bytes = reader.read_bytes(frame_len)?;
        frames.push(decode_frame(frame_bytes)?);
    }

    Ok(BatchEnvelope {
        frames,
        priority: priority_flag != 0,
        sequence,
        timestamp_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_frame(id: u32) -> Frame {
        Frame::new(id, 2, 1, vec![0xFF, 0x00, 0x00, 0x00, 0xFF, 0x00]).expect("valid frame")
    }

    #[test]
    fn test_batch_header_layout() {
        let buf = encode_batch(&[rgb_frame(1)], false, 1, 0).expect("encode");

        assert_eq!(buf[0], 0x0B); // marker
        assert_eq!(&buf[1..5], &[0x01, 0x00, 0x00, 0x00]); // frame_count
        assert_eq!(buf[5], 0x00); // priority_flag
        assert_eq!(&buf[6..10], &[0x01, 0x00, 0x00, 0x00]); // sequence
        assert_eq!(&buf[10..18], &[0u8; 8]); // timestamp_ms
        assert_eq!(&buf[18..22], &[0x10, 0x00, 0x00, 0x00]); // frame_len = 16
        assert_eq!(buf.len(), 18 + 4 + 16);
    }

    #[test]
    fn test_batch_round_trip() {
        let frames = vec![rgb_frame(1), rgb_frame(2), rgb_frame(3)];
        let buf = encode_batch(&frames, true, 42, 1_704_567_890_123).expect("encode");
        let envelope = decode_batch(&buf).expect("decode");

        assert_eq!(envelope.frames, frames);
        assert!(envelope.priority);
        assert_eq!(envelope.sequence, 42);
        assert_eq!(envelope.timestamp_ms, 1_704_567_890_123);
    }

    #[test]
    fn test_empty_batch_round_trip() {
        let buf = encode_batch(&[], false, 9, 5).expect("encode");
        assert_eq!(buf.len(), BATCH_HEADER_LEN);

        let envelope = decode_batch(&buf).expect("decode");
        assert!(envelope.frames.is_empty());
        assert_eq!(envelope.sequence, 9);
    }

    #[test]
    fn test_decode_rejects_bad_marker() {
        let mut buf = encode_batch(&[rgb_frame(1)], false, 1, 0).expect("encode");
        buf[0] = 0x0C;
        let err = decode_batch(&buf).expect_err("marker 0x0C");
        assert_eq!(err, DecodeError::BadMarker { found: 0x0C });
    }

    #[test]
    fn test_decode_rejects_truncated_body() {
        let buf = encode_batch(&[rgb_frame(1)], false, 1, 0).expect("encode");
        let err = decode_batch(&buf[..buf.len() - 3]).expect_err("missing tail");
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn test_decode_rejects_truncated_header() {
        let err = decode_batch(&[0x0B, 0x01, 0x00]).expect_err("3 bytes");
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn test_decode_propagates_frame_version_error() {
        let mut buf = encode_batch(&[rgb_frame(1)], false, 1, 0).expect("encode");
        buf[22] = 0x07; // first frame's version byte
        let err = decode_batch(&buf).expect_err("bad version inside batch");
        assert_eq!(err, DecodeError::VersionMismatch { found: 7 });
    }
}
