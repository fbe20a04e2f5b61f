// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ledgrid contributors

//! Single-frame binary encoder/decoder.
//!
//! A frame binary is a 10-byte header followed by the raw pixel payload:
//!
//! ```text
//! +0   u8   version = 1
//! +1   u8   type    = 1
//! +2   u32  frame_id
//! +6   u16  width
//! +8   u16  height
//! +10  u8   pixels[3 * width * height]   // R,G,B row-major
//! ```

use super::{DecodeError, EncodeError, Reader, FRAME_HEADER_LEN, FRAME_TYPE, FRAME_VERSION};
use crate::frame::Frame;

/// Encode a frame to its wire form.
///
/// Fails with [`EncodeError::InvalidDimensions`] when the pixel payload
/// length disagrees with `3 * width * height`. Frames built through
/// [`Frame::new`] always pass; the check guards hand-assembled values.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, EncodeError> {
    let expected = Frame::pixel_len(frame.width, frame.height);
    if frame.pixels.len() != expected {
        return Err(EncodeError::InvalidDimensions {
            width: frame.width,
            height: frame.height,
            expected,
            actual: frame.pixels.len(),
        });
    }

    let mut buf = vec![0u8; FRAME_HEADER_LEN + frame.pixels.len()];

    buf[0] = FRAME_VERSION;
    buf[1] = FRAME_TYPE;
    buf[2..6].copy_from_slice(&frame.id.to_le_bytes());
    buf[6..8].copy_from_slice(&frame.width.to_le_bytes());
    buf[8..10].copy_from_slice(&frame.height.to_le_bytes());
    buf[FRAME_HEADER_LEN..].copy_from_slice(&frame.pixels);

    Ok(buf)
}

/// Decode a frame from its wire form.
///
/// The input must contain exactly one frame binary; trailing bytes are a
/// dimension mismatch, not silently ignored.
pub fn decode_frame(buf: &[u8]) -> Result<Frame, DecodeError> {
    let mut reader = Reader::new(buf);

    let version = reader.read_u8()?;
    if version != FRAME_VERSION {
        return Err(DecodeError::VersionMismatch { found: version });
    }
    // Frame type: only full-RGB (1) exists today; tolerated for forward
    // compatibility the same way receivers tolerate unknown frame ids.
    let _frame_type = reader.read_u8()?;

    let id = reader.read_u32_le()?;
    let width = reader.read_u16_le()?;
    let height = reader.read_u16_le()?;

    let expected = Frame::pixel_len(width, height);
    if reader.remaining() != expected {
        return Err(DecodeError::InvalidDimensions {
            width,
            height,
            expected,
            actual: reader.remaining(),
        });
    }
    let pixels = reader.read_bytes(expected)?.to_vec();

    Ok(Frame {
        id,
        width,
        height,
        pixels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        Frame::new(0x0000_0001, 2, 1, vec![0xFF, 0x00, 0x00, 0x00, 0xFF, 0x00])
            .expect("valid frame")
    }

    #[test]
    fn test_encode_frame_layout() {
        let buf = encode_frame(&sample_frame()).expect("encode succeeds");

        assert_eq!(buf.len(), 16);
        assert_eq!(buf[0], 0x01); // version
        assert_eq!(buf[1], 0x01); // type
        assert_eq!(&buf[2..6], &[0x01, 0x00, 0x00, 0x00]); // frame_id LE
        assert_eq!(&buf[6..8], &[0x02, 0x00]); // width
        assert_eq!(&buf[8..10], &[0x01, 0x00]); // height
        assert_eq!(&buf[10..], &[0xFF, 0x00, 0x00, 0x00, 0xFF, 0x00]);
    }

    #[test]
    fn test_frame_round_trip() {
        let frame = sample_frame();
        let decoded = decode_frame(&encode_frame(&frame).expect("encode")).expect("decode");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_encode_rejects_pixel_mismatch() {
        let frame = Frame {
            id: 1,
            width: 2,
            height: 2,
            pixels: vec![0u8; 5],
        };
        let err = encode_frame(&frame).expect_err("5 != 12");
        assert!(matches!(err, EncodeError::InvalidDimensions { .. }));
    }

    #[test]
    fn test_decode_rejects_bad_version() {
        let mut buf = encode_frame(&sample_frame()).expect("encode");
        buf[0] = 0x02;
        let err = decode_frame(&buf).expect_err("version 2");
        assert_eq!(err, DecodeError::VersionMismatch { found: 2 });
    }

    #[test]
    fn test_decode_rejects_truncated_header() {
        let err = decode_frame(&[0x01, 0x01, 0x05]).expect_err("3 bytes");
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn test_decode_rejects_short_pixels() {
        let mut buf = encode_frame(&sample_frame()).expect("encode");
        buf.truncate(buf.len() - 1);
        let err = decode_frame(&buf).expect_err("missing pixel byte");
        assert!(matches!(err, DecodeError::InvalidDimensions { .. }));
    }
}
