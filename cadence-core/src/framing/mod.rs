/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Framing codec for the point-to-point command / telemetry link.
//!
//! Wire layout (all integers big-endian):
//!
//! ```text
//! ┌────────────┬────────────┬───────────────┬─────────────────────┐
//! │ start word │   length   │    payload    │       trailer       │
//! │   u32 BE   │   u32 BE   │ length bytes  │ checksum(hdr + pay) │
//! └────────────┴────────────┴───────────────┴─────────────────────┘
//! ```
//!
//! [`FrameCodec`] is stateless and `Copy`; [`Deframer`] is the resumable
//! receive-side state machine built from it.

pub mod checksum;
pub mod deframer;
pub mod error;

pub use checksum::ChecksumKind;
pub use deframer::{DeframeState, Deframer, DeframerStats};
pub use error::FramingError;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Start word + length field.
pub const HEADER_LEN: usize = 8;

pub const DEFAULT_START_WORD: u32 = 0xDEAD_BEEF;

pub const DEFAULT_MAX_PAYLOAD: usize = 4096;

// ── CodecConfig ───────────────────────────────────────────────────────────────

/// Codec parameters.  Both link ends must agree on all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub start_word: u32,
    pub max_payload: usize,
    pub checksum: ChecksumKind,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            start_word: DEFAULT_START_WORD,
            max_payload: DEFAULT_MAX_PAYLOAD,
            checksum: ChecksumKind::Crc32,
        }
    }
}

// ── FrameCodec ────────────────────────────────────────────────────────────────

/// Stateless frame / deframe transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    config: CodecConfig,
}

impl FrameCodec {
    /// # Errors
    /// [`FramingError::InvalidConfig`] if `max_payload` is zero or does not
    /// fit the 32-bit length field.
    pub fn new(config: CodecConfig) -> Result<Self, FramingError> {
        if config.max_payload == 0 {
            return Err(FramingError::InvalidConfig("max_payload must be > 0".into()));
        }
        if u32::try_from(config.max_payload).is_err() {
            return Err(FramingError::InvalidConfig(format!(
                "max_payload {} does not fit the u32 length field",
                config.max_payload
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn max_payload(&self) -> usize {
        self.config.max_payload
    }

    /// Total wire size of a frame carrying `payload_len` bytes.
    pub fn frame_len(&self, payload_len: usize) -> usize {
        HEADER_LEN + payload_len + self.config.checksum.width()
    }

    /// Encode `payload` into a freshly allocated frame.
    pub fn frame(&self, payload: &[u8]) -> Result<Bytes, FramingError> {
        self.check_len(payload.len())?;
        let mut out = BytesMut::with_capacity(self.frame_len(payload.len()));
        out.put_u32(self.config.start_word);
        out.put_u32(payload.len() as u32);
        out.put_slice(payload);
        let sum = self.config.checksum.compute(&out);
        let mut trailer = [0u8; 4];
        self.config.checksum.encode(sum, &mut trailer);
        out.put_slice(&trailer[..self.config.checksum.width()]);
        Ok(out.freeze())
    }

    /// Encode `payload` into `out` without allocating.  Returns the number of
    /// bytes written.
    pub fn frame_into(&self, payload: &[u8], out: &mut [u8]) -> Result<usize, FramingError> {
        self.check_len(payload.len())?;
        let needed = self.frame_len(payload.len());
        if out.len() < needed {
            return Err(FramingError::OutputTooSmall {
                needed,
                available: out.len(),
            });
        }

        let body_end = HEADER_LEN + payload.len();
        out[..4].copy_from_slice(&self.config.start_word.to_be_bytes());
        out[4..HEADER_LEN].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        out[HEADER_LEN..body_end].copy_from_slice(payload);
        let sum = self.config.checksum.compute(&out[..body_end]);
        self.config.checksum.encode(sum, &mut out[body_end..needed]);
        Ok(needed)
    }

    /// A fresh receive-side state machine using this codec.
    pub fn deframer(&self) -> Deframer {
        Deframer::new(*self)
    }

    fn check_len(&self, len: usize) -> Result<(), FramingError> {
        if len > self.config.max_payload {
            return Err(FramingError::PayloadTooLarge {
                len,
                max: self.config.max_payload,
            });
        }
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            config: CodecConfig::default(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_matches_wire_format() {
        let codec = FrameCodec::default();
        let wire = codec.frame(b"PING").unwrap();

        assert_eq!(wire.len(), codec.frame_len(4));
        assert_eq!(&wire[..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&wire[4..8], &[0, 0, 0, 4]);
        assert_eq!(&wire[8..12], b"PING");
        let crc = crc32fast::hash(&wire[..12]);
        assert_eq!(&wire[12..], &crc.to_be_bytes());
    }

    #[test]
    fn frame_into_matches_frame() {
        for checksum in [ChecksumKind::Crc32, ChecksumKind::Fletcher16] {
            let codec = FrameCodec::new(CodecConfig {
                checksum,
                ..Default::default()
            })
            .unwrap();
            let mut out = [0u8; 64];
            let n = codec.frame_into(b"telemetry", &mut out).unwrap();
            assert_eq!(&out[..n], &codec.frame(b"telemetry").unwrap()[..]);
        }
    }

    #[test]
    fn frame_into_rejects_short_output() {
        let codec = FrameCodec::default();
        let mut out = [0u8; 10];
        assert_eq!(
            codec.frame_into(b"PING", &mut out).unwrap_err(),
            FramingError::OutputTooSmall {
                needed: 16,
                available: 10
            }
        );
    }

    #[test]
    fn empty_payload_is_a_valid_frame() {
        let codec = FrameCodec::default();
        let wire = codec.frame(&[]).unwrap();
        assert_eq!(wire.len(), HEADER_LEN + 4);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let codec = FrameCodec::new(CodecConfig {
            max_payload: 8,
            ..Default::default()
        })
        .unwrap();
        assert!(codec.frame(&[0u8; 8]).is_ok());
        assert_eq!(
            codec.frame(&[0u8; 9]).unwrap_err(),
            FramingError::PayloadTooLarge { len: 9, max: 8 }
        );
    }

    #[test]
    fn zero_max_payload_is_invalid() {
        let err = FrameCodec::new(CodecConfig {
            max_payload: 0,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, FramingError::InvalidConfig(_)));
    }

    #[test]
    fn custom_start_word_is_written() {
        let codec = FrameCodec::new(CodecConfig {
            start_word: 0x1ACF_FC1D,
            ..Default::default()
        })
        .unwrap();
        let wire = codec.frame(b"x").unwrap();
        assert_eq!(&wire[..4], &[0x1A, 0xCF, 0xFC, 0x1D]);
    }
}
