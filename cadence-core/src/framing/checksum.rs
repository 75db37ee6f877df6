/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Frame trailer checksums.
//!
//! | Kind | Width | Detects |
//! |---|---|---|
//! | `Crc32` | 4 bytes | all single-byte errors, all bursts ≤ 32 bits |
//! | `Fletcher16` | 2 bytes | all single-byte errors except `0x00` ↔ `0xFF` swaps |

use serde::{Deserialize, Serialize};

/// Integrity trailer algorithm.  Trailers are written big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    /// IEEE 802.3 CRC-32.
    #[default]
    Crc32,
    /// Fletcher-16 (modulo 255).
    Fletcher16,
}

impl ChecksumKind {
    /// Trailer width in bytes.
    pub fn width(self) -> usize {
        match self {
            ChecksumKind::Crc32 => 4,
            ChecksumKind::Fletcher16 => 2,
        }
    }

    pub fn compute(self, data: &[u8]) -> u32 {
        match self {
            ChecksumKind::Crc32 => crc32fast::hash(data),
            ChecksumKind::Fletcher16 => u32::from(fletcher16(data)),
        }
    }

    /// Write `value` into `out[..width]`.
    pub fn encode(self, value: u32, out: &mut [u8]) {
        match self {
            ChecksumKind::Crc32 => out[..4].copy_from_slice(&value.to_be_bytes()),
            ChecksumKind::Fletcher16 => out[..2].copy_from_slice(&(value as u16).to_be_bytes()),
        }
    }

    /// Read a trailer previously written by [`encode`](Self::encode).
    pub fn decode(self, trailer: &[u8]) -> u32 {
        match self {
            ChecksumKind::Crc32 => {
                u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]])
            }
            ChecksumKind::Fletcher16 => u32::from(u16::from_be_bytes([trailer[0], trailer[1]])),
        }
    }
}

fn fletcher16(data: &[u8]) -> u16 {
    let (mut lo, mut hi) = (0u16, 0u16);
    for &b in data {
        lo = (lo + u16::from(b)) % 255;
        hi = (hi + lo) % 255;
    }
    (hi << 8) | lo
}
