/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use thiserror::Error;

/// Framing codec errors.
///
/// `CorruptFrame` is recoverable: the deframer has already discarded the bad
/// frame and resumes at the next header boundary on the following call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("payload of {len} bytes exceeds codec maximum {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("corrupt frame: trailer {actual:#010x}, computed {expected:#010x}")]
    CorruptFrame { expected: u32, actual: u32 },

    #[error("output holds {available} bytes, frame needs {needed}")]
    OutputTooSmall { needed: usize, available: usize },

    #[error("invalid codec configuration: {0}")]
    InvalidConfig(String),
}
