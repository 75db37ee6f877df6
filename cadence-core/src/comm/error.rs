/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use thiserror::Error;

use crate::buffer::PoolError;
use crate::framing::FramingError;

/// Link driver failures.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link is not open")]
    Closed,

    #[error("link is already open")]
    AlreadyOpen,

    #[error("invalid link parameters: {0}")]
    InvalidParams(String),

    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by [`Uplink`](super::Uplink) and [`Downlink`](super::Downlink).
///
/// Pool backpressure never appears here: it is counted and the packet is
/// dropped.  A `Pool` variant therefore always carries a misuse error.
#[derive(Debug, Error)]
pub enum CommError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Link(#[from] LinkError),
}
