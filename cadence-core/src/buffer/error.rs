/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Buffer pool error taxonomy.
//!
//! | Variant | Class | Caller action |
//! |---|---|---|
//! | `PoolExhausted` / `NoSuitableBin` | backpressure | retry later or drop the request |
//! | `DoubleRelease` / `ForeignBuffer` | misuse | wiring defect, log loudly |
//! | `InvalidBins` / `AllocationFailed` | configuration | fail `configure()` |
//! | `BufferOverflow` | misuse | holder wrote past the buffer's capacity |

use thiserror::Error;

use super::allocator::AllocatorError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// At least one bin is large enough for the request, but all of them are
    /// fully checked out.
    #[error("buffer pool exhausted: no free buffer of at least {requested} bytes")]
    PoolExhausted { requested: usize },

    /// Every bin is smaller than the request.
    #[error("no bin can hold {requested} bytes (largest bin is {largest} bytes)")]
    NoSuitableBin { requested: usize, largest: usize },

    /// The buffer's slot is already marked free.
    #[error("buffer bin {bin} slot {slot} released twice")]
    DoubleRelease { bin: usize, slot: usize },

    /// The buffer was not obtained from this pool.
    #[error("buffer does not belong to pool {pool}")]
    ForeignBuffer { pool: u32 },

    /// A write would exceed the buffer's fixed capacity.
    #[error("write of {requested} bytes exceeds buffer capacity {capacity}")]
    BufferOverflow { capacity: usize, requested: usize },

    /// The bin table was rejected at configuration time.
    #[error("invalid bin table: {0}")]
    InvalidBins(String),

    /// The upstream allocator could not provide the pool region.
    #[error("pool region allocation failed: {0}")]
    AllocationFailed(#[from] AllocatorError),
}

impl PoolError {
    /// Recoverable resource exhaustion: stall or drop, never crash.
    pub fn is_backpressure(&self) -> bool {
        matches!(
            self,
            PoolError::PoolExhausted { .. } | PoolError::NoSuitableBin { .. }
        )
    }

    /// Programming / wiring defect.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            PoolError::DoubleRelease { .. }
                | PoolError::ForeignBuffer { .. }
                | PoolError::BufferOverflow { .. }
        )
    }
}
