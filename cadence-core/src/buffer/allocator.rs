/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Upstream memory allocators.
//!
//! A [`BufferPool`](super::BufferPool) requests its whole region exactly once,
//! at configuration time, from a [`MemAllocator`].  The allocator is an
//! explicitly owned object handed to the lifecycle controller; there is no
//! process-wide allocator instance.

use std::collections::HashMap;

use bytes::BytesMut;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// Errors produced by an upstream allocator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocatorError {
    /// The allocator cannot satisfy a request of `requested` bytes.
    #[error("allocator {id}: cannot allocate {requested} bytes ({available} available)")]
    OutOfMemory {
        id: u32,
        requested: usize,
        available: usize,
    },

    /// The identifier already owns a live allocation.
    #[error("allocator: identifier {0} already holds an allocation")]
    DuplicateIdentifier(u32),
}

/// Source of the single contiguous region a buffer pool partitions into bins.
///
/// `identifier` tags the allocation so it can be returned with
/// [`deallocate`](MemAllocator::deallocate).
pub trait MemAllocator: Send + Sync {
    /// Allocate `size` zero-filled bytes for `identifier`.
    fn allocate(&self, identifier: u32, size: usize) -> Result<BytesMut, AllocatorError>;

    /// Return the allocation owned by `identifier`.  Unknown identifiers are
    /// ignored.
    fn deallocate(&self, identifier: u32);
}

// ── HeapAllocator ─────────────────────────────────────────────────────────────

/// Unbounded heap allocator.
#[derive(Debug, Default)]
pub struct HeapAllocator;

impl MemAllocator for HeapAllocator {
    fn allocate(&self, identifier: u32, size: usize) -> Result<BytesMut, AllocatorError> {
        debug!(identifier, size, "heap allocation");
        Ok(BytesMut::zeroed(size))
    }

    fn deallocate(&self, identifier: u32) {
        debug!(identifier, "heap deallocation");
    }
}

// ── BoundedAllocator ──────────────────────────────────────────────────────────

/// Heap allocator with a fixed byte budget, modelling a static memory arena.
///
/// Budget is charged on `allocate` and refunded on `deallocate`.
#[derive(Debug)]
pub struct BoundedAllocator {
    budget: usize,
    live: Mutex<HashMap<u32, usize>>,
}

impl BoundedAllocator {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Bytes currently handed out.
    pub fn in_use(&self) -> usize {
        self.live.lock().values().sum()
    }

    /// Bytes still available.
    pub fn available(&self) -> usize {
        self.budget - self.in_use()
    }
}

impl MemAllocator for BoundedAllocator {
    fn allocate(&self, identifier: u32, size: usize) -> Result<BytesMut, AllocatorError> {
        let mut live = self.live.lock();
        if live.contains_key(&identifier) {
            return Err(AllocatorError::DuplicateIdentifier(identifier));
        }
        let available = self.budget - live.values().sum::<usize>();
        if size > available {
            return Err(AllocatorError::OutOfMemory {
                id: identifier,
                requested: size,
                available,
            });
        }
        live.insert(identifier, size);
        debug!(identifier, size, available, "bounded allocation");
        Ok(BytesMut::zeroed(size))
    }

    fn deallocate(&self, identifier: u32) {
        if let Some(size) = self.live.lock().remove(&identifier) {
            debug!(identifier, size, "bounded deallocation");
        }
    }
}
