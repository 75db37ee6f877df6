/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Fixed-capacity, size-classed buffer pool.
//!
//! The pool asks its [`MemAllocator`] for one contiguous region at
//! configuration time and partitions it into bins of equally sized buffers.
//! No allocation happens after that: [`BufferPool::allocate`] hands out a
//! pre-carved slot and [`BufferPool::release`] puts it back.
//!
//! ```text
//!   region (one upstream allocation)
//!   ┌────────────── bin 0 ──────────────┬──────────── bin 1 ────────────┐
//!   │ 64 │ 64 │ 64 │ ... (count × size) │ 1024 │ 1024 │ ...             │
//!   └───────────────────────────────────┴───────────────────────────────┘
//! ```
//!
//! Bins are ordered by buffer size (ascending) after configuration, so the
//! bin index doubles as a size-class rank.  Each bin has its own lock; bin
//! selection only ever holds one bin lock at a time.

pub mod allocator;
pub mod error;

pub use allocator::{AllocatorError, BoundedAllocator, HeapAllocator, MemAllocator};
pub use error::PoolError;

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::BytesMut;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Maximum number of bins in one pool.
pub const MAX_BINS: usize = 10;

/// Distinguishes pool instances even when callers reuse identifiers.
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

// ── BinSpec ───────────────────────────────────────────────────────────────────

/// One row of the bin table: `count` buffers of `size` bytes each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinSpec {
    pub size: usize,
    pub count: usize,
}

impl BinSpec {
    pub const fn new(size: usize, count: usize) -> Self {
        Self { size, count }
    }
}

/// Validate a bin table and return the total region size in bytes.
pub fn validate_bins(bins: &[BinSpec]) -> Result<usize, PoolError> {
    if bins.is_empty() {
        return Err(PoolError::InvalidBins("bin table is empty".into()));
    }
    if bins.len() > MAX_BINS {
        return Err(PoolError::InvalidBins(format!(
            "{} bins configured, at most {MAX_BINS} supported",
            bins.len()
        )));
    }

    bins.iter().enumerate().try_fold(0usize, |total, (i, b)| {
        if b.size == 0 || b.count == 0 {
            return Err(PoolError::InvalidBins(format!(
                "bin {i} has size {} and count {} (both must be non-zero)",
                b.size, b.count
            )));
        }
        b.size
            .checked_mul(b.count)
            .and_then(|bytes| total.checked_add(bytes))
            .ok_or_else(|| PoolError::InvalidBins("total region size overflows usize".into()))
    })
}

// ── Buffer ────────────────────────────────────────────────────────────────────

/// A fixed-capacity buffer checked out of a [`BufferPool`].
///
/// The holder owns it exclusively until it is handed back with
/// [`BufferPool::release`].  Writes never grow the buffer past the capacity
/// of its bin.
#[derive(Debug)]
pub struct Buffer {
    instance: u64,
    bin: usize,
    slot: usize,
    capacity: usize,
    storage: BytesMut,
    /// Bin the slot belongs to, so a misrouted release can still return it.
    home: Weak<Mutex<BinState>>,
}

impl Buffer {
    /// Bin (size class) this buffer was carved from.
    pub fn bin(&self) -> usize {
        self.bin
    }

    /// Slot index inside the bin.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Fixed capacity in bytes (the bin's buffer size).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes currently filled.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Filled bytes, mutable.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage[..]
    }

    /// Append `src` to the filled bytes.
    pub fn write(&mut self, src: &[u8]) -> Result<(), PoolError> {
        let requested = self.storage.len() + src.len();
        if requested > self.capacity {
            return Err(PoolError::BufferOverflow {
                capacity: self.capacity,
                requested,
            });
        }
        self.storage.extend_from_slice(src);
        Ok(())
    }

    /// Set the filled length to `len`, zero-filling any newly exposed bytes.
    pub fn set_len(&mut self, len: usize) -> Result<(), PoolError> {
        if len > self.capacity {
            return Err(PoolError::BufferOverflow {
                capacity: self.capacity,
                requested: len,
            });
        }
        self.storage.resize(len, 0);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.storage.clear();
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.storage[..]
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.storage[..]
    }
}

// ── Statistics ────────────────────────────────────────────────────────────────

/// Point-in-time view of one bin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinStats {
    pub size: usize,
    pub count: usize,
    pub free: usize,
    pub in_use: usize,
    /// Most buffers ever checked out at once.
    pub high_water: usize,
    pub allocations: u64,
}

/// Point-in-time view of the whole pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub bins: Vec<BinStats>,
    pub exhausted: u64,
    pub no_suitable_bin: u64,
}

impl PoolStats {
    pub fn in_use(&self) -> usize {
        self.bins.iter().map(|b| b.in_use).sum()
    }
}

// ── BufferPool ────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct BinState {
    /// Free slots with their storage; popped LIFO so a just-released buffer
    /// is the next one handed out.
    free: Vec<(usize, BytesMut)>,
    in_use: Vec<bool>,
    high_water: usize,
    allocations: u64,
}

impl BinState {
    /// Mark `slot` free again.  `false` if it already was.
    fn put_back(&mut self, slot: usize, mut storage: BytesMut) -> bool {
        match self.in_use.get_mut(slot) {
            Some(in_use) if *in_use => {
                *in_use = false;
                storage.clear();
                self.free.push((slot, storage));
                true
            }
            _ => false,
        }
    }
}

struct Bin {
    size: usize,
    count: usize,
    state: Arc<Mutex<BinState>>,
}

/// Size-classed pool of pre-allocated buffers.
///
/// `Send + Sync`: allocation and release may be called concurrently from
/// independent execution contexts.
pub struct BufferPool {
    id: u32,
    instance: u64,
    total_bytes: usize,
    bins: Vec<Bin>,
    exhausted: AtomicU64,
    no_suitable_bin: AtomicU64,
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("id", &self.id)
            .field("total_bytes", &self.total_bytes)
            .field(
                "bins",
                &self
                    .bins
                    .iter()
                    .map(|b| (b.size, b.count))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl BufferPool {
    /// Build a pool from `bins`, drawing the whole region from `allocator`
    /// under identifier `id`.
    ///
    /// Bins are sorted by size; equal sizes keep their table order.
    ///
    /// # Errors
    /// * [`PoolError::InvalidBins`]: empty table, too many bins, a zero size
    ///   or count, or a region size that overflows.
    /// * [`PoolError::AllocationFailed`]: the allocator refused the region.
    pub fn configure(
        id: u32,
        bins: &[BinSpec],
        allocator: &dyn MemAllocator,
    ) -> Result<Self, PoolError> {
        let total_bytes = validate_bins(bins)?;

        let mut sorted: Vec<BinSpec> = bins.to_vec();
        sorted.sort_by_key(|b| b.size);

        let mut region = allocator.allocate(id, total_bytes)?;

        let carved: Vec<Bin> = sorted
            .iter()
            .map(|spec| {
                let free = (0..spec.count)
                    .rev()
                    .map(|slot| {
                        let mut storage = region.split_to(spec.size);
                        storage.clear();
                        (slot, storage)
                    })
                    .collect::<Vec<_>>();
                Bin {
                    size: spec.size,
                    count: spec.count,
                    state: Arc::new(Mutex::new(BinState {
                        free,
                        in_use: vec![false; spec.count],
                        high_water: 0,
                        allocations: 0,
                    })),
                }
            })
            .collect();

        info!(
            pool = id,
            total_bytes,
            bins = ?sorted.iter().map(|b| (b.size, b.count)).collect::<Vec<_>>(),
            "Buffer pool configured"
        );

        Ok(Self {
            id,
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            total_bytes,
            bins: carved,
            exhausted: AtomicU64::new(0),
            no_suitable_bin: AtomicU64::new(0),
        })
    }

    /// Identifier the region was allocated under.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Size of the upstream region in bytes.  Never changes after
    /// configuration.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Buffer size of the largest bin.
    pub fn largest_buffer(&self) -> usize {
        self.bins.last().map(|b| b.size).unwrap_or(0)
    }

    /// Check out a buffer of at least `requested` bytes from the smallest bin
    /// that can hold it and still has a free slot.
    ///
    /// Never blocks.
    ///
    /// # Errors
    /// * [`PoolError::NoSuitableBin`]: every bin is smaller than `requested`.
    /// * [`PoolError::PoolExhausted`]: every large-enough bin is checked out.
    pub fn allocate(&self, requested: usize) -> Result<Buffer, PoolError> {
        let largest = self.largest_buffer();
        if requested > largest {
            self.no_suitable_bin.fetch_add(1, Ordering::Relaxed);
            warn!(pool = self.id, requested, largest, "no bin large enough");
            return Err(PoolError::NoSuitableBin { requested, largest });
        }

        for (index, bin) in self.bins.iter().enumerate() {
            if bin.size < requested {
                continue;
            }
            let mut state = bin.state.lock();
            if let Some((slot, storage)) = state.free.pop() {
                state.in_use[slot] = true;
                state.allocations += 1;
                let in_use = bin.count - state.free.len();
                state.high_water = state.high_water.max(in_use);
                debug!(pool = self.id, bin = index, slot, requested, "buffer allocated");
                return Ok(Buffer {
                    instance: self.instance,
                    bin: index,
                    slot,
                    capacity: bin.size,
                    storage,
                    home: Arc::downgrade(&bin.state),
                });
            }
        }

        self.exhausted.fetch_add(1, Ordering::Relaxed);
        warn!(pool = self.id, requested, "buffer pool exhausted");
        Err(PoolError::PoolExhausted { requested })
    }

    /// Return `buffer` to the bin it came from.
    ///
    /// Misuse is logged and leaves every pool consistent: a buffer from
    /// another pool goes back to its own bin, and a slot that is already
    /// free is left alone.
    ///
    /// # Errors
    /// * [`PoolError::ForeignBuffer`]: `buffer` was not allocated by this pool.
    /// * [`PoolError::DoubleRelease`]: the slot is already free.
    pub fn release(&self, buffer: Buffer) -> Result<(), PoolError> {
        let Buffer {
            instance,
            bin,
            slot,
            capacity,
            storage,
            home,
        } = buffer;

        let owned = instance == self.instance
            && matches!(self.bins.get(bin), Some(b) if b.size == capacity && slot < b.count);
        if !owned {
            let returned = home
                .upgrade()
                .is_some_and(|origin| origin.lock().put_back(slot, storage));
            error!(
                pool = self.id,
                bin,
                slot,
                returned_to_origin = returned,
                "buffer released to a pool it does not belong to"
            );
            return Err(PoolError::ForeignBuffer { pool: self.id });
        }

        if !self.bins[bin].state.lock().put_back(slot, storage) {
            error!(pool = self.id, bin, slot, "buffer released twice");
            return Err(PoolError::DoubleRelease { bin, slot });
        }
        debug!(pool = self.id, bin, slot, "buffer released");
        Ok(())
    }

    /// Current occupancy and counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            bins: self
                .bins
                .iter()
                .map(|b| {
                    let state = b.state.lock();
                    BinStats {
                        size: b.size,
                        count: b.count,
                        free: state.free.len(),
                        in_use: b.count - state.free.len(),
                        high_water: state.high_water,
                        allocations: state.allocations,
                    }
                })
                .collect(),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            no_suitable_bin: self.no_suitable_bin.load(Ordering::Relaxed),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
