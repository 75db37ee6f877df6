/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Link-side wiring between the framing codec, the buffer pool and a
//! [`LinkDriver`].
//!
//! ```text
//!   link bytes ─► Uplink ─► Deframer ─► pool Buffer ─► PacketHandler ─► release
//!   payload ─► Downlink ─► pool Buffer ─► frame_into ─► LinkDriver::send ─► release
//! ```
//!
//! Both directions treat pool exhaustion as backpressure: the packet is
//! dropped, counted and logged, and the link keeps running.  A partially
//! written downlink frame keeps its pool buffer until [`Downlink::flush`]
//! gets the rest out, so frames never interleave on the wire.

pub mod error;
pub mod link;

pub use error::{CommError, LinkError};
pub use link::{LinkDriver, LinkParams, LoopbackLink, LoopbackPeer};

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::BytesMut;
use tracing::{debug, warn};

use crate::buffer::{Buffer, BufferPool};
use crate::framing::{Deframer, DeframerStats, FrameCodec, FramingError};

// ── Uplink ────────────────────────────────────────────────────────────────────

/// Application side of the uplink.  Receives each verified payload while it
/// sits in a pool buffer; the buffer is released when `handle` returns.
pub trait PacketHandler: Send {
    fn handle(&mut self, payload: &[u8]);
}

impl<F> PacketHandler for F
where
    F: FnMut(&[u8]) + Send,
{
    fn handle(&mut self, payload: &[u8]) {
        self(payload)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UplinkStats {
    pub delivered: u64,
    /// Frames dropped for lack of a pool buffer.
    pub dropped: u64,
    pub corrupt: u64,
}

pub struct Uplink {
    deframer: Deframer,
    input: BytesMut,
    pool: Arc<BufferPool>,
    handler: Box<dyn PacketHandler>,
    stats: UplinkStats,
}

impl std::fmt::Debug for Uplink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uplink")
            .field("state", &self.deframer.state())
            .field("buffered", &self.input.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Uplink {
    pub fn new(codec: FrameCodec, pool: Arc<BufferPool>, handler: Box<dyn PacketHandler>) -> Self {
        Self {
            deframer: codec.deframer(),
            input: BytesMut::with_capacity(codec.frame_len(codec.max_payload())),
            pool,
            handler,
            stats: UplinkStats::default(),
        }
    }

    /// Feed raw link bytes; returns the number of payloads delivered.
    ///
    /// Never blocks and never waits for more input: an incomplete frame is
    /// kept and finished by a later call.  Corrupt frames are counted and
    /// skipped.
    ///
    /// # Errors
    /// Only pool misuse, which indicates a defect in the pool wiring.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<usize, CommError> {
        self.input.extend_from_slice(bytes);
        let mut delivered = 0;

        loop {
            match self.deframer.deframe(&mut self.input) {
                Ok(Some(payload)) => {
                    if self.deliver(&payload)? {
                        delivered += 1;
                    }
                }
                Ok(None) => break,
                Err(FramingError::CorruptFrame { expected, actual }) => {
                    self.stats.corrupt += 1;
                    warn!(expected, actual, "corrupt uplink frame dropped");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(delivered)
    }

    fn deliver(&mut self, payload: &[u8]) -> Result<bool, CommError> {
        let mut buffer = match self.pool.allocate(payload.len()) {
            Ok(b) => b,
            Err(e) if e.is_backpressure() => {
                self.stats.dropped += 1;
                warn!(len = payload.len(), error = %e, "uplink frame dropped: no pool buffer");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let staged = buffer.write(payload);
        if staged.is_ok() {
            self.handler.handle(&buffer);
            self.stats.delivered += 1;
        }
        self.pool.release(buffer)?;
        staged?;
        Ok(true)
    }

    pub fn stats(&self) -> UplinkStats {
        self.stats
    }

    pub fn deframer_stats(&self) -> DeframerStats {
        self.deframer.stats()
    }

    /// Drop any partially received frame.
    pub fn reset(&mut self) {
        self.input.clear();
        self.deframer.reset();
    }
}

// ── Downlink ──────────────────────────────────────────────────────────────────

/// What became of a frame handed to [`Downlink::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Fully written to the link.
    Sent,
    /// Framed and waiting behind a partial write; [`Downlink::flush`]
    /// continues it.
    Queued,
    /// No pool buffer was available.
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownlinkStats {
    pub sent: u64,
    pub dropped: u64,
    pub pending: usize,
}

#[derive(Debug)]
struct PendingFrame {
    buffer: Buffer,
    written: usize,
}

pub struct Downlink {
    codec: FrameCodec,
    pool: Arc<BufferPool>,
    link: Box<dyn LinkDriver>,
    pending: VecDeque<PendingFrame>,
    sent: u64,
    dropped: u64,
}

impl std::fmt::Debug for Downlink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downlink")
            .field("link_open", &self.link.is_open())
            .field("pending", &self.pending.len())
            .field("sent", &self.sent)
            .field("dropped", &self.dropped)
            .finish()
    }
}

impl Downlink {
    pub fn new(codec: FrameCodec, pool: Arc<BufferPool>, link: Box<dyn LinkDriver>) -> Self {
        Self {
            codec,
            pool,
            link,
            pending: VecDeque::new(),
            sent: 0,
            dropped: 0,
        }
    }

    pub fn open(&mut self, params: &LinkParams) -> Result<(), LinkError> {
        self.link.open(params)
    }

    pub fn close(&mut self) {
        self.link.close();
    }

    /// Frame `payload` into a pool buffer and write it to the link.
    ///
    /// # Errors
    /// * [`FramingError::PayloadTooLarge`] for an oversized payload.
    /// * Link errors from the driver; the frame stays queued.
    pub fn send(&mut self, payload: &[u8]) -> Result<SendOutcome, CommError> {
        let max = self.codec.max_payload();
        if payload.len() > max {
            return Err(FramingError::PayloadTooLarge {
                len: payload.len(),
                max,
            }
            .into());
        }

        let wire_len = self.codec.frame_len(payload.len());
        let mut buffer = match self.pool.allocate(wire_len) {
            Ok(b) => b,
            Err(e) if e.is_backpressure() => {
                self.dropped += 1;
                warn!(len = payload.len(), error = %e, "downlink frame dropped: no pool buffer");
                return Ok(SendOutcome::Dropped);
            }
            Err(e) => return Err(e.into()),
        };

        let encoded = match buffer.set_len(wire_len) {
            Ok(()) => self
                .codec
                .frame_into(payload, buffer.as_mut_slice())
                .map(|_| ())
                .map_err(CommError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = encoded {
            self.pool.release(buffer)?;
            return Err(e);
        }

        self.pending.push_back(PendingFrame { buffer, written: 0 });
        if self.flush()? == 0 {
            Ok(SendOutcome::Sent)
        } else {
            debug!(pending = self.pending.len(), "downlink frame queued behind partial write");
            Ok(SendOutcome::Queued)
        }
    }

    /// Continue queued writes in order.  Returns the number of frames still
    /// pending.
    pub fn flush(&mut self) -> Result<usize, CommError> {
        while let Some(front) = self.pending.front_mut() {
            let n = self.link.send(&front.buffer[front.written..])?;
            front.written += n;
            if front.written < front.buffer.len() {
                break;
            }
            if let Some(done) = self.pending.pop_front() {
                self.sent += 1;
                self.pool.release(done.buffer)?;
            }
        }
        Ok(self.pending.len())
    }

    /// Release every queued frame's buffer without sending it.  Returns how
    /// many frames were discarded.
    pub fn discard_pending(&mut self) -> Result<usize, CommError> {
        let count = self.pending.len();
        for frame in self.pending.drain(..) {
            self.pool.release(frame.buffer)?;
        }
        if count > 0 {
            warn!(count, "discarded unsent downlink frames");
        }
        Ok(count)
    }

    pub fn stats(&self) -> DownlinkStats {
        DownlinkStats {
            sent: self.sent,
            dropped: self.dropped,
            pending: self.pending.len(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BinSpec, HeapAllocator};
    use parking_lot::Mutex;

    fn pool(bins: &[BinSpec]) -> Arc<BufferPool> {
        Arc::new(BufferPool::configure(1, bins, &HeapAllocator).unwrap())
    }

    fn collector() -> (Arc<Mutex<Vec<Vec<u8>>>>, Box<dyn PacketHandler>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = move |p: &[u8]| sink.lock().push(p.to_vec());
        (seen, Box::new(handler))
    }

    fn open_downlink(pool: &Arc<BufferPool>, wire: usize) -> (Downlink, LoopbackPeer) {
        let (link, peer) = LoopbackLink::new(wire);
        let mut down = Downlink::new(FrameCodec::default(), Arc::clone(pool), Box::new(link));
        down.open(&LinkParams::default()).unwrap();
        (down, peer)
    }

    #[test]
    fn downlink_to_uplink_over_loopback() {
        let pool = pool(&[BinSpec::new(64, 4)]);
        let (mut down, peer) = open_downlink(&pool, 1024);
        let (seen, handler) = collector();
        let mut up = Uplink::new(FrameCodec::default(), Arc::clone(&pool), handler);

        assert_eq!(down.send(b"PING").unwrap(), SendOutcome::Sent);
        assert_eq!(down.send(b"PONG").unwrap(), SendOutcome::Sent);
        assert_eq!(up.receive(&peer.take()).unwrap(), 2);

        assert_eq!(*seen.lock(), vec![b"PING".to_vec(), b"PONG".to_vec()]);
        assert_eq!(pool.stats().in_use(), 0);
        assert_eq!(down.stats().sent, 2);
    }

    #[test]
    fn uplink_survives_byte_at_a_time_delivery() {
        let pool = pool(&[BinSpec::new(64, 1)]);
        let (seen, handler) = collector();
        let mut up = Uplink::new(FrameCodec::default(), Arc::clone(&pool), handler);
        let wire = FrameCodec::default().frame(b"PING").unwrap();

        let (last, head) = wire.split_last().unwrap();
        for b in head {
            assert_eq!(up.receive(std::slice::from_ref(b)).unwrap(), 0);
        }
        assert_eq!(up.receive(std::slice::from_ref(last)).unwrap(), 1);
        assert_eq!(*seen.lock(), vec![b"PING".to_vec()]);
    }

    #[test]
    fn uplink_counts_corrupt_frames_and_recovers() {
        let pool = pool(&[BinSpec::new(64, 1)]);
        let (seen, handler) = collector();
        let mut up = Uplink::new(FrameCodec::default(), Arc::clone(&pool), handler);
        let codec = FrameCodec::default();

        let mut bad = codec.frame(b"bad").unwrap().to_vec();
        bad[9] ^= 0xFF;
        let good = codec.frame(b"good").unwrap();

        assert_eq!(up.receive(&bad).unwrap(), 0);
        assert_eq!(up.receive(&good).unwrap(), 1);
        assert_eq!(up.stats().corrupt, 1);
        assert_eq!(*seen.lock(), vec![b"good".to_vec()]);
    }

    #[test]
    fn uplink_drops_when_no_bin_fits() {
        let pool = pool(&[BinSpec::new(4, 2)]);
        let (seen, handler) = collector();
        let mut up = Uplink::new(FrameCodec::default(), Arc::clone(&pool), handler);
        let wire = FrameCodec::default().frame(b"too long").unwrap();

        assert_eq!(up.receive(&wire).unwrap(), 0);
        assert_eq!(up.stats().dropped, 1);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn partial_write_is_completed_by_flush() {
        let pool = pool(&[BinSpec::new(64, 4)]);
        let (mut down, peer) = open_downlink(&pool, 10);
        let expected = FrameCodec::default().frame(b"PING").unwrap();

        assert_eq!(down.send(b"PING").unwrap(), SendOutcome::Queued);
        assert_eq!(pool.stats().in_use(), 1, "queued frame keeps its buffer");

        let mut wire = peer.take().to_vec();
        assert_eq!(down.flush().unwrap(), 0);
        wire.extend_from_slice(&peer.take());

        assert_eq!(wire, expected.to_vec());
        assert_eq!(pool.stats().in_use(), 0);
    }

    #[test]
    fn frames_behind_a_partial_write_keep_their_order() {
        let pool = pool(&[BinSpec::new(64, 4)]);
        let (mut down, peer) = open_downlink(&pool, 20);
        let codec = FrameCodec::default();

        assert_eq!(down.send(b"one").unwrap(), SendOutcome::Sent);
        assert_eq!(down.send(b"two").unwrap(), SendOutcome::Queued);
        assert_eq!(down.send(b"six").unwrap(), SendOutcome::Queued);

        let mut wire = Vec::new();
        while down.stats().pending > 0 {
            wire.extend_from_slice(&peer.take());
            down.flush().unwrap();
        }
        wire.extend_from_slice(&peer.take());

        let mut expected = codec.frame(b"one").unwrap().to_vec();
        expected.extend_from_slice(&codec.frame(b"two").unwrap());
        expected.extend_from_slice(&codec.frame(b"six").unwrap());
        assert_eq!(wire, expected);
    }

    #[test]
    fn downlink_backpressure_drops_the_frame() {
        let pool = pool(&[BinSpec::new(64, 1)]);
        let (mut down, _peer) = open_downlink(&pool, 4);

        assert_eq!(down.send(b"a").unwrap(), SendOutcome::Queued);
        assert_eq!(down.send(b"b").unwrap(), SendOutcome::Dropped);
        assert_eq!(down.stats().dropped, 1);

        assert_eq!(down.discard_pending().unwrap(), 1);
        assert_eq!(pool.stats().in_use(), 0);
    }

    #[test]
    fn oversized_payload_is_rejected_before_allocation() {
        let pool = pool(&[BinSpec::new(64, 1)]);
        let (mut down, _peer) = open_downlink(&pool, 1024);
        let big = vec![0u8; FrameCodec::default().max_payload() + 1];

        assert!(matches!(
            down.send(&big),
            Err(CommError::Framing(FramingError::PayloadTooLarge { .. }))
        ));
        assert_eq!(pool.stats().in_use(), 0);
    }

    #[test]
    fn send_on_closed_link_keeps_frame_queued() {
        let pool = pool(&[BinSpec::new(64, 1)]);
        let (link, _peer) = LoopbackLink::new(64);
        let mut down = Downlink::new(FrameCodec::default(), Arc::clone(&pool), Box::new(link));

        assert!(matches!(
            down.send(b"x"),
            Err(CommError::Link(LinkError::Closed))
        ));
        assert_eq!(down.stats().pending, 1);
        down.discard_pending().unwrap();
        assert_eq!(pool.stats().in_use(), 0);
    }
}
