/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Link driver interface and the in-memory loopback link.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::LinkError;

/// Serial link parameters, supplied once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkParams {
    pub uart_number: u32,
    pub baud: u32,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            uart_number: 0,
            baud: 115_200,
        }
    }
}

/// Byte-stream transport under the framing codec.
///
/// Implementations must not block: `send` writes what the transport can
/// take right now and reports how many bytes that was.
pub trait LinkDriver: Send {
    fn open(&mut self, params: &LinkParams) -> Result<(), LinkError>;

    /// Write a prefix of `bytes`; returns its length (possibly 0).
    fn send(&mut self, bytes: &[u8]) -> Result<usize, LinkError>;

    fn close(&mut self);

    fn is_open(&self) -> bool;
}

// ── LoopbackLink ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Wire {
    bytes: BytesMut,
    capacity: usize,
}

/// In-memory link.  Sent bytes accumulate on a wire of bounded capacity
/// until the [`LoopbackPeer`] takes them, which makes partial writes
/// reproducible.
#[derive(Debug)]
pub struct LoopbackLink {
    wire: Arc<Mutex<Wire>>,
    params: Option<LinkParams>,
}

/// Far end of a [`LoopbackLink`].
#[derive(Debug, Clone)]
pub struct LoopbackPeer {
    wire: Arc<Mutex<Wire>>,
}

impl LoopbackLink {
    /// A link whose wire holds at most `capacity` untaken bytes.
    pub fn new(capacity: usize) -> (Self, LoopbackPeer) {
        let wire = Arc::new(Mutex::new(Wire {
            bytes: BytesMut::with_capacity(capacity),
            capacity,
        }));
        let peer = LoopbackPeer {
            wire: Arc::clone(&wire),
        };
        (Self { wire, params: None }, peer)
    }

    pub fn params(&self) -> Option<&LinkParams> {
        self.params.as_ref()
    }
}

impl LinkDriver for LoopbackLink {
    fn open(&mut self, params: &LinkParams) -> Result<(), LinkError> {
        if self.params.is_some() {
            return Err(LinkError::AlreadyOpen);
        }
        if params.baud == 0 {
            return Err(LinkError::InvalidParams("baud must be > 0".into()));
        }
        debug!(uart = params.uart_number, baud = params.baud, "loopback link open");
        self.params = Some(*params);
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<usize, LinkError> {
        if self.params.is_none() {
            return Err(LinkError::Closed);
        }
        let mut wire = self.wire.lock();
        let room = wire.capacity.saturating_sub(wire.bytes.len());
        let n = room.min(bytes.len());
        wire.bytes.extend_from_slice(&bytes[..n]);
        Ok(n)
    }

    fn close(&mut self) {
        self.params = None;
    }

    fn is_open(&self) -> bool {
        self.params.is_some()
    }
}

impl LoopbackPeer {
    /// Take everything currently on the wire.
    pub fn take(&self) -> Bytes {
        self.wire.lock().bytes.split().freeze()
    }

    pub fn pending(&self) -> usize {
        self.wire.lock().bytes.len()
    }
}
