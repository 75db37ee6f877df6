/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Resumable, non-blocking deframer.
//!
//! The caller owns the receive cursor (a [`BytesMut`]) and appends whatever
//! the link produced; [`Deframer::deframe`] consumes complete frames from its
//! front.  Progress is checkpointed in [`DeframeState`], so a header that has
//! already been validated is not re-parsed while the payload trickles in.
//!
//! ```text
//!  AwaitingHeader ──8 bytes, sane length──► AwaitingPayload
//!        ▲                                        │ length bytes
//!        │                                        ▼
//!        └──── frame emitted / dropped ◄── Complete ◄── AwaitingTrailer
//! ```
//!
//! Resynchronisation rules:
//! * garbage before a start word is discarded;
//! * a header whose length exceeds the codec maximum is a false start, one
//!   byte is discarded and scanning resumes;
//! * a trailer mismatch reports [`FramingError::CorruptFrame`], discards
//!   one byte and scans for the next start word.  The length field may be
//!   the corrupted part, so nothing past the start word is trusted.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, warn};

use super::{FrameCodec, FramingError, HEADER_LEN};

/// Deframer checkpoint.  Transitions depend only on how many bytes are
/// available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeframeState {
    #[default]
    AwaitingHeader,
    AwaitingPayload { len: usize },
    AwaitingTrailer { len: usize },
    Complete { len: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeframerStats {
    pub frames: u64,
    pub corrupt_frames: u64,
    /// Bytes thrown away while resynchronising, including corrupt frames.
    pub discarded_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct Deframer {
    codec: FrameCodec,
    state: DeframeState,
    stats: DeframerStats,
}

impl Deframer {
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            state: DeframeState::AwaitingHeader,
            stats: DeframerStats::default(),
        }
    }

    pub fn state(&self) -> DeframeState {
        self.state
    }

    pub fn stats(&self) -> DeframerStats {
        self.stats
    }

    /// Forget any partially parsed frame.  The caller should clear its
    /// cursor as well.
    pub fn reset(&mut self) {
        self.state = DeframeState::AwaitingHeader;
    }

    /// Extract the next complete payload from the front of `input`.
    ///
    /// * `Ok(Some(payload))`: one frame was consumed from `input`.
    /// * `Ok(None)`: not enough bytes yet; call again after more arrive.
    /// * `Err(CorruptFrame)`: the frame at the front was dropped; call again
    ///   to continue with the remaining bytes.
    ///
    /// Never blocks.
    pub fn deframe(&mut self, input: &mut BytesMut) -> Result<Option<Bytes>, FramingError> {
        let width = self.codec.config.checksum.width();

        loop {
            match self.state {
                DeframeState::AwaitingHeader => {
                    if !self.sync_to_start_word(input) || input.len() < HEADER_LEN {
                        return Ok(None);
                    }
                    let len = u32::from_be_bytes([input[4], input[5], input[6], input[7]]) as usize;
                    if len > self.codec.max_payload() {
                        warn!(
                            len,
                            max = self.codec.max_payload(),
                            "implausible frame length, resynchronising"
                        );
                        input.advance(1);
                        self.stats.discarded_bytes += 1;
                        continue;
                    }
                    self.state = DeframeState::AwaitingPayload { len };
                }

                DeframeState::AwaitingPayload { len } => {
                    if input.len() < HEADER_LEN + len {
                        return Ok(None);
                    }
                    self.state = DeframeState::AwaitingTrailer { len };
                }

                DeframeState::AwaitingTrailer { len } => {
                    if input.len() < HEADER_LEN + len + width {
                        return Ok(None);
                    }
                    self.state = DeframeState::Complete { len };
                }

                DeframeState::Complete { len } => {
                    self.state = DeframeState::AwaitingHeader;
                    let body_end = HEADER_LEN + len;

                    let checksum = self.codec.config.checksum;
                    let expected = checksum.compute(&input[..body_end]);
                    let actual = checksum.decode(&input[body_end..body_end + width]);
                    if expected != actual {
                        input.advance(1);
                        self.stats.corrupt_frames += 1;
                        self.stats.discarded_bytes += 1;
                        warn!(
                            len,
                            expected = format_args!("{expected:#010x}"),
                            actual = format_args!("{actual:#010x}"),
                            "corrupt frame dropped"
                        );
                        return Err(FramingError::CorruptFrame { expected, actual });
                    }

                    let frame = input.split_to(body_end + width).freeze();
                    self.stats.frames += 1;
                    debug!(len, "frame received");
                    return Ok(Some(frame.slice(HEADER_LEN..body_end)));
                }
            }
        }
    }

    /// Discard bytes until `input` starts with the start word.  Keeps a
    /// trailing partial start word.  Returns `true` once aligned.
    fn sync_to_start_word(&mut self, input: &mut BytesMut) -> bool {
        let word = self.codec.config.start_word.to_be_bytes();

        if let Some(pos) = input.windows(word.len()).position(|w| w == word) {
            if pos > 0 {
                debug!(skipped = pos, "discarding bytes before start word");
                input.advance(pos);
                self.stats.discarded_bytes += pos as u64;
            }
            return true;
        }

        let keep = (1..word.len().min(input.len() + 1))
            .rev()
            .find(|&k| input[input.len() - k..] == word[..k])
            .unwrap_or(0);
        let stale = input.len() - keep;
        if stale > 0 {
            input.advance(stale);
            self.stats.discarded_bytes += stale as u64;
        }
        false
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{ChecksumKind, CodecConfig};
    use proptest::prelude::*;

    fn drain(deframer: &mut Deframer, input: &mut BytesMut) -> Vec<Result<Bytes, FramingError>> {
        let mut out = Vec::new();
        loop {
            match deframer.deframe(input) {
                Ok(Some(p)) => out.push(Ok(p)),
                Ok(None) => return out,
                Err(e) => out.push(Err(e)),
            }
        }
    }

    #[test]
    fn deframes_single_frame() {
        let codec = FrameCodec::default();
        let mut input = BytesMut::from(&codec.frame(b"PING").unwrap()[..]);
        let mut deframer = codec.deframer();
        assert_eq!(deframer.deframe(&mut input).unwrap().unwrap(), &b"PING"[..]);
        assert!(input.is_empty());
        assert_eq!(deframer.deframe(&mut input).unwrap(), None);
    }

    #[test]
    fn byte_at_a_time_yields_payload_only_on_last_byte() {
        let codec = FrameCodec::default();
        let wire = codec.frame(b"PING").unwrap();
        let mut deframer = codec.deframer();
        let mut input = BytesMut::new();

        for (i, byte) in wire.iter().enumerate() {
            input.extend_from_slice(&[*byte]);
            let result = deframer.deframe(&mut input).unwrap();
            if i + 1 < wire.len() {
                assert_eq!(result, None, "payload produced early at byte {i}");
            } else {
                assert_eq!(result.unwrap(), &b"PING"[..]);
            }
        }
    }

    #[test]
    fn state_checkpoints_follow_byte_availability() {
        let codec = FrameCodec::default();
        let wire = codec.frame(b"abcd").unwrap();
        let mut deframer = codec.deframer();
        let mut input = BytesMut::new();

        input.extend_from_slice(&wire[..8]);
        assert_eq!(deframer.deframe(&mut input).unwrap(), None);
        assert_eq!(deframer.state(), DeframeState::AwaitingPayload { len: 4 });

        input.extend_from_slice(&wire[8..12]);
        assert_eq!(deframer.deframe(&mut input).unwrap(), None);
        assert_eq!(deframer.state(), DeframeState::AwaitingTrailer { len: 4 });

        input.extend_from_slice(&wire[12..]);
        assert!(deframer.deframe(&mut input).unwrap().is_some());
        assert_eq!(deframer.state(), DeframeState::AwaitingHeader);
    }

    #[test]
    fn leading_garbage_is_skipped() {
        let codec = FrameCodec::default();
        let mut input = BytesMut::from(&b"\x01\x02\xDE\x03"[..]);
        input.extend_from_slice(&codec.frame(b"ok").unwrap());
        let mut deframer = codec.deframer();
        assert_eq!(deframer.deframe(&mut input).unwrap().unwrap(), &b"ok"[..]);
        assert_eq!(deframer.stats().discarded_bytes, 4);
    }

    #[test]
    fn partial_start_word_is_retained_across_calls() {
        let codec = FrameCodec::default();
        let wire = codec.frame(b"split").unwrap();
        let mut deframer = codec.deframer();

        let mut input = BytesMut::from(&b"noise"[..]);
        input.extend_from_slice(&wire[..3]);
        assert_eq!(deframer.deframe(&mut input).unwrap(), None);
        assert_eq!(&input[..], &wire[..3]);

        input.extend_from_slice(&wire[3..]);
        assert_eq!(deframer.deframe(&mut input).unwrap().unwrap(), &b"split"[..]);
    }

    #[test]
    fn corrupt_frame_is_dropped_and_next_frame_recovers() {
        let codec = FrameCodec::default();
        let mut bad = codec.frame(b"first").unwrap().to_vec();
        bad[9] ^= 0x40;
        let mut input = BytesMut::from(&bad[..]);
        input.extend_from_slice(&codec.frame(b"second").unwrap());

        let mut deframer = codec.deframer();
        assert!(matches!(
            deframer.deframe(&mut input),
            Err(FramingError::CorruptFrame { .. })
        ));
        assert_eq!(deframer.deframe(&mut input).unwrap().unwrap(), &b"second"[..]);
        let stats = deframer.stats();
        assert_eq!(stats.corrupt_frames, 1);
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.discarded_bytes, bad.len() as u64);
    }

    #[test]
    fn corrupted_length_field_does_not_swallow_the_next_frame() {
        let codec = FrameCodec::default();
        let mut bad = codec.frame(b"PING").unwrap().to_vec();
        bad[7] ^= 0x10; // length 4 -> 20
        let mut input = BytesMut::from(&bad[..]);

        let mut deframer = codec.deframer();
        assert_eq!(deframer.deframe(&mut input).unwrap(), None);

        input.extend_from_slice(&codec.frame(b"PONG").unwrap());
        let results = drain(&mut deframer, &mut input);
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(FramingError::CorruptFrame { .. })));
        assert_eq!(results[1].as_ref().unwrap(), &b"PONG"[..]);
        assert!(input.is_empty());
    }

    #[test]
    fn implausible_length_is_treated_as_false_start() {
        let codec = FrameCodec::new(CodecConfig {
            max_payload: 16,
            ..Default::default()
        })
        .unwrap();
        // Start word followed by a length of 0xFFFF_FFFF.
        let mut input = BytesMut::from(&[0xDE, 0xAD, 0xBE, 0xEF, 0xFF, 0xFF, 0xFF, 0xFF][..]);
        input.extend_from_slice(&codec.frame(b"real").unwrap());

        let mut deframer = codec.deframer();
        assert_eq!(deframer.deframe(&mut input).unwrap().unwrap(), &b"real"[..]);
        assert_eq!(deframer.stats().discarded_bytes, 8);
    }

    #[test]
    fn back_to_back_frames_in_one_read() {
        let codec = FrameCodec::default();
        let mut input = BytesMut::new();
        for p in [&b"a"[..], &b"bb"[..], &b""[..], &b"dddd"[..]] {
            input.extend_from_slice(&codec.frame(p).unwrap());
        }
        let mut deframer = codec.deframer();
        let payloads: Vec<Bytes> = drain(&mut deframer, &mut input)
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(payloads, vec![&b"a"[..], &b"bb"[..], &b""[..], &b"dddd"[..]]);
    }

    #[test]
    fn fletcher_trailer_round_trips() {
        let codec = FrameCodec::new(CodecConfig {
            checksum: ChecksumKind::Fletcher16,
            ..Default::default()
        })
        .unwrap();
        let mut input = BytesMut::from(&codec.frame(b"cmd").unwrap()[..]);
        assert_eq!(
            codec.deframer().deframe(&mut input).unwrap().unwrap(),
            &b"cmd"[..]
        );
    }

    proptest! {
        #[test]
        fn split_stream_yields_same_payloads(
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..6),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
        ) {
            let codec = FrameCodec::default();
            let mut wire = Vec::new();
            for p in &payloads {
                wire.extend_from_slice(&codec.frame(p).unwrap());
            }

            let mut points: Vec<usize> = cuts.iter().map(|i| i.index(wire.len() + 1)).collect();
            points.push(0);
            points.push(wire.len());
            points.sort_unstable();
            points.dedup();

            let mut deframer = codec.deframer();
            let mut input = BytesMut::new();
            let mut got = Vec::new();
            for w in points.windows(2) {
                input.extend_from_slice(&wire[w[0]..w[1]]);
                for r in drain(&mut deframer, &mut input) {
                    got.push(r.unwrap().to_vec());
                }
            }
            prop_assert_eq!(got, payloads);
        }

        #[test]
        fn any_single_byte_flip_is_detected(
            payload in prop::collection::vec(any::<u8>(), 1..64),
            at in any::<prop::sample::Index>(),
            flip in 1u8..=255,
            fletcher in any::<bool>(),
        ) {
            let checksum = if fletcher { ChecksumKind::Fletcher16 } else { ChecksumKind::Crc32 };
            let codec = FrameCodec::new(CodecConfig {
                max_payload: 64,
                checksum,
                ..Default::default()
            })
            .unwrap();
            let mut wire = codec.frame(&payload).unwrap().to_vec();
            // Everything after the start word; a damaged start word is a
            // resync case rather than an integrity one.
            let idx = 4 + at.index(wire.len() - 4);
            // Fletcher-16 works modulo 255 and cannot tell 0x00 from 0xFF.
            prop_assume!(!(fletcher && flip == 0xFF && matches!(wire[idx], 0x00 | 0xFF)));
            wire[idx] ^= flip;

            // A valid frame follows, then enough filler that an inflated
            // length field can be checked and rejected.
            let mut input = BytesMut::from(&wire[..]);
            input.extend_from_slice(&codec.frame(b"tail").unwrap());
            input.extend_from_slice(&[0u8; 64 + HEADER_LEN + 4]);

            let mut deframer = codec.deframer();
            let results = drain(&mut deframer, &mut input);
            let payloads: Vec<&[u8]> = results
                .iter()
                .filter_map(|r| r.as_ref().ok().map(|p| &p[..]))
                .collect();
            prop_assert_eq!(payloads, vec![&b"tail"[..]]);
            if idx >= HEADER_LEN {
                let saw_corrupt = results
                    .iter()
                    .any(|r| matches!(r, Err(FramingError::CorruptFrame { .. })));
                prop_assert!(saw_corrupt);
            }
        }
    }
}
