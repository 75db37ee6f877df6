/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Base clock ticks and the periodic clock driver.
//!
//! [`ClockDriver::spawn`] runs a dedicated thread that emits one tick per
//! period.  Ticks are numbered by the periods elapsed since the driver
//! started, so a period that passed while the callback was still busy shows
//! up as a gap in the sequence rather than vanishing.  [`ClockHandle::stop`]
//! wakes the thread out of its wait immediately and joins it; a tick callback
//! that is already running is allowed to finish.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Sender};
use crossbeam::select;
use tracing::{debug, info, warn};

/// One base clock event.  Carries only its sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTick {
    sequence: u64,
}

impl ClockTick {
    pub const fn new(sequence: u64) -> Self {
        Self { sequence }
    }

    pub const fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Periodic tick source.
#[derive(Debug, Clone, Copy)]
pub struct ClockDriver {
    period: Duration,
}

impl ClockDriver {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start emitting ticks to `on_tick` from a new thread.
    pub fn spawn<F>(self, mut on_tick: F) -> std::io::Result<ClockHandle>
    where
        F: FnMut(ClockTick) + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let period = self.period;

        let thread = thread::Builder::new()
            .name("clock-driver".into())
            .spawn(move || {
                let origin = Instant::now();
                let ticker = channel::tick(period);
                let mut sequence = 0u64;
                let mut emitted = 1u64;
                on_tick(ClockTick::new(sequence));

                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let due = elapsed_periods(origin.elapsed(), period);
                            if due > sequence + 1 {
                                warn!(last = sequence, due, "clock driver fell behind");
                            }
                            sequence = due.max(sequence + 1);
                            emitted += 1;
                            on_tick(ClockTick::new(sequence));
                        }
                    }
                }
                debug!(last = sequence, emitted, "clock driver exiting");
                emitted
            })?;

        info!(period_ms = period.as_millis() as u64, "Clock driver started");
        Ok(ClockHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

fn elapsed_periods(elapsed: Duration, period: Duration) -> u64 {
    let periods = elapsed.as_nanos() / period.as_nanos().max(1);
    u64::try_from(periods).unwrap_or(u64::MAX)
}

/// Running clock driver.  Dropping the handle stops the driver.
#[derive(Debug)]
pub struct ClockHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<u64>>,
}

impl ClockHandle {
    /// Stop the driver and wait for its thread.  Returns the number of ticks
    /// emitted.
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        // Disconnecting the stop channel wakes the select.
        self.stop.take();
        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(emitted)) => {
                info!(emitted, "Clock driver stopped");
                emitted
            }
            Some(Err(_)) => {
                warn!("clock driver thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for ClockHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
