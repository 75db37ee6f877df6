/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error and fault types for the rate group scheduler.
//!
//! Two types model the two failure layers:
//!
//! * [`SchedulerError`]: a call was rejected (bad configuration, wrong
//!   phase).  Returned synchronously to the caller.
//! * [`SchedulerFault`]: something went wrong *while ticking* (a deadline
//!   miss, a non-monotonic tick).  Ticking continues; the fault is published
//!   on the scheduler's fault channel and logged.
//!
//! Every variant carries the group index and tick sequence where relevant so
//! it can be forwarded to a health or event log without further parsing.

use std::fmt;

use thiserror::Error;

use super::OverrunPolicy;

// ── Call-level errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `configure()` was given an empty divisor list.
    #[error("no rate groups configured, divisor list is empty")]
    NoRateGroups,

    /// More divisors than the scheduler has rate-group slots.
    #[error("{count} rate groups configured, at most {max} supported")]
    TooManyRateGroups { count: usize, max: usize },

    /// A divisor of zero can never fire.
    #[error("rate group {group} has divisor 0, divisors must be >= 1")]
    InvalidDivisor { group: usize },

    /// The LCM of the divisors does not fit in `u64`.
    #[error("hyperperiod overflow computing lcm({a}, {b})")]
    HyperperiodOverflow { a: u64, b: u64 },

    /// Active dispatch needs room for at least one pending tick.
    #[error("queue_depth must be >= 1")]
    InvalidQueueDepth,

    /// `register()` or `start()` after `start()`.
    #[error("scheduler already started, consumers can only be registered before start()")]
    SchedulerAlreadyStarted,

    /// `tick()` before `start()` or after `stop()`.
    #[error("scheduler is not running")]
    NotRunning,

    #[error("rate group {group} does not exist ({count} configured)")]
    UnknownRateGroup { group: usize, count: usize },

    #[error("rate group {group} already has the maximum of {max} consumers")]
    TooManyConsumers { group: usize, max: usize },

    /// The OS refused to create a rate group worker thread.
    #[error("failed to spawn worker for rate group {group}: {source}")]
    WorkerSpawn {
        group: usize,
        #[source]
        source: std::io::Error,
    },
}

// ── Runtime faults ────────────────────────────────────────────────────────────

/// Fault published while ticking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerFault {
    /// Group `group` had not finished its previous cycle when tick `tick`
    /// fired it again (active dispatch), or its dispatch outlasted one base
    /// period (inline dispatch).  `policy` is what the scheduler did about it.
    Overrun {
        group: usize,
        tick: u64,
        policy: OverrunPolicy,
    },

    /// `queue` policy: the group's pending-tick queue was full; tick dropped.
    QueueFull { group: usize, tick: u64 },

    /// `halt` policy: the group stops dispatching until `stop()`.
    Halted { group: usize, tick: u64 },

    /// A tick arrived with a sequence number not greater than the previous
    /// one; it was ignored.
    NonMonotonicTick { previous: u64, received: u64 },

    /// Base ticks between `previous` and `received` never arrived.
    TicksSkipped { previous: u64, received: u64 },

    /// The group's worker thread is gone (a consumer panicked); the group is
    /// halted.
    WorkerExited { group: usize },
}

impl fmt::Display for SchedulerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerFault::Overrun {
                group,
                tick,
                policy,
            } => write!(
                f,
                "rate group {group} overran at tick {tick} (policy: {policy:?})"
            ),
            SchedulerFault::QueueFull { group, tick } => {
                write!(f, "rate group {group} queue full, tick {tick} dropped")
            }
            SchedulerFault::Halted { group, tick } => {
                write!(f, "rate group {group} halted at tick {tick}")
            }
            SchedulerFault::NonMonotonicTick { previous, received } => write!(
                f,
                "tick {received} is not after previous tick {previous}, ignored"
            ),
            SchedulerFault::TicksSkipped { previous, received } => write!(
                f,
                "{} base ticks skipped between {previous} and {received}",
                received - previous - 1
            ),
            SchedulerFault::WorkerExited { group } => {
                write!(f, "rate group {group} worker exited unexpectedly")
            }
        }
    }
}
