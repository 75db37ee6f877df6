/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Divisor arithmetic: firing rule, GCD and checked LCM.
//!
//! The hyperperiod of a divisor list is the number of base ticks after which
//! the firing pattern of every rate group repeats.

use super::SchedulerError;

/// `true` if a group with `divisor` fires on base tick `sequence`.
///
/// Groups fire on ticks `0, d, 2d, …`.
#[inline]
pub fn fires(divisor: u32, sequence: u64) -> bool {
    sequence % u64::from(divisor) == 0
}

/// Iterative Euclidean GCD.
pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Checked LCM of two non-zero values.
pub fn lcm(a: u64, b: u64) -> Result<u64, SchedulerError> {
    (a / gcd(a, b))
        .checked_mul(b)
        .ok_or(SchedulerError::HyperperiodOverflow { a, b })
}

/// Number of base ticks after which the pattern of `divisors` repeats.
///
/// Callers validate that every divisor is non-zero first.  An empty list
/// has a hyperperiod of 1.
pub fn hyperperiod(divisors: &[u32]) -> Result<u64, SchedulerError> {
    divisors
        .iter()
        .try_fold(1u64, |acc, &d| lcm(acc, u64::from(d)))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
