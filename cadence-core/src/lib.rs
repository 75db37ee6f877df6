/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Cadence core – rate-group scheduling, framed serial link and buffer pool
//! for a small real-time control node.
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── buffer/      – size-classed buffer pool over one upstream allocation
//! ├── framing/     – frame / resumable deframe with CRC-32 or Fletcher-16
//! ├── scheduler/   – rate groups derived from one base tick, overrun policy
//! ├── clock.rs     – base tick type and periodic clock driver thread
//! ├── comm/        – uplink / downlink wiring over a LinkDriver
//! ├── config/      – YAML topology configuration
//! └── lifecycle/   – Topology state machine, setup / teardown entry points
//! ```

pub mod buffer;
pub mod clock;
pub mod comm;
pub mod config;
pub mod framing;
pub mod lifecycle;
pub mod scheduler;
