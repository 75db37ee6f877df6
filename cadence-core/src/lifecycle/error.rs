/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::fmt;

use thiserror::Error;

use super::LifecycleState;
use crate::buffer::PoolError;
use crate::comm::{CommError, LinkError};
use crate::config::ConfigError;
use crate::scheduler::SchedulerError;

/// Topology operation named in a rejected transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    AddCollaborator,
    Configure,
    Register,
    Connect,
    Start,
    DeliverTick,
    Receive,
    Send,
    Flush,
    Stop,
    Teardown,
    SetupTopology,
    TeardownTopology,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::AddCollaborator => "add_collaborator",
            Operation::Configure => "configure",
            Operation::Register => "register",
            Operation::Connect => "connect",
            Operation::Start => "start",
            Operation::DeliverTick => "deliver_tick",
            Operation::Receive => "receive",
            Operation::Send => "send",
            Operation::Flush => "flush",
            Operation::Stop => "stop",
            Operation::Teardown => "teardown",
            Operation::SetupTopology => "setup_topology",
            Operation::TeardownTopology => "teardown_topology",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// `operation` is not valid in state `from`.  Nothing was changed.
    #[error("invalid lifecycle transition: {operation} is not allowed in state {from}")]
    InvalidLifecycleTransition {
        from: LifecycleState,
        operation: Operation,
    },

    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),

    #[error("buffer pool: {0}")]
    Pool(#[from] PoolError),

    #[error("scheduler: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("link: {0}")]
    Comm(#[from] CommError),

    #[error("collaborator '{name}' failed: {source}")]
    Collaborator {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to start clock driver: {0}")]
    ClockSpawn(#[source] std::io::Error),
}

impl From<LinkError> for LifecycleError {
    fn from(e: LinkError) -> Self {
        LifecycleError::Comm(CommError::Link(e))
    }
}

impl LifecycleError {
    /// Wiring defect rather than a runtime condition.
    pub fn is_misuse(&self) -> bool {
        match self {
            LifecycleError::InvalidLifecycleTransition { .. } => true,
            LifecycleError::Scheduler(SchedulerError::SchedulerAlreadyStarted) => true,
            LifecycleError::Pool(e) | LifecycleError::Comm(CommError::Pool(e)) => e.is_misuse(),
            _ => false,
        }
    }
}
