/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Topology-wide state and optional collaborators.

use crate::config::TopologyConfig;

/// Configuration snapshot shared by everything in one topology.
///
/// Created before setup, read-only while running, dropped at teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyState {
    pub name: String,
    pub config: TopologyConfig,
}

impl TopologyState {
    pub fn new(name: impl Into<String>, config: TopologyConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

/// Optional subsystem riding on the topology lifecycle (parameter store,
/// health monitor, command sequencer, ...).
///
/// Hooks default to no-ops.  A topology with no collaborators is complete.
/// `configure` and `start` run in registration order; `stop` runs in
/// reverse.
pub trait Collaborator: Send {
    fn name(&self) -> &str;

    fn configure(&mut self, _state: &TopologyState) -> anyhow::Result<()> {
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}
}
