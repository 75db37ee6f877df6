/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Coarse-grained entry points for deployment wiring.
//!
//! [`setup_topology`] runs configure → register → connect → start;
//! [`teardown_topology`] runs stop → teardown.  Each is meant to be called
//! exactly once per topology: a repeat call fails with
//! `InvalidLifecycleTransition` before touching anything.

use std::sync::Arc;

use tracing::info;

use super::{Collaborator, LifecycleError, LifecycleState, Operation, Topology, TopologyState};
use crate::buffer::{HeapAllocator, MemAllocator};
use crate::comm::{LinkDriver, PacketHandler};
use crate::scheduler::Consumer;

struct ConsumerSpec<C> {
    group: usize,
    consumer: Box<dyn Consumer<C>>,
    context: C,
}

/// Everything a topology is wired with besides its configuration.
pub struct Wiring<C> {
    allocator: Arc<dyn MemAllocator>,
    link: Box<dyn LinkDriver>,
    handler: Box<dyn PacketHandler>,
    consumers: Vec<ConsumerSpec<C>>,
    collaborators: Vec<Box<dyn Collaborator>>,
}

impl<C: Send + 'static> Wiring<C> {
    /// Wiring over `link` with uplink payloads going to `handler`.  The pool
    /// region comes from the heap unless [`allocator`](Self::allocator)
    /// says otherwise.
    pub fn new(link: Box<dyn LinkDriver>, handler: Box<dyn PacketHandler>) -> Self {
        Self {
            allocator: Arc::new(HeapAllocator),
            link,
            handler,
            consumers: Vec::new(),
            collaborators: Vec::new(),
        }
    }

    pub fn allocator(mut self, allocator: Arc<dyn MemAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Consumers are registered in the order they are added.
    pub fn consumer<K>(mut self, group: usize, consumer: K, context: C) -> Self
    where
        K: Consumer<C> + 'static,
    {
        self.consumers.push(ConsumerSpec {
            group,
            consumer: Box::new(consumer),
            context,
        });
        self
    }

    pub fn collaborator(mut self, collaborator: Box<dyn Collaborator>) -> Self {
        self.collaborators.push(collaborator);
        self
    }
}

/// Bring `topology` from `Unconfigured` to `Running`.
///
/// Stops at the first failing step and returns its error; the topology is
/// left in the last phase that completed.  Dropping it releases everything.
/// If configuration fails the collaborators are detached again, so the
/// topology is exactly as it was and setup may be retried.
pub fn setup_topology<C: Send + 'static>(
    topology: &mut Topology<C>,
    state: TopologyState,
    wiring: Wiring<C>,
) -> Result<(), LifecycleError> {
    topology.require(Operation::SetupTopology, &[LifecycleState::Unconfigured])?;
    let name = state.name.clone();
    let Wiring {
        allocator,
        link,
        handler,
        consumers,
        collaborators,
    } = wiring;

    let attached = topology.collaborators.len();
    for c in collaborators {
        topology.add_collaborator(c)?;
    }
    if let Err(e) = topology.configure(state, allocator) {
        topology.collaborators.truncate(attached);
        return Err(e);
    }
    let consumer_count = consumers.len();
    for spec in consumers {
        topology.register_boxed(spec.group, spec.consumer, spec.context)?;
    }
    topology.connect(link, handler)?;
    topology.start()?;

    info!(name = %name, consumers = consumer_count, "Topology set up");
    Ok(())
}

/// Bring a running `topology` down to `TornDown`.
pub fn teardown_topology<C: Send + 'static>(topology: &mut Topology<C>) -> Result<(), LifecycleError> {
    topology.require(Operation::TeardownTopology, &[LifecycleState::Running])?;
    topology.stop()?;
    topology.teardown()?;
    info!("Topology torn down");
    Ok(())
}
