/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Lifecycle controller.
//!
//! [`Topology`] owns the buffer pool, the framing codec, the rate group
//! scheduler, the link and the clock driver, and moves them through a strict
//! sequence of phases:
//!
//! | Operation | From | To | Effect |
//! |---|---|---|---|
//! | `configure` | Unconfigured | Configured | pool region allocated, codec and scheduler built |
//! | `register` | Configured, Connected | (same) | consumer attached to a rate group |
//! | `connect` | Configured | Connected | link opened, uplink/downlink wired |
//! | `start` | Connected | Running | collaborators, scheduler workers, clock driver started |
//! | `deliver_tick` / `receive` / `send` | Running | Running | steady state |
//! | `stop` | Running | Stopped | clock halted, in-flight dispatches joined |
//! | `teardown` | Stopped | TornDown | link closed, pool region returned |
//!
//! Every operation checks the current phase first.  An operation called out
//! of order fails with [`LifecycleError::InvalidLifecycleTransition`] and
//! changes nothing; a step that fails part way undoes what it already did.

pub mod collaborator;
pub mod error;
pub mod setup;

pub use collaborator::{Collaborator, TopologyState};
pub use error::{LifecycleError, Operation};
pub use setup::{setup_topology, teardown_topology, Wiring};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferPool, MemAllocator, PoolStats};
use crate::clock::{ClockDriver, ClockHandle, ClockTick};
use crate::comm::{
    CommError, Downlink, DownlinkStats, LinkDriver, LinkError, PacketHandler, SendOutcome, Uplink,
    UplinkStats,
};
use crate::framing::FrameCodec;
use crate::scheduler::{
    Consumer, FiredGroups, RateGroupScheduler, RateGroupStats, SchedulerFault,
};

/// Identifier the pool region is requested under.
pub const BUFFER_POOL_ID: u32 = 0;

// ── LifecycleState ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Unconfigured,
    Configured,
    Connected,
    Running,
    Stopped,
    TornDown,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── DownlinkHandle ────────────────────────────────────────────────────────────

/// Shared send side of a topology's downlink.
///
/// Handed out before configuration so consumers can capture it in their
/// context token.  Sends are admitted only while the topology is running;
/// otherwise they fail with [`LinkError::Closed`].
#[derive(Debug, Clone, Default)]
pub struct DownlinkHandle {
    inner: Arc<Mutex<Option<Downlink>>>,
    admitting: Arc<AtomicBool>,
}

impl DownlinkHandle {
    pub fn send(&self, payload: &[u8]) -> Result<SendOutcome, CommError> {
        if !self.admitting.load(Ordering::Acquire) {
            return Err(LinkError::Closed.into());
        }
        match self.inner.lock().as_mut() {
            Some(downlink) => downlink.send(payload),
            None => Err(LinkError::Closed.into()),
        }
    }

    fn flush(&self) -> Result<usize, CommError> {
        match self.inner.lock().as_mut() {
            Some(downlink) => downlink.flush(),
            None => Ok(0),
        }
    }

    fn stats(&self) -> DownlinkStats {
        self.inner
            .lock()
            .as_ref()
            .map(Downlink::stats)
            .unwrap_or_default()
    }

    fn set_admitting(&self, admitting: bool) {
        self.admitting.store(admitting, Ordering::Release);
    }
}

// ── TopologyStats ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyStats {
    pub state: LifecycleState,
    pub pool: Option<PoolStats>,
    pub rate_groups: Vec<RateGroupStats>,
    pub uplink: UplinkStats,
    pub downlink: DownlinkStats,
}

// ── Topology ──────────────────────────────────────────────────────────────────

/// One independent control core instance.  `C` is the consumer context
/// token type.
pub struct Topology<C> {
    state: LifecycleState,
    topology_state: Option<Arc<TopologyState>>,
    allocator: Option<Arc<dyn MemAllocator>>,
    pool: Option<Arc<BufferPool>>,
    codec: Option<FrameCodec>,
    scheduler: Option<Arc<Mutex<RateGroupScheduler<C>>>>,
    faults: Option<Receiver<SchedulerFault>>,
    uplink: Option<Uplink>,
    downlink: DownlinkHandle,
    clock: Option<ClockHandle>,
    collaborators: Vec<Box<dyn Collaborator>>,
}

impl<C> fmt::Debug for Topology<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topology")
            .field("state", &self.state)
            .field(
                "name",
                &self.topology_state.as_ref().map(|s| s.name.as_str()),
            )
            .field("pool", &self.pool)
            .field("uplink", &self.uplink)
            .field("clock", &self.clock.is_some())
            .field("collaborators", &self.collaborators.len())
            .finish()
    }
}

impl<C: Send + 'static> Default for Topology<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + 'static> Topology<C> {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Unconfigured,
            topology_state: None,
            allocator: None,
            pool: None,
            codec: None,
            scheduler: None,
            faults: None,
            uplink: None,
            downlink: DownlinkHandle::default(),
            clock: None,
            collaborators: Vec::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Configuration snapshot, present from `configure` until `teardown`.
    pub fn topology_state(&self) -> Option<&TopologyState> {
        self.topology_state.as_deref()
    }

    /// Send side of the downlink.  Valid for the topology's whole life;
    /// sends succeed only while running.
    pub fn downlink(&self) -> DownlinkHandle {
        self.downlink.clone()
    }

    /// Scheduler fault stream.  Present from `configure` on.
    pub fn faults(&self) -> Option<Receiver<SchedulerFault>> {
        self.faults.clone()
    }

    pub fn pool(&self) -> Option<&Arc<BufferPool>> {
        self.pool.as_ref()
    }

    fn require(&self, operation: Operation, allowed: &[LifecycleState]) -> Result<(), LifecycleError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        error!(state = %self.state, %operation, "invalid lifecycle transition");
        Err(LifecycleError::InvalidLifecycleTransition {
            from: self.state,
            operation,
        })
    }

    fn transition(&mut self, to: LifecycleState) {
        info!(from = %self.state, to = %to, "Lifecycle transition");
        self.state = to;
    }

    fn collaborator_failed(name: &str, source: anyhow::Error) -> LifecycleError {
        error!(collaborator = name, error = %source, "collaborator hook failed");
        LifecycleError::Collaborator {
            name: name.to_string(),
            source,
        }
    }

    // ── Unconfigured ──────────────────────────────────────────────────────────

    /// Attach an optional collaborator.  Only before `configure`.
    pub fn add_collaborator(&mut self, collaborator: Box<dyn Collaborator>) -> Result<(), LifecycleError> {
        self.require(Operation::AddCollaborator, &[LifecycleState::Unconfigured])?;
        debug!(collaborator = collaborator.name(), "collaborator added");
        self.collaborators.push(collaborator);
        Ok(())
    }

    /// Validate `state.config`, allocate the pool region from `allocator`,
    /// and build the codec and scheduler.  Then run every collaborator's
    /// `configure` hook.
    ///
    /// On failure the region is returned to the allocator and the topology
    /// stays unconfigured.
    pub fn configure(
        &mut self,
        state: TopologyState,
        allocator: Arc<dyn MemAllocator>,
    ) -> Result<(), LifecycleError> {
        self.require(Operation::Configure, &[LifecycleState::Unconfigured])?;

        let config = &state.config;
        config.validate()?;
        let codec = FrameCodec::new(config.framing).map_err(crate::config::ConfigError::from)?;
        let mut scheduler = RateGroupScheduler::configure(&config.rate_groups)?;
        scheduler.set_tick_budget(config.clock.period());
        let pool = BufferPool::configure(BUFFER_POOL_ID, &config.buffer_pool.bins, allocator.as_ref())?;

        for c in &mut self.collaborators {
            if let Err(e) = c.configure(&state) {
                allocator.deallocate(BUFFER_POOL_ID);
                return Err(Self::collaborator_failed(c.name(), e));
            }
        }

        info!(
            name = %state.name,
            pool_bytes = pool.total_bytes(),
            rate_groups = scheduler.group_count(),
            hyperperiod = scheduler.hyperperiod(),
            collaborators = self.collaborators.len(),
            "Topology configured"
        );

        self.faults = Some(scheduler.faults());
        self.scheduler = Some(Arc::new(Mutex::new(scheduler)));
        self.pool = Some(Arc::new(pool));
        self.codec = Some(codec);
        self.allocator = Some(allocator);
        self.topology_state = Some(Arc::new(state));
        self.transition(LifecycleState::Configured);
        Ok(())
    }

    // ── Configured ────────────────────────────────────────────────────────────

    /// Attach `consumer` to rate group `group` with its context token.
    ///
    /// Valid in `Configured` and `Connected`.  Once running the scheduler
    /// itself rejects the call with `SchedulerAlreadyStarted`.
    pub fn register<K>(&mut self, group: usize, consumer: K, context: C) -> Result<(), LifecycleError>
    where
        K: Consumer<C> + 'static,
    {
        self.register_boxed(group, Box::new(consumer), context)
    }

    pub fn register_boxed(
        &mut self,
        group: usize,
        consumer: Box<dyn Consumer<C>>,
        context: C,
    ) -> Result<(), LifecycleError> {
        if let Some(scheduler) = &self.scheduler {
            if matches!(self.state, LifecycleState::Running | LifecycleState::Stopped) {
                error!(state = %self.state, group, "consumer registered after start");
            }
            return Ok(scheduler.lock().register_boxed(group, consumer, context)?);
        }
        self.require(Operation::Register, &[])
    }

    /// Open `link` with the configured parameters and wire the uplink and
    /// downlink.  `handler` receives every verified uplink payload.
    pub fn connect(
        &mut self,
        mut link: Box<dyn LinkDriver>,
        handler: Box<dyn PacketHandler>,
    ) -> Result<(), LifecycleError> {
        self.require(Operation::Connect, &[LifecycleState::Configured])?;
        let (Some(state), Some(pool), Some(codec)) = (&self.topology_state, &self.pool, self.codec)
        else {
            return self.require(Operation::Connect, &[]);
        };

        link.open(&state.config.link)?;
        info!(
            uart = state.config.link.uart_number,
            baud = state.config.link.baud,
            "Link opened"
        );

        self.uplink = Some(Uplink::new(codec, Arc::clone(pool), handler));
        *self.downlink.inner.lock() = Some(Downlink::new(codec, Arc::clone(pool), link));
        self.transition(LifecycleState::Connected);
        Ok(())
    }

    // ── Connected ─────────────────────────────────────────────────────────────

    /// Start collaborators, the scheduler and (if a period is configured)
    /// the clock driver, in that order.  A failure rolls back the steps
    /// already taken.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        self.require(Operation::Start, &[LifecycleState::Connected])?;
        let (Some(state), Some(scheduler)) = (self.topology_state.clone(), self.scheduler.clone())
        else {
            return self.require(Operation::Start, &[]);
        };

        for i in 0..self.collaborators.len() {
            if let Err(e) = self.collaborators[i].start() {
                let err = Self::collaborator_failed(self.collaborators[i].name(), e);
                self.stop_collaborators(i);
                return Err(err);
            }
        }

        if let Err(e) = scheduler.lock().start() {
            self.stop_collaborators(self.collaborators.len());
            return Err(e.into());
        }

        self.downlink.set_admitting(true);

        if let Some(period) = state.config.clock.period() {
            let ticking = Arc::clone(&scheduler);
            let spawned = ClockDriver::new(period).spawn(move |tick| {
                if let Err(e) = ticking.lock().tick(tick) {
                    debug!(tick = tick.sequence(), error = %e, "clock tick not processed");
                }
            });
            match spawned {
                Ok(handle) => self.clock = Some(handle),
                Err(e) => {
                    self.downlink.set_admitting(false);
                    scheduler.lock().abort_start();
                    self.stop_collaborators(self.collaborators.len());
                    error!(error = %e, "clock driver spawn failed");
                    return Err(LifecycleError::ClockSpawn(e));
                }
            }
        }

        self.transition(LifecycleState::Running);
        Ok(())
    }

    /// Stop the first `count` collaborators, last first.
    fn stop_collaborators(&mut self, count: usize) {
        for c in self.collaborators[..count].iter_mut().rev() {
            c.stop();
        }
    }

    // ── Running ───────────────────────────────────────────────────────────────

    /// Deliver one base tick from an external clock source.
    pub fn deliver_tick(&mut self, tick: ClockTick) -> Result<FiredGroups, LifecycleError> {
        self.require(Operation::DeliverTick, &[LifecycleState::Running])?;
        match &self.scheduler {
            Some(scheduler) => Ok(scheduler.lock().tick(tick)?),
            None => self.require(Operation::DeliverTick, &[]).map(|_| FiredGroups::default()),
        }
    }

    /// Feed raw link bytes into the uplink.  Returns the number of payloads
    /// delivered to the packet handler.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<usize, LifecycleError> {
        self.require(Operation::Receive, &[LifecycleState::Running])?;
        match self.uplink.as_mut() {
            Some(uplink) => Ok(uplink.receive(bytes)?),
            None => self.require(Operation::Receive, &[]).map(|_| 0),
        }
    }

    /// Frame `payload` and write it to the link.
    pub fn send(&self, payload: &[u8]) -> Result<SendOutcome, LifecycleError> {
        self.require(Operation::Send, &[LifecycleState::Running])?;
        Ok(self.downlink.send(payload)?)
    }

    /// Continue partial downlink writes.  Returns frames still pending.
    pub fn flush(&self) -> Result<usize, LifecycleError> {
        self.require(
            Operation::Flush,
            &[LifecycleState::Running, LifecycleState::Stopped],
        )?;
        Ok(self.downlink.flush()?)
    }

    /// Stop admitting ticks and downlink sends, then wait for in-flight
    /// dispatches.  The clock driver is interrupted immediately; a dispatch
    /// already running completes.
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        self.require(Operation::Stop, &[LifecycleState::Running])?;

        self.downlink.set_admitting(false);
        if let Some(clock) = self.clock.take() {
            clock.stop();
        }
        if let Some(scheduler) = &self.scheduler {
            scheduler.lock().stop();
        }
        if let Err(e) = self.downlink.flush() {
            warn!(error = %e, "final downlink flush failed");
        }
        self.stop_collaborators(self.collaborators.len());

        self.transition(LifecycleState::Stopped);
        Ok(())
    }

    // ── Stopped ───────────────────────────────────────────────────────────────

    /// Close the link, drop the scheduler and its consumers, and return the
    /// pool region to the allocator.
    pub fn teardown(&mut self) -> Result<(), LifecycleError> {
        self.require(Operation::Teardown, &[LifecycleState::Stopped])?;

        if let Some(mut downlink) = self.downlink.inner.lock().take() {
            if let Err(e) = downlink.discard_pending() {
                error!(error = %e, "releasing unsent downlink frames failed");
            }
            downlink.close();
        }
        self.uplink = None;
        self.scheduler = None;
        self.faults = None;
        self.codec = None;
        self.collaborators.clear();
        self.release_pool();
        self.topology_state = None;

        self.transition(LifecycleState::TornDown);
        Ok(())
    }

    fn release_pool(&mut self) {
        if let Some(pool) = self.pool.take() {
            let in_use = pool.stats().in_use();
            if in_use > 0 {
                warn!(in_use, "buffers still checked out at teardown");
            }
            if Arc::strong_count(&pool) > 1 {
                warn!("buffer pool still referenced at teardown");
            }
        }
        if let Some(allocator) = self.allocator.take() {
            allocator.deallocate(BUFFER_POOL_ID);
        }
    }

    pub fn stats(&self) -> TopologyStats {
        TopologyStats {
            state: self.state,
            pool: self.pool.as_ref().map(|p| p.stats()),
            rate_groups: self
                .scheduler
                .as_ref()
                .map(|s| s.lock().stats())
                .unwrap_or_default(),
            uplink: self.uplink.as_ref().map(Uplink::stats).unwrap_or_default(),
            downlink: self.downlink.stats(),
        }
    }
}

impl<C> Drop for Topology<C> {
    fn drop(&mut self) {
        self.downlink.admitting.store(false, Ordering::Release);
        if let Some(clock) = self.clock.take() {
            clock.stop();
        }
        if let Some(allocator) = self.allocator.take() {
            allocator.deallocate(BUFFER_POOL_ID);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BoundedAllocator, HeapAllocator};
    use crate::comm::{LinkParams, LoopbackLink, LoopbackPeer};
    use crate::config::TopologyConfig;
    use crate::scheduler::{DispatchMode, OverrunPolicy, SchedulerError};
    use std::time::Duration;

    fn state(divisors: &[u32]) -> TopologyState {
        let mut config = TopologyConfig::default();
        config.rate_groups.divisors = divisors.to_vec();
        TopologyState::new("test", config)
    }

    fn heap() -> Arc<dyn MemAllocator> {
        Arc::new(HeapAllocator)
    }

    fn loopback() -> (Box<dyn LinkDriver>, LoopbackPeer) {
        let (link, peer) = LoopbackLink::new(4096);
        (Box::new(link), peer)
    }

    fn ignore() -> Box<dyn PacketHandler> {
        Box::new(|_: &[u8]| {})
    }

    fn running(divisors: &[u32]) -> (Topology<u32>, LoopbackPeer) {
        let mut topo = Topology::new();
        topo.configure(state(divisors), heap()).unwrap();
        let (link, peer) = loopback();
        topo.connect(link, ignore()).unwrap();
        topo.start().unwrap();
        (topo, peer)
    }

    fn assert_invalid<T: fmt::Debug>(r: Result<T, LifecycleError>, op: Operation) {
        match r {
            Err(LifecycleError::InvalidLifecycleTransition { operation, .. }) => {
                assert_eq!(operation, op)
            }
            other => panic!("expected InvalidLifecycleTransition for {op}, got {other:?}"),
        }
    }

    // ── ordering ──────────────────────────────────────────────────────────────

    #[test]
    fn full_lifecycle_in_order() {
        let (mut topo, _peer) = running(&[1]);
        assert_eq!(topo.state(), LifecycleState::Running);
        topo.stop().unwrap();
        assert_eq!(topo.state(), LifecycleState::Stopped);
        topo.teardown().unwrap();
        assert_eq!(topo.state(), LifecycleState::TornDown);
        assert!(topo.topology_state().is_none());
    }

    #[test]
    fn out_of_order_calls_fail_and_change_nothing() {
        let mut topo: Topology<u32> = Topology::new();
        assert_invalid(topo.start(), Operation::Start);
        assert_invalid(topo.stop(), Operation::Stop);
        assert_invalid(topo.teardown(), Operation::Teardown);
        assert_invalid(topo.deliver_tick(ClockTick::new(0)), Operation::DeliverTick);
        assert_invalid(topo.register(0, |_: ClockTick, _: &u32| {}, 0), Operation::Register);
        let (link, _peer) = loopback();
        assert_invalid(topo.connect(link, ignore()), Operation::Connect);
        assert_eq!(topo.state(), LifecycleState::Unconfigured);

        topo.configure(state(&[1]), heap()).unwrap();
        assert_invalid(topo.start(), Operation::Start);
        assert_invalid(topo.configure(state(&[1]), heap()), Operation::Configure);
        assert_invalid(topo.send(b"x"), Operation::Send);
        assert_eq!(topo.state(), LifecycleState::Configured);
    }

    #[test]
    fn invalid_transition_is_misuse() {
        let mut topo: Topology<u32> = Topology::new();
        let err = topo.start().unwrap_err();
        assert!(err.is_misuse());
        assert!(err.to_string().contains("start"));
    }

    #[test]
    fn nothing_works_after_teardown() {
        let (mut topo, _peer) = running(&[1]);
        topo.stop().unwrap();
        topo.teardown().unwrap();
        assert_invalid(topo.teardown(), Operation::Teardown);
        assert_invalid(topo.configure(state(&[1]), heap()), Operation::Configure);
        assert_invalid(topo.receive(b"x"), Operation::Receive);
    }

    #[test]
    fn register_after_start_is_rejected_by_the_scheduler() {
        let (mut topo, _peer) = running(&[1]);
        let err = topo.register(0, |_: ClockTick, _: &u32| {}, 0).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Scheduler(SchedulerError::SchedulerAlreadyStarted)
        ));
        assert!(err.is_misuse());
    }

    // ── all-or-nothing ────────────────────────────────────────────────────────

    #[test]
    fn failed_configure_leaves_topology_unconfigured() {
        let mut topo: Topology<u32> = Topology::new();
        assert!(matches!(
            topo.configure(state(&[]), heap()),
            Err(LifecycleError::Config(_))
        ));
        assert_eq!(topo.state(), LifecycleState::Unconfigured);
        assert!(topo.pool().is_none());
        topo.configure(state(&[1]), heap()).unwrap();
    }

    #[test]
    fn allocator_refusal_fails_configure() {
        let allocator = Arc::new(BoundedAllocator::new(64));
        let mut topo: Topology<u32> = Topology::new();
        assert!(matches!(
            topo.configure(state(&[1]), allocator.clone()),
            Err(LifecycleError::Pool(_))
        ));
        assert_eq!(topo.state(), LifecycleState::Unconfigured);
        assert_eq!(allocator.in_use(), 0);
    }

    #[test]
    fn teardown_returns_the_pool_region() {
        let allocator = Arc::new(BoundedAllocator::new(1 << 20));
        let mut topo: Topology<u32> = Topology::new();
        topo.configure(state(&[1]), allocator.clone()).unwrap();
        assert!(allocator.in_use() > 0);

        let (link, _peer) = loopback();
        topo.connect(link, ignore()).unwrap();
        topo.start().unwrap();
        topo.stop().unwrap();
        topo.teardown().unwrap();
        assert_eq!(allocator.in_use(), 0);
    }

    #[test]
    fn failed_link_open_leaves_topology_configured() {
        let mut topo: Topology<u32> = Topology::new();
        topo.configure(state(&[1]), heap()).unwrap();

        let (mut link, _peer) = LoopbackLink::new(64);
        link.open(&LinkParams::default()).unwrap();
        assert!(matches!(
            topo.connect(Box::new(link), ignore()),
            Err(LifecycleError::Comm(CommError::Link(LinkError::AlreadyOpen)))
        ));
        assert_eq!(topo.state(), LifecycleState::Configured);

        let (link, _peer) = loopback();
        topo.connect(link, ignore()).unwrap();
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_start: bool,
    }

    impl Collaborator for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn configure(&mut self, state: &TopologyState) -> anyhow::Result<()> {
            self.log.lock().push(format!("{}:configure:{}", self.name, state.name));
            Ok(())
        }

        fn start(&mut self) -> anyhow::Result<()> {
            if self.fail_start {
                anyhow::bail!("refusing to start");
            }
            self.log.lock().push(format!("{}:start", self.name));
            Ok(())
        }

        fn stop(&mut self) {
            self.log.lock().push(format!("{}:stop", self.name));
        }
    }

    #[test]
    fn collaborators_follow_the_lifecycle() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut topo: Topology<u32> = Topology::new();
        for name in ["prm", "health"] {
            topo.add_collaborator(Box::new(Recorder {
                name,
                log: Arc::clone(&log),
                fail_start: false,
            }))
            .unwrap();
        }
        topo.configure(state(&[1]), heap()).unwrap();
        let (link, _peer) = loopback();
        topo.connect(link, ignore()).unwrap();
        topo.start().unwrap();
        topo.stop().unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "prm:configure:test",
                "health:configure:test",
                "prm:start",
                "health:start",
                "health:stop",
                "prm:stop",
            ]
        );
    }

    #[test]
    fn failed_collaborator_start_rolls_back() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut topo: Topology<u32> = Topology::new();
        topo.add_collaborator(Box::new(Recorder {
            name: "prm",
            log: Arc::clone(&log),
            fail_start: false,
        }))
        .unwrap();
        topo.add_collaborator(Box::new(Recorder {
            name: "health",
            log: Arc::clone(&log),
            fail_start: true,
        }))
        .unwrap();
        topo.configure(state(&[1]), heap()).unwrap();
        let (link, _peer) = loopback();
        topo.connect(link, ignore()).unwrap();

        let err = topo.start().unwrap_err();
        assert!(matches!(err, LifecycleError::Collaborator { ref name, .. } if name == "health"));
        assert_eq!(topo.state(), LifecycleState::Connected);
        assert_eq!(log.lock().last().map(String::as_str), Some("prm:stop"));
    }

    // ── steady state ──────────────────────────────────────────────────────────

    #[test]
    fn external_ticks_drive_the_rate_groups() {
        let mut topo: Topology<u32> = Topology::new();
        topo.configure(state(&[1, 2, 4]), heap()).unwrap();
        let counts = Arc::new(Mutex::new([0u32; 3]));
        for g in 0..3 {
            let counts = Arc::clone(&counts);
            topo.register(g, move |_: ClockTick, ctx: &u32| counts.lock()[*ctx as usize] += 1, g as u32)
                .unwrap();
        }
        let (link, _peer) = loopback();
        topo.connect(link, ignore()).unwrap();
        topo.start().unwrap();

        for t in 0..8 {
            topo.deliver_tick(ClockTick::new(t)).unwrap();
        }
        assert_eq!(*counts.lock(), [8, 4, 2]);
        topo.stop().unwrap();
    }

    #[test]
    fn consumers_send_telemetry_through_the_downlink_handle() {
        let mut topo: Topology<DownlinkHandle> = Topology::new();
        topo.configure(state(&[1]), heap()).unwrap();
        let handle = topo.downlink();
        topo.register(
            0,
            |t: ClockTick, down: &DownlinkHandle| {
                let _ = down.send(&t.sequence().to_be_bytes());
            },
            handle,
        )
        .unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let (link, peer) = loopback();
        topo.connect(link, Box::new(move |p: &[u8]| sink.lock().push(p.to_vec())))
            .unwrap();
        topo.start().unwrap();

        topo.deliver_tick(ClockTick::new(0)).unwrap();
        topo.deliver_tick(ClockTick::new(1)).unwrap();
        assert_eq!(topo.receive(&peer.take()).unwrap(), 2);
        assert_eq!(
            *received.lock(),
            vec![0u64.to_be_bytes().to_vec(), 1u64.to_be_bytes().to_vec()]
        );

        let stats = topo.stats();
        assert_eq!(stats.downlink.sent, 2);
        assert_eq!(stats.uplink.delivered, 2);
        assert_eq!(stats.pool.map(|p| p.in_use()), Some(0));

        topo.stop().unwrap();
        assert!(matches!(
            topo.downlink().send(b"late"),
            Err(CommError::Link(LinkError::Closed))
        ));
    }

    #[test]
    fn internal_clock_ticks_until_stop() {
        let mut config = TopologyConfig::default();
        config.clock.period_ms = 2;
        config.rate_groups.dispatch = DispatchMode::Active;
        config.rate_groups.overrun_policy = OverrunPolicy::Drop;

        let mut topo: Topology<()> = Topology::new();
        topo.configure(TopologyState::new("clocked", config), heap()).unwrap();
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ticks);
        topo.register(0, move |t: ClockTick, _: &()| sink.lock().push(t.sequence()), ())
            .unwrap();
        let (link, _peer) = loopback();
        topo.connect(link, ignore()).unwrap();
        topo.start().unwrap();

        std::thread::sleep(Duration::from_millis(40));
        topo.stop().unwrap();
        let seen = ticks.lock().clone();
        assert!(!seen.is_empty());
        assert_eq!(seen[0], 0);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(ticks.lock().len(), seen.len(), "no dispatch after stop");
    }
}
