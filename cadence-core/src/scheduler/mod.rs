//! Rate group scheduler.
//!
//! [`RateGroupScheduler`] fans one base [`ClockTick`] out into up to
//! [`MAX_RATE_GROUPS`] derived rates.  Group `i` with divisor `dᵢ` fires on
//! every tick `t` with `t mod dᵢ == 0`; when it fires, its consumers run in
//! registration order, each receiving the context token it was registered
//! with.
//!
//! # Dispatch modes
//!
//! | Mode | Where consumers run | Overrun detected when |
//! |---|---|---|
//! | `Inline` | on the ticking thread, inside `tick()` | the tick's dispatch, across all due groups, outlasts one base period (needs a tick budget) |
//! | `Active` | one worker thread per group; `tick()` only hands off | the group's previous tick is still in flight |
//!
//! In both modes groups are visited in index order on every tick, so the
//! execution order is identical across runs with identical configuration.
//! In `Inline` mode a later group never starts before an earlier one has
//! finished its dispatch for the same tick.
//!
//! # Overrun policy
//!
//! Every overrun is published as [`SchedulerFault::Overrun`] on the fault
//! channel.  The configured [`OverrunPolicy`] then decides:
//!
//! * `Drop`: the overdue tick is not handed to the group (active mode).
//! * `Queue`: the tick is queued behind the running cycle, up to
//!   `queue_depth`; a full queue drops it with [`SchedulerFault::QueueFull`].
//! * `Halt`: the group stops dispatching until `stop()`.
//!
//! Inline dispatch has already run the consumers by the time an overrun is
//! known, so `Drop` and `Queue` only report there.  The overrun is charged
//! to the group whose dispatch crossed the budget.  Base ticks missed while
//! dispatching never reach `tick()`; the gap in sequence numbers is
//! published as [`SchedulerFault::TicksSkipped`].

pub mod error;
pub mod math;

pub use error::{SchedulerError, SchedulerFault};

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::clock::ClockTick;
use math::{fires, hyperperiod};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Rate-group slots available to one scheduler.
pub const MAX_RATE_GROUPS: usize = 3;

/// Consumer slots per rate group.
pub const MAX_CONSUMERS_PER_GROUP: usize = 10;

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrunPolicy {
    #[default]
    Drop,
    Queue,
    Halt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    #[default]
    Inline,
    Active,
}

/// Scheduler parameters, fixed at configuration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// One entry per rate group; group `i` fires every `divisors[i]` ticks.
    pub divisors: Vec<u32>,
    pub dispatch: DispatchMode,
    pub overrun_policy: OverrunPolicy,
    /// Pending-tick capacity per group in `Active` mode.
    pub queue_depth: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            divisors: vec![1],
            dispatch: DispatchMode::Inline,
            overrun_policy: OverrunPolicy::Drop,
            queue_depth: 2,
        }
    }
}

impl SchedulerConfig {
    /// Check the divisor list against scheduler capacity and return its
    /// hyperperiod.
    pub fn validate(&self) -> Result<u64, SchedulerError> {
        if self.divisors.is_empty() {
            return Err(SchedulerError::NoRateGroups);
        }
        if self.divisors.len() > MAX_RATE_GROUPS {
            return Err(SchedulerError::TooManyRateGroups {
                count: self.divisors.len(),
                max: MAX_RATE_GROUPS,
            });
        }
        if let Some(group) = self.divisors.iter().position(|&d| d == 0) {
            return Err(SchedulerError::InvalidDivisor { group });
        }
        if self.queue_depth == 0 {
            return Err(SchedulerError::InvalidQueueDepth);
        }
        hyperperiod(&self.divisors)
    }
}

// ── Consumers ─────────────────────────────────────────────────────────────────

/// Work attached to a rate group.
///
/// `C` is the context token type; the scheduler never inspects it, only
/// forwards the token given at registration.
pub trait Consumer<C>: Send {
    fn run(&mut self, tick: ClockTick, context: &C);
}

impl<C, F> Consumer<C> for F
where
    F: FnMut(ClockTick, &C) + Send,
{
    fn run(&mut self, tick: ClockTick, context: &C) {
        self(tick, context)
    }
}

struct Registration<C> {
    consumer: Box<dyn Consumer<C>>,
    context: C,
}

fn dispatch<C>(registrations: &mut [Registration<C>], tick: ClockTick) {
    for r in registrations.iter_mut() {
        r.consumer.run(tick, &r.context);
    }
}

// ── Per-group state ───────────────────────────────────────────────────────────

/// Counters shared between the scheduler and a group's worker.
#[derive(Debug, Default)]
struct GroupShared {
    /// Ticks handed to the worker and not yet finished.
    in_flight: AtomicUsize,
    cycles: AtomicU64,
    overruns: AtomicU64,
    dropped: AtomicU64,
    halted: AtomicBool,
}

struct Worker<C> {
    tx: Sender<ClockTick>,
    thread: JoinHandle<Vec<Registration<C>>>,
}

struct RateGroup<C> {
    divisor: u32,
    /// Consumers owned by the group while not handed to a worker.
    registrations: Vec<Registration<C>>,
    consumer_count: usize,
    worker: Option<Worker<C>>,
    shared: Arc<GroupShared>,
}

/// Snapshot of one rate group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateGroupStats {
    pub group: usize,
    pub divisor: u32,
    pub consumers: usize,
    /// Completed dispatch cycles.
    pub cycles: u64,
    pub overruns: u64,
    /// Firings that did not dispatch (dropped, queue full, halted).
    pub dropped: u64,
    pub halted: bool,
}

/// Groups that fired on one tick.  A halted group is due but does not fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FiredGroups(u32);

impl FiredGroups {
    fn insert(&mut self, group: usize) {
        self.0 |= 1 << group;
    }

    pub fn contains(&self, group: usize) -> bool {
        group < 32 && self.0 & (1 << group) != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..32).filter(move |&g| self.contains(g))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Configured,
    Running,
    Stopped,
}

// ── RateGroupScheduler ────────────────────────────────────────────────────────

/// Divides a base clock into fixed-rate groups and dispatches their
/// consumers.
///
/// Lifecycle: `configure` → `register`* → `start` → `tick`* → `stop`.
pub struct RateGroupScheduler<C> {
    groups: Vec<RateGroup<C>>,
    dispatch_mode: DispatchMode,
    policy: OverrunPolicy,
    queue_depth: usize,
    hyperperiod: u64,
    /// Inline overrun threshold (one base period).
    tick_budget: Option<Duration>,
    phase: Phase,
    last_tick: Option<u64>,
    fault_tx: Sender<SchedulerFault>,
    fault_rx: Receiver<SchedulerFault>,
}

impl<C> std::fmt::Debug for RateGroupScheduler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateGroupScheduler")
            .field(
                "divisors",
                &self.groups.iter().map(|g| g.divisor).collect::<Vec<_>>(),
            )
            .field("dispatch_mode", &self.dispatch_mode)
            .field("policy", &self.policy)
            .field("phase", &self.phase)
            .field("last_tick", &self.last_tick)
            .finish()
    }
}

impl<C: Send + 'static> RateGroupScheduler<C> {
    /// Build a scheduler with one rate group per divisor.
    ///
    /// # Errors
    /// Any validation failure from [`SchedulerConfig::validate`].
    pub fn configure(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let hyperperiod = config.validate()?;
        let (fault_tx, fault_rx) = channel::unbounded();

        let groups = config
            .divisors
            .iter()
            .map(|&divisor| RateGroup {
                divisor,
                registrations: Vec::new(),
                consumer_count: 0,
                worker: None,
                shared: Arc::new(GroupShared::default()),
            })
            .collect();

        info!(
            divisors = ?config.divisors,
            dispatch = ?config.dispatch,
            overrun_policy = ?config.overrun_policy,
            hyperperiod,
            "Rate group scheduler configured"
        );

        Ok(Self {
            groups,
            dispatch_mode: config.dispatch,
            policy: config.overrun_policy,
            queue_depth: config.queue_depth,
            hyperperiod,
            tick_budget: None,
            phase: Phase::Configured,
            last_tick: None,
            fault_tx,
            fault_rx,
        })
    }

    pub fn divisors(&self) -> Vec<u32> {
        self.groups.iter().map(|g| g.divisor).collect()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Base ticks after which the firing pattern repeats.
    pub fn hyperperiod(&self) -> u64 {
        self.hyperperiod
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    /// Receiving end of the fault channel.  Every clone sees each fault
    /// once, shared among clones.
    pub fn faults(&self) -> Receiver<SchedulerFault> {
        self.fault_rx.clone()
    }

    /// Inline dispatch reports an overrun when one group's dispatch takes
    /// longer than `budget`.  Usually the base clock period.
    pub fn set_tick_budget(&mut self, budget: Option<Duration>) {
        self.tick_budget = budget;
    }

    /// Attach `consumer` to `group`; it will receive `context` on every
    /// firing.  Consumers run in registration order.
    ///
    /// # Errors
    /// * [`SchedulerError::SchedulerAlreadyStarted`] after `start()`.
    /// * [`SchedulerError::UnknownRateGroup`] / [`SchedulerError::TooManyConsumers`].
    pub fn register<K>(&mut self, group: usize, consumer: K, context: C) -> Result<(), SchedulerError>
    where
        K: Consumer<C> + 'static,
    {
        self.register_boxed(group, Box::new(consumer), context)
    }

    /// [`register`](Self::register) for an already boxed consumer.
    pub fn register_boxed(
        &mut self,
        group: usize,
        consumer: Box<dyn Consumer<C>>,
        context: C,
    ) -> Result<(), SchedulerError> {
        if self.phase != Phase::Configured {
            return Err(SchedulerError::SchedulerAlreadyStarted);
        }
        let count = self.groups.len();
        let rg = self
            .groups
            .get_mut(group)
            .ok_or(SchedulerError::UnknownRateGroup { group, count })?;
        if rg.registrations.len() >= MAX_CONSUMERS_PER_GROUP {
            return Err(SchedulerError::TooManyConsumers {
                group,
                max: MAX_CONSUMERS_PER_GROUP,
            });
        }

        rg.registrations.push(Registration { consumer, context });
        rg.consumer_count += 1;
        debug!(group, position = rg.consumer_count - 1, "consumer registered");
        Ok(())
    }

    /// Freeze registrations and, in `Active` mode, spawn one worker per
    /// group.
    ///
    /// All-or-nothing: if any worker fails to spawn, the workers already
    /// spawned are joined, their consumers are restored and the scheduler
    /// stays configured.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.phase != Phase::Configured {
            return Err(SchedulerError::SchedulerAlreadyStarted);
        }

        if self.dispatch_mode == DispatchMode::Active {
            for index in 0..self.groups.len() {
                if let Err(source) = self.spawn_worker(index) {
                    for rg in self.groups.iter_mut().take(index) {
                        Self::join_worker(rg);
                    }
                    error!(group = index, %source, "rate group worker spawn failed");
                    return Err(SchedulerError::WorkerSpawn {
                        group: index,
                        source,
                    });
                }
            }
        }

        self.phase = Phase::Running;
        info!(
            groups = self.groups.len(),
            consumers = self.groups.iter().map(|g| g.consumer_count).sum::<usize>(),
            dispatch = ?self.dispatch_mode,
            "Rate group scheduler started"
        );
        Ok(())
    }

    /// Undo a successful `start()`: join the workers, restore their
    /// consumers and return to the configured phase.  Used when a later
    /// startup step fails.
    pub fn abort_start(&mut self) {
        if self.phase != Phase::Running {
            return;
        }
        for rg in &mut self.groups {
            Self::join_worker(rg);
        }
        self.phase = Phase::Configured;
        self.last_tick = None;
        warn!("Rate group scheduler start rolled back");
    }

    fn spawn_worker(&mut self, index: usize) -> std::io::Result<()> {
        let rg = &mut self.groups[index];
        let (tx, rx) = channel::bounded::<ClockTick>(self.queue_depth);
        let shared = Arc::clone(&rg.shared);
        let registrations = std::mem::take(&mut rg.registrations);

        // Registrations come back through the join handle.  A failed spawn
        // drops the closure, so they travel through a holder instead.
        let holder = Arc::new(parking_lot::Mutex::new(Some(registrations)));
        let inner = Arc::clone(&holder);
        let spawned = thread::Builder::new()
            .name(format!("rate-group-{index}"))
            .spawn(move || {
                let registrations = inner.lock().take().unwrap_or_default();
                run_worker(index, rx, registrations, shared)
            });

        match spawned {
            Ok(thread) => {
                rg.worker = Some(Worker { tx, thread });
                Ok(())
            }
            Err(e) => {
                rg.registrations = holder.lock().take().unwrap_or_default();
                Err(e)
            }
        }
    }

    /// Process one base tick.
    ///
    /// Returns the groups that fired.  Faults raised on the way are published
    /// on the fault channel; they do not make this call fail.
    ///
    /// # Errors
    /// [`SchedulerError::NotRunning`] before `start()` or after `stop()`.
    pub fn tick(&mut self, tick: ClockTick) -> Result<FiredGroups, SchedulerError> {
        if self.phase != Phase::Running {
            return Err(SchedulerError::NotRunning);
        }

        let seq = tick.sequence();
        if let Some(previous) = self.last_tick {
            if seq <= previous {
                self.report(SchedulerFault::NonMonotonicTick {
                    previous,
                    received: seq,
                });
                return Ok(FiredGroups::default());
            }
            if seq > previous + 1 {
                self.report(SchedulerFault::TicksSkipped {
                    previous,
                    received: seq,
                });
            }
        }
        self.last_tick = Some(seq);

        let started = Instant::now();
        let mut overrun_charged = false;
        let mut fired = FiredGroups::default();
        for index in 0..self.groups.len() {
            if !fires(self.groups[index].divisor, seq) {
                continue;
            }

            if self.groups[index].shared.halted.load(Ordering::Acquire) {
                self.groups[index].shared.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            fired.insert(index);

            match self.dispatch_mode {
                DispatchMode::Inline => {
                    self.dispatch_inline(index, tick);
                    if !overrun_charged {
                        overrun_charged = self.check_tick_budget(index, tick, started);
                    }
                }
                DispatchMode::Active => self.hand_off(index, tick),
            }
        }

        debug!(tick = seq, fired = fired.len(), "tick processed");
        Ok(fired)
    }

    fn dispatch_inline(&mut self, index: usize, tick: ClockTick) {
        let rg = &mut self.groups[index];
        dispatch(&mut rg.registrations, tick);
        rg.shared.cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Charge an overrun to `index` if the tick's dispatch so far has
    /// outlasted the budget.  Returns whether it did.
    fn check_tick_budget(&mut self, index: usize, tick: ClockTick, started: Instant) -> bool {
        let Some(budget) = self.tick_budget else {
            return false;
        };
        let elapsed = started.elapsed();
        if elapsed <= budget {
            return false;
        }
        warn!(
            group = index,
            tick = tick.sequence(),
            elapsed_us = elapsed.as_micros() as u64,
            budget_us = budget.as_micros() as u64,
            "inline dispatch exceeded base period"
        );
        self.overrun(index, tick);
        true
    }

    fn hand_off(&mut self, index: usize, tick: ClockTick) {
        let seq = tick.sequence();
        let exited = self.groups[index]
            .worker
            .as_ref()
            .is_some_and(|w| w.thread.is_finished());
        if exited {
            let shared = &self.groups[index].shared;
            shared.halted.store(true, Ordering::Release);
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            self.report(SchedulerFault::WorkerExited { group: index });
            return;
        }

        let busy = self.groups[index].shared.in_flight.load(Ordering::Acquire) > 0;

        if busy {
            self.overrun(index, tick);
            if self.policy != OverrunPolicy::Queue {
                return;
            }
        }

        let Some(worker) = self.groups[index].worker.as_ref() else {
            return;
        };
        let shared = &self.groups[index].shared;
        shared.in_flight.fetch_add(1, Ordering::AcqRel);
        match worker.tx.try_send(tick) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                shared.in_flight.fetch_sub(1, Ordering::AcqRel);
                shared.dropped.fetch_add(1, Ordering::Relaxed);
                self.report(SchedulerFault::QueueFull {
                    group: index,
                    tick: seq,
                });
            }
            Err(TrySendError::Disconnected(_)) => {
                shared.in_flight.fetch_sub(1, Ordering::AcqRel);
                shared.dropped.fetch_add(1, Ordering::Relaxed);
                shared.halted.store(true, Ordering::Release);
                self.report(SchedulerFault::WorkerExited { group: index });
            }
        }
    }

    /// Record an overrun and apply the policy's bookkeeping.
    fn overrun(&mut self, index: usize, tick: ClockTick) {
        let seq = tick.sequence();
        let shared = Arc::clone(&self.groups[index].shared);
        shared.overruns.fetch_add(1, Ordering::Relaxed);
        self.report(SchedulerFault::Overrun {
            group: index,
            tick: seq,
            policy: self.policy,
        });

        match (self.policy, self.dispatch_mode) {
            (OverrunPolicy::Halt, _) => {
                shared.halted.store(true, Ordering::Release);
                if self.dispatch_mode == DispatchMode::Active {
                    shared.dropped.fetch_add(1, Ordering::Relaxed);
                }
                self.report(SchedulerFault::Halted {
                    group: index,
                    tick: seq,
                });
            }
            (OverrunPolicy::Drop, DispatchMode::Active) => {
                shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn report(&self, fault: SchedulerFault) {
        warn!(%fault, "scheduler fault");
        // The scheduler holds a receiver itself, so the channel never closes.
        let _ = self.fault_tx.send(fault);
    }

    /// Stop admitting ticks and wait for in-flight dispatches.
    ///
    /// Every tick already handed to a worker, running or queued, is
    /// dispatched before this returns.  Calling `stop` again is a no-op.
    pub fn stop(&mut self) {
        if self.phase == Phase::Stopped {
            return;
        }
        for rg in &mut self.groups {
            Self::join_worker(rg);
        }
        self.phase = Phase::Stopped;
        info!(last_tick = ?self.last_tick, "Rate group scheduler stopped");
    }

    /// Close the worker's queue and join it.  The worker drains the queue
    /// before its receive loop ends.
    fn join_worker(rg: &mut RateGroup<C>) {
        let Some(Worker { tx, thread }) = rg.worker.take() else {
            return;
        };
        drop(tx);
        match thread.join() {
            Ok(registrations) => rg.registrations = registrations,
            Err(_) => error!(divisor = rg.divisor, "rate group worker panicked"),
        }
    }

    pub fn stats(&self) -> Vec<RateGroupStats> {
        self.groups
            .iter()
            .enumerate()
            .map(|(group, rg)| RateGroupStats {
                group,
                divisor: rg.divisor,
                consumers: rg.consumer_count,
                cycles: rg.shared.cycles.load(Ordering::Relaxed),
                overruns: rg.shared.overruns.load(Ordering::Relaxed),
                dropped: rg.shared.dropped.load(Ordering::Relaxed),
                halted: rg.shared.halted.load(Ordering::Acquire),
            })
            .collect()
    }
}

impl<C> Drop for RateGroupScheduler<C> {
    fn drop(&mut self) {
        for rg in &mut self.groups {
            if let Some(Worker { tx, thread }) = rg.worker.take() {
                drop(tx);
                let _ = thread.join();
            }
        }
    }
}

fn run_worker<C>(
    index: usize,
    rx: Receiver<ClockTick>,
    mut registrations: Vec<Registration<C>>,
    shared: Arc<GroupShared>,
) -> Vec<Registration<C>> {
    debug!(group = index, consumers = registrations.len(), "rate group worker running");
    for tick in rx.iter() {
        dispatch(&mut registrations, tick);
        shared.cycles.fetch_add(1, Ordering::Relaxed);
        shared.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
    debug!(group = index, "rate group worker exiting");
    registrations
}

// ── Tests ─────────────────────────────────────────────────────────────────────
