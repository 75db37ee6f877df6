/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use cadence_core::clock::ClockTick;
use cadence_core::comm::LoopbackLink;
use cadence_core::config::TopologyConfig;
use cadence_core::lifecycle::{
    setup_topology, teardown_topology, DownlinkHandle, Topology, TopologyState, Wiring,
};

// ── CLI argument definition ───────────────────────────────────────────────────

/// Cadence control core running over a loopback link.
///
/// Example:
///   cadence --config cadence.yaml --duration-secs 10
#[derive(Debug, Parser)]
#[command(
    name = "cadence",
    about = "Cadence rate-group control core – loopback demo topology",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML topology configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(short = 't', long = "duration-secs")]
    duration_secs: Option<u64>,

    /// Log level used when RUST_LOG is not set.
    #[arg(short = 'l', long = "log-level", default_value = "info")]
    log_level: String,
}

/// Base period used when no configuration file is given.
const DEFAULT_PERIOD_MS: u64 = 1000;

/// Interval at which the loopback wire is pumped back into the uplink.
const PUMP_INTERVAL: Duration = Duration::from_millis(50);

// ── Telemetry ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Event {
    Telemetry { group: usize, tick: u64 },
    Uplink { group: u8, tick: u64 },
}

/// Context token handed to each rate-group consumer.
struct Telemetry {
    group: usize,
    downlink: DownlinkHandle,
    events: mpsc::Sender<Event>,
}

fn telemetry_consumer(tick: ClockTick, ctx: &Telemetry) {
    let mut payload = [0u8; 9];
    payload[0] = ctx.group as u8;
    payload[1..].copy_from_slice(&tick.sequence().to_be_bytes());

    if let Err(e) = ctx.downlink.send(&payload) {
        warn!(group = ctx.group, error = %e, "telemetry send failed");
    }
    let _ = ctx.events.try_send(Event::Telemetry {
        group: ctx.group,
        tick: tick.sequence(),
    });
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Level is controlled by RUST_LOG, falling back to --log-level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    info!(
        config = ?cli.config,
        duration_secs = ?cli.duration_secs,
        "Cadence starting up..."
    );

    // ── Load configuration ────────────────────────────────────────────────────
    let config = match &cli.config {
        Some(path) => match TopologyConfig::load_from_file(path) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to load topology configuration: {:#}", e);
                process::exit(1);
            }
        },
        None => {
            warn!("No configuration file provided, using default topology settings");
            let mut c = TopologyConfig::default();
            c.clock.period_ms = DEFAULT_PERIOD_MS;
            c
        }
    };

    if config.clock.period().is_none() {
        warn!("clock.period_ms is 0 and this binary has no external tick source; nothing will be dispatched");
    }

    if let Err(e) = run(config, cli.duration_secs.map(Duration::from_secs)).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(config: TopologyConfig, duration: Option<Duration>) -> anyhow::Result<()> {
    let (events_tx, mut events_rx) = mpsc::channel::<Event>(256);

    // ── Wiring ────────────────────────────────────────────────────────────────
    let mut topology: Topology<Telemetry> = Topology::new();
    let wire_capacity = 4 * config.framing.max_payload;
    let (link, peer) = LoopbackLink::new(wire_capacity);

    let uplink_events = events_tx.clone();
    let handler = move |payload: &[u8]| {
        if let [group, rest @ ..] = payload {
            if let Ok(tick) = <[u8; 8]>::try_from(rest) {
                let _ = uplink_events.try_send(Event::Uplink {
                    group: *group,
                    tick: u64::from_be_bytes(tick),
                });
            }
        }
    };

    let mut wiring = Wiring::new(Box::new(link), Box::new(handler));
    for group in 0..config.rate_groups.divisors.len() {
        let ctx = Telemetry {
            group,
            downlink: topology.downlink(),
            events: events_tx.clone(),
        };
        wiring = wiring.consumer(group, telemetry_consumer, ctx);
    }
    drop(events_tx);

    let state = TopologyState::new("cadence", config);
    setup_topology(&mut topology, state, wiring)?;
    let faults = topology.faults();

    // ── Steady state ──────────────────────────────────────────────────────────
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let mut pump = tokio::time::interval(PUMP_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            _ = &mut deadline => {
                info!("Run duration elapsed, shutting down");
                break;
            }
            _ = pump.tick() => {
                topology.flush()?;
                let bytes = peer.take();
                if !bytes.is_empty() {
                    topology.receive(&bytes)?;
                }
                if let Some(faults) = &faults {
                    for fault in faults.try_iter() {
                        warn!(%fault, "scheduler fault");
                    }
                }
            }
            Some(event) = events_rx.recv() => match event {
                Event::Telemetry { group, tick } => debug!(group, tick, "telemetry sent"),
                Event::Uplink { group, tick } => info!(group, tick, "telemetry echoed over loopback"),
            },
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    let stats = topology.stats();
    teardown_topology(&mut topology)?;

    for g in &stats.rate_groups {
        info!(
            group = g.group,
            divisor = g.divisor,
            cycles = g.cycles,
            overruns = g.overruns,
            dropped = g.dropped,
            "Rate group summary"
        );
    }
    info!(
        sent = stats.downlink.sent,
        received = stats.uplink.delivered,
        corrupt = stats.uplink.corrupt,
        dropped_tx = stats.downlink.dropped,
        dropped_rx = stats.uplink.dropped,
        "Link summary"
    );
    if let Some(pool) = &stats.pool {
        for (bin, b) in pool.bins.iter().enumerate() {
            info!(
                bin,
                size = b.size,
                high_water = b.high_water,
                allocations = b.allocations,
                "Pool bin summary"
            );
        }
    }
    info!("Cadence stopped");
    Ok(())
}
