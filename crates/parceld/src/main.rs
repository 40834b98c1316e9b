//! parceld — loopback simulator for the Parcel transfer engine.
//!
//! Runs a sending and a receiving engine back to back at the configured tick
//! rate and verifies every blob that arrives.
//!
//! Usage: parceld [ROUNDS]   (0 or absent = run until interrupted)

use std::time::Instant;

use anyhow::{Context, Result};

use parcel_core::ParcelConfig;

mod loopback;
mod simulation;

use simulation::Simulation;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = ParcelConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = ParcelConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ParcelConfig::default()
    });

    let rounds: u64 = match std::env::args().nth(1) {
        Some(arg) => arg.parse().context("ROUNDS must be a number")?,
        None => 0,
    };

    tracing::info!(
        max_bytes_per_second = config.transfer.max_bytes_per_second,
        tick_hz = config.simulation.tick_hz,
        blob_bytes = config.simulation.blob_bytes,
        concurrent = config.simulation.concurrent_transfers,
        cancel_after_ticks = config.simulation.cancel_after_ticks,
        "parceld starting"
    );

    let mut sim = Simulation::new(config.transfer.clone(), config.simulation.clone());
    let mut interval = tokio::time::interval(sim.tick_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let started = Instant::now();
    let mut finished = 0u64;
    let mut corrupt = 0u64;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
            _ = interval.tick() => {
                let Some(report) = sim.step() else { continue };
                finished += 1;
                corrupt += u64::from(report.corrupt);
                tracing::info!(
                    round = report.round,
                    verified = report.verified,
                    canceled = report.canceled,
                    corrupt = report.corrupt,
                    bytes = report.bytes,
                    ticks = report.ticks,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    bytes_per_second = report.bytes_per_second() as u64,
                    "round finished"
                );
                if rounds != 0 && finished >= rounds {
                    break;
                }
            }
        }
    }

    sim.shutdown();
    tracing::info!(
        rounds = finished,
        wall_ms = started.elapsed().as_millis() as u64,
        "parceld stopped"
    );

    if corrupt > 0 {
        anyhow::bail!("{corrupt} blob(s) failed verification");
    }
    Ok(())
}
