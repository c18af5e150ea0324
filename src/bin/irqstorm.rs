// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! irqstorm entry point
//!
//! Attaches one storm device, provisions a consumer for it, and runs both for
//! a fixed duration while printing telemetry reports.

use clap::Parser;
use irqstorm::core::config::StormConfig;
use irqstorm::core::system::System;
use irqstorm::core::timing::NS_PER_US;
use irqstorm::StormError;
use std::path::PathBuf;
use std::process::ExitCode;

/// Interrupt storm generator and service loop.
///
/// Flags override values from the configuration file.
#[derive(Parser, Debug)]
#[command(name = "irqstorm", version)]
struct Args {
    /// TOML configuration file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Run duration in milliseconds.
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Step a virtual clock instead of sleeping on wall time.
    #[arg(long)]
    virtual_time: bool,

    /// Force level-triggered (true) or edge (false) mode at bring-up.
    #[arg(long)]
    level: Option<bool>,

    /// Initial BURST.
    #[arg(long)]
    burst: Option<u32>,

    /// Initial PERIOD_US.
    #[arg(long)]
    period_us: Option<u32>,

    /// Interrupt line (0-15).
    #[arg(long)]
    irq: Option<u32>,

    /// Services between telemetry reports.
    #[arg(long)]
    report_interval: Option<u64>,

    /// Capability slots reserved for the consumer.
    #[arg(long)]
    slots: Option<u32>,

    /// Print reports as JSON lines on stdout.
    #[arg(long)]
    json: bool,

    /// Write the effective configuration to this file and exit.
    #[arg(long)]
    dump_config: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut StormConfig) {
        if let Some(v) = self.duration_ms {
            config.run.duration_ms = v;
        }
        if self.virtual_time {
            config.run.virtual_time = true;
        }
        if let Some(v) = self.slots {
            config.run.slots = v;
        }
        if let Some(v) = self.level {
            config.consumer.level = Some(v);
        }
        if let Some(v) = self.report_interval {
            config.consumer.report_interval = v;
        }
        if let Some(v) = self.burst {
            config.device.burst = v;
        }
        if let Some(v) = self.period_us {
            config.device.period_us = v;
        }
        if let Some(v) = self.irq {
            config.device.irq = v;
        }
    }
}

fn run(args: &Args) -> irqstorm::Result<()> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading config from {}", path.display());
            StormConfig::load(path)?
        }
        None => StormConfig::default(),
    };
    args.apply(&mut config);
    config.device.validate()?;

    if let Some(path) = &args.dump_config {
        config.save(path)?;
        log::info!("Config written to {}", path.display());
        return Ok(());
    }

    let system = System::new(&config)?;
    let mut provisioner = system.provisioner(config.run.slots)?;
    let consumer = system.consumer(&mut provisioner)?;

    let json = args.json;
    let summary = system.run(
        consumer,
        config.run.duration_ms.saturating_mul(1_000 * NS_PER_US),
        move |report| {
            if json {
                match serde_json::to_string(report) {
                    Ok(line) => println!("{}", line),
                    Err(e) => log::warn!("Failed to serialize report: {}", e),
                }
            }
        },
    )?;

    if json {
        let totals = serde_json::json!({
            "fires": summary.fires,
            "deliveries": summary.deliveries,
            "handled": summary.consumer.handled,
            "reports": summary.consumer.reports,
            "ack_failures": summary.consumer.ack_failures,
            "pulses_emitted": summary.counters.pulses_emitted,
            "timer_fires": summary.counters.timer_fires,
            "config_writes": summary.counters.config_writes,
            "enable_toggles": summary.counters.enable_toggles,
        });
        println!("{}", totals);
    } else {
        println!(
            "handled={} deliveries={} fires={} pulses={} reports={} ack-failures={}",
            summary.consumer.handled,
            summary.deliveries,
            summary.fires,
            summary.counters.pulses_emitted,
            summary.consumer.reports,
            summary.consumer.ack_failures
        );
    }

    Ok(())
}

fn main() -> ExitCode {
    // RUST_LOG may come from .env
    dotenvy::dotenv().ok();

    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    log::info!("Starting irqstorm...");

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ (StormError::ResourceExhausted(_) | StormError::IrqInUse { .. })) => {
            log::error!("Fatal: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::from(2)
        }
    }
}
