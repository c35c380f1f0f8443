use anyhow::{Context, anyhow};
use clap::Parser;
use env_logger::Builder;
use log::{LevelFilter, info};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use crate::simulation::{RunReport, Scenario, Simulation};

mod simulation;

#[derive(Parser)]
#[command(author, version, about = "Slotted random-access MAC simulator", long_about = None)]
struct Cli {
    /// Scenario file (.toml or .json)
    scenario: PathBuf,

    /// Override the scenario seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the simulated time limit (s)
    #[arg(long)]
    sim_time_limit: Option<f64>,

    /// Number of runs, seeded seed, seed+1, ...
    #[arg(short, long, default_value_t = 1)]
    repetitions: u32,

    /// Write all reports as JSON to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn log_summary(report: &RunReport) {
    if report.degenerate {
        info!("Run seed={}: terminated at start-up, no sub-channels configured", report.seed);
        return;
    }
    let stats = &report.statistics;
    info!(
        "Run seed={}: {} events, {} slots, {} packets created, {} received, {} collisions",
        report.seed, report.events_processed, report.slots, stats.packets_created, stats.packets_received, stats.collisions
    );
    info!(
        "Run seed={}: throughput {:.4} pkt/slot, latency mean {:.4}s, buffer occupancy mean {:.4}",
        report.seed,
        stats.throughput.mean(),
        stats.sink_latency.mean(),
        stats.buffer_occupancy.mean()
    );
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut scenario = Scenario::load(&cli.scenario)?;
    if let Some(seed) = cli.seed {
        scenario.seed = seed;
    }
    if let Some(limit) = cli.sim_time_limit {
        scenario.sim_time_limit = limit;
    }
    scenario.validate().map_err(|e| anyhow!("Invalid scenario configuration: {e}"))?;

    let mut reports = Vec::with_capacity(cli.repetitions as usize);
    for repetition in 0..cli.repetitions {
        let mut run_scenario = scenario.clone();
        run_scenario.seed = scenario.seed.wrapping_add(repetition as u64);
        info!(
            "Starting run {}/{} (seed {}, {} stations, {} sub-channels)",
            repetition + 1,
            cli.repetitions,
            run_scenario.seed,
            run_scenario.num_stations,
            run_scenario.num_channels
        );
        let report = Simulation::new(&run_scenario)
            .run()
            .with_context(|| format!("Run with seed {} failed", run_scenario.seed))?;
        log_summary(&report);
        reports.push(report);
    }

    if let Some(path) = cli.output {
        let file = File::create(&path).with_context(|| format!("Failed to create file: {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &reports).context("Failed to write reports")?;
        info!("Reports written to {}", path.display());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let crate_level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("slotted_aloha_simulator"), crate_level)
        .init();

    info!("Starting up");
    run(cli)
}
