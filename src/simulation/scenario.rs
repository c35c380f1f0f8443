//! Scenario loading and validation.
//!
//! A scenario describes one cell: how many stations and sub-channels it has,
//! the slot length, the traffic each station offers and the protocol knobs.
//! Files are TOML or JSON, chosen by extension, with kebab-case keys.

use anyhow::{Context, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use super::types::{ChannelAssignment, SimTime};

fn default_sim_time_limit() -> f64 {
    300.0
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Scenario {
    /// Independent contention domains. Zero is accepted and ends the run immediately.
    pub num_channels: usize,
    pub num_stations: usize,
    /// Slot duration (s).
    pub slot_size: f64,
    /// Mean time between packet arrivals at each station (s).
    pub mean_interarrival_time: f64,
    /// Use the mean as a constant inter-arrival time instead of sampling.
    #[serde(default)]
    pub deterministic_interarrival: bool,
    /// Probability of attempting when allowed to.
    pub send_probability: f64,
    #[serde(default = "default_true")]
    pub backoff_enabled: bool,
    pub channel_assignment: ChannelAssignment,
    /// Statistics emitted before this time are discarded (s).
    #[serde(default)]
    pub warmup_period: f64,
    #[serde(default = "default_sim_time_limit")]
    pub sim_time_limit: f64,
    #[serde(default)]
    pub seed: u64,
}

impl Scenario {
    /// Parse scenario text. `format` is a file extension: `toml` or `json`.
    pub fn parse(data: &str, format: &str) -> anyhow::Result<Self> {
        match format {
            "toml" => toml::from_str::<Self>(data).context("Invalid TOML format"),
            "json" => serde_json::from_str::<Self>(data).context("Invalid JSON format"),
            other => Err(anyhow!("Unsupported scenario format: {other:?} (expected toml or json)")),
        }
    }

    /// Read and parse a scenario file. Validation is left to the caller so
    /// command-line overrides can be applied first.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
        let format = path.extension().and_then(|e| e.to_str()).unwrap_or("toml").to_ascii_lowercase();
        Self::parse(&data, &format).with_context(|| format!("Failed to parse scenario: {}", path.display()))
    }

    /// Reject configurations the event loop cannot run.
    ///
    /// `num_channels == 0` passes: it is the degenerate configuration that
    /// ends a run at start-up.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_stations == 0 {
            return Err("Scenario must contain at least one station".to_string());
        }
        if !(self.slot_size.is_finite() && self.slot_size > 0.0) {
            return Err(format!("Invalid slot-size {}, must be positive", self.slot_size));
        }
        if !(self.mean_interarrival_time.is_finite() && self.mean_interarrival_time > 0.0) {
            return Err(format!(
                "Invalid mean-interarrival-time {}, must be positive",
                self.mean_interarrival_time
            ));
        }
        if !(0.0..=1.0).contains(&self.send_probability) {
            return Err(format!("Invalid send-probability {}, must be within 0-1", self.send_probability));
        }
        if !(self.sim_time_limit.is_finite() && self.sim_time_limit > 0.0) {
            return Err(format!("Invalid sim-time-limit {}, must be positive", self.sim_time_limit));
        }
        if self.sim_time_limit > SimTime::max_secs() {
            return Err(format!(
                "Invalid sim-time-limit {}, must not exceed {:.0}s",
                self.sim_time_limit,
                SimTime::max_secs()
            ));
        }
        if SimTime::from_secs(self.slot_size) == SimTime::ZERO {
            return Err(format!("Invalid slot-size {}, below the 1ps time resolution", self.slot_size));
        }
        if !(self.warmup_period >= 0.0 && self.warmup_period < self.sim_time_limit) {
            return Err(format!(
                "Invalid warmup-period {}, must be non-negative and below sim-time-limit {}",
                self.warmup_period, self.sim_time_limit
            ));
        }
        Ok(())
    }
}
