//! Run many seeds and report which ones broke an invariant.

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::network::FaultConfig;
use crate::oracle::InvariantViolation;
use crate::{SimulationConfig, SimulationResult, Simulator};

/// Seeds to run and the simulation parameters shared by all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub seed_range: Range<u64>,
    pub initial_sources: usize,
    pub max_sources: usize,
    pub rounds: u64,
    pub events_per_round: u32,
    pub fault_drop_percent: u8,
    pub fault_duplicate_percent: u8,
    pub fault_reorder_percent: u8,
    pub fault_max_delay: u8,
    pub focus_flip_percent: u8,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let sim = SimulationConfig::default();
        Self {
            seed_range: 0..100,
            initial_sources: sim.initial_sources,
            max_sources: sim.max_sources,
            rounds: sim.rounds,
            events_per_round: sim.events_per_round,
            fault_drop_percent: sim.fault.drop_rate_percent,
            fault_duplicate_percent: sim.fault.duplicate_rate_percent,
            fault_reorder_percent: sim.fault.reorder_rate_percent,
            fault_max_delay: sim.fault.max_delay_rounds,
            focus_flip_percent: sim.focus_flip_percent,
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub const fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            initial_sources: self.initial_sources,
            max_sources: self.max_sources,
            rounds: self.rounds,
            events_per_round: self.events_per_round,
            fault: FaultConfig {
                max_delay_rounds: self.fault_max_delay,
                drop_rate_percent: self.fault_drop_percent,
                duplicate_rate_percent: self.fault_duplicate_percent,
                reorder_rate_percent: self.fault_reorder_percent,
            },
            focus_flip_percent: self.focus_flip_percent,
        }
    }

    /// # Errors
    ///
    /// Returns an error for an empty seed range or any simulation parameter
    /// that [`SimulationConfig::validate`] rejects.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        self.sim_config_for_seed(self.seed_range.start).validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// Lowest failing seed, the one to replay first.
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds that exercised at least one escalation and resync.
    pub seeds_with_resync: usize,
}

impl CampaignReport {
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// # Errors
///
/// Returns an error if `config` is invalid.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        seeds_with_resync: 0,
    };

    for seed in config.seed_range.clone() {
        let result = Simulator::new(config.sim_config_for_seed(seed))?.run();
        report.seeds_run += 1;
        if result.stats.resyncs > 0 {
            report.seeds_with_resync += 1;
        }
        if result.oracle.passed {
            report.seeds_passed += 1;
        } else {
            warn!(seed, violations = result.oracle.violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: result
                    .oracle
                    .violations
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            });
        }
    }

    info!(
        seeds_run = report.seeds_run,
        seeds_passed = report.seeds_passed,
        "campaign finished"
    );
    Ok(report)
}

/// Run one seed; the inner result carries its violations.
///
/// # Errors
///
/// Returns an error if `config` is invalid.
pub fn run_single_seed(
    seed: u64,
    config: &CampaignConfig,
) -> Result<Result<(), Vec<InvariantViolation>>> {
    let result = Simulator::new(config.sim_config_for_seed(seed))?.run();
    if result.oracle.passed {
        Ok(Ok(()))
    } else {
        Ok(Err(result.oracle.violations))
    }
}

/// Full trace of one seed, for debugging a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailedTrace {
    pub config: SimulationConfig,
    pub result: SimulationResult,
}

/// # Errors
///
/// Returns an error if `config` is invalid.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    let sim_config = config.sim_config_for_seed(seed);
    let result = Simulator::new(sim_config)?.run();
    Ok(DetailedTrace {
        config: sim_config,
        result,
    })
}
