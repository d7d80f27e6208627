//! Deterministic simulation of the logsync merge path.
//!
//! A [`server::SimulatedServer`] emits an event log, a
//! [`network::SimulatedNetwork`] carries it to a [`client::SimulatedClient`]
//! with injected faults, and an [`oracle::InvariantOracle`] checks the
//! client after every merge. The same seed always produces the same trace.

pub mod campaign;
pub mod client;
pub mod network;
pub mod oracle;
pub mod rng;
pub mod server;

use anyhow::{Result, bail};
use logsync_core::event::{Event, EventKind};
use logsync_core::merge::MergeOutcome;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::SimulatedClient;
use crate::network::{FaultConfig, SimulatedNetwork};
use crate::oracle::{InvariantOracle, OracleResult};
use crate::rng::DeterministicRng;
use crate::server::{SimulatedServer, Workload, seq_of};

/// Parameters for one simulated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    /// Sources the server starts with; all are in the client's first load.
    pub initial_sources: usize,
    /// Upper bound on sources the server may open during the run.
    pub max_sources: usize,
    pub rounds: u64,
    pub events_per_round: u32,
    pub fault: FaultConfig,
    /// Percent chance per round that the client flips foreground/background.
    pub focus_flip_percent: u8,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            initial_sources: 3,
            max_sources: 6,
            rounds: 32,
            events_per_round: 4,
            fault: FaultConfig::default(),
            focus_flip_percent: 10,
        }
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.initial_sources == 0 {
            bail!("initial_sources must be > 0");
        }
        if self.max_sources < self.initial_sources {
            bail!(
                "max_sources ({}) must be >= initial_sources ({})",
                self.max_sources,
                self.initial_sources
            );
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        if self.events_per_round == 0 {
            bail!("events_per_round must be > 0");
        }
        let percents = [
            ("fault.drop_rate_percent", self.fault.drop_rate_percent),
            ("fault.duplicate_rate_percent", self.fault.duplicate_rate_percent),
            ("fault.reorder_rate_percent", self.fault.reorder_rate_percent),
            ("focus_flip_percent", self.focus_flip_percent),
        ];
        for (name, value) in percents {
            if value > 100 {
                bail!("{name} must be <= 100, got {value}");
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Trace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub round: u64,
    pub kind: TraceEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEventKind {
    Emit {
        seq: u64,
        added: bool,
        source: String,
    },
    Send {
        seq: u64,
        dropped: bool,
        duplicated: bool,
        delay_rounds: u64,
    },
    Reorder {
        count: usize,
    },
    Merge {
        seq: u64,
        outcome: String,
    },
    Focus {
        foreground: bool,
    },
    Resync {
        generation: u64,
        discarded_in_flight: usize,
    },
    Refresh,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationStats {
    pub emitted: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub merged: u64,
    pub appended_read: u64,
    pub appended_unread: u64,
    pub duplicates: u64,
    pub removed: u64,
    pub not_found: u64,
    pub escalations: u64,
    pub resyncs: u64,
    pub refreshes: u64,
}

impl SimulationStats {
    fn record(&mut self, outcome: &MergeOutcome) {
        self.merged += 1;
        match outcome {
            MergeOutcome::Appended { read: true, .. } => self.appended_read += 1,
            MergeOutcome::Appended { read: false, .. } => self.appended_unread += 1,
            MergeOutcome::Duplicate { .. } => self.duplicates += 1,
            MergeOutcome::Removed { .. } => self.removed += 1,
            MergeOutcome::NotFound { .. } => self.not_found += 1,
            MergeOutcome::Escalated { .. } => self.escalations += 1,
            MergeOutcome::Disposed => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub seed: u64,
    pub trace: Vec<TraceEvent>,
    pub stats: SimulationStats,
    pub oracle: OracleResult,
    /// Whether the final state was compared against the server. Only done
    /// when the link neither drops nor reorders.
    pub convergence_checked: bool,
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    server: SimulatedServer,
    client: SimulatedClient,
    network: SimulatedNetwork<Event>,
    oracle: InvariantOracle,
    trace: Vec<TraceEvent>,
    stats: SimulationStats,
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error if `config` fails [`SimulationConfig::validate`].
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let server = SimulatedServer::new(
            config.initial_sources,
            config.max_sources,
            Workload::default(),
        );
        let client = SimulatedClient::new(server.initial_state());
        Ok(Self {
            rng: DeterministicRng::new(config.seed),
            client,
            server,
            network: SimulatedNetwork::new(config.fault),
            oracle: InvariantOracle::new(config.fault.reorder_rate_percent == 0),
            trace: Vec::new(),
            stats: SimulationStats::default(),
            config,
        })
    }

    /// Run every round, flush the link, and check the final state.
    pub fn run(&mut self) -> SimulationResult {
        for round in 0..self.config.rounds {
            self.step(round);
        }

        let final_round = self.config.rounds;
        for event in self.network.drain_all() {
            self.merge(final_round, &event);
        }
        self.service_triggers(final_round);

        let convergence_checked = self.config.fault.preserves_stream();
        if convergence_checked {
            self.oracle
                .check_convergence(self.server.sources(), self.client.store());
        }

        let oracle = std::mem::take(&mut self.oracle).finish();
        debug!(
            seed = self.config.seed,
            merged = self.stats.merged,
            escalations = self.stats.escalations,
            passed = oracle.passed,
            "simulation finished"
        );
        SimulationResult {
            seed: self.config.seed,
            trace: std::mem::take(&mut self.trace),
            stats: self.stats,
            oracle,
            convergence_checked,
        }
    }

    fn step(&mut self, round: u64) {
        if self.rng.hit_rate_percent(self.config.focus_flip_percent) {
            let visibility = self.client.toggle_visibility();
            self.push(
                round,
                TraceEventKind::Focus {
                    foreground: visibility == logsync_core::cursor::Visibility::Foreground,
                },
            );
        }

        for _ in 0..self.config.events_per_round {
            let event = self.server.next_event(&mut self.rng);
            let seq = seq_of(&event.cursor).unwrap_or_default();
            self.stats.emitted += 1;
            self.push(
                round,
                TraceEventKind::Emit {
                    seq,
                    added: event.kind == EventKind::Added,
                    source: event.owner().to_string(),
                },
            );

            let sent = self.network.send(event, round, &mut self.rng);
            self.stats.dropped += u64::from(sent.dropped);
            self.stats.duplicated += u64::from(sent.duplicated);
            self.push(
                round,
                TraceEventKind::Send {
                    seq,
                    dropped: sent.dropped,
                    duplicated: sent.duplicated,
                    delay_rounds: sent.delay_rounds,
                },
            );
        }

        let ready = self.network.deliver_ready(round, &mut self.rng);
        if ready.reordered {
            self.push(
                round,
                TraceEventKind::Reorder {
                    count: ready.delivered.len(),
                },
            );
        }
        for event in ready.delivered {
            self.merge(round, &event);
        }
        self.service_triggers(round);
    }

    fn merge(&mut self, round: u64, event: &Event) {
        let applied = self.client.apply(event);
        self.oracle
            .check_apply(event, &applied, self.client.store());
        self.stats.record(&applied.outcome);
        self.push(
            round,
            TraceEventKind::Merge {
                seq: seq_of(&event.cursor).unwrap_or_default(),
                outcome: applied.outcome.label().to_string(),
            },
        );
    }

    fn service_triggers(&mut self, round: u64) {
        if self.client.refresh_trigger().take() {
            self.stats.refreshes += 1;
            self.push(round, TraceEventKind::Refresh);
        }
        if self.client.service_resync(self.server.initial_state()) {
            // The new subscription resumes after the loaded cursor, so
            // nothing already covered by the load is replayed.
            let loaded = self.server.last_seq();
            let discarded = self.network.retain(|event| {
                let seq = seq_of(&event.cursor);
                match (seq, loaded) {
                    (Some(seq), Some(loaded)) => seq > loaded,
                    _ => true,
                }
            });
            self.stats.resyncs += 1;
            self.push(
                round,
                TraceEventKind::Resync {
                    generation: self.client.store().generation(),
                    discarded_in_flight: discarded,
                },
            );
        }
    }

    fn push(&mut self, round: u64, kind: TraceEventKind) {
        self.trace.push(TraceEvent { round, kind });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lossless(seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            fault: FaultConfig::lossless(),
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let bad = [
            SimulationConfig {
                initial_sources: 0,
                ..SimulationConfig::default()
            },
            SimulationConfig {
                max_sources: 1,
                ..SimulationConfig::default()
            },
            SimulationConfig {
                rounds: 0,
                ..SimulationConfig::default()
            },
            SimulationConfig {
                focus_flip_percent: 101,
                ..SimulationConfig::default()
            },
        ];
        for config in bad {
            assert!(Simulator::new(config).is_err(), "{config:?}");
        }
    }

    #[test]
    fn lossless_run_converges() {
        let result = Simulator::new(lossless(1))
            .expect("config").run();
        assert!(result.convergence_checked);
        assert!(result.oracle.passed, "{:?}", result.oracle.violations);
        assert_eq!(result.stats.dropped, 0);
        let discarded: usize = result
            .trace
            .iter()
            .map(|t| match t.kind {
                TraceEventKind::Resync {
                    discarded_in_flight,
                    ..
                } => discarded_in_flight,
                _ => 0,
            })
            .sum();
        // Every copy put on the link is either merged or superseded by a resync.
        assert_eq!(
            result.stats.merged + u64::try_from(discarded).expect("fits"),
            result.stats.emitted + result.stats.duplicated
        );
    }

    #[test]
    fn new_sources_force_resyncs() {
        let config = SimulationConfig {
            initial_sources: 1,
            max_sources: 8,
            rounds: 64,
            ..lossless(3)
        };
        let result = Simulator::new(config).expect("config").run();
        assert!(result.stats.escalations > 0);
        assert!(result.stats.resyncs > 0);
        assert!(result.oracle.passed, "{:?}", result.oracle.violations);
    }

    #[test]
    fn lossy_run_skips_convergence_but_keeps_invariants() {
        let config = SimulationConfig {
            seed: 5,
            fault: FaultConfig {
                max_delay_rounds: 3,
                drop_rate_percent: 20,
                duplicate_rate_percent: 10,
                reorder_rate_percent: 20,
            },
            ..SimulationConfig::default()
        };
        let result = Simulator::new(config).expect("config").run();
        assert!(!result.convergence_checked);
        assert!(result.oracle.passed, "{:?}", result.oracle.violations);
    }

    #[test]
    fn same_seed_same_trace() {
        let a = Simulator::new(lossless(9)).expect("config").run();
        let b = Simulator::new(lossless(9)).expect("config").run();
        assert_eq!(a, b);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn any_seed_keeps_invariants(
            seed in any::<u64>(),
            drop in 0_u8..30,
            duplicate in 0_u8..30,
            reorder in 0_u8..30,
            flip in 0_u8..50,
        ) {
            let config = SimulationConfig {
                seed,
                rounds: 16,
                fault: FaultConfig {
                    max_delay_rounds: 3,
                    drop_rate_percent: drop,
                    duplicate_rate_percent: duplicate,
                    reorder_rate_percent: reorder,
                },
                focus_flip_percent: flip,
                ..SimulationConfig::default()
            };
            let result = Simulator::new(config).expect("config").run();
            prop_assert!(result.oracle.passed, "{:?}", result.oracle.violations);
        }
    }
}
