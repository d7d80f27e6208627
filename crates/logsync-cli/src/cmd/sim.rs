//! `lsync sim`: deterministic simulation campaigns.
//!
//! `lsync sim run` executes a campaign across a seed range.
//! `lsync sim replay` reruns one seed and prints its trace.

use std::ops::Range;
use std::process;

use anyhow::Result;
use clap::{Args, Subcommand};
use logsync_sim::campaign::{self, CampaignConfig};
use logsync_sim::{SimulationStats, TraceEventKind};
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, pretty_section};

#[derive(Args, Debug)]
pub struct SimArgs {
    #[command(subcommand)]
    pub command: SimCommand,
}

#[derive(Subcommand, Debug)]
pub enum SimCommand {
    #[command(
        about = "Run a simulation campaign across a seed range",
        long_about = "Drive the merge engine against a simulated server and a faulty network\n\
                      for every seed in the range. Reports pass/fail per seed and the first\n\
                      failing seed to replay.",
        after_help = "EXAMPLES:\n    # Run seeds 0..100 with default faults\n    lsync sim run\n\n\
                      # Lossless network, where convergence is also checked\n    lsync sim run --drop 0 --reorder 0\n\n\
                      # Machine-readable output\n    lsync sim run --seeds 0..20 --json"
    )]
    Run(SimRunArgs),

    #[command(
        about = "Replay a single seed with its full trace",
        long_about = "Rerun one seed with the same parameters and print every trace event\n\
                      and invariant violation. Use after a campaign failure.",
        after_help = "EXAMPLES:\n    # Replay seed 42\n    lsync sim replay --seed 42\n\n\
                      # Machine-readable output\n    lsync sim replay --seed 42 --json"
    )]
    Replay(SimReplayArgs),
}

/// Parameters shared by `run` and `replay`.
#[derive(Args, Debug, Clone)]
pub struct SimParams {
    /// Sources in the initial fetch.
    #[arg(long, default_value = "3")]
    pub sources: usize,

    /// Upper bound on sources, including ones created mid-run.
    #[arg(long, default_value = "6")]
    pub max_sources: usize,

    /// Rounds per seed.
    #[arg(long, default_value = "32")]
    pub rounds: u64,

    /// Events the server emits per round.
    #[arg(long, default_value = "4")]
    pub events_per_round: u32,

    /// Percent of events dropped in flight.
    #[arg(long, default_value = "5")]
    pub drop: u8,

    /// Percent of events delivered twice.
    #[arg(long, default_value = "3")]
    pub duplicate: u8,

    /// Percent of delivery batches delivered out of order.
    #[arg(long, default_value = "5")]
    pub reorder: u8,

    /// Maximum delivery delay in rounds.
    #[arg(long, default_value = "2")]
    pub max_delay: u8,

    /// Percent of rounds that flip console focus.
    #[arg(long, default_value = "10")]
    pub focus_flip: u8,
}

#[derive(Args, Debug)]
pub struct SimRunArgs {
    /// Seed range, `start..end` (end exclusive).
    #[arg(long, default_value = "0..100", value_parser = parse_seed_range)]
    pub seeds: Range<u64>,

    #[command(flatten)]
    pub params: SimParams,
}

#[derive(Args, Debug)]
pub struct SimReplayArgs {
    /// Seed to replay.
    #[arg(long)]
    pub seed: u64,

    #[command(flatten)]
    pub params: SimParams,
}

fn parse_seed_range(raw: &str) -> Result<Range<u64>, String> {
    let (start, end) = raw
        .split_once("..")
        .ok_or_else(|| format!("expected start..end, got `{raw}`"))?;
    let parse = |bound: &str| {
        bound
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("`{bound}` is not a seed: {e}"))
    };
    let (start, end) = (parse(start)?, parse(end)?);
    if end <= start {
        return Err(format!("seed range `{raw}` is empty"));
    }
    Ok(start..end)
}

impl SimParams {
    fn campaign_config(&self, seed_range: Range<u64>) -> CampaignConfig {
        CampaignConfig {
            seed_range,
            initial_sources: self.sources,
            max_sources: self.max_sources,
            rounds: self.rounds,
            events_per_round: self.events_per_round,
            fault_drop_percent: self.drop,
            fault_duplicate_percent: self.duplicate,
            fault_reorder_percent: self.reorder,
            fault_max_delay: self.max_delay,
            focus_flip_percent: self.focus_flip,
        }
    }

    const fn checks_convergence(&self) -> bool {
        self.drop == 0 && self.reorder == 0
    }
}

#[derive(Debug, Serialize)]
struct RunOutput {
    seeds_run: usize,
    seeds_passed: usize,
    seeds_failed: usize,
    seeds_with_resync: usize,
    first_failure: Option<u64>,
    convergence_checked: bool,
    all_passed: bool,
    failures: Vec<campaign::SeedFailure>,
}

#[derive(Debug, Serialize)]
struct ReplayOutput {
    seed: u64,
    trace_events: usize,
    convergence_checked: bool,
    oracle_passed: bool,
    violations: Vec<String>,
    stats: SimulationStats,
}

pub fn run_sim(args: &SimArgs, output: OutputMode) -> Result<()> {
    match &args.command {
        SimCommand::Run(run) => run_sim_run(run, output),
        SimCommand::Replay(replay) => run_sim_replay(replay, output),
    }
}

fn run_sim_run(args: &SimRunArgs, output: OutputMode) -> Result<()> {
    let config = args.params.campaign_config(args.seeds.clone());
    let report = campaign::run_campaign(&config)?;

    let out = RunOutput {
        seeds_run: report.seeds_run,
        seeds_passed: report.seeds_passed,
        seeds_failed: report.failures.len(),
        seeds_with_resync: report.seeds_with_resync,
        first_failure: report.first_failure,
        convergence_checked: args.params.checks_convergence(),
        all_passed: report.all_passed(),
        failures: report.failures.clone(),
    };

    match output {
        OutputMode::Json => {
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputMode::Text => {
            println!(
                "campaign seeds={}..{} sources={} rounds={} drop={} duplicate={} reorder={}",
                args.seeds.start,
                args.seeds.end,
                args.params.sources,
                args.params.rounds,
                args.params.drop,
                args.params.duplicate,
                args.params.reorder
            );
            println!(
                "results passed={} failed={} with_resync={} convergence_checked={} all_passed={}",
                out.seeds_passed,
                out.seeds_failed,
                out.seeds_with_resync,
                out.convergence_checked,
                out.all_passed
            );
            for failure in out.failures.iter().take(5) {
                println!(
                    "failure seed={} violations={}",
                    failure.seed,
                    failure.violations.len()
                );
            }
            if out.failures.len() > 5 {
                println!("failures_truncated count={}", out.failures.len() - 5);
            }
            if let Some(seed) = out.first_failure {
                println!("hint replay_seed={seed}");
            }
        }
        OutputMode::Pretty => {
            let stdout = std::io::stdout();
            let mut w = stdout.lock();
            pretty_section(&mut w, "Simulation Campaign")?;
            pretty_kv(
                &mut w,
                "Seeds",
                format!("{}..{}", args.seeds.start, args.seeds.end),
            )?;
            pretty_kv(&mut w, "Sources", args.params.sources.to_string())?;
            pretty_kv(&mut w, "Rounds", args.params.rounds.to_string())?;
            pretty_kv(
                &mut w,
                "Faults",
                format!(
                    "drop {}% / dup {}% / reorder {}%",
                    args.params.drop, args.params.duplicate, args.params.reorder
                ),
            )?;
            pretty_kv(
                &mut w,
                "Results",
                format!(
                    "{} passed / {} failed ({} with resync)",
                    out.seeds_passed, out.seeds_failed, out.seeds_with_resync
                ),
            )?;
            pretty_kv(&mut w, "Convergence", out.convergence_checked.to_string())?;

            match out.first_failure {
                None => pretty_kv(&mut w, "Status", "all seeds passed")?,
                Some(seed) => {
                    pretty_kv(
                        &mut w,
                        "Status",
                        format!("{} failures (first at seed {seed})", out.seeds_failed),
                    )?;
                    println!();
                    pretty_section(&mut w, "Failure Samples")?;
                    for failure in out.failures.iter().take(5) {
                        println!("seed {:<8} violations={}", failure.seed, failure.violations.len());
                        for violation in &failure.violations {
                            println!("  - {violation}");
                        }
                    }
                    println!();
                    pretty_kv(&mut w, "Replay", format!("lsync sim replay --seed {seed}"))?;
                }
            }
        }
    }

    if !report.all_passed() {
        process::exit(1);
    }
    Ok(())
}

fn run_sim_replay(args: &SimReplayArgs, output: OutputMode) -> Result<()> {
    let config = args.params.campaign_config(args.seed..args.seed + 1);
    let trace = campaign::replay_seed(args.seed, &config)?;
    let result = &trace.result;

    let out = ReplayOutput {
        seed: args.seed,
        trace_events: result.trace.len(),
        convergence_checked: result.convergence_checked,
        oracle_passed: result.oracle.passed,
        violations: result.oracle.violations.iter().map(ToString::to_string).collect(),
        stats: result.stats,
    };

    match output {
        OutputMode::Json => {
            println!("{}", serde_json::to_string_pretty(&trace)?);
        }
        OutputMode::Text => {
            println!(
                "replay seed={} trace_events={} oracle_passed={} convergence_checked={}",
                out.seed, out.trace_events, out.oracle_passed, out.convergence_checked
            );
            println!(
                "stats emitted={} dropped={} duplicated={} merged={} escalations={} resyncs={} refreshes={}",
                out.stats.emitted,
                out.stats.dropped,
                out.stats.duplicated,
                out.stats.merged,
                out.stats.escalations,
                out.stats.resyncs,
                out.stats.refreshes
            );
            for violation in &out.violations {
                println!("violation={violation}");
            }
        }
        OutputMode::Pretty => {
            let stdout = std::io::stdout();
            let mut w = stdout.lock();
            pretty_section(&mut w, &format!("Replay Seed {}", out.seed))?;
            pretty_kv(&mut w, "Trace events", out.trace_events.to_string())?;
            pretty_kv(&mut w, "Emitted", out.stats.emitted.to_string())?;
            pretty_kv(&mut w, "Merged", out.stats.merged.to_string())?;
            pretty_kv(&mut w, "Escalations", out.stats.escalations.to_string())?;
            pretty_kv(&mut w, "Resyncs", out.stats.resyncs.to_string())?;
            pretty_kv(&mut w, "Convergence", out.convergence_checked.to_string())?;
            pretty_kv(&mut w, "Oracle", out.oracle_passed.to_string())?;

            println!();
            pretty_section(&mut w, "Trace")?;
            for event in &result.trace {
                println!("r{:<4} {}", event.round, describe(&event.kind));
            }

            if !out.oracle_passed {
                println!();
                pretty_section(&mut w, "Invariant Violations")?;
                for violation in &out.violations {
                    println!("- {violation}");
                }
            }
        }
    }

    if !out.oracle_passed {
        process::exit(1);
    }
    Ok(())
}

fn describe(kind: &TraceEventKind) -> String {
    match kind {
        TraceEventKind::Emit { seq, added, source } => {
            let verb = if *added { "add" } else { "delete" };
            format!("emit #{seq} {verb} {source}")
        }
        TraceEventKind::Send {
            seq,
            dropped,
            duplicated,
            delay_rounds,
        } => format!("send #{seq} dropped={dropped} duplicated={duplicated} delay={delay_rounds}"),
        TraceEventKind::Reorder { count } => format!("reorder {count} events"),
        TraceEventKind::Merge { seq, outcome } => format!("merge #{seq} {outcome}"),
        TraceEventKind::Focus { foreground } => {
            format!("focus {}", if *foreground { "foreground" } else { "background" })
        }
        TraceEventKind::Resync {
            generation,
            discarded_in_flight,
        } => format!("resync generation={generation} discarded={discarded_in_flight}"),
        TraceEventKind::Refresh => "refresh".to_string(),
    }
}
