#![forbid(unsafe_code)]

mod cmd;
mod input;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use logsync_core::timing;
use output::OutputMode;
use std::env;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "lsync: replay, follow and simulate live build-log streams",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit command timing report to stderr.
    #[arg(long, global = true)]
    timing: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Output format (overrides --json and LOGSYNC_FORMAT).
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Suppress non-essential output.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        output::resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Streams",
        about = "Apply a recorded event log to an initial fetch",
        long_about = "Load an initial state, apply every event of an NDJSON log through the\n\
                      merge engine, and print the per-source summary, the window title and\n\
                      how many resyncs and refreshes the log would have triggered.",
        after_help = "EXAMPLES:\n    # Replay a captured session\n    lsync replay --state state.json --events events.ndjson\n\n\
                      # Replay as if the console were focused on one source\n    lsync replay --state state.json --events events.ndjson --foreground --visible p1\n\n\
                      # Emit machine-readable output\n    lsync replay --state state.json --events events.ndjson --json"
    )]
    Replay(cmd::replay::ReplayArgs),

    #[command(
        next_help_heading = "Streams",
        about = "Run a live sync session fed from stdin",
        long_about = "Start a sync session over the initial state and feed it NDJSON events\n\
                      from stdin. The snapshot file is re-read on every poll and the state\n\
                      file on every resync. Prints the window title whenever it changes.",
        after_help = "EXAMPLES:\n    # Follow a live stream\n    tail -f events.ndjson | lsync follow --state state.json\n\n\
                      # Poll a snapshot file kept fresh by another process\n    lsync follow --state state.json --snapshot snapshot.json < events.ndjson"
    )]
    Follow(cmd::follow::FollowArgs),

    #[command(
        next_help_heading = "Testing",
        about = "Deterministic simulation campaigns",
        long_about = "Run the merge engine against a simulated server over a faulty network\n\
                      and check its invariants, or replay one seed in detail."
    )]
    Sim(cmd::sim::SimArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Show the effective configuration",
        long_about = "Print the configuration after merging the user file, the project file\n\
                      (.logsync/config.toml) and environment overrides.",
        after_help = "EXAMPLES:\n    # Show the effective config\n    lsync config\n\n\
                      # Include the files it was read from\n    lsync config --paths"
    )]
    Config(cmd::config::ConfigArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Generate shell completions",
        after_help = "EXAMPLES:\n    # Bash\n    lsync completions bash > ~/.local/share/bash-completion/completions/lsync"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool, quiet: bool) {
    let filter = EnvFilter::try_from_env("LOGSYNC_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "logsync=debug,info"
        } else if quiet {
            "error"
        } else {
            "logsync=info,warn"
        })
    });

    let format = env::var("LOGSYNC_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let timing_enabled = cli.timing || timing::timing_enabled_from_env();
    timing::set_timing_enabled(timing_enabled);
    timing::clear_timings();

    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let project_root = env::current_dir()?;
    let output = cli.output_mode();

    let command_result = match cli.command {
        Commands::Replay(ref args) => timing::timed("cmd.replay", || {
            cmd::replay::run_replay(args, output, &project_root)
        }),
        Commands::Follow(ref args) => timing::timed("cmd.follow", || {
            cmd::follow::run_follow(args, output, &project_root)
        }),
        Commands::Sim(ref args) => timing::timed("cmd.sim", || cmd::sim::run_sim(args, output)),
        Commands::Config(ref args) => timing::timed("cmd.config", || {
            cmd::config::run_config(args, output, &project_root)
        }),
        Commands::Completions(ref args) => timing::timed("cmd.completions", || {
            let mut command = Cli::command();
            cmd::completions::run_completions(args.shell, &mut command)
        }),
    };

    if timing_enabled {
        let report = timing::collect_report();
        if report.is_empty() {
            eprintln!("timing report: no samples recorded");
        } else {
            eprintln!("timing report:");
            eprintln!("{}", report.display_table());
            eprintln!("timing report (json):");
            eprintln!("{}", serde_json::to_string_pretty(&report.to_json())?);
        }
    }

    command_result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn timing_flag_parses_before_subcommand() {
        let cli = Cli::parse_from(["lsync", "--timing", "config"]);
        assert!(cli.timing);
        assert!(matches!(cli.command, Commands::Config(_)));
    }

    #[test]
    fn timing_flag_parses_after_subcommand() {
        let cli = Cli::parse_from(["lsync", "config", "--timing", "--paths"]);
        assert!(cli.timing);
        assert!(matches!(cli.command, Commands::Config(ref args) if args.paths));
    }

    #[test]
    fn json_flag_sets_output_mode() {
        let cli = Cli::parse_from(["lsync", "--json", "config"]);
        assert!(cli.json);
        assert!(cli.output_mode().is_json());
    }

    #[test]
    fn json_flag_after_subcommand() {
        let cli = Cli::parse_from(["lsync", "config", "--json"]);
        assert!(cli.output_mode().is_json());
    }

    #[test]
    fn format_flag_wins_over_json() {
        let cli = Cli::parse_from(["lsync", "--json", "--format", "text", "config"]);
        assert_eq!(cli.output_mode(), OutputMode::Text);
    }

    #[test]
    fn quiet_flag_parsed() {
        let cli = Cli::parse_from(["lsync", "-q", "config"]);
        assert!(cli.quiet);
    }

    #[test]
    fn replay_parses_visible_sources() {
        let cli = Cli::parse_from([
            "lsync",
            "replay",
            "--state",
            "s.json",
            "--events",
            "e.ndjson",
            "--foreground",
            "--visible",
            "p1",
            "d2",
        ]);
        let Commands::Replay(args) = cli.command else {
            panic!("expected replay");
        };
        assert_eq!(args.state, Path::new("s.json"));
        assert!(args.foreground);
        assert_eq!(args.visible, vec!["p1", "d2"]);
    }

    #[test]
    fn replay_requires_state_and_events() {
        assert!(Cli::try_parse_from(["lsync", "replay", "--state", "s.json"]).is_err());
    }

    #[test]
    fn follow_snapshot_is_optional() {
        let cli = Cli::parse_from(["lsync", "follow", "--state", "s.json"]);
        let Commands::Follow(args) = cli.command else {
            panic!("expected follow");
        };
        assert!(args.snapshot.is_none());
        assert!(!args.foreground);
    }

    #[test]
    fn sim_run_parses_seed_range() {
        let cli = Cli::parse_from(["lsync", "sim", "run", "--seeds", "10..20", "--drop", "0"]);
        let Commands::Sim(args) = cli.command else {
            panic!("expected sim");
        };
        let cmd::sim::SimCommand::Run(run) = args.command else {
            panic!("expected sim run");
        };
        assert_eq!(run.seeds, 10..20);
        assert_eq!(run.params.drop, 0);
    }

    #[test]
    fn sim_run_rejects_empty_range() {
        assert!(Cli::try_parse_from(["lsync", "sim", "run", "--seeds", "4..4"]).is_err());
    }

    #[test]
    fn sim_replay_requires_seed() {
        assert!(Cli::try_parse_from(["lsync", "sim", "replay"]).is_err());
        assert!(Cli::try_parse_from(["lsync", "sim", "replay", "--seed", "7"]).is_ok());
    }

    #[test]
    fn completions_subcommand_parses() {
        let cli = Cli::parse_from(["lsync", "completions", "zsh"]);
        assert!(matches!(cli.command, Commands::Completions(_)));
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
