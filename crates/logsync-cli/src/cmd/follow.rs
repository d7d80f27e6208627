//! `lsync follow`: run a live sync session fed from stdin.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::Args;
use logsync_core::channel::{EventSource, MemoryEventSource, MemoryFeed};
use logsync_core::config::{SyncConfig, resolve_config};
use logsync_core::cursor::{Visibility, VisibilitySignal};
use logsync_core::event;
use logsync_core::model::{InitialState, ProjectSnapshot};
use logsync_core::poll::SnapshotSource;
use logsync_core::resync::Resyncer;
use logsync_core::session::{SessionParts, SessionStats, SyncSession};
use logsync_core::{EntityStore, SyncError};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::cmd::current_title;
use crate::input;
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

const FEED_CAPACITY: usize = 256;
const TITLE_TICK: Duration = Duration::from_millis(100);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Args, Debug)]
pub struct FollowArgs {
    /// Initial state JSON. Re-read on every full resync.
    #[arg(long)]
    pub state: PathBuf,

    /// Snapshot JSON re-read on every poll. Defaults to the state's snapshot.
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// Treat the console as focused, so visible sources are marked read.
    #[arg(long)]
    pub foreground: bool,
}

// ---------------------------------------------------------------------------
// File-backed collaborators
// ---------------------------------------------------------------------------

struct FileSnapshotSource {
    path: Option<PathBuf>,
    fallback: ProjectSnapshot,
}

#[async_trait]
impl SnapshotSource for FileSnapshotSource {
    async fn poll(&self) -> Result<ProjectSnapshot, SyncError> {
        let Some(path) = &self.path else {
            return Ok(self.fallback.clone());
        };
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SyncError::poll(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&raw).map_err(|e| SyncError::poll(format!("{}: {e}", path.display())))
    }
}

struct FileResyncer {
    path: PathBuf,
}

#[async_trait]
impl Resyncer for FileResyncer {
    async fn full_resync(&self) -> Result<InitialState, SyncError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SyncError::resync(format!("{}: {e}", self.path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| SyncError::resync(format!("{}: {e}", self.path.display())))
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
struct Forwarded {
    sent: u64,
    skipped: u64,
}

#[derive(Debug, Serialize)]
struct FollowOutput {
    interrupted: bool,
    drained: bool,
    lines_sent: u64,
    lines_skipped: u64,
    events: u64,
    appended: u64,
    removed: u64,
    ignored: u64,
    escalations: u64,
    opens: u64,
    channel_failures: u64,
    polls: u64,
    resyncs_completed: u64,
    resyncs_failed: u64,
    resyncs_discarded: u64,
    title: String,
}

impl FollowOutput {
    const fn new(stats: SessionStats, forwarded: Forwarded, title: String) -> Self {
        Self {
            interrupted: false,
            drained: false,
            lines_sent: forwarded.sent,
            lines_skipped: forwarded.skipped,
            events: stats.events,
            appended: stats.appended,
            removed: stats.removed,
            ignored: stats.ignored,
            escalations: stats.escalations,
            opens: stats.opens,
            channel_failures: stats.channel_failures,
            polls: stats.polls,
            resyncs_completed: stats.resyncs.completed,
            resyncs_failed: stats.resyncs.failed,
            resyncs_discarded: stats.resyncs.discarded,
            title,
        }
    }
}

pub fn run_follow(args: &FollowArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    if args.state.as_os_str() == "-" {
        bail!("--state must name a file: stdin carries the event stream");
    }
    let config = resolve_config(project_root)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let out = runtime.block_on(follow(args, config, output))?;
    render_mode(output, &out, render_text, render_pretty)
}

async fn follow(args: &FollowArgs, config: SyncConfig, output: OutputMode) -> Result<FollowOutput> {
    let state = input::load_state(&args.state)?;
    let suffix = config.view.title_suffix.clone();
    let snapshots = FileSnapshotSource {
        path: args.snapshot.clone(),
        fallback: state.snapshot.clone(),
    };
    let events = Arc::new(MemoryEventSource::new());
    // Held until teardown so the subscription outlives stdin EOF.
    let feed = events.connect(FEED_CAPACITY);

    let mut parts = SessionParts::new(
        config,
        Arc::new(EntityStore::from_initial(state)),
        events as Arc<dyn EventSource>,
        Arc::new(snapshots),
        Arc::new(FileResyncer {
            path: args.state.clone(),
        }),
    );
    parts.visibility = VisibilitySignal::new(if args.foreground {
        Visibility::Foreground
    } else {
        Visibility::Background
    });
    let session = SyncSession::start(parts);
    let store = Arc::clone(session.store());

    let mut reader = tokio::spawn(forward_stdin(feed.clone()));
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    let mut ticker = tokio::time::interval(TITLE_TICK);
    let mut last_title = String::new();

    let forwarded = loop {
        tokio::select! {
            joined = &mut reader => {
                break Some(joined.context("stdin reader stopped abnormally")??);
            }
            _ = &mut interrupted => {
                info!("interrupted, tearing down");
                reader.abort();
                break None;
            }
            _ = ticker.tick() => {
                print_title_change(&store, &suffix, &mut last_title, output)?;
            }
        }
    };

    let drained = match forwarded {
        Some(fwd) => wait_for_merges(&session, fwd.sent).await,
        None => false,
    };
    print_title_change(&store, &suffix, &mut last_title, output)?;
    let title = current_title(&store, &suffix);

    let stats = session.shutdown().await;
    drop(feed);

    let mut out = FollowOutput::new(stats, forwarded.unwrap_or_default(), title);
    out.interrupted = forwarded.is_none();
    out.drained = drained;
    Ok(out)
}

async fn forward_stdin(feed: MemoryFeed) -> Result<Forwarded> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut forwarded = Forwarded::default();
    let mut line_no = 0;
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        line_no += 1;
        match event::parse_line(&line, line_no) {
            Ok(Some(ev)) => {
                feed.send(ev).await?;
                forwarded.sent += 1;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(code = %err.code(), error = %err, "skipping undecodable line");
                forwarded.skipped += 1;
            }
        }
    }
    debug!(sent = forwarded.sent, skipped = forwarded.skipped, "stdin closed");
    Ok(forwarded)
}

/// Wait until the session has merged `sent` events. False on timeout.
async fn wait_for_merges(session: &SyncSession, sent: u64) -> bool {
    let wait = async {
        while session.stats().events < sent {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    if tokio::time::timeout(DRAIN_TIMEOUT, wait).await.is_ok() {
        true
    } else {
        warn!(
            sent,
            merged = session.stats().events,
            "timed out waiting for queued events"
        );
        false
    }
}

fn print_title_change(
    store: &EntityStore,
    suffix: &str,
    last: &mut String,
    output: OutputMode,
) -> Result<()> {
    if output.is_json() {
        return Ok(());
    }
    let title = current_title(store, suffix);
    if title != *last {
        let stdout = std::io::stdout();
        let mut w = stdout.lock();
        writeln!(w, "title {title}")?;
        w.flush()?;
        *last = title;
    }
    Ok(())
}

fn render_text(out: &FollowOutput, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(
        w,
        "follow interrupted={} drained={} lines_sent={} lines_skipped={}",
        out.interrupted, out.drained, out.lines_sent, out.lines_skipped
    )?;
    writeln!(
        w,
        "merge events={} appended={} removed={} ignored={} escalations={}",
        out.events, out.appended, out.removed, out.ignored, out.escalations
    )?;
    writeln!(
        w,
        "session opens={} channel_failures={} polls={} resyncs={} resync_failures={}",
        out.opens, out.channel_failures, out.polls, out.resyncs_completed, out.resyncs_failed
    )
}

fn render_pretty(out: &FollowOutput, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(w)?;
    pretty_section(w, "Session")?;
    let ended = if out.interrupted {
        "interrupted"
    } else if out.drained {
        "input drained"
    } else {
        "input closed before merge finished"
    };
    pretty_kv(w, "Ended", ended)?;
    pretty_kv(
        w,
        "Lines",
        format!("{} sent / {} skipped", out.lines_sent, out.lines_skipped),
    )?;
    pretty_kv(
        w,
        "Merged",
        format!(
            "{} events ({} appended, {} removed, {} ignored)",
            out.events, out.appended, out.removed, out.ignored
        ),
    )?;
    pretty_kv(w, "Escalations", out.escalations.to_string())?;
    pretty_kv(
        w,
        "Resyncs",
        format!(
            "{} done / {} failed / {} discarded",
            out.resyncs_completed, out.resyncs_failed, out.resyncs_discarded
        ),
    )?;
    pretty_kv(w, "Polls", out.polls.to_string())?;
    pretty_kv(w, "Title", &out.title)
}
