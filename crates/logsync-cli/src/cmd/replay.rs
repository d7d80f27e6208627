//! `lsync replay`: apply a recorded event log to an initial fetch.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use clap::Args;
use logsync_core::config::resolve_config;
use logsync_core::cursor::{LastReadLog, LastReadSink, Visibility, VisibilitySignal};
use logsync_core::merge::{MergeEngine, RefreshTrigger, ResyncTrigger};
use logsync_core::model::SourceId;
use logsync_core::store::{EntityStore, SourceSummary};
use logsync_core::view;
use serde::Serialize;
use tracing::debug;

use crate::cmd::current_title;
use crate::input;
use crate::output::{OutputMode, pretty_kv, pretty_rule, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Initial state JSON (`-` for stdin).
    #[arg(long)]
    pub state: PathBuf,

    /// NDJSON event log (`-` for stdin).
    #[arg(long)]
    pub events: PathBuf,

    /// Treat the console as focused, so visible sources are marked read.
    #[arg(long)]
    pub foreground: bool,

    /// Replace the layout's visible sources.
    #[arg(long = "visible", value_name = "SOURCE_ID", num_args = 1..)]
    pub visible: Vec<String>,
}

/// Counts requests without acting on them.
#[derive(Debug, Default)]
struct RequestCounter(AtomicU64);

impl RequestCounter {
    fn bump(&self) -> bool {
        self.0.fetch_add(1, Ordering::Relaxed) == 0
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl ResyncTrigger for RequestCounter {
    fn request_resync(&self) -> bool {
        self.bump()
    }
}

impl RefreshTrigger for RequestCounter {
    fn refresh_now(&self) -> bool {
        self.bump()
    }
}

#[derive(Debug, Serialize)]
struct ReplayOutput {
    events: usize,
    outcomes: BTreeMap<&'static str, u64>,
    resync_requests: u64,
    refresh_requests: u64,
    read_updates: usize,
    resume_cursor: Option<String>,
    title: String,
    sections: Vec<String>,
    sources: Vec<SourceRow>,
}

#[derive(Debug, Serialize)]
struct SourceRow {
    id: String,
    kind: String,
    name: String,
    count: usize,
    unread_count: usize,
    last_read_cursor: Option<String>,
}

impl From<&SourceSummary> for SourceRow {
    fn from(s: &SourceSummary) -> Self {
        Self {
            id: s.id.to_string(),
            kind: s.kind.to_string(),
            name: s.name.clone(),
            count: s.count,
            unread_count: s.unread_count,
            last_read_cursor: s.last_read_cursor.as_ref().map(ToString::to_string),
        }
    }
}

pub fn run_replay(args: &ReplayArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let config = resolve_config(project_root)?;
    let mut state = input::load_state(&args.state)?;
    if !args.visible.is_empty() {
        state.snapshot.layout.sources = args.visible.iter().map(SourceId::new).collect();
    }
    let events = input::load_events(&args.events)?;

    let store = Arc::new(EntityStore::from_initial(state));
    let resync = Arc::new(RequestCounter::default());
    let refresh = Arc::new(RequestCounter::default());
    let reads = Arc::new(LastReadLog::new());
    let mut engine = MergeEngine::new(
        Arc::clone(&store),
        VisibilitySignal::new(if args.foreground {
            Visibility::Foreground
        } else {
            Visibility::Background
        }),
        Arc::clone(&resync) as Arc<dyn ResyncTrigger>,
        Arc::clone(&refresh) as Arc<dyn RefreshTrigger>,
    )
    .with_sink(Arc::clone(&reads) as Arc<dyn LastReadSink>);

    let mut outcomes: BTreeMap<&'static str, u64> = BTreeMap::new();
    for event in &events {
        let outcome = engine.apply(event);
        *outcomes.entry(outcome.label()).or_default() += 1;
    }
    debug!(events = events.len(), "replay applied");

    let summaries = store.summaries();
    let selected = view::select_sections(&summaries, &store.layout());
    let out = ReplayOutput {
        events: events.len(),
        outcomes,
        resync_requests: resync.get(),
        refresh_requests: refresh.get(),
        read_updates: reads.len(),
        resume_cursor: store.resume_cursor().map(|c| c.to_string()),
        title: current_title(&store, &config.view.title_suffix),
        sections: selected.sections.iter().map(|s| s.id.to_string()).collect(),
        sources: summaries.iter().map(SourceRow::from).collect(),
    };

    render_mode(output, &out, render_text, render_pretty)
}

fn render_text(out: &ReplayOutput, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(
        w,
        "replay events={} resync_requests={} refresh_requests={} read_updates={}",
        out.events, out.resync_requests, out.refresh_requests, out.read_updates
    )?;
    for (label, count) in &out.outcomes {
        writeln!(w, "outcome {label}={count}")?;
    }
    for row in &out.sources {
        writeln!(
            w,
            "source id={} kind={} count={} unread={} last_read={}",
            row.id,
            row.kind,
            row.count,
            row.unread_count,
            row.last_read_cursor.as_deref().unwrap_or("-")
        )?;
    }
    writeln!(w, "title {}", out.title)
}

fn render_pretty(out: &ReplayOutput, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, "Replay")?;
    pretty_kv(w, "Events", out.events.to_string())?;
    for (label, count) in &out.outcomes {
        pretty_kv(w, label, count.to_string())?;
    }
    pretty_kv(w, "Resyncs", out.resync_requests.to_string())?;
    pretty_kv(w, "Refreshes", out.refresh_requests.to_string())?;
    pretty_kv(w, "Marked read", out.read_updates.to_string())?;
    pretty_kv(w, "Resume at", out.resume_cursor.as_deref().unwrap_or("-"))?;
    writeln!(w)?;

    pretty_section(w, "Sources")?;
    writeln!(
        w,
        "{:<16} {:<8} {:>6} {:>6}  {}",
        "ID", "KIND", "COUNT", "UNREAD", "LAST READ"
    )?;
    for row in &out.sources {
        let marker = if out.sections.contains(&row.id) { "*" } else { " " };
        writeln!(
            w,
            "{:<16} {:<8} {:>6} {:>6}  {}",
            format!("{marker}{}", row.id),
            row.kind,
            row.count,
            row.unread_count,
            row.last_read_cursor.as_deref().unwrap_or("-")
        )?;
    }
    pretty_rule(w)?;
    writeln!(w, "{}", out.title)
}
