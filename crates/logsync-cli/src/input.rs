//! Reading initial state and event logs from disk or stdin.

use anyhow::{Context, Result};
use logsync_core::event::{self, Event};
use logsync_core::model::InitialState;
use std::io::Read;
use std::path::Path;

fn read_source(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Parse an [`InitialState`] JSON document.
pub fn load_state(path: &Path) -> Result<InitialState> {
    let raw = read_source(path)?;
    serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a valid initial state", path.display()))
}

/// Parse an NDJSON event log. `-` reads stdin.
pub fn load_events(path: &Path) -> Result<Vec<Event>> {
    let raw = read_source(path)?;
    event::parse_lines(&raw).with_context(|| format!("failed to decode {}", path.display()))
}
