use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use logsync_core::config::{
    POLL_INTERVAL_ENV, SyncConfig, project_config_path, resolve_config, user_config_path,
};
use serde::Serialize;

use crate::output::OutputMode;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Also list the files the configuration was read from.
    #[arg(long)]
    pub paths: bool,
}

#[derive(Debug, Serialize)]
struct ConfigSource {
    path: PathBuf,
    exists: bool,
}

#[derive(Debug, Serialize)]
struct ConfigOutput<'a> {
    effective: &'a SyncConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sources: Vec<ConfigSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    env_override: Option<String>,
}

fn sources(project_root: &Path) -> Vec<ConfigSource> {
    user_config_path()
        .into_iter()
        .chain(std::iter::once(project_config_path(project_root)))
        .map(|path| ConfigSource {
            exists: path.is_file(),
            path,
        })
        .collect()
}

/// Print the effective configuration: user file, then project file, then env.
pub fn run_config(args: &ConfigArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let effective = resolve_config(project_root)?;
    let out = ConfigOutput {
        effective: &effective,
        sources: if args.paths {
            sources(project_root)
        } else {
            Vec::new()
        },
        env_override: std::env::var(POLL_INTERVAL_ENV).ok(),
    };

    if output.is_json() {
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let rendered = toml::to_string_pretty(&effective).context("failed to render config")?;
    print!("{rendered}");
    if args.paths {
        println!();
        for source in &out.sources {
            let state = if source.exists { "loaded" } else { "missing" };
            println!("# {state}: {}", source.path.display());
        }
        if let Some(raw) = &out.env_override {
            println!("# env: {POLL_INTERVAL_ENV}={raw}");
        }
    }
    Ok(())
}
