#![forbid(unsafe_code)]

use anyhow::Result;
use logsync_sim::campaign::{CampaignConfig, run_campaign};

fn main() -> Result<()> {
    let report = run_campaign(&CampaignConfig::default())?;

    println!(
        "campaign complete: seeds={} passed={} with_resync={} first_failure={:?}",
        report.seeds_run, report.seeds_passed, report.seeds_with_resync, report.first_failure
    );
    for failure in &report.failures {
        println!("seed {}:", failure.seed);
        for violation in &failure.violations {
            println!("  {violation}");
        }
    }

    if !report.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}
