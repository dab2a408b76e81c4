//! The scheduler daemon: recovery sweep, timer arming, poll loop.

use anyhow::{Context, Result};
use console::style;

use conductor_core::workflow::recovery::sweep_interrupted;

use crate::state::AppState;

/// Run the scheduler until ctrl-c.
///
/// Order matters: the startup sweep reconciles executions orphaned by a
/// previous crash before any timer can fire new work.
pub async fn run(state: &AppState) -> Result<()> {
    let reconciled = sweep_interrupted(state.engine.repo())
        .await
        .context("startup reconciliation sweep failed")?;
    if reconciled > 0 {
        println!(
            "{} {} interrupted execution(s) marked failed",
            style("Recovered").yellow().bold(),
            reconciled
        );
    }

    state
        .scheduler
        .start()
        .await
        .context("failed to start scheduler")?;
    println!("{} scheduler running, ctrl-c to stop", style("Ready").green().bold());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    println!("\nShutting down...");
    state.scheduler.stop().await;
    Ok(())
}
