//! `condr` -- the Conductor command-line interface.

mod cli;
mod state;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cli::task::TaskCommand;
use cli::workflow::WorkflowCommand;
use state::AppState;

/// Personal-assistant workflow engine and scheduler.
#[derive(Parser)]
#[command(name = "condr", version, about)]
struct Cli {
    /// Database URL (defaults to sqlite under the data directory).
    #[arg(long, env = "CONDUCTOR_DATABASE_URL")]
    database_url: Option<String>,

    /// Emit raw JSON instead of tables.
    #[arg(long, global = true)]
    json: bool,

    /// Enable OpenTelemetry stdout trace export.
    #[arg(long, global = true)]
    otel: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Workflow management.
    #[command(subcommand)]
    Workflow(WorkflowCommand),

    /// Scheduled task management.
    #[command(subcommand)]
    Task(TaskCommand),

    /// Run the scheduler daemon until interrupted.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    conductor_observe::tracing_setup::init_tracing(cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let database_url = cli
        .database_url
        .unwrap_or_else(conductor_infra::sqlite::pool::default_database_url);
    let state = AppState::new(&database_url).await?;

    let result = match cli.command {
        Command::Workflow(cmd) => cli::workflow::handle(cmd, &state, cli.json).await,
        Command::Task(cmd) => cli::task::handle(cmd, &state, cli.json).await,
        Command::Serve => cli::serve::run(&state).await,
    };

    conductor_observe::tracing_setup::shutdown_tracing();
    result
}
