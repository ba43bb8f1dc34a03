use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "olympus-echo",
    version,
    about = "Run conversation test suites against voice and chat agents"
)]
pub struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a sample echo.yaml
    Init(InitArgs),
    /// Parse the config and check every test case
    Validate(ValidateArgs),
    /// Run one dataset locally as an experiment
    Run(RunArgs),
    Datasets(DatasetsArgs),
    /// Show recent experiments
    History(HistoryArgs),
    /// Talk to the remote test-suite backend
    Remote(RemoteArgs),
    Version,
}

#[derive(Parser, Clone)]
pub struct InitArgs {
    #[arg(long, default_value = "echo.yaml")]
    pub config: PathBuf,
}

#[derive(Parser, Clone)]
pub struct ValidateArgs {
    #[arg(long, default_value = "echo.yaml")]
    pub config: PathBuf,

    /// Reject unknown config keys instead of warning
    #[arg(long)]
    pub strict: bool,
}

#[derive(Parser, Clone)]
pub struct RunArgs {
    #[arg(long, default_value = "echo.yaml")]
    pub config: PathBuf,

    #[arg(long, default_value = ".echo/echo.db")]
    pub db: PathBuf,

    /// Dataset id or name; optional when the config holds a single dataset
    #[arg(long)]
    pub dataset: Option<String>,

    /// sequential | parallel (overrides settings.execution_mode)
    #[arg(long)]
    pub mode: Option<String>,

    /// Worker bound for parallel mode (overrides settings.parallel)
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Answer every turn with the built-in scripted agent instead of calling the target
    #[arg(long)]
    pub simulate: bool,

    /// Write the finished experiment as JSON
    #[arg(long)]
    pub out: Option<PathBuf>,

    #[arg(long)]
    pub strict: bool,

    /// Ignore cached judge verdicts
    #[arg(long)]
    pub judge_refresh: bool,
}

#[derive(Parser, Clone)]
pub struct DatasetsArgs {
    #[arg(long, default_value = ".echo/echo.db", global = true)]
    pub db: PathBuf,

    #[command(subcommand)]
    pub cmd: DatasetsSub,
}

#[derive(Subcommand, Clone)]
pub enum DatasetsSub {
    List,
    Show { id: String },
    Delete { id: String },
}

#[derive(Parser, Clone)]
pub struct HistoryArgs {
    #[arg(long, default_value = ".echo/echo.db")]
    pub db: PathBuf,

    #[arg(long, default_value_t = 20)]
    pub last: u32,
}

#[derive(Parser, Clone)]
pub struct RemoteArgs {
    #[arg(long, env = "ECHO_BACKEND_URL", global = true)]
    pub backend_url: Option<String>,

    #[arg(long, env = "ECHO_USER_ID", global = true)]
    pub user_id: Option<String>,

    #[command(subcommand)]
    pub cmd: RemoteSub,
}

#[derive(Subcommand, Clone)]
pub enum RemoteSub {
    /// Start a suite run on the backend and poll until it settles
    Run(RemoteRunArgs),
    /// List runs for the user
    Runs,
    /// List suites for the user
    Suites,
    /// Show one suite with its status and cases
    Show { suite: String },
    /// Create an empty suite
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Rename a suite or change its agents
    Update {
        suite: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        target_agent: Option<String>,
        #[arg(long)]
        user_agent: Option<String>,
    },
    /// Delete a suite
    Delete { suite: String },
    /// Queue a single test case on the backend
    RunCase {
        case: String,
        #[arg(long, default_value_t = 1)]
        concurrent_calls: u32,
    },
}

#[derive(Parser, Clone)]
pub struct RemoteRunArgs {
    #[arg(long)]
    pub suite: String,

    #[arg(long, default_value_t = 1)]
    pub concurrency: u32,

    /// sequential | parallel
    #[arg(long, default_value = "sequential")]
    pub mode: String,

    /// Read poll settings from this config when present
    #[arg(long)]
    pub config: Option<PathBuf>,
}
