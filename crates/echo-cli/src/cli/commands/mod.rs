use super::args::*;
use echo_core::config::EchoEnv;
use echo_core::errors::EchoError;
use std::path::Path;

pub mod datasets;
pub mod remote;
pub mod run;
pub mod validate;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const TEST_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    pub const REMOTE_FAILURE: i32 = 3;
}

pub async fn dispatch(cli: Cli, env: EchoEnv) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Init(args) => cmd_init(args),
        Command::Validate(args) => validate::run(args),
        Command::Run(args) => run::run(args, &env).await,
        Command::Datasets(args) => datasets::run(args),
        Command::History(args) => datasets::history(args),
        Command::Remote(args) => remote::run(args, &env).await,
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(args: InitArgs) -> anyhow::Result<i32> {
    if args.config.exists() {
        eprintln!("note: {} already exists", args.config.display());
        return Ok(exit_codes::OK);
    }
    ensure_parent_dir(&args.config)?;
    echo_core::config::write_sample_config(&args.config)?;
    eprintln!("created {}", args.config.display());
    Ok(exit_codes::OK)
}

pub(crate) fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub(crate) fn open_store(db: &Path) -> anyhow::Result<echo_core::storage::Store> {
    ensure_parent_dir(db)?;
    let store = echo_core::storage::Store::open(db)?;
    store.init_schema()?;
    Ok(store)
}

/// Maps a lifecycle error to an exit code, printing it once.
pub(crate) fn report_error(e: &EchoError) -> i32 {
    eprintln!("error: {}", e);
    match e {
        EchoError::RemoteSyncFailure(_) => exit_codes::REMOTE_FAILURE,
        e if e.is_config_error() => exit_codes::CONFIG_ERROR,
        EchoError::ConcurrentRunConflict(_) => exit_codes::CONFIG_ERROR,
        _ => exit_codes::TEST_FAILED,
    }
}
