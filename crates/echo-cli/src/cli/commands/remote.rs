use super::{exit_codes, report_error};
use crate::cli::args::{RemoteArgs, RemoteRunArgs, RemoteSub};
use echo_core::config::{load_config, EchoEnv};
use echo_core::errors::EchoError;
use echo_core::model::ExecutionMode;
use echo_core::notify::TracingNotifier;
use echo_core::remote::api::{NewTestSuite, RunRequest, SuiteBackend, SuitePatch};
use echo_core::remote::{HttpBackend, Reconciler, ReconcilerConfig, SuiteStatus};
use echo_core::report::console;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn run(args: RemoteArgs, env: &EchoEnv) -> anyhow::Result<i32> {
    let Some(url) = args.backend_url.clone().or_else(|| env.backend_url.clone()) else {
        eprintln!("config error: set --backend-url or ECHO_BACKEND_URL");
        return Ok(exit_codes::CONFIG_ERROR);
    };
    let Some(user_id) = args.user_id.clone().or_else(|| env.user_id.clone()) else {
        eprintln!("config error: set --user-id or ECHO_USER_ID");
        return Ok(exit_codes::CONFIG_ERROR);
    };
    let backend = Arc::new(HttpBackend::new(&url)?);

    let outcome = match args.cmd {
        RemoteSub::Run(run_args) => return run_suite(backend, &user_id, run_args, env).await,
        RemoteSub::Runs => backend
            .list_runs(&user_id)
            .await
            .map(|runs| console::print_remote_runs(&runs)),
        RemoteSub::Suites => backend.list_suites(&user_id).await.map(|suites| {
            for s in suites {
                println!(
                    "{:<24} {:<24} agent={}",
                    s.id,
                    s.name,
                    s.target_agent_id.as_deref().unwrap_or("-")
                );
            }
        }),
        RemoteSub::Show { suite } => backend.suite_details(&suite).await.map(|d| {
            println!("{} ({}) status={}", d.name, d.id, d.suite_status.as_str());
            for c in &d.test_cases {
                println!(
                    "  {:<24} {} steps, {} conditions",
                    c.id,
                    c.steps.len(),
                    c.conditions.len()
                );
            }
        }),
        RemoteSub::Create { name, description } => backend
            .create_suite(&user_id, &NewTestSuite { name, description })
            .await
            .map(|id| println!("{}", id)),
        RemoteSub::Update {
            suite,
            name,
            description,
            target_agent,
            user_agent,
        } => {
            let patch = SuitePatch {
                name,
                description,
                target_agent_id: target_agent,
                user_agent_id: user_agent,
            };
            backend
                .update_suite(&suite, &patch)
                .await
                .map(|()| eprintln!("updated {}", suite))
        }
        RemoteSub::Delete { suite } => backend
            .delete_suite(&suite)
            .await
            .map(|()| eprintln!("deleted {}", suite)),
        RemoteSub::RunCase {
            case,
            concurrent_calls,
        } => backend
            .run_single(&case, &user_id, concurrent_calls.max(1))
            .await
            .map(|s| println!("{} {}", s.case_id, s.status)),
    };

    match outcome {
        Ok(()) => Ok(exit_codes::OK),
        Err(e) => Ok(report_error(&EchoError::RemoteSyncFailure(format!("{:#}", e)))),
    }
}

async fn run_suite(
    backend: Arc<HttpBackend>,
    user_id: &str,
    args: RemoteRunArgs,
    env: &EchoEnv,
) -> anyhow::Result<i32> {
    let Some(mode) = ExecutionMode::parse(&args.mode) else {
        eprintln!("config error: unknown execution mode '{}'", args.mode);
        return Ok(exit_codes::CONFIG_ERROR);
    };

    let mut config = ReconcilerConfig::default();
    if let Some(path) = &args.config {
        match load_config(path, false) {
            Ok(cfg) => {
                config.poll_interval = cfg.settings.poll_interval();
                if let Some(n) = cfg.settings.max_poll_failures {
                    config.max_poll_failures = n;
                }
            }
            Err(e) => return Ok(report_error(&e)),
        }
    }
    if let Some(secs) = env.poll_interval_secs {
        config.poll_interval = Duration::from_secs(secs.max(1));
    }

    let reconciler = Reconciler::new(backend, Arc::new(TracingNotifier), config);
    let request = RunRequest {
        user_id: user_id.to_string(),
        concurrency: args.concurrency.max(1),
        execution_mode: mode,
    };

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let outcome = reconciler
        .run_and_reconcile(&args.suite, &request, &cancel)
        .await;
    watcher.abort();

    let view = match outcome {
        Ok(v) => v,
        Err(e) => return Ok(report_error(&e)),
    };
    let status = view.status.map(|s| s.as_str()).unwrap_or("unknown");
    eprintln!(
        "suite {}: {} after {} polls",
        view.suite_id, status, view.polls
    );
    Ok(match view.status {
        Some(SuiteStatus::Completed) => exit_codes::OK,
        Some(SuiteStatus::Failed) => exit_codes::TEST_FAILED,
        // stopped before the backend settled
        _ => exit_codes::REMOTE_FAILURE,
    })
}
