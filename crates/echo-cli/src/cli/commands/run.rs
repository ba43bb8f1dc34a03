use super::{exit_codes, open_store, report_error};
use crate::cli::args::RunArgs;
use echo_core::config::{load_config, EchoConfig, EchoEnv, JudgeConfig};
use echo_core::engine::executor::{CaseExecutor, ExecutorPolicy};
use echo_core::engine::orchestrator::{Orchestrator, OrchestratorOptions};
use echo_core::judge::{Judge, JudgeRuntimeConfig, LlmJudge};
use echo_core::model::{ExecutionMode, Experiment, ExperimentStatus};
use echo_core::notify::TracingNotifier;
use echo_core::providers::agent::http::HttpAgent;
use echo_core::providers::agent::scripted::ScriptedAgent;
use echo_core::providers::agent::AgentRouter;
use echo_core::providers::llm::fake::FakeClient;
use echo_core::providers::llm::openai::OpenAIClient;
use echo_core::providers::llm::LlmClient;
use echo_core::report::{console, json};
use echo_core::storage::judge_cache::JudgeCache;
use echo_core::storage::Store;
use std::sync::Arc;

pub async fn run(args: RunArgs, env: &EchoEnv) -> anyhow::Result<i32> {
    let cfg = match load_config(&args.config, args.strict) {
        Ok(c) => c,
        Err(e) => return Ok(report_error(&e)),
    };

    let dataset_id = match pick_dataset(&cfg, args.dataset.as_deref()) {
        Ok(id) => id,
        Err(msg) => {
            eprintln!("config error: {}", msg);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let mode = match args.mode.as_deref() {
        Some(m) => match ExecutionMode::parse(m) {
            Some(mode) => mode,
            None => {
                eprintln!("config error: unknown execution mode '{}'", m);
                return Ok(exit_codes::CONFIG_ERROR);
            }
        },
        None => cfg.settings.execution_mode.unwrap_or_default(),
    };

    let store = open_store(&args.db)?;
    import(&store, &cfg)?;

    let mut router = AgentRouter::new(Arc::new(HttpAgent::new()));
    if args.simulate {
        router = router.with_simulator(Arc::new(ScriptedAgent::new(cfg.settings.turn_delay())));
    }
    let mut executor = CaseExecutor::new(
        Arc::new(router),
        echo_metrics::default_evaluators(),
        ExecutorPolicy::from_settings(&cfg.settings),
    );
    let judge_cfg = cfg.settings.judge.clone().unwrap_or_default();
    match build_judge(&judge_cfg, env, &store, args.judge_refresh) {
        Ok(Some(judge)) => executor = executor.with_judge(judge),
        Ok(None) => {}
        Err(e) => {
            eprintln!("config error: {:#}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    }

    let orch = Orchestrator::new(
        store,
        executor,
        Arc::new(TracingNotifier),
        OrchestratorOptions {
            mode,
            parallel: args.parallel.or(cfg.settings.parallel).unwrap_or(4),
        },
    );

    if let Err(e) = orch.run_experiment(&dataset_id).await {
        return Ok(report_error(&e));
    }

    let done = orch.wait();
    tokio::pin!(done);
    let exp = loop {
        tokio::select! {
            exp = &mut done => break exp,
            _ = tokio::signal::ctrl_c() => {
                if orch.stop_experiment().is_some() {
                    eprintln!("stopping: waiting for the current case to wind down");
                }
            }
        }
    };
    let Some(exp) = exp else {
        anyhow::bail!("experiment vanished before it finished");
    };

    console::print_summary(&exp);
    if let Some(out) = &args.out {
        json::write_json(&exp, out)?;
        eprintln!("wrote {}", out.display());
    }
    Ok(decide_exit_code(&exp))
}

fn pick_dataset(cfg: &EchoConfig, requested: Option<&str>) -> Result<String, String> {
    match requested {
        Some(r) => cfg
            .dataset(r)
            .map(|d| d.id.clone())
            .ok_or_else(|| format!("dataset '{}' is not defined in the config", r)),
        None => match cfg.datasets.as_slice() {
            [only] => Ok(only.id.clone()),
            [] => Err("config defines no datasets".into()),
            _ => Err("config defines several datasets; pick one with --dataset".into()),
        },
    }
}

/// The config file is the source of truth: its agents and datasets replace stored copies.
fn import(store: &Store, cfg: &EchoConfig) -> anyhow::Result<()> {
    for agent in &cfg.agents {
        store.put_agent(agent)?;
    }
    for ds in &cfg.datasets {
        store.save_dataset(ds)?;
    }
    tracing::debug!(
        event = "echo.config.imported",
        agents = cfg.agents.len(),
        datasets = cfg.datasets.len(),
        "config imported into store"
    );
    Ok(())
}

fn build_judge(
    cfg: &JudgeConfig,
    env: &EchoEnv,
    store: &Store,
    refresh: bool,
) -> anyhow::Result<Option<Arc<dyn Judge>>> {
    let provider = cfg.provider.as_deref().unwrap_or("none");
    let client: Arc<dyn LlmClient> = match provider {
        "none" => return Ok(None),
        "fake" => Arc::new(FakeClient::always(
            r#"{"passed": true, "rationale": "fake judge"}"#,
        )),
        "openai" => {
            let key = env
                .openai_api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("judge provider openai needs OPENAI_API_KEY"))?;
            let model = cfg.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
            Arc::new(OpenAIClient::new(
                model,
                key,
                cfg.temperature.unwrap_or(0.0),
                800,
            ))
        }
        other => anyhow::bail!("unknown judge provider: {}", other),
    };

    let runtime = JudgeRuntimeConfig {
        samples: cfg.samples.unwrap_or(1),
        refresh,
    };
    let judge: Arc<dyn Judge> = Arc::new(LlmJudge::new(
        runtime,
        Some(JudgeCache::new(store.clone())),
        client,
    ));
    Ok(Some(judge))
}

fn decide_exit_code(exp: &Experiment) -> i32 {
    let all_passed = exp.passed_count() == exp.total_cases;
    if exp.status == ExperimentStatus::Completed && all_passed {
        exit_codes::OK
    } else {
        exit_codes::TEST_FAILED
    }
}
