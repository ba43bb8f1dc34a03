use super::executor::CaseExecutor;
use super::progress::{self, ProgressSink};
use crate::errors::EchoError;
use crate::model::{
    CaseResult, Dataset, ExecutionMode, Experiment, ExperimentStatus, TargetAgent, TestCase,
};
use crate::notify::{Notification, Notifier};
use crate::storage::Store;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub mode: ExecutionMode,
    /// Worker bound for parallel mode.
    pub parallel: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            parallel: 4,
        }
    }
}

struct ActiveRun {
    experiment: Arc<Mutex<Experiment>>,
    cancel: CancellationToken,
    /// Flips to `true` once the run has been finalized.
    settled: watch::Receiver<bool>,
}

struct Inner {
    store: Store,
    executor: CaseExecutor,
    notifier: Arc<dyn Notifier>,
    options: OrchestratorOptions,
    active: Mutex<Option<ActiveRun>>,
    updates: watch::Sender<Option<Experiment>>,
}

/// Runs datasets as experiments, one active experiment at a time.
///
/// `run_experiment` returns as soon as the run is registered; progress is
/// observed through [`Orchestrator::subscribe`] or [`Orchestrator::active_experiment`].
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

enum Stop {
    Exhausted,
    Cancelled,
    DatasetDeleted,
}

impl Orchestrator {
    pub fn new(
        store: Store,
        executor: CaseExecutor,
        notifier: Arc<dyn Notifier>,
        options: OrchestratorOptions,
    ) -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                store,
                executor,
                notifier,
                options,
                active: Mutex::new(None),
                updates,
            }),
        }
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Starts a run of `dataset_id` and returns its initial `running` snapshot.
    ///
    /// Fails with `ConcurrentRunConflict` while another experiment is still running.
    pub async fn run_experiment(&self, dataset_id: &str) -> Result<Experiment, EchoError> {
        let dataset = self
            .inner
            .store
            .get_dataset(dataset_id)?
            .ok_or_else(|| EchoError::DatasetNotFound(dataset_id.to_string()))?;
        let agent = self
            .inner
            .store
            .get_agent(&dataset.target_agent_id)?
            .ok_or_else(|| {
                EchoError::Config(format!(
                    "dataset '{}' references unknown target agent '{}'",
                    dataset.id, dataset.target_agent_id
                ))
            })?;

        let (settled_tx, settled) = watch::channel(false);
        let (experiment, shared, cancel) = {
            let mut slot = self.slot();
            if let Some(run) = slot.as_ref() {
                let current = lock(&run.experiment);
                if current.status == ExperimentStatus::Running {
                    return Err(EchoError::ConcurrentRunConflict(current.dataset_id.clone()));
                }
            }
            let experiment = Experiment::start(&dataset);
            let shared = Arc::new(Mutex::new(experiment.clone()));
            let cancel = CancellationToken::new();
            *slot = Some(ActiveRun {
                experiment: shared.clone(),
                cancel: cancel.clone(),
                settled,
            });
            (experiment, shared, cancel)
        };

        tracing::info!(
            event = "echo.experiment.started",
            experiment_id = %experiment.id,
            dataset_id = %dataset.id,
            cases = dataset.test_cases.len(),
            mode = self.inner.options.mode.as_str(),
            "experiment started"
        );
        self.publish(experiment.clone());

        let this = self.clone();
        tokio::spawn(async move {
            this.drive(dataset, agent, shared, cancel).await;
            settled_tx.send_replace(true);
        });
        Ok(experiment)
    }

    /// Marks the running experiment `aborted` and cancels its in-flight case.
    ///
    /// Returns the aborted snapshot, or `None` when nothing was running.
    pub fn stop_experiment(&self) -> Option<Experiment> {
        let snapshot = {
            let slot = self.slot();
            let run = slot.as_ref()?;
            let mut exp = lock(&run.experiment);
            if !exp.finish(ExperimentStatus::Aborted) {
                return None;
            }
            run.cancel.cancel();
            exp.clone()
        };
        tracing::warn!(
            event = "echo.experiment.aborted",
            experiment_id = %snapshot.id,
            "experiment aborted"
        );
        self.publish(snapshot.clone());
        Some(snapshot)
    }

    pub fn active_experiment(&self) -> Option<Experiment> {
        self.slot().as_ref().map(|run| lock(&run.experiment).clone())
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Experiment>> {
        self.inner.updates.subscribe()
    }

    /// Waits until the current run is finalized and returns its final state.
    ///
    /// Any number of callers may wait on the same run. An aborted run is only
    /// returned once its in-flight case has wound down and history is written.
    pub async fn wait(&self) -> Option<Experiment> {
        let (experiment, mut settled) = {
            let slot = self.slot();
            let run = slot.as_ref()?;
            (run.experiment.clone(), run.settled.clone())
        };
        if settled.wait_for(|done| *done).await.is_err() {
            tracing::error!(
                event = "echo.experiment.join_error",
                "run task ended before finalizing"
            );
        }
        let snapshot = lock(&experiment).clone();
        Some(snapshot)
    }

    pub fn history(&self, limit: u32) -> Result<Vec<Experiment>, EchoError> {
        Ok(self.inner.store.history(limit)?)
    }

    async fn drive(
        &self,
        dataset: Dataset,
        agent: TargetAgent,
        shared: Arc<Mutex<Experiment>>,
        cancel: CancellationToken,
    ) {
        let sink = self.progress_sink(shared.clone());
        let stop = match self.inner.options.mode {
            ExecutionMode::Sequential => {
                self.drive_sequential(&dataset, &agent, &shared, &cancel, &sink)
                    .await
            }
            ExecutionMode::Parallel => {
                self.drive_parallel(&dataset, &agent, &shared, &cancel, &sink)
                    .await
            }
        };
        self.finalize(&shared, stop);
    }

    async fn drive_sequential(
        &self,
        dataset: &Dataset,
        agent: &TargetAgent,
        shared: &Arc<Mutex<Experiment>>,
        cancel: &CancellationToken,
        sink: &ProgressSink,
    ) -> Stop {
        for case in &dataset.test_cases {
            if let Some(stop) = self.should_stop(&dataset.id, cancel) {
                return stop;
            }
            self.record(shared, CaseResult::queued(&case.id));
            let result = run_one(&self.inner.executor, case, agent, cancel, sink).await;
            self.record(shared, result);
        }
        Stop::Exhausted
    }

    async fn drive_parallel(
        &self,
        dataset: &Dataset,
        agent: &TargetAgent,
        shared: &Arc<Mutex<Experiment>>,
        cancel: &CancellationToken,
        sink: &ProgressSink,
    ) -> Stop {
        let sem = Arc::new(Semaphore::new(self.inner.options.parallel.max(1)));
        let mut set = JoinSet::new();
        let mut stop = Stop::Exhausted;

        for case in &dataset.test_cases {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                p = sem.clone().acquire_owned() => p.ok(),
            };
            let Some(permit) = permit else {
                stop = Stop::Cancelled;
                break;
            };
            if let Some(s) = self.should_stop(&dataset.id, cancel) {
                stop = s;
                break;
            }

            self.record(shared, CaseResult::queued(&case.id));
            let executor = self.inner.executor.clone();
            let case = case.clone();
            let agent = agent.clone();
            let cancel = cancel.clone();
            let sink = sink.clone();
            set.spawn(async move {
                let _permit = permit;
                run_one(&executor, &case, &agent, &cancel, &sink).await
            });
        }

        // completion order, not dataset order
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => self.record(shared, result),
                Err(e) => {
                    tracing::error!(event = "echo.case.join_error", error = %e, "case task failed")
                }
            }
        }
        stop
    }

    fn should_stop(&self, dataset_id: &str, cancel: &CancellationToken) -> Option<Stop> {
        if cancel.is_cancelled() {
            return Some(Stop::Cancelled);
        }
        match self.inner.store.dataset_exists(dataset_id) {
            Ok(true) => None,
            Ok(false) => {
                tracing::warn!(
                    event = "echo.experiment.dataset_deleted",
                    dataset_id = %dataset_id,
                    "dataset deleted mid-run; no further cases will start"
                );
                Some(Stop::DatasetDeleted)
            }
            Err(e) => {
                // keep going on a store hiccup; the dataset snapshot is already loaded
                tracing::warn!(event = "echo.store.error", error = %e, "dataset lookup failed");
                None
            }
        }
    }

    fn record(&self, shared: &Arc<Mutex<Experiment>>, result: CaseResult) {
        let snapshot = {
            let mut exp = lock(shared);
            exp.results.insert(result.case_id.clone(), result);
            exp.clone()
        };
        self.publish(snapshot);
    }

    fn finalize(&self, shared: &Arc<Mutex<Experiment>>, stop: Stop) {
        let snapshot = {
            let mut exp = lock(shared);
            match stop {
                Stop::Exhausted => {
                    exp.finish(ExperimentStatus::Completed);
                }
                Stop::DatasetDeleted => {
                    exp.finish(ExperimentStatus::Failed);
                }
                // stop_experiment already moved it to aborted
                Stop::Cancelled => {
                    exp.finish(ExperimentStatus::Aborted);
                }
            }
            exp.clone()
        };

        tracing::info!(
            event = "echo.experiment.finished",
            experiment_id = %snapshot.id,
            status = snapshot.status.as_str(),
            passed = snapshot.passed_count(),
            total = snapshot.total_cases,
            "experiment finished"
        );

        if snapshot.status == ExperimentStatus::Completed {
            self.inner
                .notifier
                .notify(&Notification::for_experiment(&snapshot));
        }

        if matches!(stop, Stop::DatasetDeleted) {
            tracing::info!(
                event = "echo.history.skipped",
                experiment_id = %snapshot.id,
                "dataset deleted; experiment not kept in history"
            );
        } else if let Err(e) = self.inner.store.append_history(&snapshot) {
            tracing::error!(
                event = "echo.history.error",
                error = %e,
                "failed to persist experiment"
            );
        }

        self.publish(snapshot);
    }

    fn progress_sink(&self, shared: Arc<Mutex<Experiment>>) -> ProgressSink {
        let inner = self.inner.clone();
        Arc::new(move |event| {
            let snapshot = {
                let mut exp = lock(&shared);
                progress::apply(&mut exp, event);
                exp.clone()
            };
            inner.updates.send_replace(Some(snapshot));
        })
    }

    fn publish(&self, snapshot: Experiment) {
        self.inner.updates.send_replace(Some(snapshot));
    }

    fn slot(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_one(
    executor: &CaseExecutor,
    case: &TestCase,
    agent: &TargetAgent,
    cancel: &CancellationToken,
    sink: &ProgressSink,
) -> CaseResult {
    match executor.run_case(case, agent, cancel, Some(sink)).await {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(
                event = "echo.case.rejected",
                case_id = %case.id,
                error = %e,
                "case rejected"
            );
            CaseResult::rejected(&case.id, e.to_string())
        }
    }
}

fn lock(exp: &Mutex<Experiment>) -> MutexGuard<'_, Experiment> {
    exp.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::ExecutorPolicy;
    use crate::model::{AgentConfig, AgentKind, CaseStatus, TestStep};
    use crate::notify::{ChannelNotifier, NotificationLevel};
    use crate::providers::agent::scripted::ScriptedAgent;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn setup(cases: usize, steps: usize) -> (Orchestrator, UnboundedReceiver<Notification>) {
        let store = Store::memory().unwrap();
        store.init_schema().unwrap();
        store
            .put_agent(&TargetAgent {
                id: "bot".into(),
                name: "bot".into(),
                kind: AgentKind::Http,
                config: AgentConfig::default(),
            })
            .unwrap();
        let test_cases = (0..cases)
            .map(|i| {
                let steps = (0..steps).map(|s| TestStep::speak(&format!("turn {}", s))).collect();
                TestCase::new(&format!("c{}", i), steps, vec![])
            })
            .collect();
        store
            .add_dataset(Dataset {
                id: "ds".into(),
                name: "ds".into(),
                description: String::new(),
                target_agent_id: "bot".into(),
                user_agent_id: None,
                created_at: chrono::Utc::now(),
                test_cases,
            })
            .unwrap();

        let agent = Arc::new(ScriptedAgent::new(Duration::from_millis(800)));
        let executor = CaseExecutor::new(agent, vec![], ExecutorPolicy::default());
        let (notifier, rx) = ChannelNotifier::channel();
        let orch = Orchestrator::new(
            store,
            executor,
            Arc::new(notifier),
            OrchestratorOptions::default(),
        );
        (orch, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_running_then_completes() {
        let (orch, mut rx) = setup(2, 1);
        let started = orch.run_experiment("ds").await.unwrap();
        assert_eq!(started.status, ExperimentStatus::Running);
        assert!(started.results.is_empty());

        let done = orch.wait().await.unwrap();
        assert_eq!(done.status, ExperimentStatus::Completed);
        assert!(done.completed_at.is_some());
        assert_eq!(
            done.results.keys().cloned().collect::<Vec<_>>(),
            vec!["c0".to_string(), "c1".to_string()]
        );
        assert_eq!(rx.try_recv().unwrap().level, NotificationLevel::Success);

        let history = orch.history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, done.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_all_see_final_state() {
        let (orch, _rx) = setup(2, 1);
        orch.run_experiment("ds").await.unwrap();

        let (a, b) = tokio::join!(orch.wait(), orch.wait());
        for done in [a.unwrap(), b.unwrap()] {
            assert_eq!(done.status, ExperimentStatus::Completed);
            assert_eq!(done.results.len(), 2);
        }
        assert_eq!(orch.history(10).unwrap().len(), 1);

        // waiting again after settlement returns immediately
        let again = orch.wait().await.unwrap();
        assert_eq!(again.status, ExperimentStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_dataset() {
        let (orch, _rx) = setup(1, 1);
        let err = orch.run_experiment("nope").await.unwrap_err();
        assert!(matches!(err, EchoError::DatasetNotFound(_)));
        assert!(orch.active_experiment().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_is_rejected_while_running() {
        let (orch, _rx) = setup(1, 1);
        orch.run_experiment("ds").await.unwrap();
        let err = orch.run_experiment("ds").await.unwrap_err();
        assert!(matches!(err, EchoError::ConcurrentRunConflict(ref d) if d == "ds"));

        orch.wait().await;
        // finished runs free the slot
        orch.run_experiment("ds").await.unwrap();
        orch.wait().await;
        assert_eq!(orch.history(10).unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_in_flight_case() {
        let (orch, mut rx) = setup(3, 2);
        orch.run_experiment("ds").await.unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;

        let stopped = orch.stop_experiment().unwrap();
        assert_eq!(stopped.status, ExperimentStatus::Aborted);
        assert!(orch.stop_experiment().is_none());

        let done = orch.wait().await.unwrap();
        assert_eq!(done.status, ExperimentStatus::Aborted);
        assert_eq!(done.results.len(), 1);
        let c0 = &done.results["c0"];
        assert_eq!(c0.status, CaseStatus::Failed);
        assert_eq!(c0.error.as_deref(), Some("aborted"));
        // aborted runs do not notify
        assert!(rx.try_recv().is_err());
        assert_eq!(orch.history(10).unwrap()[0].status, ExperimentStatus::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_dataset_stops_new_cases() {
        let (orch, _rx) = setup(3, 1);
        orch.run_experiment("ds").await.unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(orch.store().delete_dataset("ds").unwrap());

        let done = orch.wait().await.unwrap();
        assert_eq!(done.status, ExperimentStatus::Failed);
        // c1 was already running and finished; c2 never started
        assert_eq!(done.results.len(), 2);
        assert!(done.results["c1"].status.is_terminal());
        assert!(!done.results.contains_key("c2"));
        assert!(orch.history(10).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_progress() {
        let (orch, _rx) = setup(1, 2);
        let mut updates = orch.subscribe();
        orch.run_experiment("ds").await.unwrap();
        tokio::time::sleep(Duration::from_millis(900)).await;

        let live = updates.borrow_and_update().clone().unwrap();
        let c0 = &live.results["c0"];
        assert_eq!(c0.status, CaseStatus::Running);
        // first exchange plus the second tester turn
        assert_eq!(c0.transcript.len(), 3);
        orch.wait().await;
    }
}
