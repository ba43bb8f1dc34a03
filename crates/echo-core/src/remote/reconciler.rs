use super::api::{RunRequest, SuiteBackend, SuiteStatus, TestSuiteDetails};
use crate::errors::EchoError;
use crate::notify::{Notification, Notifier};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub poll_interval: Duration,
    /// Consecutive failed polls before a warning notification goes out.
    pub max_poll_failures: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_poll_failures: 3,
        }
    }
}

/// Local mirror of one remote suite. Never shares state with a local `Experiment`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RemoteView {
    pub suite_id: String,
    pub status: Option<SuiteStatus>,
    pub details: Option<TestSuiteDetails>,
    pub polls: u32,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl RemoteView {
    fn new(suite_id: &str) -> Self {
        Self {
            suite_id: suite_id.to_string(),
            status: None,
            details: None,
            polls: 0,
            consecutive_failures: 0,
            last_error: None,
        }
    }

    /// True once the backend reported `completed` or `failed`.
    pub fn is_settled(&self) -> bool {
        self.status.is_some_and(|s| !s.is_in_flight())
    }
}

struct Inner {
    backend: Arc<dyn SuiteBackend>,
    notifier: Arc<dyn Notifier>,
    config: ReconcilerConfig,
    in_flight: Mutex<HashSet<String>>,
    views: Mutex<HashMap<String, RemoteView>>,
    updates: watch::Sender<Option<RemoteView>>,
}

/// Polls the backend for suite status while a remote run is in flight.
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

pub struct ReconcileHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<RemoteView, EchoError>>,
}

impl ReconcileHandle {
    /// Stops polling after the current tick.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<RemoteView, EchoError> {
        self.task
            .await
            .map_err(|e| EchoError::Other(anyhow::anyhow!("reconcile task failed: {}", e)))?
    }
}

struct SuiteGuard {
    inner: Arc<Inner>,
    suite_id: String,
}

impl Drop for SuiteGuard {
    fn drop(&mut self) {
        lock(&self.inner.in_flight).remove(&self.suite_id);
    }
}

impl Reconciler {
    pub fn new(
        backend: Arc<dyn SuiteBackend>,
        notifier: Arc<dyn Notifier>,
        config: ReconcilerConfig,
    ) -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                backend,
                notifier,
                config,
                in_flight: Mutex::new(HashSet::new()),
                views: Mutex::new(HashMap::new()),
                updates,
            }),
        }
    }

    pub fn view(&self, suite_id: &str) -> Option<RemoteView> {
        lock(&self.inner.views).get(suite_id).cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<RemoteView>> {
        self.inner.updates.subscribe()
    }

    /// Starts a remote run of `suite_id`, then polls until it settles.
    pub async fn run_and_reconcile(
        &self,
        suite_id: &str,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RemoteView, EchoError> {
        let _guard = self.claim(suite_id)?;
        self.inner
            .backend
            .run_suite(suite_id, request)
            .await
            .map_err(|e| {
                EchoError::RemoteSyncFailure(format!("run suite '{}': {:#}", suite_id, e))
            })?;
        tracing::info!(
            event = "echo.remote.run_started",
            suite_id = %suite_id,
            concurrency = request.concurrency,
            mode = request.execution_mode.as_str(),
            "remote run requested"
        );
        self.poll_until_settled(suite_id, cancel).await
    }

    /// Polls `suite_id` until it leaves queued/running or `cancel` fires.
    pub async fn reconcile(
        &self,
        suite_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RemoteView, EchoError> {
        let _guard = self.claim(suite_id)?;
        self.poll_until_settled(suite_id, cancel).await
    }

    pub fn spawn(&self, suite_id: &str) -> ReconcileHandle {
        let cancel = CancellationToken::new();
        let this = self.clone();
        let id = suite_id.to_string();
        let token = cancel.clone();
        let task = tokio::spawn(async move { this.reconcile(&id, &token).await });
        ReconcileHandle { cancel, task }
    }

    fn claim(&self, suite_id: &str) -> Result<SuiteGuard, EchoError> {
        let mut set = lock(&self.inner.in_flight);
        if !set.insert(suite_id.to_string()) {
            return Err(EchoError::ConcurrentRunConflict(suite_id.to_string()));
        }
        Ok(SuiteGuard {
            inner: self.inner.clone(),
            suite_id: suite_id.to_string(),
        })
    }

    async fn poll_until_settled(
        &self,
        suite_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RemoteView, EchoError> {
        let mut view = self.view(suite_id).unwrap_or_else(|| RemoteView::new(suite_id));
        view.consecutive_failures = 0;

        let mut ticker = tokio::time::interval(self.inner.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(
                        event = "echo.remote.poll_stopped",
                        suite_id = %suite_id,
                        "polling cancelled"
                    );
                    return Ok(view);
                }
                _ = ticker.tick() => {}
            }

            view.polls += 1;
            match self.inner.backend.suite_details(suite_id).await {
                Ok(details) => {
                    view.status = Some(details.suite_status);
                    view.details = Some(details);
                    view.consecutive_failures = 0;
                    view.last_error = None;
                    tracing::debug!(
                        event = "echo.remote.polled",
                        suite_id = %suite_id,
                        status = view.status.map(|s| s.as_str()).unwrap_or(""),
                        "suite polled"
                    );
                }
                Err(e) => {
                    let err = EchoError::RemoteSyncFailure(format!("{:#}", e));
                    view.consecutive_failures += 1;
                    view.last_error = Some(err.to_string());
                    tracing::warn!(
                        event = "echo.remote.poll_failed",
                        suite_id = %suite_id,
                        failures = view.consecutive_failures,
                        error = %err,
                        "status poll failed; retrying next tick"
                    );
                    if view.consecutive_failures == self.inner.config.max_poll_failures {
                        self.inner.notifier.notify(&Notification::warning(
                            "Remote sync failing",
                            format!(
                                "suite {}: {} consecutive status polls failed",
                                suite_id, view.consecutive_failures
                            ),
                        ));
                    }
                }
            }
            self.store_view(&view);

            if view.is_settled() {
                tracing::info!(
                    event = "echo.remote.settled",
                    suite_id = %suite_id,
                    status = view.status.map(|s| s.as_str()).unwrap_or(""),
                    polls = view.polls,
                    "remote suite settled"
                );
                return Ok(view);
            }
        }
    }

    fn store_view(&self, view: &RemoteView) {
        lock(&self.inner.views).insert(view.suite_id.clone(), view.clone());
        self.inner.updates.send_replace(Some(view.clone()));
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
