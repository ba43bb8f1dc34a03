use async_trait::async_trait;
use echo_core::model::ExecutionMode;
use echo_core::notify::ChannelNotifier;
use echo_core::remote::api::{
    ApiTestRun, ApiTestSuite, NewTestSuite, RunRequest, SingleTestStatus, SuiteBackend,
    SuitePatch, SuiteStatus, TestSuiteDetails,
};
use echo_core::remote::{HttpBackend, Reconciler, ReconcilerConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct ScriptedBackend {
    statuses: Vec<SuiteStatus>,
    polls: Mutex<Vec<tokio::time::Instant>>,
    runs: AtomicUsize,
}

impl ScriptedBackend {
    fn new(statuses: Vec<SuiteStatus>) -> Arc<Self> {
        Arc::new(Self {
            statuses,
            polls: Mutex::new(Vec::new()),
            runs: AtomicUsize::new(0),
        })
    }

    fn poll_times(&self) -> Vec<tokio::time::Instant> {
        self.polls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SuiteBackend for ScriptedBackend {
    async fn list_suites(&self, _: &str) -> anyhow::Result<Vec<ApiTestSuite>> {
        Ok(vec![])
    }

    async fn suite_details(&self, suite_id: &str) -> anyhow::Result<TestSuiteDetails> {
        let mut polls = self.polls.lock().unwrap();
        let idx = polls.len().min(self.statuses.len() - 1);
        polls.push(tokio::time::Instant::now());
        Ok(TestSuiteDetails {
            id: suite_id.into(),
            name: "support".into(),
            suite_status: self.statuses[idx],
            target_agent: None,
            user_agent: None,
            test_cases: vec![],
        })
    }

    async fn create_suite(&self, _: &str, _: &NewTestSuite) -> anyhow::Result<String> {
        Ok("s-new".into())
    }

    async fn update_suite(&self, _: &str, _: &SuitePatch) -> anyhow::Result<()> {
        Ok(())
    }

    async fn delete_suite(&self, _: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn run_suite(&self, _: &str, _: &RunRequest) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run_single(&self, case_id: &str, _: &str, _: u32) -> anyhow::Result<SingleTestStatus> {
        Ok(SingleTestStatus {
            status: "queued".into(),
            case_id: case_id.into(),
        })
    }

    async fn list_runs(&self, _: &str) -> anyhow::Result<Vec<ApiTestRun>> {
        Ok(vec![])
    }
}

fn request() -> RunRequest {
    RunRequest {
        user_id: "u1".into(),
        concurrency: 2,
        execution_mode: ExecutionMode::Parallel,
    }
}

#[tokio::test(start_paused = true)]
async fn test_polling_stops_once_suite_leaves_running() {
    use SuiteStatus::*;
    let backend = ScriptedBackend::new(vec![Running, Running, Completed]);
    let (notifier, _rx) = ChannelNotifier::channel();
    let rec = Reconciler::new(backend.clone(), Arc::new(notifier), ReconcilerConfig::default());

    let view = rec
        .run_and_reconcile("s1", &request(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(view.status, Some(Completed));
    assert_eq!(backend.runs.load(Ordering::SeqCst), 1);

    // give any stray timer a chance to fire
    tokio::time::sleep(Duration::from_secs(60)).await;
    let polls = backend.poll_times();
    assert_eq!(polls.len(), 3);
    assert_eq!(polls[1] - polls[0], Duration::from_secs(10));
    assert_eq!(polls[2] - polls[1], Duration::from_secs(10));
    assert_eq!(rec.view("s1").unwrap().polls, 3);
}

#[tokio::test(start_paused = true)]
async fn test_queued_suite_keeps_polling() {
    use SuiteStatus::*;
    let backend = ScriptedBackend::new(vec![Queued, Running, Failed]);
    let (notifier, _rx) = ChannelNotifier::channel();
    let rec = Reconciler::new(backend.clone(), Arc::new(notifier), ReconcilerConfig::default());

    let view = rec.reconcile("s1", &CancellationToken::new()).await.unwrap();
    assert_eq!(view.status, Some(Failed));
    assert!(view.is_settled());
    assert_eq!(backend.poll_times().len(), 3);
}

#[tokio::test]
async fn test_http_backend_polled_exactly_three_times() {
    let mut server = mockito::Server::new_async().await;
    let served = Arc::new(AtomicUsize::new(0));
    let counter = served.clone();
    let details = server
        .mock("GET", "/test-suites/s1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body_from_request(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let status = if n < 2 { "running" } else { "completed" };
            format!(r#"{{"id": "s1", "name": "support", "suite_status": "{}"}}"#, status).into()
        })
        .expect(3)
        .create_async()
        .await;
    let run = server
        .mock("POST", "/test-suites/s1/run")
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let backend = Arc::new(HttpBackend::new(&server.url()).unwrap());
    let (notifier, _rx) = ChannelNotifier::channel();
    let rec = Reconciler::new(
        backend,
        Arc::new(notifier),
        ReconcilerConfig {
            poll_interval: Duration::from_millis(20),
            max_poll_failures: 3,
        },
    );

    let view = rec
        .run_and_reconcile("s1", &request(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(view.status, Some(SuiteStatus::Completed));

    tokio::time::sleep(Duration::from_millis(100)).await;
    details.assert_async().await;
    run.assert_async().await;
    assert_eq!(served.load(Ordering::SeqCst), 3);
}
