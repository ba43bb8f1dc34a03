use super::progress::{ProgressEvent, ProgressSink};
use crate::config::Settings;
use crate::errors::EchoError;
use crate::judge::Judge;
use crate::metrics_api::{EvalContext, Evaluator, Verdict};
use crate::model::{
    AttemptRow, AttemptsMode, CaseResult, CaseStatus, EmptyConditionsPolicy, Role, RubricResult,
    TargetAgent, TestCase, TestMessage,
};
use crate::providers::agent::AgentClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ExecutorPolicy {
    pub default_timeout: Duration,
    pub attempts: AttemptsMode,
    pub min_pass_rate: f64,
    pub empty_conditions: EmptyConditionsPolicy,
    pub case_sensitive: bool,
}

impl Default for ExecutorPolicy {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            attempts: AttemptsMode::Retry,
            min_pass_rate: 1.0,
            empty_conditions: EmptyConditionsPolicy::Pass,
            case_sensitive: false,
        }
    }
}

impl ExecutorPolicy {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            default_timeout: s.default_timeout(),
            attempts: s.attempts.unwrap_or_default(),
            min_pass_rate: s.min_pass_rate.unwrap_or(1.0),
            empty_conditions: s.empty_conditions.unwrap_or_default(),
            case_sensitive: s.case_sensitive.unwrap_or(false),
        }
    }
}

enum Interruption {
    Aborted,
    Timeout,
    Unreachable(String),
}

impl Interruption {
    fn reason(&self) -> String {
        match self {
            Interruption::Aborted => "aborted".into(),
            Interruption::Timeout => EchoError::Timeout.to_string(),
            Interruption::Unreachable(e) => EchoError::AgentUnreachable(e.clone()).to_string(),
        }
    }
}

struct AttemptOutcome {
    transcript: Vec<TestMessage>,
    rubrics: Vec<RubricResult>,
    error: Option<String>,
    duration_ms: u64,
    aborted: bool,
}

impl AttemptOutcome {
    fn passed(&self) -> bool {
        self.error.is_none() && self.rubrics.iter().all(|r| r.passed)
    }
}

/// Drives one test case through a turn-by-turn conversation and grades it.
#[derive(Clone)]
pub struct CaseExecutor {
    agents: Arc<dyn AgentClient>,
    evaluators: Vec<Arc<dyn Evaluator>>,
    judge: Option<Arc<dyn Judge>>,
    policy: ExecutorPolicy,
}

impl CaseExecutor {
    pub fn new(
        agents: Arc<dyn AgentClient>,
        evaluators: Vec<Arc<dyn Evaluator>>,
        policy: ExecutorPolicy,
    ) -> Self {
        Self {
            agents,
            evaluators,
            judge: None,
            policy,
        }
    }

    pub fn with_judge(mut self, judge: Arc<dyn Judge>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn policy(&self) -> &ExecutorPolicy {
        &self.policy
    }

    /// Runs `case` against `agent` and returns its terminal result.
    ///
    /// Only a malformed case is an error. Timeouts, dropped connections and
    /// cancellation all produce a failed `CaseResult` with `error` set.
    pub async fn run_case(
        &self,
        case: &TestCase,
        agent: &TargetAgent,
        cancel: &CancellationToken,
        progress: Option<&ProgressSink>,
    ) -> Result<CaseResult, EchoError> {
        case.validate(self.policy.empty_conditions)?;
        // the definition may change in the store while we run
        let case = case.clone();
        let started = Instant::now();
        // one wall-clock budget for the whole case, shared by every attempt
        let budget = case
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.policy.default_timeout);
        let deadline = started + budget;

        emit(
            progress,
            ProgressEvent::CaseStarted {
                case_id: case.id.clone(),
            },
        );
        tracing::info!(
            event = "echo.case.started",
            case_id = %case.id,
            agent = %agent.id,
            transport = self.agents.provider_name(),
            steps = case.steps.len(),
            attempts = case.attempts,
            "case started"
        );

        let mut outcomes: Vec<AttemptOutcome> = Vec::new();
        for attempt in 1..=case.attempts.max(1) {
            if attempt > 1 {
                if cancel.is_cancelled() || Instant::now() >= deadline {
                    break;
                }
                emit(
                    progress,
                    ProgressEvent::AttemptStarted {
                        case_id: case.id.clone(),
                        attempt,
                    },
                );
            }
            let outcome = self
                .run_attempt(&case, agent, deadline, cancel, progress)
                .await;
            let stop = outcome.aborted
                || (self.policy.attempts == AttemptsMode::Retry && outcome.passed());
            outcomes.push(outcome);
            if stop {
                break;
            }
        }

        let result = self.fold(&case, outcomes, started.elapsed());
        tracing::info!(
            event = "echo.case.finished",
            case_id = %result.case_id,
            status = ?result.status,
            duration_ms = result.duration_ms,
            error = result.error.as_deref().unwrap_or(""),
            "case finished"
        );
        Ok(result)
    }

    async fn run_attempt(
        &self,
        case: &TestCase,
        agent: &TargetAgent,
        deadline: Instant,
        cancel: &CancellationToken,
        progress: Option<&ProgressSink>,
    ) -> AttemptOutcome {
        let started = Instant::now();
        let mut transcript = Vec::with_capacity(case.steps.len() * 2);

        let mut interrupted = {
            let conversation = self.converse(case, agent, started, &mut transcript, progress);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Some(Interruption::Aborted),
                res = tokio::time::timeout_at(deadline, conversation) => match res {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(Interruption::Unreachable(format!("{:#}", e))),
                    Err(_) => Some(Interruption::Timeout),
                },
            }
        };

        let rubrics = match interrupted {
            None => {
                let evaluation =
                    tokio::time::timeout_at(deadline, self.evaluate(case, &transcript));
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        interrupted = Some(Interruption::Aborted);
                        not_evaluated(case, "aborted")
                    }
                    res = evaluation => match res {
                        Ok(rubrics) => rubrics,
                        Err(_) => {
                            interrupted = Some(Interruption::Timeout);
                            not_evaluated(case, "timeout")
                        }
                    },
                }
            }
            Some(ref i) => not_evaluated(case, &i.reason()),
        };

        AttemptOutcome {
            transcript,
            rubrics,
            error: interrupted.as_ref().map(Interruption::reason),
            duration_ms: started.elapsed().as_millis() as u64,
            aborted: matches!(interrupted, Some(Interruption::Aborted)),
        }
    }

    async fn converse(
        &self,
        case: &TestCase,
        agent: &TargetAgent,
        started: Instant,
        transcript: &mut Vec<TestMessage>,
        progress: Option<&ProgressSink>,
    ) -> anyhow::Result<()> {
        for step in &case.steps {
            let utterance = step.utterance();
            let user = TestMessage::new(Role::User, utterance.clone(), elapsed_ms(started));
            record(transcript, &case.id, user, progress);

            let reply = self.agents.respond(agent, transcript, &utterance).await?;
            let assistant = TestMessage::new(Role::Assistant, reply, elapsed_ms(started));
            record(transcript, &case.id, assistant, progress);
        }
        Ok(())
    }

    async fn evaluate(&self, case: &TestCase, transcript: &[TestMessage]) -> Vec<RubricResult> {
        let ctx = EvalContext {
            case,
            transcript,
            case_sensitive: self.policy.case_sensitive,
            judge: self.judge.as_deref(),
        };
        let mut out = Vec::with_capacity(case.conditions.len());
        for (idx, condition) in case.conditions.iter().enumerate() {
            let verdict = match self.evaluators.iter().find(|e| e.kind() == condition.kind) {
                Some(e) => match e.evaluate(condition, &ctx).await {
                    Ok(v) => v,
                    Err(err) => Verdict::fail(format!("evaluation error: {:#}", err)),
                },
                None => Verdict::fail(format!(
                    "no evaluator registered for {}",
                    condition.kind.as_str()
                )),
            };
            out.push(RubricResult {
                rubric_id: idx,
                kind: condition.kind,
                passed: verdict.passed,
                reason: verdict.reason,
            });
        }
        out
    }

    fn fold(
        &self,
        case: &TestCase,
        mut outcomes: Vec<AttemptOutcome>,
        elapsed: Duration,
    ) -> CaseResult {
        let attempts: Vec<AttemptRow> = outcomes
            .iter()
            .enumerate()
            .map(|(i, o)| AttemptRow {
                attempt_no: i as u32 + 1,
                status: if o.passed() {
                    CaseStatus::Passed
                } else {
                    CaseStatus::Failed
                },
                duration_ms: o.duration_ms,
                error: o.error.clone(),
            })
            .collect();

        let aborted = outcomes.iter().any(|o| o.aborted);
        let sampled =
            self.policy.attempts == AttemptsMode::Sample && !aborted && outcomes.len() > 1;

        let (rubric_results, error, flaky) = if sampled {
            let rubrics = aggregate_samples(case, &outcomes, self.policy.min_pass_rate);
            let error = if outcomes.iter().all(|o| o.error.is_some()) {
                outcomes.last().and_then(|o| o.error.clone())
            } else {
                None
            };
            (rubrics, error, false)
        } else {
            match outcomes.last() {
                Some(last) => (
                    last.rubrics.clone(),
                    last.error.clone(),
                    last.passed() && outcomes.len() > 1,
                ),
                None => return CaseResult::rejected(&case.id, "no attempts were run".into()),
            }
        };

        let transcript = outcomes.pop().map(|o| o.transcript).unwrap_or_default();
        finish(
            case,
            transcript,
            rubric_results,
            error,
            flaky,
            attempts,
            elapsed,
        )
    }
}

fn finish(
    case: &TestCase,
    transcript: Vec<TestMessage>,
    rubric_results: Vec<RubricResult>,
    error: Option<String>,
    flaky: bool,
    attempts: Vec<AttemptRow>,
    elapsed: Duration,
) -> CaseResult {
    let passed = error.is_none() && rubric_results.iter().all(|r| r.passed);
    CaseResult {
        case_id: case.id.clone(),
        status: if passed {
            CaseStatus::Passed
        } else {
            CaseStatus::Failed
        },
        transcript,
        rubric_results,
        duration_ms: elapsed.as_millis() as u64,
        error,
        attempts,
        flaky,
    }
}

/// Per condition: passes when its pass rate across attempts reaches `min_pass_rate`.
fn aggregate_samples(
    case: &TestCase,
    outcomes: &[AttemptOutcome],
    min_pass_rate: f64,
) -> Vec<RubricResult> {
    let n = outcomes.len().max(1);
    case.conditions
        .iter()
        .enumerate()
        .map(|(idx, c)| {
            let passes = outcomes
                .iter()
                .filter(|o| o.rubrics.get(idx).is_some_and(|r| r.passed))
                .count();
            let rate = passes as f64 / n as f64;
            RubricResult {
                rubric_id: idx,
                kind: c.kind,
                passed: rate + 1e-9 >= min_pass_rate,
                reason: format!("passed in {}/{} attempts", passes, n),
            }
        })
        .collect()
}

fn not_evaluated(case: &TestCase, reason: &str) -> Vec<RubricResult> {
    case.conditions
        .iter()
        .enumerate()
        .map(|(idx, c)| RubricResult {
            rubric_id: idx,
            kind: c.kind,
            passed: false,
            reason: format!("not evaluated: {}", reason),
        })
        .collect()
}

fn record(
    transcript: &mut Vec<TestMessage>,
    case_id: &str,
    message: TestMessage,
    progress: Option<&ProgressSink>,
) {
    emit(
        progress,
        ProgressEvent::Turn {
            case_id: case_id.to_string(),
            message: message.clone(),
        },
    );
    transcript.push(message);
}

fn emit(progress: Option<&ProgressSink>, event: ProgressEvent) {
    if let Some(sink) = progress {
        sink(event);
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
