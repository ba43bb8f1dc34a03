use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::EchoError;

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Speak,
    Wait,
    PressKey,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestStep {
    pub action: StepAction,
    #[serde(default)]
    pub text: String,
}

impl TestStep {
    pub fn speak(text: &str) -> Self {
        Self {
            action: StepAction::Speak,
            text: text.to_string(),
        }
    }

    /// Text the tester agent puts on the line for this step.
    pub fn utterance(&self) -> String {
        match self.action {
            StepAction::Speak => self.text.clone(),
            StepAction::Wait => format!("[silence {}]", self.text.trim()),
            StepAction::PressKey => format!("[dtmf {}]", self.text.trim()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    ResponseContains,
    ExactMatch,
    LlmEval,
    LatencyUnder,
}

impl ConditionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::ResponseContains => "response_contains",
            ConditionKind::ExactMatch => "exact_match",
            ConditionKind::LlmEval => "llm_eval",
            ConditionKind::LatencyUnder => "latency_under",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCondition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    pub expected: String,
}

impl TestCondition {
    pub fn new(kind: ConditionKind, expected: &str) -> Self {
        Self {
            kind,
            expected: expected.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmptyConditionsPolicy {
    #[default]
    Pass,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub steps: Vec<TestStep>,
    #[serde(default)]
    pub conditions: Vec<TestCondition>,
    #[serde(default)]
    pub expected_outcome: String,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_concurrent_calls")]
    pub default_concurrent_calls: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

fn default_attempts() -> u32 {
    1
}

fn default_concurrent_calls() -> u32 {
    1
}

impl TestCase {
    pub fn new(id: &str, steps: Vec<TestStep>, conditions: Vec<TestCondition>) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            steps,
            conditions,
            expected_outcome: String::new(),
            attempts: 1,
            default_concurrent_calls: 1,
            timeout_seconds: None,
        }
    }

    pub fn validate(&self, empty_conditions: EmptyConditionsPolicy) -> Result<(), EchoError> {
        if self.steps.is_empty() {
            return Err(EchoError::invalid_case(&self.id, "test case has no steps"));
        }
        if self.attempts == 0 {
            return Err(EchoError::invalid_case(&self.id, "attempts must be at least 1"));
        }
        if self.conditions.is_empty() && empty_conditions == EmptyConditionsPolicy::Reject {
            return Err(EchoError::invalid_case(&self.id, "test case has no conditions"));
        }
        for (i, c) in self.conditions.iter().enumerate() {
            if c.kind == ConditionKind::LatencyUnder && c.expected.trim().parse::<u64>().is_err() {
                return Err(EchoError::invalid_case(
                    &self.id,
                    format!(
                        "condition #{} latency_under expects milliseconds, got '{}'",
                        i, c.expected
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// A test suite: the ordered cases run against one target agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub target_agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

impl Dataset {
    pub fn case(&self, case_id: &str) -> Option<&TestCase> {
        self.test_cases.iter().find(|c| c.id == case_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Websocket,
    Http,
    Phone,
    Vapi,
    Retell,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Websocket => "websocket",
            AgentKind::Http => "http",
            AgentKind::Phone => "phone",
            AgentKind::Vapi => "vapi",
            AgentKind::Retell => "retell",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpRequestTemplate {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request body; `{{message}}` is replaced by the JSON-escaped tester utterance.
    #[serde(default = "default_body")]
    pub body: String,
    /// JSON pointer to the reply text in the response body.
    #[serde(default = "default_response_pointer")]
    pub response_pointer: String,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_body() -> String {
    r#"{"message": "{{message}}"}"#.to_string()
}

fn default_response_pointer() -> String {
    "/response".to_string()
}

impl Default for HttpRequestTemplate {
    fn default() -> Self {
        Self {
            method: default_method(),
            headers: BTreeMap::new(),
            body: default_body(),
            response_pointer: default_response_pointer(),
        }
    }
}

/// Provider specific settings. Only the fields relevant to `TargetAgent::kind` are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<HttpRequestTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetAgent {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AgentKind,
    #[serde(default)]
    pub config: AgentConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Milliseconds since the attempt started; non-decreasing within a transcript.
    pub timestamp_ms: u64,
}

impl TestMessage {
    pub fn new(role: Role, content: String, timestamp_ms: u64) -> Self {
        Self {
            id: new_id(),
            role,
            content,
            timestamp_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RubricResult {
    /// Position of the originating condition in `TestCase::conditions`.
    pub rubric_id: usize,
    pub kind: ConditionKind,
    pub passed: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Queued,
    Running,
    Passed,
    Failed,
}

impl CaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseStatus::Passed | CaseStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptRow {
    pub attempt_no: u32,
    pub status: CaseStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseResult {
    pub case_id: String,
    pub status: CaseStatus,
    #[serde(default)]
    pub transcript: Vec<TestMessage>,
    #[serde(default)]
    pub rubric_results: Vec<RubricResult>,
    #[serde(default)]
    pub duration_ms: u64,
    /// Set when the conversation itself broke down (timeout, unreachable agent, abort).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<AttemptRow>,
    #[serde(default)]
    pub flaky: bool,
}

impl CaseResult {
    pub fn queued(case_id: &str) -> Self {
        Self {
            case_id: case_id.to_string(),
            status: CaseStatus::Queued,
            transcript: Vec::new(),
            rubric_results: Vec::new(),
            duration_ms: 0,
            error: None,
            attempts: Vec::new(),
            flaky: false,
        }
    }

    /// Terminal result for a case that never produced a conversation.
    pub fn rejected(case_id: &str, reason: String) -> Self {
        Self {
            status: CaseStatus::Failed,
            error: Some(reason),
            ..Self::queued(case_id)
        }
    }

    pub fn passed(&self) -> bool {
        self.status == CaseStatus::Passed
    }

    pub fn failing_reasons(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(e) = &self.error {
            out.push(e.clone());
        }
        for r in self.rubric_results.iter().filter(|r| !r.passed) {
            out.push(format!("{} #{}: {}", r.kind.as_str(), r.rubric_id, r.reason));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Running,
    Completed,
    Aborted,
    Failed,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Running => "running",
            ExperimentStatus::Completed => "completed",
            ExperimentStatus::Aborted => "aborted",
            ExperimentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExperimentStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experiment {
    pub id: String,
    pub dataset_id: String,
    pub status: ExperimentStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub total_cases: usize,
    /// Keyed by case id, in dispatch order.
    #[serde(default)]
    pub results: IndexMap<String, CaseResult>,
}

impl Experiment {
    pub fn start(dataset: &Dataset) -> Self {
        Self {
            id: new_id(),
            dataset_id: dataset.id.clone(),
            status: ExperimentStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            total_cases: dataset.test_cases.len(),
            results: IndexMap::new(),
        }
    }

    /// Moves out of `running`; terminal states are never left again.
    pub fn finish(&mut self, status: ExperimentStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn passed_count(&self) -> usize {
        self.results.values().filter(|r| r.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results
            .values()
            .filter(|r| r.status == CaseStatus::Failed)
            .count()
    }

    pub fn running_count(&self) -> usize {
        self.results
            .values()
            .filter(|r| r.status == CaseStatus::Running)
            .count()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

impl ExecutionMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sequential" => Some(ExecutionMode::Sequential),
            "parallel" => Some(ExecutionMode::Parallel),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Parallel => "parallel",
        }
    }
}

/// How `TestCase::attempts` is consumed by the executor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptsMode {
    /// Re-run a failing case until it passes or the budget is spent.
    #[default]
    Retry,
    /// Run every attempt and pass each condition on its pass rate.
    Sample,
}
