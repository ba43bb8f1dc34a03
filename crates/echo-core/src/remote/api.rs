//! JSON shapes exchanged with the test-suite backend.

use crate::model::{ExecutionMode, TestCase};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SuiteStatus {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
}

impl SuiteStatus {
    /// Queued counts as in flight: a run was accepted but has not started yet.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SuiteStatus::Queued | SuiteStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SuiteStatus::Queued => "queued",
            SuiteStatus::Running => "running",
            SuiteStatus::Completed => "completed",
            SuiteStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiTestSuite {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target_agent_id: Option<String>,
    #[serde(default)]
    pub user_agent_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestSuiteDetails {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub suite_status: SuiteStatus,
    #[serde(default)]
    pub target_agent: Option<serde_json::Value>,
    #[serde(default)]
    pub user_agent: Option<serde_json::Value>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NewTestSuite {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Partial update; absent fields are left untouched by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SuitePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiTestCaseResult {
    pub result_id: String,
    pub test_case_id: String,
    pub status: String,
    #[serde(default)]
    pub call_recordings: Vec<String>,
    #[serde(default)]
    pub call_transcripts: Vec<serde_json::Value>,
    #[serde(default)]
    pub evaluation_result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiTestRun {
    pub id: String,
    pub test_suite_id: String,
    pub status: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub total_test_cases: u32,
    #[serde(default)]
    pub passed_count: u32,
    #[serde(default)]
    pub failed_count: u32,
    #[serde(default)]
    pub test_case_results: Vec<ApiTestCaseResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SingleTestStatus {
    pub status: String,
    pub case_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub user_id: String,
    pub concurrency: u32,
    pub execution_mode: ExecutionMode,
}

/// The remote authority for suites and runs.
#[async_trait]
pub trait SuiteBackend: Send + Sync {
    async fn list_suites(&self, user_id: &str) -> anyhow::Result<Vec<ApiTestSuite>>;
    async fn suite_details(&self, suite_id: &str) -> anyhow::Result<TestSuiteDetails>;
    async fn create_suite(&self, user_id: &str, suite: &NewTestSuite) -> anyhow::Result<String>;
    async fn update_suite(&self, suite_id: &str, patch: &SuitePatch) -> anyhow::Result<()>;
    async fn delete_suite(&self, suite_id: &str) -> anyhow::Result<()>;
    /// Fire-and-forget; progress is observed through `suite_details`.
    async fn run_suite(&self, suite_id: &str, request: &RunRequest) -> anyhow::Result<()>;
    async fn run_single(
        &self,
        case_id: &str,
        user_id: &str,
        concurrent_calls: u32,
    ) -> anyhow::Result<SingleTestStatus>;
    async fn list_runs(&self, user_id: &str) -> anyhow::Result<Vec<ApiTestRun>>;
}
