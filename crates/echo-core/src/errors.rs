use thiserror::Error;

pub type Result<T> = std::result::Result<T, EchoError>;

/// Failures surfaced by the lifecycle entry points.
///
/// Case-level problems (`AgentUnreachable`, `Timeout`) are normally folded into a
/// failed `CaseResult` by the executor and only show up here when a caller drives a
/// single conversation directly.
#[derive(Debug, Error)]
pub enum EchoError {
    #[error("invalid test case '{case_id}': {reason}")]
    InvalidCaseDefinition { case_id: String, reason: String },

    #[error("agent unreachable: {0}")]
    AgentUnreachable(String),

    #[error("timeout")]
    Timeout,

    #[error("remote sync failed: {0}")]
    RemoteSyncFailure(String),

    #[error("a run is already active for dataset '{0}'")]
    ConcurrentRunConflict(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EchoError {
    pub fn invalid_case(case_id: &str, reason: impl Into<String>) -> Self {
        EchoError::InvalidCaseDefinition {
            case_id: case_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Config and definition errors are the caller's fault; everything else is operational.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EchoError::Config(_)
                | EchoError::InvalidCaseDefinition { .. }
                | EchoError::DatasetNotFound(_)
        )
    }
}
