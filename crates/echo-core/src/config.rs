use crate::errors::EchoError;
use crate::model::{AttemptsMode, Dataset, EmptyConditionsPolicy, ExecutionMode, TargetAgent};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoConfig {
    #[serde(default, rename = "configVersion", alias = "version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "is_default_settings")]
    pub settings: Settings,
    #[serde(default)]
    pub agents: Vec<TargetAgent>,
    #[serde(default)]
    pub datasets: Vec<Dataset>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_mode: Option<ExecutionMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<AttemptsMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_pass_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empty_conditions: Option<EmptyConditionsPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_poll_failures: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge: Option<JudgeConfig>,
}

fn is_default_settings(s: &Settings) -> bool {
    s == &Settings::default()
}

impl Settings {
    pub fn turn_delay(&self) -> Duration {
        Duration::from_millis(self.turn_delay_ms.unwrap_or(800))
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds.unwrap_or(30))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.unwrap_or(10).max(1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JudgeConfig {
    /// none | fake | openai
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub samples: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl EchoConfig {
    pub fn dataset(&self, id: &str) -> Option<&Dataset> {
        self.datasets.iter().find(|d| d.id == id || d.name == id)
    }
}

pub fn load_config(path: &Path, strict: bool) -> Result<EchoConfig, EchoError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        EchoError::Config(format!("failed to read config {}: {}", path.display(), e))
    })?;
    parse_config(&raw, strict).map_err(|e| match e {
        EchoError::Config(msg) => EchoError::Config(format!("{} (file: {})", msg, path.display())),
        other => other,
    })
}

pub fn parse_config(raw: &str, strict: bool) -> Result<EchoConfig, EchoError> {
    let mut ignored_keys = std::collections::BTreeSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);

    let cfg: EchoConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| EchoError::Config(format!("failed to parse YAML: {}", e)))?;

    // anchors and extension keys are allowed to ride along
    let meaningful_unknowns: Vec<_> = ignored_keys
        .iter()
        .filter(|k| !k.starts_with('_') && !k.starts_with("x-"))
        .collect();

    if !meaningful_unknowns.is_empty() {
        if strict {
            return Err(EchoError::Config(format!(
                "unknown fields detected in strict mode: {:?}",
                meaningful_unknowns
            )));
        }
        tracing::warn!(
            event = "echo.config.unknown_fields",
            fields = ?meaningful_unknowns,
            "ignored unknown config fields"
        );
    }

    if cfg.version != 0 && cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(EchoError::Config(format!(
            "unsupported config version {} (supported: {})",
            cfg.version, SUPPORTED_CONFIG_VERSION
        )));
    }

    for ds in &cfg.datasets {
        if ds.id.is_empty() {
            return Err(EchoError::Config(format!("dataset '{}' has no id", ds.name)));
        }
        if !cfg.agents.iter().any(|a| a.id == ds.target_agent_id) {
            return Err(EchoError::Config(format!(
                "dataset '{}' references unknown target agent '{}'",
                ds.id, ds.target_agent_id
            )));
        }
    }

    if let Some(rate) = cfg.settings.min_pass_rate {
        if !(0.0..=1.0).contains(&rate) {
            return Err(EchoError::Config(format!(
                "min_pass_rate must be within 0.0..=1.0, got {}",
                rate
            )));
        }
    }

    Ok(cfg)
}

pub const SAMPLE_CONFIG: &str = r#"configVersion: 1
settings:
  turn_delay_ms: 50
  default_timeout_seconds: 30
  execution_mode: sequential
  attempts: retry
  empty_conditions: pass
agents:
  - id: support-bot
    name: Support bot
    type: http
    config:
      url: http://localhost:8080/chat
      request:
        method: POST
        body: '{"message": "{{message}}"}'
        response_pointer: /response
datasets:
  - id: demo
    name: Demo suite
    description: Smoke checks for the support bot
    target_agent_id: support-bot
    test_cases:
      - id: greeting
        steps:
          - action: speak
            text: "Hello, I need help with my order"
        conditions:
          - type: response_contains
            expected: "order"
          - type: latency_under
            expected: "2000"
      - id: menu
        steps:
          - action: speak
            text: "Connect me to billing"
          - action: press_key
            text: "2"
        conditions:
          - type: response_contains
            expected: "billing"
"#;

pub fn write_sample_config(path: &Path) -> Result<(), EchoError> {
    std::fs::write(path, SAMPLE_CONFIG)
        .map_err(|e| EchoError::Config(format!("failed to write sample config: {}", e)))?;
    Ok(())
}

/// Process environment overrides. Read before logging is installed.
#[derive(Clone, Debug)]
pub struct EchoEnv {
    pub log_level: String,
    pub backend_url: Option<String>,
    pub user_id: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub openai_api_key: Option<String>,
}

impl Default for EchoEnv {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            backend_url: None,
            user_id: None,
            poll_interval_secs: None,
            openai_api_key: None,
        }
    }
}

impl EchoEnv {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut env = Self::default();
        if let Some(v) = lookup("ECHO_LOG") {
            env.log_level = v;
        }
        env.backend_url = lookup("ECHO_BACKEND_URL").filter(|v| !v.is_empty());
        env.user_id = lookup("ECHO_USER_ID").filter(|v| !v.is_empty());
        if let Some(v) = lookup("ECHO_POLL_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                env.poll_interval_secs = Some(n);
            }
        }
        env.openai_api_key = lookup("OPENAI_API_KEY").filter(|v| !v.is_empty());
        env
    }
}
