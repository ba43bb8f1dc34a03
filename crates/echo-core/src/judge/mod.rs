use crate::fingerprint::{judge_key, JudgeContext};
use crate::model::{Role, TestMessage};
use crate::providers::llm::LlmClient;
use crate::storage::judge_cache::JudgeCache;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You grade conversations between a tester and an AI agent. \
Reply with JSON only: {\"passed\": true|false, \"rationale\": \"<one sentence>\"}.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeVerdict {
    pub passed: bool,
    /// Share of samples that voted pass.
    pub agreement: f64,
    pub rationale: String,
    /// live | cache
    pub source: String,
}

/// External grader behind `llm_eval` conditions.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn evaluate(
        &self,
        criteria: &str,
        transcript: &[TestMessage],
    ) -> anyhow::Result<JudgeVerdict>;
}

#[derive(Clone, Debug)]
pub struct JudgeRuntimeConfig {
    pub samples: u32,
    pub refresh: bool,
}

impl Default for JudgeRuntimeConfig {
    fn default() -> Self {
        Self {
            samples: 1,
            refresh: false,
        }
    }
}

/// Majority vote over `samples` completions, cached per transcript.
#[derive(Clone)]
pub struct LlmJudge {
    config: JudgeRuntimeConfig,
    cache: Option<JudgeCache>,
    client: Arc<dyn LlmClient>,
}

impl LlmJudge {
    pub fn new(
        config: JudgeRuntimeConfig,
        cache: Option<JudgeCache>,
        client: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            config,
            cache,
            client,
        }
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn evaluate(
        &self,
        criteria: &str,
        transcript: &[TestMessage],
    ) -> anyhow::Result<JudgeVerdict> {
        let samples = self.config.samples.max(1);
        let key = judge_key(JudgeContext {
            provider: self.client.provider_name(),
            model: self.client.model(),
            criteria,
            samples,
            transcript,
        });

        if let (Some(cache), false) = (&self.cache, self.config.refresh) {
            if let Some(cached) = cache.get(&key)? {
                let mut verdict: JudgeVerdict = serde_json::from_value(cached)?;
                verdict.source = "cache".into();
                return Ok(verdict);
            }
        }

        let prompt = render_prompt(criteria, transcript);
        let mut votes = Vec::with_capacity(samples as usize);
        let mut rationales = Vec::new();
        for _ in 0..samples {
            let resp = self.client.complete(SYSTEM_PROMPT, &prompt).await?;
            let (vote, rationale) = parse_vote(&resp.text);
            votes.push(vote);
            rationales.push(rationale);
        }

        let pass_count = votes.iter().filter(|&&v| v).count();
        let agreement = pass_count as f64 / samples as f64;
        let verdict = JudgeVerdict {
            passed: pass_count * 2 > samples as usize,
            agreement,
            rationale: rationales.into_iter().next().unwrap_or_default(),
            source: "live".into(),
        };

        if let Some(cache) = &self.cache {
            cache.put(
                &key,
                self.client.provider_name(),
                self.client.model(),
                &serde_json::to_value(&verdict)?,
            )?;
        }
        tracing::debug!(
            event = "echo.judge.verdict",
            passed = verdict.passed,
            agreement = verdict.agreement,
            "judge verdict"
        );
        Ok(verdict)
    }
}

fn render_prompt(criteria: &str, transcript: &[TestMessage]) -> String {
    let mut s = format!("Criteria: {}\n\nTranscript:\n", criteria);
    for m in transcript {
        let who = match m.role {
            Role::User => "tester",
            Role::Assistant => "agent",
        };
        s.push_str(&format!("{}: {}\n", who, m.content));
    }
    s
}

/// Reads `{"passed": bool, "rationale": str}` out of a completion.
/// Completions that are not JSON count as a pass only when they start with "pass".
pub fn parse_vote(text: &str) -> (bool, String) {
    let json = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => {
            serde_json::from_str::<serde_json::Value>(&text[start..=end]).ok()
        }
        _ => None,
    };
    if let Some(v) = json {
        let passed = v.get("passed").and_then(|p| p.as_bool()).unwrap_or(false);
        let rationale = v
            .get("rationale")
            .and_then(|r| r.as_str())
            .unwrap_or_default()
            .to_string();
        return (passed, rationale);
    }
    let trimmed = text.trim();
    (trimmed.to_lowercase().starts_with("pass"), trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::llm::fake::FakeClient;
    use crate::storage::Store;

    fn transcript() -> Vec<TestMessage> {
        vec![
            TestMessage::new(Role::User, "hi".into(), 0),
            TestMessage::new(Role::Assistant, "hello, how can I help?".into(), 800),
        ]
    }

    #[test]
    fn test_parse_vote() {
        assert_eq!(
            parse_vote(r#"Sure: {"passed": true, "rationale": "polite"}"#),
            (true, "polite".to_string())
        );
        assert!(!parse_vote(r#"{"passed": false}"#).0);
        assert!(parse_vote("PASS - greeted the caller").0);
        assert!(!parse_vote("the agent was rude").0);
    }

    #[tokio::test]
    async fn test_majority_vote() {
        let client = Arc::new(FakeClient::new(vec![
            r#"{"passed": true, "rationale": "a"}"#.into(),
            r#"{"passed": false, "rationale": "b"}"#.into(),
            r#"{"passed": true, "rationale": "c"}"#.into(),
        ]));
        let judge = LlmJudge::new(
            JudgeRuntimeConfig {
                samples: 3,
                refresh: false,
            },
            None,
            client.clone(),
        );
        let v = judge.evaluate("greets politely", &transcript()).await.unwrap();
        assert!(v.passed);
        assert!((v.agreement - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_cached_verdict_skips_client() {
        let store = Store::memory().unwrap();
        store.init_schema().unwrap();
        let client = Arc::new(FakeClient::always(r#"{"passed": true, "rationale": "ok"}"#));
        let judge = LlmJudge::new(
            JudgeRuntimeConfig::default(),
            Some(JudgeCache::new(store)),
            client.clone(),
        );

        let first = judge.evaluate("polite", &transcript()).await.unwrap();
        let second = judge.evaluate("polite", &transcript()).await.unwrap();
        assert_eq!(first.source, "live");
        assert_eq!(second.source, "cache");
        assert!(second.passed);
        assert_eq!(client.calls(), 1);
    }
}
