use super::AgentClient;
use crate::model::{HttpRequestTemplate, TargetAgent, TestMessage};
use async_trait::async_trait;

/// Talks to a custom HTTP agent using the request template from its config.
#[derive(Clone, Default)]
pub struct HttpAgent {
    client: reqwest::Client,
}

impl HttpAgent {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn render_body(template: &str, utterance: &str) -> anyhow::Result<String> {
    // JSON-escape, then drop the surrounding quotes so the template owns them
    let quoted = serde_json::to_string(utterance)?;
    let escaped = &quoted[1..quoted.len() - 1];
    Ok(template.replace("{{message}}", escaped))
}

pub fn extract_reply(raw: &str, pointer: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(v) => match v.pointer(pointer) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => raw.to_string(),
        },
        Err(_) => raw.to_string(),
    }
}

#[async_trait]
impl AgentClient for HttpAgent {
    async fn respond(
        &self,
        agent: &TargetAgent,
        _transcript: &[TestMessage],
        utterance: &str,
    ) -> anyhow::Result<String> {
        let url = agent
            .config
            .url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("http agent '{}' has no url", agent.id))?;
        let template = agent.config.request.clone().unwrap_or_default();

        let method = reqwest::Method::from_bytes(template.method.to_uppercase().as_bytes())
            .map_err(|_| anyhow::anyhow!("invalid http method '{}'", template.method))?;

        let mut req = self
            .client
            .request(method, url)
            .header("content-type", "application/json")
            .body(render_body(&template.body, utterance)?);
        for (k, v) in &template.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(key) = &agent.config.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let raw = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("agent '{}' answered {}: {}", agent.id, status, raw);
        }
        Ok(extract_reply(&raw, &template_pointer(&template)))
    }

    fn provider_name(&self) -> &'static str {
        "http"
    }
}

fn template_pointer(t: &HttpRequestTemplate) -> String {
    if t.response_pointer.is_empty() || t.response_pointer.starts_with('/') {
        t.response_pointer.clone()
    } else {
        format!("/{}", t.response_pointer)
    }
}
