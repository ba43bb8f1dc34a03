use super::{LlmClient, LlmResponse};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Replays canned completions in order, repeating the last one.
pub struct FakeClient {
    replies: Vec<String>,
    calls: AtomicUsize,
}

impl FakeClient {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(reply: &str) -> Self {
        Self::new(vec![reply.to_string()])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for FakeClient {
    async fn complete(&self, _system: &str, _prompt: &str) -> anyhow::Result<LlmResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let text = self
            .replies
            .get(n)
            .or_else(|| self.replies.last())
            .cloned()
            .unwrap_or_default();
        Ok(LlmResponse {
            text,
            provider: "fake".into(),
            model: "fake".into(),
        })
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }

    fn model(&self) -> &str {
        "fake"
    }
}
