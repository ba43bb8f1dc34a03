use super::AgentClient;
use crate::model::{TargetAgent, TestMessage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Deterministic stand-in for a target agent.
///
/// Every reply takes `turn_delay`. Utterances with a scripted reply get it,
/// anything else is echoed back as `You said: <utterance>`.
#[derive(Clone, Debug)]
pub struct ScriptedAgent {
    turn_delay: Duration,
    replies: HashMap<String, String>,
    unreachable: bool,
}

impl ScriptedAgent {
    pub fn new(turn_delay: Duration) -> Self {
        Self {
            turn_delay,
            replies: HashMap::new(),
            unreachable: false,
        }
    }

    pub fn reply(mut self, utterance: &str, reply: &str) -> Self {
        self.replies
            .insert(utterance.trim().to_lowercase(), reply.to_string());
        self
    }

    /// Every turn fails after the delay, like a dropped connection.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }
}

#[async_trait]
impl AgentClient for ScriptedAgent {
    async fn respond(
        &self,
        agent: &TargetAgent,
        _transcript: &[TestMessage],
        utterance: &str,
    ) -> anyhow::Result<String> {
        tokio::time::sleep(self.turn_delay).await;
        if self.unreachable {
            anyhow::bail!("connection to '{}' dropped", agent.id);
        }
        Ok(self
            .replies
            .get(&utterance.trim().to_lowercase())
            .cloned()
            .unwrap_or_else(|| format!("You said: {}", utterance)))
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}
