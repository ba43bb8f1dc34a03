use crate::model::{AgentKind, TargetAgent, TestMessage};
use async_trait::async_trait;
use std::sync::Arc;

pub mod http;
pub mod scripted;

/// One target-agent turn: the reply to `utterance`, given the transcript so far
/// (which already ends with the tester's message).
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn respond(
        &self,
        agent: &TargetAgent,
        transcript: &[TestMessage],
        utterance: &str,
    ) -> anyhow::Result<String>;

    fn provider_name(&self) -> &'static str;
}

/// Picks a transport per agent kind.
///
/// Only HTTP agents can be driven from here. Websocket, phone, Vapi and Retell
/// agents run through the remote backend unless a simulator is installed.
pub struct AgentRouter {
    http: Arc<dyn AgentClient>,
    simulator: Option<Arc<dyn AgentClient>>,
}

impl AgentRouter {
    pub fn new(http: Arc<dyn AgentClient>) -> Self {
        Self {
            http,
            simulator: None,
        }
    }

    pub fn with_simulator(mut self, simulator: Arc<dyn AgentClient>) -> Self {
        self.simulator = Some(simulator);
        self
    }
}

#[async_trait]
impl AgentClient for AgentRouter {
    async fn respond(
        &self,
        agent: &TargetAgent,
        transcript: &[TestMessage],
        utterance: &str,
    ) -> anyhow::Result<String> {
        if let Some(sim) = &self.simulator {
            return sim.respond(agent, transcript, utterance).await;
        }
        match agent.kind {
            AgentKind::Http => self.http.respond(agent, transcript, utterance).await,
            other => anyhow::bail!(
                "{} agent '{}' can only be driven by the remote backend",
                other.as_str(),
                agent.id
            ),
        }
    }

    fn provider_name(&self) -> &'static str {
        match self.simulator {
            Some(_) => "simulator",
            None => "router",
        }
    }
}
