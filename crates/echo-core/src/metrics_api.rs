use crate::judge::Judge;
use crate::model::{ConditionKind, Role, TestCase, TestCondition, TestMessage};
use async_trait::async_trait;

/// Everything an evaluator may look at once a conversation is over.
pub struct EvalContext<'a> {
    pub case: &'a TestCase,
    pub transcript: &'a [TestMessage],
    pub case_sensitive: bool,
    pub judge: Option<&'a dyn Judge>,
}

impl<'a> EvalContext<'a> {
    pub fn assistant_messages(&self) -> impl Iterator<Item = &'a TestMessage> {
        self.transcript.iter().filter(|m| m.role == Role::Assistant)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub passed: bool,
    pub reason: String,
}

impl Verdict {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    fn kind(&self) -> ConditionKind;

    async fn evaluate(
        &self,
        condition: &TestCondition,
        ctx: &EvalContext<'_>,
    ) -> anyhow::Result<Verdict>;
}
