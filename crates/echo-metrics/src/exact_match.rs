use echo_core::metrics_api::{EvalContext, Evaluator, Verdict};
use echo_core::model::{ConditionKind, TestCondition};
use async_trait::async_trait;

/// Compares the final agent reply byte for byte; `case_sensitive` does not apply.
pub struct ExactMatchEvaluator;

#[async_trait]
impl Evaluator for ExactMatchEvaluator {
    fn kind(&self) -> ConditionKind {
        ConditionKind::ExactMatch
    }

    async fn evaluate(
        &self,
        condition: &TestCondition,
        ctx: &EvalContext<'_>,
    ) -> anyhow::Result<Verdict> {
        let Some(last) = ctx.assistant_messages().last() else {
            return Ok(Verdict::fail("agent never replied"));
        };
        if last.content == condition.expected {
            Ok(Verdict::pass("final reply matches"))
        } else {
            Ok(Verdict::fail(format!(
                "final reply was '{}', expected '{}'",
                last.content, condition.expected
            )))
        }
    }
}
