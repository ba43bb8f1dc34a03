use echo_core::metrics_api::{EvalContext, Evaluator, Verdict};
use echo_core::model::{ConditionKind, TestCondition};
use async_trait::async_trait;

pub struct ResponseContainsEvaluator;

#[async_trait]
impl Evaluator for ResponseContainsEvaluator {
    fn kind(&self) -> ConditionKind {
        ConditionKind::ResponseContains
    }

    async fn evaluate(
        &self,
        condition: &TestCondition,
        ctx: &EvalContext<'_>,
    ) -> anyhow::Result<Verdict> {
        let needle = fold(&condition.expected, ctx.case_sensitive);
        let hit = ctx
            .assistant_messages()
            .any(|m| fold(&m.content, ctx.case_sensitive).contains(&needle));
        if hit {
            Ok(Verdict::pass(format!("found '{}'", condition.expected)))
        } else {
            Ok(Verdict::fail(format!(
                "no agent reply contains '{}'",
                condition.expected
            )))
        }
    }
}

fn fold(s: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        s.to_string()
    } else {
        s.to_lowercase()
    }
}
