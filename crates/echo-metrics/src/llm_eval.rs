use echo_core::metrics_api::{EvalContext, Evaluator, Verdict};
use echo_core::model::{ConditionKind, TestCondition};
use async_trait::async_trait;

pub struct LlmEvalEvaluator;

#[async_trait]
impl Evaluator for LlmEvalEvaluator {
    fn kind(&self) -> ConditionKind {
        ConditionKind::LlmEval
    }

    async fn evaluate(
        &self,
        condition: &TestCondition,
        ctx: &EvalContext<'_>,
    ) -> anyhow::Result<Verdict> {
        let Some(judge) = ctx.judge else {
            return Ok(Verdict::fail("judge disabled"));
        };
        let v = judge.evaluate(&condition.expected, ctx.transcript).await?;
        let reason = format!(
            "judge {} ({:.0}% agreement, {}): {}",
            if v.passed { "passed" } else { "failed" },
            v.agreement * 100.0,
            v.source,
            v.rationale
        );
        Ok(Verdict {
            passed: v.passed,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echo_core::judge::{Judge, JudgeRuntimeConfig, LlmJudge};
    use echo_core::model::{Role, TestCase, TestMessage};
    use echo_core::providers::llm::fake::FakeClient;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_without_judge_fails() {
        let case = TestCase::new("c", vec![], vec![]);
        let ctx = EvalContext {
            case: &case,
            transcript: &[],
            case_sensitive: false,
            judge: None,
        };
        let cond = TestCondition::new(ConditionKind::LlmEval, "agent is polite");
        let v = LlmEvalEvaluator.evaluate(&cond, &ctx).await.unwrap();
        assert!(!v.passed);
        assert_eq!(v.reason, "judge disabled");
    }

    #[tokio::test]
    async fn test_delegates_to_judge() {
        let judge = LlmJudge::new(
            JudgeRuntimeConfig::default(),
            None,
            Arc::new(FakeClient::always(r#"{"passed": true, "rationale": "greeted"}"#)),
        );
        let case = TestCase::new("c", vec![], vec![]);
        let transcript = vec![TestMessage::new(Role::Assistant, "Hello!".into(), 5)];
        let ctx = EvalContext {
            case: &case,
            transcript: &transcript,
            case_sensitive: false,
            judge: Some(&judge as &dyn Judge),
        };
        let cond = TestCondition::new(ConditionKind::LlmEval, "agent is polite");
        let v = LlmEvalEvaluator.evaluate(&cond, &ctx).await.unwrap();
        assert!(v.passed);
        assert!(v.reason.contains("greeted"), "{}", v.reason);
    }
}
