//! `latency_under`: every agent reply must arrive within `expected` milliseconds
//! of the tester turn before it.

use echo_core::metrics_api::{EvalContext, Evaluator, Verdict};
use echo_core::model::{ConditionKind, Role, TestCondition, TestMessage};
use async_trait::async_trait;

pub struct LatencyUnderEvaluator;

/// Gap between each assistant message and the closest preceding user message.
pub fn turn_latencies(transcript: &[TestMessage]) -> Vec<u64> {
    let mut last_user: Option<u64> = None;
    let mut out = Vec::new();
    for m in transcript {
        match m.role {
            Role::User => last_user = Some(m.timestamp_ms),
            Role::Assistant => {
                if let Some(t) = last_user.take() {
                    out.push(m.timestamp_ms.saturating_sub(t));
                }
            }
        }
    }
    out
}

#[async_trait]
impl Evaluator for LatencyUnderEvaluator {
    fn kind(&self) -> ConditionKind {
        ConditionKind::LatencyUnder
    }

    async fn evaluate(
        &self,
        condition: &TestCondition,
        ctx: &EvalContext<'_>,
    ) -> anyhow::Result<Verdict> {
        let limit: u64 = condition.expected.trim().parse().map_err(|_| {
            anyhow::anyhow!(
                "config error: latency_under expects milliseconds, got '{}'",
                condition.expected
            )
        })?;

        let latencies = turn_latencies(ctx.transcript);
        let Some(worst) = latencies.iter().copied().max() else {
            return Ok(Verdict::fail("no completed turns to measure"));
        };
        tracing::debug!(
            turns = latencies.len(),
            worst_ms = worst,
            limit_ms = limit,
            "latency_under"
        );
        if worst < limit {
            Ok(Verdict::pass(format!("slowest turn {}ms < {}ms", worst, limit)))
        } else {
            Ok(Verdict::fail(format!("slowest turn {}ms >= {}ms", worst, limit)))
        }
    }
}
