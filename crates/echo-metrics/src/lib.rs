use std::sync::Arc;

use echo_core::metrics_api::Evaluator;

mod exact_match;
mod llm_eval;
mod response_contains;

pub mod latency_under;

pub use exact_match::ExactMatchEvaluator;
pub use latency_under::LatencyUnderEvaluator;
pub use llm_eval::LlmEvalEvaluator;
pub use response_contains::ResponseContainsEvaluator;

pub fn default_evaluators() -> Vec<Arc<dyn Evaluator>> {
    vec![
        Arc::new(ResponseContainsEvaluator),
        Arc::new(ExactMatchEvaluator),
        Arc::new(LatencyUnderEvaluator),
        Arc::new(LlmEvalEvaluator),
    ]
}
