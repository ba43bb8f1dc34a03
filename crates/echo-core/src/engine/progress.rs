use crate::model::{CaseResult, CaseStatus, Experiment, TestMessage};
use std::sync::Arc;

/// Live events emitted while a case is being driven.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    CaseStarted { case_id: String },
    AttemptStarted { case_id: String, attempt: u32 },
    Turn { case_id: String, message: TestMessage },
}

pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Folds a progress event into the experiment's live view.
pub fn apply(exp: &mut Experiment, event: ProgressEvent) {
    match event {
        ProgressEvent::CaseStarted { case_id } => {
            let entry = exp
                .results
                .entry(case_id.clone())
                .or_insert_with(|| CaseResult::queued(&case_id));
            entry.status = CaseStatus::Running;
            entry.transcript.clear();
        }
        ProgressEvent::AttemptStarted { case_id, .. } => {
            if let Some(r) = exp.results.get_mut(&case_id) {
                r.transcript.clear();
            }
        }
        ProgressEvent::Turn { case_id, message } => {
            if let Some(r) = exp.results.get_mut(&case_id) {
                r.transcript.push(message);
            }
        }
    }
}
