use crate::model::{CaseStatus, Experiment};
use crate::remote::api::ApiTestRun;
use std::fmt::Write;

pub fn print_summary(exp: &Experiment) {
    eprint!("{}", render_summary(exp));
}

pub fn render_summary(exp: &Experiment) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\nExperiment {} ({} cases, dataset {})",
        exp.id, exp.total_cases, exp.dataset_id
    );

    let mut flaky = 0;
    for r in exp.results.values() {
        let duration = format!("({:.1}s)", r.duration_ms as f64 / 1000.0);
        match r.status {
            CaseStatus::Passed if r.flaky => {
                flaky += 1;
                let _ = writeln!(
                    out,
                    "⚠️  {:<20} FLAKY (passed on attempt {}) {}",
                    r.case_id,
                    r.attempts.len(),
                    duration
                );
            }
            CaseStatus::Passed => {
                let _ = writeln!(out, "✅ {:<20} PASS  {}", r.case_id, duration);
            }
            CaseStatus::Failed => {
                let _ = writeln!(out, "❌ {:<20} FAIL  {}", r.case_id, duration);
                for reason in r.failing_reasons() {
                    let _ = writeln!(out, "      → {}", reason);
                }
            }
            CaseStatus::Queued | CaseStatus::Running => {
                let _ = writeln!(out, "⏳ {:<20} {:?}", r.case_id, r.status);
            }
        }
    }

    let not_started = exp.total_cases.saturating_sub(exp.results.len());
    let _ = writeln!(out, "\n{}", "━".repeat(40));
    let _ = writeln!(
        out,
        "Summary: {} passed, {} failed, {} flaky, {} not started ({})",
        exp.passed_count(),
        exp.failed_count(),
        flaky,
        not_started,
        exp.status.as_str()
    );
    out
}

pub fn print_history(history: &[Experiment]) {
    if history.is_empty() {
        eprintln!("No experiments recorded yet.");
        return;
    }
    eprintln!(
        "{:<38} {:<16} {:<10} {:>7}  STARTED",
        "ID", "DATASET", "STATUS", "PASSED"
    );
    for e in history {
        eprintln!(
            "{:<38} {:<16} {:<10} {:>3}/{:<3}  {}",
            e.id,
            e.dataset_id,
            e.status.as_str(),
            e.passed_count(),
            e.total_cases,
            e.started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

pub fn print_remote_runs(runs: &[ApiTestRun]) {
    if runs.is_empty() {
        eprintln!("No remote runs.");
        return;
    }
    for r in runs {
        eprintln!(
            "{:<24} suite={:<16} {:<10} {}/{} passed, {} failed",
            r.id, r.test_suite_id, r.status, r.passed_count, r.total_test_cases, r.failed_count
        );
    }
}
