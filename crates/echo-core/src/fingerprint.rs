use crate::model::{Role, TestMessage};
use sha2::{Digest, Sha256};

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

pub struct JudgeContext<'a> {
    pub provider: &'a str,
    pub model: &'a str,
    pub criteria: &'a str,
    pub samples: u32,
    pub transcript: &'a [TestMessage],
}

/// Stable cache key for an llm_eval verdict.
///
/// Message ids and timestamps are excluded so two runs with the same
/// conversation text share a verdict.
pub fn judge_key(ctx: JudgeContext<'_>) -> String {
    let mut parts = vec![
        format!("provider={}", ctx.provider),
        format!("model={}", ctx.model),
        format!("criteria={}", ctx.criteria),
        format!("samples={}", ctx.samples),
    ];
    for m in ctx.transcript {
        let role = match m.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        parts.push(format!("{}={}", role, m.content));
    }
    parts.push(format!("echo_version={}", env!("CARGO_PKG_VERSION")));
    sha256_hex(&parts.join("\n"))
}
