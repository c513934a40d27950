//! Retry policy and provider output checks.

use fusion_core::{FusionError, Result};

/// Longest error message stored on a row.
const MAX_ERROR_CHARS: usize = 1024;

/// Delay before retry number `attempt` (1-based).
///
/// Doubles from `base_ms` per attempt, with the exponent capped at 6, then
/// clamped to `max_ms`.
pub fn backoff_for_attempt(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    let exp = attempt.max(1).saturating_sub(1).min(6);
    base_ms.saturating_mul(1 << exp).min(max_ms)
}

/// Reject vectors that would poison the vector signal.
pub fn validate_vector(vector: &[f32], expected_dim: usize) -> Result<()> {
    if vector.is_empty() {
        return Err(FusionError::embedding("Provider returned an empty vector"));
    }
    if vector.len() != expected_dim {
        return Err(FusionError::embedding(format!(
            "Embedding dimension {} does not match configured dimension {}",
            vector.len(),
            expected_dim
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(FusionError::embedding("Embedding contains non-finite values"));
    }
    if vector.iter().all(|v| *v == 0.0) {
        return Err(FusionError::embedding("Embedding is the zero vector"));
    }

    Ok(())
}

/// Redact credentials and bound the length of a provider error.
pub fn sanitize_error(text: &str) -> String {
    let mut parts = Vec::new();
    let mut redact_next = false;

    for raw in text.split_whitespace() {
        if redact_next {
            parts.push("[REDACTED]".to_string());
            redact_next = false;
            continue;
        }
        if raw.eq_ignore_ascii_case("bearer") {
            redact_next = true;
        }

        let lowered = raw.to_ascii_lowercase();
        let secret = ["api_key", "apikey", "password", "secret", "token"]
            .iter()
            .any(|k| lowered.contains(k));

        match raw.find(|c| c == '=' || c == ':') {
            Some(pos) if secret => parts.push(format!("{}[REDACTED]", &raw[..=pos])),
            _ => parts.push(raw.to_string()),
        }
    }

    let mut out = parts.join(" ");
    if out.chars().count() > MAX_ERROR_CHARS {
        out = out.chars().take(MAX_ERROR_CHARS).collect();
        out.push_str("...");
    }

    out
}
