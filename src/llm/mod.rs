//! LLM client and single-engine-pass execution.
//!
//! Grounded directly on `original_source/src/executor/engine_runner.py`:
//! every constant below (retry schedule, heartbeat timeout, transport
//! timeouts, effort/1M-context thresholds, salvage floor, non-retryable
//! substrings) is carried over unchanged.

mod client;
mod engine_runner;

pub use client::{LlmClient, LlmRequest, LlmResponse};
pub use engine_runner::{EngineRunner, PassOutcome};

/// Number of attempts before an LLM call gives up.
pub const MAX_RETRIES: u32 = 5;

/// Backoff schedule between retries, in seconds.
pub const RETRY_DELAYS_SECS: [u64; 5] = [30, 60, 90, 120, 180];

/// Time without a stream chunk before a call is considered stalled.
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 120;

/// Transport connect/write/pool timeouts.
pub const TRANSPORT_TIMEOUT_SECS: u64 = 60;

/// Above this prompt size, extended thinking is disabled outright.
pub const THINKING_DISABLE_CHARS: usize = 400_000;

/// Above this prompt size (but below the disable threshold), thinking
/// effort is downgraded to low.
pub const THINKING_DOWNGRADE_CHARS: usize = 200_000;

/// Above this prompt size, the 1M-context beta is auto-enabled.
pub const ONE_M_CONTEXT_CHARS: usize = 600_000;

/// Beta header value for the 1M-context window.
pub const ONE_M_CONTEXT_BETA: &str = "context-1m-2025-08-07";

/// Below this many salvaged characters, a truncated/cancelled stream isn't
/// worth keeping as a partial result.
pub const MIN_SALVAGEABLE_CHARS: usize = 5000;

/// Substrings that mark a provider error as not worth retrying.
pub const NON_RETRYABLE_SUBSTRINGS: &[&str] = &[
    "invalid_api_key",
    "authentication",
    "context_length_exceeded",
    "too many tokens",
    "prompt is too long",
];

/// Returns true for a non-retryable error, matched case-insensitively
/// against `NON_RETRYABLE_SUBSTRINGS`, plus the two-part "max_tokens" +
/// "maximum allowed" pairing the original treats as a hard stop.
pub fn is_non_retryable(message: &str) -> bool {
    let lower = message.to_lowercase();
    if NON_RETRYABLE_SUBSTRINGS.iter().any(|s| lower.contains(s)) {
        return true;
    }
    lower.contains("max_tokens") && lower.contains("maximum allowed")
}

/// Effort level to apply for a given prompt size, following the
/// disable/downgrade thresholds above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingEffort {
    Disabled,
    Low,
    Default,
}

pub fn thinking_effort_for_chars(char_count: usize) -> ThinkingEffort {
    if char_count > THINKING_DISABLE_CHARS {
        ThinkingEffort::Disabled
    } else if char_count > THINKING_DOWNGRADE_CHARS {
        ThinkingEffort::Low
    } else {
        ThinkingEffort::Default
    }
}

pub fn needs_one_m_context(char_count: usize) -> bool {
    char_count > ONE_M_CONTEXT_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_retryable_substrings_are_matched_case_insensitively() {
        assert!(is_non_retryable("Invalid_API_Key provided"));
        assert!(is_non_retryable("Context_Length_Exceeded: too long"));
        assert!(is_non_retryable("error: max_tokens exceeds the maximum allowed value"));
        assert!(!is_non_retryable("internal server error, try again"));
    }

    #[test]
    fn thinking_effort_follows_thresholds() {
        assert_eq!(thinking_effort_for_chars(100), ThinkingEffort::Default);
        assert_eq!(thinking_effort_for_chars(250_000), ThinkingEffort::Low);
        assert_eq!(thinking_effort_for_chars(450_000), ThinkingEffort::Disabled);
    }

    #[test]
    fn one_m_context_threshold_is_exclusive() {
        assert!(!needs_one_m_context(600_000));
        assert!(needs_one_m_context(600_001));
    }
}
