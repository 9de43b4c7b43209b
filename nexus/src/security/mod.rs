//! Input sanitization, credential and domain checks, and the allowlisted command runner.
//!
//! Everything here is pure or purely local: nothing in this module makes a network call.

mod allowlist;
mod exec;
mod sanitize;

pub use allowlist::{
    ALLOWED_DOMAINS, GENERIC_KEY_RULE, KEY_RULES, KeyRule, check_api_key, key_rule,
    validate_api_key, validate_domain,
};
pub use exec::{
    ALLOWED_COMMANDS, AllowedCommand, EXEC_TIMEOUT, ExecResult, MAX_CAPTURE_BYTES, SafeExecutor,
    safe_exec,
};
pub use sanitize::{MAX_INPUT_CHARS, matching_rule, sanitize, sanitize_bytes};

/// Outcome of a validation check that carries a human-readable reason on rejection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationResult {
    pub accepted: bool,
    pub reason: String,
}

impl ValidationResult {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: String::new(),
        }
    }

    pub fn rejected(reason: String) -> Self {
        Self {
            accepted: false,
            reason,
        }
    }
}
