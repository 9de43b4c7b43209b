use reqwest::Url;

use super::ValidationResult;

/// Format rule for a provider credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyRule {
    pub min_length: usize,
    /// Empty string means no prefix requirement.
    pub required_prefix: &'static str,
}

/// Applies to any provider name not listed in [`KEY_RULES`].
pub const GENERIC_KEY_RULE: KeyRule = KeyRule {
    min_length: 20,
    required_prefix: "",
};

/// Per-provider credential rules, keyed by lower-case provider name (aliases included).
pub static KEY_RULES: &[(&str, KeyRule)] = &[
    (
        "gemini",
        KeyRule {
            min_length: 39,
            required_prefix: "AIza",
        },
    ),
    (
        "groq",
        KeyRule {
            min_length: 50,
            required_prefix: "gsk_",
        },
    ),
    (
        "chatgpt",
        KeyRule {
            min_length: 40,
            required_prefix: "sk-",
        },
    ),
    (
        "openai",
        KeyRule {
            min_length: 40,
            required_prefix: "sk-",
        },
    ),
    (
        "huggingface",
        KeyRule {
            min_length: 30,
            required_prefix: "hf_",
        },
    ),
    (
        "hf",
        KeyRule {
            min_length: 30,
            required_prefix: "hf_",
        },
    ),
    // Local daemon, no credential.
    (
        "ollama",
        KeyRule {
            min_length: 0,
            required_prefix: "",
        },
    ),
    (
        "mcp",
        KeyRule {
            min_length: 16,
            required_prefix: "",
        },
    ),
];

/// Hosts provider requests may be sent to. Exact match only.
pub static ALLOWED_DOMAINS: &[&str] = &[
    "generativelanguage.googleapis.com",
    "api.groq.com",
    "api.openai.com",
    "api-inference.huggingface.co",
    "huggingface.co",
    "localhost",
    "127.0.0.1",
];

pub fn key_rule(provider: &str) -> KeyRule {
    let provider = provider.trim().to_ascii_lowercase();
    KEY_RULES
        .iter()
        .find(|(name, _)| *name == provider)
        .map(|(_, rule)| *rule)
        .unwrap_or(GENERIC_KEY_RULE)
}

/// Check `key` against the rule for `provider`, with a reason on rejection.
pub fn check_api_key(key: &str, provider: &str) -> ValidationResult {
    let rule = key_rule(provider);
    let len = key.chars().count();
    if len < rule.min_length {
        return ValidationResult::rejected(format!(
            "key for {provider} is too short ({len} < {} characters)",
            rule.min_length
        ));
    }
    if !key.starts_with(rule.required_prefix) {
        return ValidationResult::rejected(format!(
            "key for {provider} must start with {:?}",
            rule.required_prefix
        ));
    }
    ValidationResult::accepted()
}

/// True iff `key` satisfies the format rule for `provider`. Never fails.
pub fn validate_api_key(key: &str, provider: &str) -> bool {
    check_api_key(key, provider).accepted
}

/// True iff `url` parses and its host is exactly one of [`ALLOWED_DOMAINS`].
pub fn validate_domain(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    ALLOWED_DOMAINS.contains(&host.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_provider_rules() {
        let groq_key = format!("gsk_{}", "a".repeat(52));
        assert!(validate_api_key(&groq_key, "groq"));
        assert!(validate_api_key(&groq_key, "GROQ"));
        assert!(!validate_api_key("gsk_short", "groq"));
        assert!(!validate_api_key(&format!("sk-{}", "a".repeat(60)), "groq"));

        let gemini_key = format!("AIza{}", "B".repeat(35));
        assert!(validate_api_key(&gemini_key, "gemini"));
        assert!(!validate_api_key(&gemini_key[..38], "gemini"));

        let hf = format!("hf_{}", "x".repeat(34));
        assert!(validate_api_key(&hf, "huggingface"));
        assert!(validate_api_key(&hf, "hf"));
    }

    #[test]
    fn keyless_local_provider() {
        assert!(validate_api_key("", "ollama"));
    }

    #[test]
    fn generic_rule_for_unknown_provider() {
        assert_eq!(key_rule("mistral"), GENERIC_KEY_RULE);
        assert!(validate_api_key(&"k".repeat(20), "mistral"));
        assert!(!validate_api_key(&"k".repeat(19), "mistral"));
    }

    #[test]
    fn validity_matches_rule_definition() {
        // true iff len >= min_length and key starts with prefix
        let providers = ["gemini", "groq", "chatgpt", "huggingface", "ollama", "mcp", "other"];
        let keys = [
            String::new(),
            "AIza".to_string(),
            format!("AIza{}", "q".repeat(40)),
            format!("gsk_{}", "q".repeat(46)),
            format!("gsk_{}", "q".repeat(45)),
            format!("sk-{}", "q".repeat(37)),
            format!("hf_{}", "q".repeat(27)),
            "q".repeat(16),
            "q".repeat(25),
        ];
        for provider in providers {
            let rule = key_rule(provider);
            for key in &keys {
                let expected = key.chars().count() >= rule.min_length
                    && key.starts_with(rule.required_prefix);
                assert_eq!(
                    validate_api_key(key, provider),
                    expected,
                    "{provider} / {key}"
                );
            }
        }
    }

    #[test]
    fn check_api_key_reports_reason() {
        let r = check_api_key("abc", "groq");
        assert!(!r.accepted);
        assert!(r.reason.contains("too short"));

        let r = check_api_key(&"x".repeat(60), "groq");
        assert!(!r.accepted);
        assert!(r.reason.contains("gsk_"));
    }

    #[test]
    fn allowed_domains_accepted() {
        assert!(validate_domain("https://api.groq.com/openai/v1/chat/completions"));
        assert!(validate_domain(
            "https://generativelanguage.googleapis.com/v1beta/models"
        ));
        assert!(validate_domain("http://localhost:11434/api/chat"));
        assert!(validate_domain("https://API.OPENAI.COM/v1"));
    }

    #[test]
    fn domain_tricks_rejected() {
        for url in [
            "evil.com/api.groq.com",
            "https://evil.com/api.groq.com",
            "https://api.groq.com.evil.com/v1",
            "https://evil-api.groq.com/v1",
            "https://sub.api.groq.com/v1",
            "https://api.groq.com@evil.com/v1",
            "https://evil.com?host=api.groq.com",
            "file:///etc/passwd",
            "not a url",
            "",
        ] {
            assert!(!validate_domain(url), "expected reject: {url}");
        }
    }
}
