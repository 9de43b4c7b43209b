use std::sync::LazyLock;

use regex::Regex;

use crate::error::SecurityError;

/// Longest accepted input line, in characters.
pub const MAX_INPUT_CHARS: usize = 10_000;

struct DenyRule {
    name: &'static str,
    pattern: Regex,
}

/// Fixed denylist. Each entry is `(name shown to the user, case-insensitive regex)`.
const DENY_PATTERNS: &[(&str, &str)] = &[
    // ── Shell: destructive verbs and metacharacter chains ──
    ("rm -rf", r"\brm\s+(-{1,2}[a-z]+\s+)*-{1,2}[a-z]*[rf]"),
    ("mkfs", r"\bmkfs(\.[a-z0-9]+)?\b"),
    ("dd if=", r"\bdd\s+if="),
    ("fork bomb", r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
    ("raw device write", r">\s*/dev/(sd[a-z]|hd[a-z]|nvme|disk)"),
    ("chmod 777 /", r"\bchmod\s+(-r\s+)?[0-7]?777\s+/"),
    (
        "chained destructive command",
        r"[;&|]\s*(sudo\s+)?(rm|mkfs|dd|shutdown|reboot|halt|poweroff|kill|killall|chown|chmod)\b",
    ),
    (
        "command substitution",
        r"(\$\(|`)\s*(sudo\s+)?(rm|mkfs|dd|shutdown|reboot|curl|wget|nc|bash|sh)\b",
    ),
    ("pipe to shell", r"\|\s*(sudo\s+)?(ba|z|da|k)?sh\b"),
    // ── Script injection ──
    ("<script>", r"<\s*/?\s*script\b"),
    ("javascript: url", r"javascript\s*:"),
    (
        "inline event handler",
        r"\bon(error|load|click|mouseover|focus|submit)\s*=",
    ),
    ("<iframe>", r"<\s*iframe\b"),
    // ── SQL mutation ──
    ("DROP TABLE", r"\bdrop\s+(table|database|schema)\b"),
    ("DELETE FROM", r"\bdelete\s+from\b"),
    ("TRUNCATE TABLE", r"\btruncate\s+table\b"),
    ("ALTER TABLE", r"\balter\s+table\b"),
    ("SQL tautology", r"'\s*or\s+'?\d+'?\s*=\s*'?\d+"),
    ("SQL comment injection", r"'\s*;\s*--"),
    // ── Suspicious control / format characters ──
    ("control character", r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]"),
    ("bidi override", r"[\x{202A}-\x{202E}\x{2066}-\x{2069}]"),
    ("zero-width character", r"[\x{200B}-\x{200F}\x{2060}\x{FEFF}]"),
];

static DENY_RULES: LazyLock<Vec<DenyRule>> = LazyLock::new(|| {
    DENY_PATTERNS
        .iter()
        .filter_map(|&(name, pat)| match Regex::new(&format!("(?i){pat}")) {
            Ok(pattern) => Some(DenyRule { name, pattern }),
            Err(e) => {
                tracing::error!("invalid deny pattern {name}: {e}");
                None
            }
        })
        .collect()
});

/// Name of the first deny rule matching `input`, if any.
pub fn matching_rule(input: &str) -> Option<&'static str> {
    DENY_RULES
        .iter()
        .find(|rule| rule.pattern.is_match(input))
        .map(|rule| rule.name)
}

/// Reject over-long input and input matching the denylist.
///
/// Accepted input is returned unchanged. This is a defense-in-depth filter, not a
/// parser: it cannot prove an input safe, only catch known-dangerous shapes.
pub fn sanitize(input: &str) -> Result<String, SecurityError> {
    let len = input.chars().count();
    if len > MAX_INPUT_CHARS {
        return Err(SecurityError::TooLong {
            len,
            max: MAX_INPUT_CHARS,
        });
    }
    if let Some(rule) = matching_rule(input) {
        tracing::warn!(rule, "input rejected by sanitizer");
        return Err(SecurityError::BlockedPattern(rule.to_string()));
    }
    Ok(input.to_string())
}

/// Raw bytes from the terminal: anything that is not UTF-8 text is rejected outright.
pub fn sanitize_bytes(input: &[u8]) -> Result<String, SecurityError> {
    let text = std::str::from_utf8(input).map_err(|_| SecurityError::NotText)?;
    sanitize(text)
}
