//! # Text Processing Utilities
//!
//! Redaction helpers used before resolved values reach the logs.

use once_cell::sync::Lazy;
use regex::Regex;

/// Replacement token for redacted text.
pub const REDACTED: &str = "<redacted>";

static REDACT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization: )([\w\-\.=:/+]+)",
        r"(?i)([A-Z0-9_]*?(?:KEY|TOKEN|SECRET|PASSWORD)=)([^\s]+)",
        r"(?i)(--(?:password|token|secret)[= ])([^\s]+)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Redacts values that look like secrets: authorization headers,
/// `*_KEY=`/`*_TOKEN=`-style assignments and password flags.
///
/// # Example
/// ```rust
/// use dockhand_util::text_processing::redact_sensitive;
///
/// assert_eq!(redact_sensitive("API_KEY=abc123 run"), "API_KEY=<redacted> run");
/// ```
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in REDACT_PATTERNS.iter() {
        redacted = pattern
            .replace_all(&redacted, |captures: &regex::Captures| {
                let prefix = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{prefix}{REDACTED}")
            })
            .to_string();
    }
    redacted
}

/// Replaces every literal occurrence of each secret in `input`.
///
/// Longer secrets are replaced first so a secret that contains another is
/// not partially exposed. Blank secrets are ignored.
pub fn redact_values<S: AsRef<str>>(input: &str, secrets: &[S]) -> String {
    let mut ordered: Vec<&str> = secrets.iter().map(AsRef::as_ref).filter(|secret| !secret.is_empty()).collect();
    ordered.sort_by_key(|secret| std::cmp::Reverse(secret.len()));

    let mut redacted = input.to_string();
    for secret in ordered {
        redacted = redacted.replace(secret, REDACTED);
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_assignments_and_flags() {
        assert_eq!(redact_sensitive("DB_PASSWORD=hunter2 other"), "DB_PASSWORD=<redacted> other");
        assert_eq!(redact_sensitive("tool --token abc123"), "tool --token <redacted>");
        assert_eq!(redact_sensitive("plain text"), "plain text");
    }

    #[test]
    fn redacts_literal_values_longest_first() {
        let redacted = redact_values("run --key abcdef --short abc", &["abc", "abcdef"]);
        assert_eq!(redacted, "run --key <redacted> --short <redacted>");
        assert_eq!(redact_values("nothing", &[""]), "nothing");
    }
}
