//! Fixed regex set flagging traversal / XSS / SQL-injection markers in the
//! URL or user-agent (spec §4.7). Log-only: it never blocks by itself.
use once_cell::sync::Lazy;
use regex::Regex;

static PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        ("path_traversal", Regex::new(r"(\.\./|\.\.\\|%2e%2e)").unwrap()),
        (
            "xss",
            Regex::new(r"(?i)(<script|onerror=|onload=|javascript:)").unwrap(),
        ),
        (
            "sql_injection",
            Regex::new(r"(?i)(\bunion\s+select\b|\bor\s+1=1\b|;--|'\s*or\s*')").unwrap(),
        ),
    ]
});

/// Returns the names of every pattern that matched `url` or `user_agent`.
pub fn detect(url: &str, user_agent: &str) -> Vec<&'static str> {
    PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(url) || re.is_match(user_agent))
        .map(|(name, _)| *name)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flags_path_traversal() {
        assert_eq!(detect("/api/v1/../../etc/passwd", "curl"), vec!["path_traversal"]);
    }

    #[test]
    fn flags_sql_injection_marker() {
        assert_eq!(
            detect("/api/v1/users?id=1' or '1'='1", "curl"),
            vec!["sql_injection"]
        );
    }

    #[test]
    fn benign_request_flags_nothing() {
        assert!(detect("/api/v1/connections/123", "pgai-cli/1.0").is_empty());
    }
}
