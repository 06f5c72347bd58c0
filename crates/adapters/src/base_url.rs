use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/v\d+$").expect("valid version suffix regex"));

/// Normalises an OpenAI-compatible base URL: appends `/v1` unless the URL
/// already carries a version. A trailing `#` keeps the URL as typed.
pub fn check_base_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if trimmed.ends_with('#') {
        return trimmed.trim_end_matches('#').to_string();
    }

    let without_slash = trimmed.trim_end_matches('/');
    if VERSION_SUFFIX_RE.is_match(without_slash) || without_slash.contains("/v1") {
        without_slash.to_string()
    } else {
        format!("{}/v1", without_slash)
    }
}

/// Falls back to `default` for blank profile URLs.
pub fn resolve_base_url(base_url: &str, default: &str) -> String {
    let raw = if base_url.trim().is_empty() {
        default
    } else {
        base_url
    };
    check_base_url(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_base_url_appends_v1_when_missing() {
        assert_eq!(
            check_base_url("https://example.com"),
            "https://example.com/v1"
        );
        assert_eq!(
            check_base_url("http://localhost:11434/"),
            "http://localhost:11434/v1"
        );
    }

    #[test]
    fn check_base_url_keeps_existing_version() {
        assert_eq!(
            check_base_url("https://example.com/v2"),
            "https://example.com/v2"
        );
        assert_eq!(
            check_base_url("https://example.com/v1/"),
            "https://example.com/v1"
        );
    }

    #[test]
    fn check_base_url_respects_hash_suffix() {
        assert_eq!(
            check_base_url("https://example.com/#"),
            "https://example.com/"
        );
    }

    #[test]
    fn resolve_base_url_uses_default_for_blank_input() {
        assert_eq!(
            resolve_base_url("  ", "https://api.openai.com/v1"),
            "https://api.openai.com/v1"
        );
        assert_eq!(
            resolve_base_url("https://proxy.local", "https://api.openai.com/v1"),
            "https://proxy.local/v1"
        );
    }
}
