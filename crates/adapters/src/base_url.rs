use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

static VERSION_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/v\d+$").unwrap());

/// Normalizes a configured base URL into the form the client expects:
/// empty input falls back to the Groq default, a trailing `#` pins the
/// URL exactly as written, and a missing version segment gets `/v1`
/// appended.
pub fn normalize_base_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return DEFAULT_BASE_URL.to_string();
    }

    if trimmed.ends_with('#') {
        return trimmed.trim_end_matches('#').to_string();
    }

    let without_slash = trimmed.trim_end_matches('/');
    if VERSION_SUFFIX_RE.is_match(without_slash) || without_slash.contains("/v1") {
        without_slash.to_string()
    } else {
        format!("{without_slash}/v1")
    }
}
