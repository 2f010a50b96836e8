use once_cell::sync::Lazy;
use regex::Regex;

static SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^https?://").expect("scheme regex"));

/// Quote a value for a POSIX single-quote context: every `'` becomes `'\''`
/// and the whole value is wrapped in single quotes.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Strip an `http(s)://` scheme and one trailing slash so the value can be
/// used both as a shell argument and as a path segment.
pub fn normalize_domain(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_scheme = SCHEME_RE.replace(trimmed, "");
    without_scheme
        .strip_suffix('/')
        .unwrap_or(&without_scheme)
        .to_string()
}
