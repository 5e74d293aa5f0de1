// src/services/normalizer.rs

//! Content normalization and hashing.
//!
//! Raw content goes through a fixed pipeline before hashing so that
//! cosmetic churn (timestamps, session tokens, cache busters, attribute
//! order, whitespace) never registers as a change:
//!
//! 1. HTML minification (comments, inter-tag whitespace, attribute order)
//! 2. Built-in noise patterns, each replaced by a placeholder
//! 3. Site-specific ignore patterns, replaced by `[IGNORED]`
//! 4. Whitespace collapse
//! 5. SHA-256
//!
//! JSON bodies use a structural normalizer instead of step 1 and 2.
//! Placeholders contain no digits, so normalizing twice is a no-op.

use std::sync::LazyLock;

use log::{debug, warn};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::models::ContentType;

/// Output of the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedContent {
    pub content: String,
    pub hash: String,
    /// Pipeline actually applied (JSON that fails to parse is treated as text)
    pub content_type: ContentType,
}

/// Built-in regexes. All literals below are known-valid.
fn builtin(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern}: {e}"))
}

static COMMENT: LazyLock<Regex> = LazyLock::new(|| builtin(r"(?s)<!--.*?-->"));
static BETWEEN_TAGS: LazyLock<Regex> = LazyLock::new(|| builtin(r">\s+<"));
static START_TAG: LazyLock<Regex> =
    LazyLock::new(|| builtin(r"<([A-Za-z][A-Za-z0-9:-]*)(\s[^<>]*?)?(/?)>"));
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    builtin(r#"([^\s="'<>/]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
});
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| builtin(r"\s+"));

/// Noise patterns in application order, with their replacements.
static NOISE: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // <meta content="..." name="csrf-token"> (minified attribute order)
        (
            builtin(
                r#"(?i)(<meta\b[^>]*?\bcontent\s*=\s*["'])[^"']*(["'][^>]*?\bname\s*=\s*["'](?:csrf|xsrf|nonce|request[-_]?id)[\w-]*["'])"#,
            ),
            "${1}[TOKEN]${2}",
        ),
        (
            builtin(
                r#"(?i)(<meta\b[^>]*?\bname\s*=\s*["'](?:csrf|xsrf|nonce|request[-_]?id)[\w-]*["'][^>]*?\bcontent\s*=\s*["'])[^"']*"#,
            ),
            "${1}[TOKEN]",
        ),
        (
            builtin(
                r#"(?i)((?:csrf|xsrf|authenticity|session|nonce|request[-_]?id)[\w-]*["']?\s*[:=]\s*["']?)[^"'\s&<>,;]+"#,
            ),
            "${1}[TOKEN]",
        ),
        (
            builtin(
                r#"(?i)\b(data-(?:testid|test-id|test|cy|qa))\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#,
            ),
            "${1}=\"[TESTID]\"",
        ),
        (
            builtin(r#"(?i)\bstyle\s*=\s*(?:"[^"]*"|'[^']*')"#),
            "style=\"[STYLE]\"",
        ),
        (
            builtin(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b"),
            "[UUID]",
        ),
        (
            builtin(
                r"\b\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?)?",
            ),
            "[DATETIME]",
        ),
        (
            builtin(
                r"(?i)\b(?:(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+\d{1,2}(?:st|nd|rd|th)?,?\s+\d{4}|\d{1,2}\s+(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?,?\s+\d{4}|\d{1,2}/\d{1,2}/\d{2,4})\b",
            ),
            "[DATE]",
        ),
        (
            builtin(r"(?i)\b\d+\s+(?:second|minute|hour|day|week|month|year)s?\s+ago\b"),
            "[RELATIVE_TIME]",
        ),
        (
            builtin(r"(?i)\b\d{1,2}:\d{2}(?::\d{2})?(?:\s?[ap]m)?\b"),
            "[TIME]",
        ),
        (builtin(r"\b1\d{9}(?:\d{3})?\b"), "[TIMESTAMP]"),
        (
            builtin(r"(?i)([?&](?:v|ver|version|rev|cb)=)[\w.-]+"),
            "${1}[VERSION]",
        ),
        (
            builtin(r"(?i)\bv?\d+\.\d+\.\d+(?:[-.][0-9a-z]+)*\b"),
            "[VERSION]",
        ),
    ]
});

// JSON value classifiers
static UUID_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    builtin(r"^(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
});
static HEX_VALUE: LazyLock<Regex> = LazyLock::new(|| builtin(r"^[0-9a-fA-F]{16,}$"));
static BASE62_VALUE: LazyLock<Regex> = LazyLock::new(|| builtin(r"^[A-Za-z0-9_-]{24,}$"));
static ISO_VALUE: LazyLock<Regex> =
    LazyLock::new(|| builtin(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?$"));

/// Key fragments marking a JSON field as per-request noise.
const DYNAMIC_KEYS: &[&str] = &[
    "token",
    "csrf",
    "nonce",
    "session",
    "timestamp",
    "request_id",
    "requestid",
    "trace_id",
    "traceid",
    "etag",
    "expires",
];

const REDACTED: &str = "[REDACTED]";

/// Noise-stripping normalizer configured with a site's ignore patterns.
#[derive(Debug, Clone, Default)]
pub struct ContentNormalizer {
    custom: Vec<Regex>,
}

impl ContentNormalizer {
    /// Compile site ignore patterns. Invalid patterns are logged and skipped.
    pub fn new(patterns: &[String]) -> Self {
        let custom = patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Skipping invalid ignore pattern '{}': {}", p, e);
                    None
                }
            })
            .collect();
        Self { custom }
    }

    /// Number of usable custom patterns.
    pub fn pattern_count(&self) -> usize {
        self.custom.len()
    }

    /// Normalize and hash a document.
    pub fn normalize(&self, raw: &str, content_type: ContentType) -> NormalizedContent {
        let (content, applied) = match content_type {
            ContentType::Json => match serde_json::from_str::<Value>(raw) {
                Ok(value) => {
                    let structural = normalize_json(value).to_string();
                    (self.apply_custom(&structural), ContentType::Json)
                }
                Err(e) => {
                    debug!("JSON normalization fell back to text: {}", e);
                    (self.normalize_markup(raw, false), ContentType::Text)
                }
            },
            ContentType::Html => (self.normalize_markup(raw, true), ContentType::Html),
            ContentType::Text => (self.normalize_markup(raw, false), ContentType::Text),
        };

        NormalizedContent {
            hash: sha256_hex(&content),
            content,
            content_type: applied,
        }
    }

    fn normalize_markup(&self, raw: &str, minify: bool) -> String {
        let mut text = if minify {
            minify_html(raw)
        } else {
            raw.to_string()
        };
        text = strip_noise(&text);
        text = self.apply_custom(&text);
        collapse_whitespace(&text)
    }

    fn apply_custom(&self, text: &str) -> String {
        let mut out = text.to_string();
        for re in &self.custom {
            if re.is_match(&out) {
                out = re.replace_all(&out, "[IGNORED]").into_owned();
            }
        }
        out
    }
}

/// Hex SHA-256 of a string.
pub fn sha256_hex(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Classify a body from its declared `Content-Type` and, failing that, by sniffing.
pub fn detect_content_type(declared: Option<&str>, body: &str) -> ContentType {
    if let Some(declared) = declared.map(str::to_ascii_lowercase) {
        if declared.contains("json") {
            return ContentType::Json;
        }
        if declared.contains("html") || declared.contains("xml") {
            return ContentType::Html;
        }
        if declared.starts_with("text/") {
            return ContentType::Text;
        }
    }

    let trimmed = body.trim_start();
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<Value>(trimmed).is_ok()
    {
        return ContentType::Json;
    }
    let head: String = trimmed.chars().take(512).collect::<String>().to_ascii_lowercase();
    if head.starts_with('<') || head.contains("<html") || head.contains("<body") {
        return ContentType::Html;
    }
    ContentType::Text
}

/// Strip comments, inter-tag whitespace and sort attributes by name.
///
/// Tags whose attribute list cannot be fully tokenized are left untouched.
pub fn minify_html(html: &str) -> String {
    let without_comments = COMMENT.replace_all(html, "");
    let compact = BETWEEN_TAGS.replace_all(&without_comments, "><");
    START_TAG
        .replace_all(&compact, |caps: &regex::Captures| {
            let whole = &caps[0];
            let name = &caps[1];
            let attrs = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let self_closing = &caps[3];
            match sort_attributes(attrs) {
                Some(sorted) if sorted.is_empty() => format!("<{name}{self_closing}>"),
                Some(sorted) => format!("<{name} {sorted}{self_closing}>"),
                None => whole.to_string(),
            }
        })
        .into_owned()
}

fn sort_attributes(attrs: &str) -> Option<String> {
    let mut parsed: Vec<(String, Option<String>)> = Vec::new();
    let mut consumed = 0;
    for caps in ATTRIBUTE.captures_iter(attrs) {
        let m = caps.get(0)?;
        if !attrs[consumed..m.start()].trim().is_empty() {
            return None;
        }
        consumed = m.end();
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|v| v.as_str().to_string());
        parsed.push((caps[1].to_string(), value));
    }
    if !attrs[consumed..].trim().is_empty() {
        return None;
    }

    parsed.sort_by(|a, b| a.0.cmp(&b.0));
    let rendered: Vec<String> = parsed
        .into_iter()
        .map(|(name, value)| match value {
            None => name,
            Some(v) if v.contains('"') => format!("{name}='{v}'"),
            Some(v) => format!("{name}=\"{v}\""),
        })
        .collect();
    Some(rendered.join(" "))
}

fn strip_noise(text: &str) -> String {
    let mut out = text.to_string();
    for (re, replacement) in NOISE.iter() {
        if re.is_match(&out) {
            out = re.replace_all(&out, *replacement).into_owned();
        }
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Drop dynamic keys and redact dynamic-looking values, recursively.
fn normalize_json(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| !is_dynamic_key(key))
                .map(|(key, v)| (key, normalize_json(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_json).collect()),
        Value::String(s) if is_dynamic_string(&s) => Value::String(REDACTED.to_string()),
        Value::Number(n) if n.as_u64().is_some_and(is_unix_timestamp) => {
            Value::String(REDACTED.to_string())
        }
        other => other,
    }
}

fn is_dynamic_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    DYNAMIC_KEYS.iter().any(|k| lower.contains(k))
}

fn is_unix_timestamp(n: u64) -> bool {
    (1_000_000_000..10_000_000_000).contains(&n)
        || (1_000_000_000_000..10_000_000_000_000).contains(&n)
}

fn is_dynamic_string(s: &str) -> bool {
    if UUID_VALUE.is_match(s) || HEX_VALUE.is_match(s) || ISO_VALUE.is_match(s) {
        return true;
    }
    let has_digit = s.chars().any(|c| c.is_ascii_digit());
    let has_alpha = s.chars().any(|c| c.is_ascii_alphabetic());
    if BASE62_VALUE.is_match(s) && has_digit && has_alpha {
        return true;
    }
    s.len() >= 16 && !s.contains(char::is_whitespace) && has_digit && shannon_entropy(s) > 4.0
}

/// Bits per character.
fn shannon_entropy(s: &str) -> f64 {
    let mut counts = std::collections::HashMap::new();
    for c in s.chars() {
        *counts.entry(c).or_insert(0usize) += 1;
    }
    let len = s.chars().count() as f64;
    counts
        .values()
        .map(|&n| {
            let p = n as f64 / len;
            -p * p.log2()
        })
        .sum()
}
