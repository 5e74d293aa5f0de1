// src/utils/url.rs

//! URL manipulation utilities.

use url::Url;

/// Resolve a potentially relative URL against a base URL.
///
/// Returns `None` when the base is not an absolute URL or the join fails.
///
/// # Examples
/// ```
/// use sitewatch::utils::url::resolve;
///
/// assert_eq!(
///     resolve("https://example.com/path/", "page.html").as_deref(),
///     Some("https://example.com/path/page.html")
/// );
/// ```
pub fn resolve(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(href.trim()).ok().map(|u| u.to_string())
}

/// Canonical form used for visited-set membership: trimmed, fragment removed.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    match Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => match trimmed.split_once('#') {
            Some((head, _)) => head.to_string(),
            None => trimmed.to_string(),
        },
    }
}

/// Whether the string parses as an absolute http(s) URL.
pub fn is_http_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_and_absolute() {
        assert_eq!(
            resolve("https://example.com/a/b", "/c").as_deref(),
            Some("https://example.com/c")
        );
        assert_eq!(
            resolve("https://example.com/a/", "https://other.com/x").as_deref(),
            Some("https://other.com/x")
        );
        assert!(resolve("not a url", "/c").is_none());
    }

    #[test]
    fn test_normalize_url_strips_fragment() {
        assert_eq!(
            normalize_url("  https://example.com/sitemap.xml#top "),
            "https://example.com/sitemap.xml"
        );
        assert_eq!(normalize_url("relative#x"), "relative");
    }

    #[test]
    fn test_is_http_url() {
        assert!(is_http_url("https://example.com/"));
        assert!(!is_http_url("ftp://example.com/"));
        assert!(!is_http_url("/relative"));
    }
}
