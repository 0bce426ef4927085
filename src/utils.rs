use crate::CrawlError;
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

/// Hex SHA-256 of raw page markup, used as the memoization key for parsed documents.
pub fn content_hash(markup: &str) -> String {
    hex::encode(Sha256::digest(markup.as_bytes()))
}

/// Parses `url`, accepting only http and https addresses.
pub fn validate_url(url: &str) -> Result<Url, CrawlError> {
    let parsed = Url::parse(url).map_err(|e| CrawlError::InvalidUrl(format!("{url}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(CrawlError::InvalidUrl(format!(
            "{url}: unsupported scheme {}",
            parsed.scheme()
        )));
    }
    Ok(parsed)
}

/// Resolves an href found on a page against the dealership's base URL.
pub fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("javascript:") {
        return None;
    }
    base.join(href).ok().map(String::from)
}

/// `url` with any fragment removed.
pub fn strip_fragment(url: &str) -> &str {
    url.split_once('#').map_or(url, |(head, _)| head)
}

/// Compact duration for log summaries, e.g. `850ms`, `4.2s`, `3m 07s`, `1h 02m`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match (secs / 3600, secs % 3600 / 60) {
        (0, 0) if secs == 0 => format!("{}ms", duration.as_millis()),
        (0, 0) => format!("{:.1}s", duration.as_secs_f64()),
        (0, minutes) => format!("{minutes}m {:02}s", secs % 60),
        (hours, minutes) => format!("{hours}h {minutes:02}m"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        let a = content_hash("<html>a</html>");
        assert_eq!(a, content_hash("<html>a</html>"));
        assert_ne!(a, content_hash("<html>b</html>"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_only_web_urls_are_valid() {
        assert!(validate_url("https://cars.test/dealer/sunrise").is_ok());
        assert!(validate_url("http://cars.test").is_ok());
        assert!(matches!(
            validate_url("ftp://cars.test/feed"),
            Err(CrawlError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_url("cars.test/dealer"),
            Err(CrawlError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_resolve_link() {
        let base = Url::parse("https://cars.test/dealer/sunrise").unwrap();
        assert_eq!(
            resolve_link(&base, "/details/123").as_deref(),
            Some("https://cars.test/details/123")
        );
        assert_eq!(
            resolve_link(&base, "https://other.test/v/9").as_deref(),
            Some("https://other.test/v/9")
        );
        assert_eq!(resolve_link(&base, "  "), None);
        assert_eq!(resolve_link(&base, "javascript:void(0)"), None);
    }

    #[test]
    fn test_strip_fragment() {
        assert_eq!(strip_fragment("https://a.test/x#resultsPage=2"), "https://a.test/x");
        assert_eq!(strip_fragment("https://a.test/x"), "https://a.test/x");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(format_duration(Duration::from_millis(4200)), "4.2s");
        assert_eq!(format_duration(Duration::from_secs(187)), "3m 07s");
        assert_eq!(format_duration(Duration::from_secs(3720)), "1h 02m");
    }
}
