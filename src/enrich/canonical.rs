//! Lookup key canonicalization.
//!
//! Stored keys and keys on returned enrichment records both pass through
//! [`canonical_key`], so exact string equality is the match rule.

use url::Url;

/// Key values that mean "no key" even though they are non-empty.
const SENTINEL_KEYS: [&str; 6] = ["n/a", "na", "none", "null", "unknown", "pending_brightdata"];

/// Normalize a URL-like key.
///
/// Drops scheme, `www.`, query string, fragment and trailing slash, and
/// lower-cases the rest: `https://www.LinkedIn.com/in/Ada/?trk=x` becomes
/// `linkedin.com/in/ada`.
pub fn canonical_key(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    if let Ok(url) = Url::parse(&candidate) {
        if let Some(host) = url.host_str() {
            let host = host.strip_prefix("www.").unwrap_or(host);
            let path = url.path().trim_end_matches('/');
            return format!("{host}{path}").to_lowercase();
        }
    }

    fallback_key(trimmed)
}

fn fallback_key(trimmed: &str) -> String {
    let without_query = trimmed.split(['?', '#']).next().unwrap_or_default();
    let without_scheme = without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_query);
    let without_www = without_scheme.strip_prefix("www.").unwrap_or(without_scheme);
    without_www.trim_end_matches('/').to_lowercase()
}

/// Whether a stored key can ever be matched.
pub fn is_usable_key(key: &str) -> bool {
    let key = key.trim();
    !key.is_empty() && !SENTINEL_KEYS.contains(&key.to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_query_scheme_and_case() {
        assert_eq!(
            canonical_key("https://www.LinkedIn.com/in/Ada-Lovelace/?trk=public_profile"),
            "linkedin.com/in/ada-lovelace"
        );
        assert_eq!(
            canonical_key("linkedin.com/in/ada-lovelace"),
            "linkedin.com/in/ada-lovelace"
        );
        assert_eq!(
            canonical_key("http://linkedin.com/in/ada-lovelace#about"),
            "linkedin.com/in/ada-lovelace"
        );
    }

    #[test]
    fn test_listing_urls() {
        assert_eq!(
            canonical_key("https://www.yelp.com/biz/franklin-barbecue-austin?sort_by=date_asc"),
            "yelp.com/biz/franklin-barbecue-austin"
        );
    }

    #[test]
    fn test_stored_and_returned_forms_agree() {
        let stored = canonical_key("https://linkedin.com/in/grace-hopper");
        let returned = canonical_key("https://www.linkedin.com/in/grace-hopper/?originalSubdomain=us");
        assert_eq!(stored, returned);
    }

    #[test]
    fn test_empty_and_sentinels() {
        assert_eq!(canonical_key("   "), "");
        assert!(!is_usable_key(""));
        assert!(!is_usable_key("N/A"));
        assert!(!is_usable_key("PENDING_BRIGHTDATA"));
        assert!(is_usable_key("linkedin.com/in/a"));
    }
}
