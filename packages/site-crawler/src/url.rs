//! URL normalization and host filtering.
//!
//! Normalization keeps task deduplication stable: two spellings of the
//! same page must hash to the same task id.

use url::Url;

/// Normalize a URL for deduplication.
///
/// Lowercases scheme and host, defaults a missing scheme to https and a
/// missing path to `/`, trims a trailing slash, sorts query pairs, and
/// drops the fragment. Unparseable input is returned trimmed, unchanged.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let Ok(parsed) = Url::parse(&candidate) else {
        return trimmed.to_string();
    };

    let scheme = parsed.scheme().to_ascii_lowercase();
    let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
    let port = parsed
        .port()
        .map(|p| format!(":{p}"))
        .unwrap_or_default();

    let mut path = parsed.path().to_string();
    if path.is_empty() {
        path = "/".to_string();
    }
    if path != "/" && path.ends_with('/') {
        path.pop();
    }

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    let query = if pairs.is_empty() {
        String::new()
    } else {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        format!("?{encoded}")
    };

    format!("{scheme}://{host}{port}{path}{query}")
}

/// Lowercased host of a URL, if it has one.
pub fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed.host_str().map(|h| h.to_ascii_lowercase())
}

/// Check a URL's host against allow/deny lists.
///
/// Deny wins over allow. An empty allow list permits every host not
/// denied; a non-empty allow list permits only its members. Hosts are
/// compared lowercased and exactly (no suffix matching).
pub fn is_domain_allowed(url: &str, allow: &[String], deny: &[String]) -> bool {
    let Some(host) = host_of(url) else {
        return false;
    };
    if deny.iter().any(|d| *d == host) {
        return false;
    }
    if !allow.is_empty() && !allow.iter().any(|d| *d == host) {
        return false;
    }
    true
}
