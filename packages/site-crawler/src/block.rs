//! Detection of anti-bot block signals in fetched pages.

/// Body phrases that suggest the page is a block/challenge interstitial
/// rather than real content.
const BLOCK_PATTERNS: [&str; 5] = [
    "captcha",
    "verify you are human",
    "access denied",
    "forbidden",
    "too many requests",
];

/// Scan a response for block signals.
///
/// HTTP 403/429/503 produce an `http_<code>` signal; body phrases are
/// matched case-insensitively. The returned list feeds the per-domain
/// throttle and the report stage.
pub fn detect_block_signals(html: &str, status: Option<u16>) -> Vec<String> {
    let mut signals = Vec::new();
    if let Some(code @ (403 | 429 | 503)) = status {
        signals.push(format!("http_{code}"));
    }
    let lower = html.to_lowercase();
    for pattern in BLOCK_PATTERNS {
        if lower.contains(pattern) {
            signals.push(pattern.to_string());
        }
    }
    signals
}
