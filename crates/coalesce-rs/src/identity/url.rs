//! Source URL normalization for identity matching.

use ::url::Url;

/// Query parameters that only track where a click came from.
fn is_tracking_param(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    lower.starts_with("utm_") || lower == "ref" || lower == "ref_src"
}

/// Normalize a source URL so trivially different links to one page agree.
///
/// Drops the fragment and tracking parameters, lowercases scheme and host,
/// and strips trailing slashes from the path. Anything that does not
/// parse as an `http(s)` URL with a host falls back to the trimmed input.
/// Idempotent: normalizing an already-normalized URL returns it unchanged.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(parsed) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return trimmed.to_string();
    }
    let Some(host) = parsed.host_str() else {
        return trimmed.to_string();
    };

    let mut out = format!("{}://{}", parsed.scheme(), host.to_ascii_lowercase());
    if let Some(port) = parsed.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }

    // All trailing slashes go, so the root path becomes empty.
    out.push_str(parsed.path().trim_end_matches('/'));

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !kept.is_empty() {
        let query = ::url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept)
            .finish();
        out.push('?');
        out.push_str(&query);
    }

    out
}
