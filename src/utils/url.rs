//! Domain extraction for per-domain bookkeeping.

use url::Url;

/// Extract the domain key for a URL or bare hostname.
///
/// Hostnames are lowercased and a leading `www.` is folded away so
/// `https://www.site.com/a` and `site.com` share rate and block state.
/// Returns `None` when no hostname can be found.
pub fn extract_domain(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Bare domains ("site.com", "site.com/path") have no scheme
    let host = host_of(trimmed).or_else(|| host_of(&format!("https://{}", trimmed)))?;

    let host = host.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

fn host_of(candidate: &str) -> Option<String> {
    Url::parse(candidate)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_string()))
}
