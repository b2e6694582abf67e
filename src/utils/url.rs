//! URL helpers for building backend endpoints.

/// Normalize a base URL by removing trailing slashes
///
/// # Examples
///
/// ```
/// use iris::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://127.0.0.1:8000"), "http://127.0.0.1:8000");
/// assert_eq!(normalize_base_url("http://127.0.0.1:8000/"), "http://127.0.0.1:8000");
/// assert_eq!(normalize_base_url("http://iris.local/api///"), "http://iris.local/api");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Join a base URL and an endpoint path without doubling slashes
///
/// # Examples
///
/// ```
/// use iris::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("http://127.0.0.1:8000", "conversations"),
///     "http://127.0.0.1:8000/conversations"
/// );
/// assert_eq!(
///     construct_api_url("http://127.0.0.1:8000/", "/conversation/7"),
///     "http://127.0.0.1:8000/conversation/7"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

/// Whether `base_url` looks usable as a backend address.
pub fn is_http_url(base_url: &str) -> bool {
    let trimmed = base_url.trim();
    ["http://", "https://"].iter().any(|scheme| {
        trimmed
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
            && trimmed.len() > scheme.len()
    })
}
