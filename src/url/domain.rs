use url::Url;

/// Extracts the politeness domain from a URL
///
/// The domain is the lowercase host, followed by `:port` when the URL names a
/// non-default port. Two servers on the same host but different ports are
/// rate limited independently.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use driftnet::url::domain_of;
///
/// let url = Url::parse("https://Example.com/path").unwrap();
/// assert_eq!(domain_of(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("http://127.0.0.1:8080/").unwrap();
/// assert_eq!(domain_of(&url), Some("127.0.0.1:8080".to_string()));
/// ```
pub fn domain_of(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}
