//! Robots.txt rules for a single domain
//!
//! Disallow/Allow matching is delegated to the `robotstxt` crate. The
//! Crawl-delay directive is not covered by it, so it is extracted once when
//! the rules are parsed.

use robotstxt::DefaultMatcher;
use std::time::Duration;
use url::Url;

/// Upper bound on an honored Crawl-delay; larger values are clamped
pub const MAX_CRAWL_DELAY: Duration = Duration::from_secs(3600);

/// Parsed robots policy bound to the crawler's user agent
#[derive(Debug, Clone, PartialEq)]
pub struct RobotsRules {
    /// Raw robots.txt body; empty means allow everything
    content: String,
    user_agent: String,
    crawl_delay: Option<Duration>,
}

impl RobotsRules {
    /// Parses a robots.txt body for `user_agent`
    pub fn parse(content: &str, user_agent: &str) -> Self {
        Self {
            content: content.to_string(),
            user_agent: user_agent.to_string(),
            crawl_delay: parse_crawl_delay(content, user_agent),
        }
    }

    /// A policy that allows every path and sets no crawl delay
    ///
    /// Installed when robots.txt is missing or cannot be fetched.
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
            user_agent: String::new(),
            crawl_delay: None,
        }
    }

    pub fn is_allow_all(&self) -> bool {
        self.content.trim().is_empty()
    }

    /// Checks whether `url` may be fetched
    pub fn is_allowed(&self, url: &Url) -> bool {
        if self.is_allow_all() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, &self.user_agent, url.as_str())
    }

    /// Crawl-delay for our agent, falling back to the `*` group
    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }
}

/// Extracts the Crawl-delay (in seconds) that applies to `user_agent`
///
/// Consecutive `User-agent` lines form one group. A delay in a group naming
/// our agent wins over one in the `*` group. Malformed or negative values are
/// ignored; values above `MAX_CRAWL_DELAY` are clamped to it.
fn parse_crawl_delay(content: &str, user_agent: &str) -> Option<Duration> {
    let agent = user_agent.to_lowercase();
    let mut group: Vec<String> = Vec::new();
    let mut in_agent_lines = false;
    let mut specific: Option<f64> = None;
    let mut wildcard: Option<f64> = None;

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if !in_agent_lines {
                    group.clear();
                }
                group.push(value.to_lowercase());
                in_agent_lines = true;
            }
            "crawl-delay" => {
                in_agent_lines = false;
                let Ok(delay) = value.parse::<f64>() else {
                    continue;
                };
                if !delay.is_finite() || delay < 0.0 {
                    continue;
                }
                if group.iter().any(|ua| ua != "*" && !agent.is_empty() && agent.contains(ua.as_str())) {
                    specific = Some(delay);
                } else if group.iter().any(|ua| ua == "*") {
                    wildcard = Some(delay);
                }
            }
            _ => in_agent_lines = false,
        }
    }

    specific.or(wildcard).map(|secs| {
        Duration::try_from_secs_f64(secs).map_or(MAX_CRAWL_DELAY, |delay| delay.min(MAX_CRAWL_DELAY))
    })
}
