//! Where robots.txt bodies come from
//!
//! Fetches happen outside the coordination lock; the result is installed
//! into the gate afterwards.

use crate::politeness::RobotsRules;
use crate::{DriftnetError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use url::Url;

/// A source of robots.txt bodies
#[async_trait]
pub trait RobotsSource: Send + Sync {
    /// Fetches robots.txt for the site at `origin`
    ///
    /// Returns `Ok(None)` when the site has no robots.txt.
    async fn fetch(&self, origin: &Url) -> Result<Option<String>>;
}

/// Fetches `<scheme>://<host>/robots.txt` over HTTP
#[derive(Debug, Clone)]
pub struct HttpRobotsSource {
    client: Client,
}

impl HttpRobotsSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RobotsSource for HttpRobotsSource {
    async fn fetch(&self, origin: &Url) -> Result<Option<String>> {
        let robots_url = origin.join("/robots.txt")?;
        let response = self.client.get(robots_url).send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(Some(response.text().await?))
        } else if status.is_client_error() {
            Ok(None)
        } else {
            Err(DriftnetError::Remote {
                status: status.as_u16(),
                body: format!("robots.txt fetch for {} failed", origin),
            })
        }
    }
}

/// Serves robots.txt bodies from memory, keyed by domain
#[derive(Debug, Clone, Default)]
pub struct StaticRobotsSource {
    bodies: HashMap<String, String>,
}

impl StaticRobotsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, domain: &str, body: &str) -> Self {
        self.bodies.insert(domain.to_string(), body.to_string());
        self
    }
}

#[async_trait]
impl RobotsSource for StaticRobotsSource {
    async fn fetch(&self, origin: &Url) -> Result<Option<String>> {
        let domain = crate::url::domain_of(origin).unwrap_or_default();
        Ok(self.bodies.get(&domain).cloned())
    }
}

/// Fetches and parses the rules for `origin`
///
/// A missing robots.txt or any fetch failure yields allow-all rules, so a
/// flaky robots endpoint never stalls a domain.
pub async fn fetch_rules(source: &dyn RobotsSource, origin: &Url, user_agent: &str) -> RobotsRules {
    match source.fetch(origin).await {
        Ok(Some(body)) => RobotsRules::parse(&body, user_agent),
        Ok(None) => {
            tracing::debug!("No robots.txt at {}, allowing all", origin);
            RobotsRules::allow_all()
        }
        Err(e) => {
            tracing::warn!("Failed to fetch robots.txt for {}: {}; allowing all", origin, e);
            RobotsRules::allow_all()
        }
    }
}
