use reqwest::{Client, ClientBuilder};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

use crate::error::AffectmapError;

const USER_AGENT: &str = "affectmap/0.1 (mailto:maintainers@affectmap.dev)";

/// HTTP client capped to an allowlist of collaborator domains.
///
/// Every outbound request in the pipeline goes through this wrapper so a
/// misconfigured base URL cannot leak requests to arbitrary hosts.
#[derive(Debug, Clone)]
pub struct ScopedClient {
    client: Client,
    allowlist: HashSet<String>,
}

impl ScopedClient {
    /// Creates a client pre-approved for the external collaborators the
    /// pipeline talks to: OpenAlex, the geocoder, and the LLM endpoints.
    pub fn new() -> Result<Self, AffectmapError> {
        let domains = [
            "api.openalex.org",            // bibliographic service
            "nominatim.openstreetmap.org", // geocoding
            "api.openai.com",              // OpenAI LLMs
            "localhost",                   // Ollama / local OpenAI-compatible
            "127.0.0.1",
        ];

        let mut allowlist = HashSet::new();
        for d in domains {
            allowlist.insert(d.to_string());
        }

        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AffectmapError::Config(format!("HTTP client build failed: {e}")))?;

        Ok(Self { client, allowlist })
    }

    /// Appends an exact hostname to the allowlist (e.g. a self-hosted
    /// OpenAI-compatible endpoint from config).
    pub fn allow_domain(&mut self, domain: &str) {
        self.allowlist.insert(domain.to_string());
    }

    /// Whether a URL's host is permitted, either exactly or as a subdomain of
    /// an allowed entry.
    pub fn is_allowed(&self, url: &str) -> bool {
        if let Ok(parsed) = Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                for allowed in &self.allowlist {
                    if host == allowed || host.ends_with(&format!(".{allowed}")) {
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, AffectmapError> {
        self.check(url)?;
        Ok(self.client.get(url))
    }

    pub fn post(&self, url: &str) -> Result<reqwest::RequestBuilder, AffectmapError> {
        self.check(url)?;
        Ok(self.client.post(url))
    }

    fn check(&self, url: &str) -> Result<(), AffectmapError> {
        if !self.is_allowed(url) {
            return Err(AffectmapError::Security(format!(
                "domain not in allowlist for URL {url}"
            )));
        }
        Ok(())
    }
}
