//! # DOI Resolver
//!
//! Turns bare DOIs into CSL-JSON records through DOI content negotiation.
//!
//! The engine is synchronous, so each lookup blocks the calling worker with
//! `block_in_place` while the request runs on the surrounding tokio
//! runtime. This requires the multi-threaded runtime.

use crate::config::ResolverConfig;
use csgraph_core::{CitationResolver, CsGraphError, CslRecord};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use std::time::Duration;
use tokio::runtime::Handle;

const CSL_JSON: &str = "application/vnd.citationstyles.csl+json";

/// Strip URL and `doi:` prefixes from a DOI.
#[must_use]
pub fn normalize_doi(doi: &str) -> &str {
    let doi = doi.trim();
    ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "doi:"]
        .iter()
        .find_map(|prefix| doi.strip_prefix(prefix))
        .unwrap_or(doi)
}

#[derive(Debug, Clone)]
pub struct DoiResolver {
    client: reqwest::Client,
    endpoint: String,
    handle: Handle,
}

impl DoiResolver {
    /// Build a resolver bound to the current tokio runtime.
    pub fn new(config: &ResolverConfig) -> Result<Self, CsGraphError> {
        let handle = Handle::try_current()
            .map_err(|e| CsGraphError::Validation(format!("DOI resolver needs a runtime: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(CSL_JSON));

        let mut agent = format!("csgraph/{}", env!("CARGO_PKG_VERSION"));
        if let Some(mailto) = &config.mailto {
            agent.push_str(&format!(" (mailto:{mailto})"));
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CsGraphError::Validation(format!("DOI resolver: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            handle,
        })
    }

    /// Lookup URL of a DOI.
    #[must_use]
    pub fn url(&self, doi: &str) -> String {
        format!("{}/{}", self.endpoint, normalize_doi(doi))
    }

    async fn fetch(&self, doi: &str) -> Result<CslRecord, CsGraphError> {
        let failure = |reason: String| CsGraphError::Resolution {
            doi: doi.to_string(),
            reason,
        };

        let response = self
            .client
            .get(self.url(doi))
            .send()
            .await
            .map_err(|e| failure(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failure(format!("lookup answered {status}")));
        }

        let mut body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| failure(format!("not a JSON body: {e}")))?;
        let doi = normalize_doi(doi);
        if let Some(fields) = body.as_object_mut() {
            fields
                .entry("id")
                .or_insert_with(|| serde_json::Value::String(doi.to_string()));
            fields
                .entry("DOI")
                .or_insert_with(|| serde_json::Value::String(doi.to_string()));
        }
        serde_json::from_value(body).map_err(|e| failure(format!("not a CSL-JSON record: {e}")))
    }
}

impl CitationResolver for DoiResolver {
    fn resolve(&self, doi: &str) -> Result<CslRecord, CsGraphError> {
        tracing::debug!(doi, "resolving DOI");
        let record = tokio::task::block_in_place(|| self.handle.block_on(self.fetch(doi)));
        if let Err(e) = &record {
            tracing::warn!(doi, error = %e, "DOI resolution failed");
        }
        record
    }
}

// =============================================================================
// TESTS
// =============================================================================
