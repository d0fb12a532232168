use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::warn;

use crate::config::IcosSource;
use crate::domain::{Network, RawSiteRecord};
use crate::error::FluxError;
use crate::metadata_cache::MetadataCache;
use crate::networks::NetworkAdapter;

#[derive(Debug, Clone, Deserialize)]
pub struct SparqlResponse {
    pub results: SparqlResults,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SparqlResults {
    #[serde(default)]
    pub bindings: Vec<BTreeMap<String, SparqlTerm>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SparqlTerm {
    pub value: String,
}

pub trait SparqlClient: Send + Sync {
    fn select(&self, endpoint: &str, query: &str) -> Result<SparqlResults, FluxError>;
}

#[derive(Clone)]
pub struct SparqlHttpClient {
    client: Client,
}

impl SparqlHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, FluxError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("flux-stations/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| FluxError::Http(err.to_string()))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/sparql-results+json"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| FluxError::Http(err.to_string()))?;
        Ok(Self { client })
    }
}

impl SparqlClient for SparqlHttpClient {
    fn select(&self, endpoint: &str, query: &str) -> Result<SparqlResults, FluxError> {
        let response = self
            .client
            .get(endpoint)
            .query(&[("format", "json"), ("query", query)])
            .send()
            .map_err(|err| FluxError::Http(err.to_string()))?;
        if !response.status().is_success() {
            return Err(FluxError::HttpStatus {
                status: response.status().as_u16(),
                url: endpoint.to_string(),
            });
        }
        let body: SparqlResponse = response
            .json()
            .map_err(|err| FluxError::Http(err.to_string()))?;
        Ok(body.results)
    }
}

/// ICOS ecosystem stations from the carbon-portal SPARQL endpoint, with
/// operating dates from the ICOS metadata cache.
pub struct IcosAdapter {
    endpoint: String,
    query: String,
    metadata_file: PathBuf,
    client: Arc<dyn SparqlClient>,
}

impl IcosAdapter {
    pub fn new(source: &IcosSource, client: Arc<dyn SparqlClient>) -> Self {
        Self {
            endpoint: source.endpoint.clone(),
            query: source.query.clone(),
            metadata_file: source.metadata_file.clone(),
            client,
        }
    }
}

impl NetworkAdapter for IcosAdapter {
    fn network(&self) -> Network {
        Network::Icos
    }

    fn load(&self) -> Result<Vec<RawSiteRecord>, FluxError> {
        let cache = MetadataCache::load(&self.metadata_file, Network::Icos)?;
        let results = self
            .client
            .select(&self.endpoint, &self.query)
            .map_err(|err| FluxError::SourceUnavailable {
                network: Network::Icos,
                reason: format!("SPARQL query against {}: {err}", self.endpoint),
            })?;
        Ok(sites_from_bindings(&results, &cache))
    }
}

pub fn sites_from_bindings(results: &SparqlResults, cache: &MetadataCache) -> Vec<RawSiteRecord> {
    let mut sites = Vec::new();
    for binding in &results.bindings {
        let value = |key: &str| {
            binding
                .get(key)
                .map(|term| term.value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let Some(site_id) = value("Short_name") else {
            warn!("ICOS binding without Short_name skipped");
            continue;
        };
        sites.push(RawSiteRecord {
            country: value("Country"),
            pi: value("PI_names").unwrap_or_default(),
            description: value("Site_type").unwrap_or_default(),
            listing_latitude: value("latstr"),
            listing_longitude: value("lonstr"),
            cached: cache.get(&site_id).cloned(),
            site_id,
        });
    }
    sites
}
