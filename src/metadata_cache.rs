use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::Network;
use crate::error::FluxError;

/// A cached scalar. Cache files written by different extraction runs hold
/// coordinates both as JSON numbers and as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CachedValue {
    Number(f64),
    Text(String),
}

impl CachedValue {
    pub fn as_text(&self) -> String {
        match self {
            CachedValue::Number(value) => value.to_string(),
            CachedValue::Text(value) => value.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedSiteMetadata {
    #[serde(default)]
    pub latitude: Option<CachedValue>,
    #[serde(default)]
    pub longitude: Option<CachedValue>,
    #[serde(default)]
    pub start_date: Option<CachedValue>,
    #[serde(default)]
    pub end_date: Option<CachedValue>,
}

/// Site identifier to derived attributes, read once per run.
#[derive(Debug, Clone, Default)]
pub struct MetadataCache {
    entries: HashMap<String, CachedSiteMetadata>,
}

impl MetadataCache {
    pub fn load(path: &Path, network: Network) -> Result<Self, FluxError> {
        let content =
            fs::read_to_string(path).map_err(|err| FluxError::SourceUnavailable {
                network,
                reason: format!("metadata cache {}: {err}", path.display()),
            })?;
        let cache = Self::from_json(&content).map_err(|err| FluxError::SourceUnavailable {
            network,
            reason: format!("metadata cache {}: {err}", path.display()),
        })?;
        if cache.is_empty() {
            warn!(%network, path = %path.display(), "metadata cache has no entries");
        } else {
            debug!(%network, entries = cache.len(), "loaded metadata cache");
        }
        Ok(cache)
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        let entries: HashMap<String, CachedSiteMetadata> = serde_json::from_str(content)?;
        Ok(Self { entries })
    }

    pub fn get(&self, site_id: &str) -> Option<&CachedSiteMetadata> {
        self.entries.get(site_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
