use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::FluxError;
use crate::metadata_cache::CachedSiteMetadata;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Ameriflux,
    Icos,
    Ozflux,
}

impl Network {
    pub const ALL: [Network; 3] = [Network::Ameriflux, Network::Icos, Network::Ozflux];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Ameriflux => "ameriflux",
            Network::Icos => "icos",
            Network::Ozflux => "ozflux",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = FluxError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ameriflux" => Ok(Network::Ameriflux),
            "icos" => Ok(Network::Icos),
            "ozflux" => Ok(Network::Ozflux),
            _ => Err(FluxError::InvalidNetwork(value.to_string())),
        }
    }
}

/// A site as read from one network's listing, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSiteRecord {
    pub site_id: String,
    pub country: Option<String>,
    pub pi: String,
    pub description: String,
    pub listing_latitude: Option<String>,
    pub listing_longitude: Option<String>,
    pub cached: Option<CachedSiteMetadata>,
}

/// The 9-field canonical site record. Field order is the export column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSiteRecord {
    pub network: Network,
    pub country: Option<String>,
    #[serde(rename = "sid")]
    pub site_id: String,
    pub pi: String,
    #[serde(rename = "desc")]
    pub description: String,
    #[serde(rename = "lat")]
    pub latitude: Option<f64>,
    #[serde(rename = "lon")]
    pub longitude: Option<f64>,
    #[serde(rename = "start")]
    pub start_date: Option<NaiveDate>,
    #[serde(rename = "end")]
    pub end_date: Option<NaiveDate>,
}

impl CanonicalSiteRecord {
    pub const COLUMNS: [&'static str; 9] = [
        "network", "country", "sid", "pi", "desc", "lat", "lon", "start", "end",
    ];

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    pub fn is_spatially_valid(&self) -> bool {
        self.coordinates().is_some() && !self.site_id.trim().is_empty()
    }
}

/// What the normalizer could not parse for a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedInput {
    pub site_id: String,
    pub field: &'static str,
    pub value: String,
}
