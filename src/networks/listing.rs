use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use crate::config::ListingSource;
use crate::domain::{Network, RawSiteRecord};
use crate::error::FluxError;
use crate::metadata_cache::MetadataCache;
use crate::networks::NetworkAdapter;

/// Zero-based column positions in a network's sites export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingLayout {
    pub site_id: usize,
    pub country: Option<usize>,
    pub pi: usize,
    pub description: usize,
    pub latitude: Option<usize>,
    pub longitude: Option<usize>,
}

impl ListingLayout {
    /// AmeriFlux site-search CSV export.
    pub fn ameriflux() -> Self {
        Self {
            site_id: 0,
            country: None,
            pi: 7,
            description: 2,
            latitude: Some(13),
            longitude: Some(14),
        }
    }

    /// OzFlux sites table; locations come from the metadata cache only.
    pub fn ozflux() -> Self {
        Self {
            site_id: 1,
            country: None,
            pi: 7,
            description: 2,
            latitude: None,
            longitude: None,
        }
    }
}

/// Adapter for networks publishing a flat CSV sites listing plus a JSON
/// metadata cache.
#[derive(Debug, Clone)]
pub struct ListingAdapter {
    network: Network,
    sites_file: PathBuf,
    metadata_file: PathBuf,
    layout: ListingLayout,
}

impl ListingAdapter {
    pub fn new(network: Network, source: &ListingSource) -> Self {
        Self {
            network,
            sites_file: source.sites_file.clone(),
            metadata_file: source.metadata_file.clone(),
            layout: source.layout,
        }
    }
}

impl NetworkAdapter for ListingAdapter {
    fn network(&self) -> Network {
        self.network
    }

    fn load(&self) -> Result<Vec<RawSiteRecord>, FluxError> {
        let cache = MetadataCache::load(&self.metadata_file, self.network)?;
        let file = File::open(&self.sites_file).map_err(|err| FluxError::SourceUnavailable {
            network: self.network,
            reason: format!("sites listing {}: {err}", self.sites_file.display()),
        })?;
        read_listing(file, self.network, &self.layout, &cache)
    }
}

/// Reads a headed CSV listing. Short rows yield empty fields.
pub fn read_listing<R: Read>(
    reader: R,
    network: Network,
    layout: &ListingLayout,
    cache: &MetadataCache,
) -> Result<Vec<RawSiteRecord>, FluxError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut sites = Vec::new();
    for record in rdr.byte_records() {
        let record = record.map_err(|err| FluxError::SourceUnavailable {
            network,
            reason: format!("sites listing: {err}"),
        })?;
        let column = |index: usize| -> String {
            record
                .get(index)
                .map(|value| String::from_utf8_lossy(value).trim().to_string())
                .unwrap_or_default()
        };
        let optional = |index: Option<usize>| index.map(column).filter(|value| !value.is_empty());

        let site_id = column(layout.site_id);
        let cached = cache.get(&site_id).cloned();
        sites.push(RawSiteRecord {
            country: optional(layout.country),
            pi: column(layout.pi),
            description: column(layout.description),
            listing_latitude: optional(layout.latitude),
            listing_longitude: optional(layout.longitude),
            cached,
            site_id,
        });
    }
    Ok(sites)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_rows_yield_empty_fields() {
        let csv = "id,name,desc\nUS-ARL,ARM Lamont,Cropland\n";
        let layout = ListingLayout::ameriflux();
        let sites = read_listing(
            csv.as_bytes(),
            Network::Ameriflux,
            &layout,
            &MetadataCache::default(),
        )
        .unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].site_id, "US-ARL");
        assert_eq!(sites[0].description, "Cropland");
        assert_eq!(sites[0].pi, "");
        assert_eq!(sites[0].listing_latitude, None);
    }
}
