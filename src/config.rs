use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog;
use crate::domain::Network;
use crate::error::FluxError;
use crate::networks::ListingLayout;
use crate::normalize::PrefixOverrides;

pub const DEFAULT_CONFIG_FILE: &str = "flux-stations.json";
pub const DEFAULT_ICOS_ENDPOINT: &str = "https://meta.icos-cp.eu/sparql";

pub const DEFAULT_ICOS_QUERY: &str = r#"prefix cpmeta: <http://meta.icos-cp.eu/ontologies/cpmeta/>
prefix cpst: <http://meta.icos-cp.eu/ontologies/stationentry/>
select ?Short_name ?Country ?PI_names ?Site_type ?latstr ?lonstr
from <http://meta.icos-cp.eu/resources/stationentry/>
where {
    ?s a cpst:ES ;
        cpst:hasShortName ?Short_name ;
        cpst:hasCountry ?Country ;
        cpst:hasSiteType ?Site_type .
    optional { ?s cpst:hasLat ?lat }
    optional { ?s cpst:hasLon ?lon }
    bind(str(?lat) as ?latstr)
    bind(str(?lon) as ?lonstr)
    {
        select ?s (group_concat(?lastName; separator=";") as ?PI_names)
        where { ?s cpst:hasPi ?pi . ?pi cpmeta:hasLastName ?lastName . }
        group by ?s
    }
}"#;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub networks: Option<Vec<String>>,
    #[serde(default)]
    pub ameriflux: Option<ListingEntry>,
    #[serde(default)]
    pub ozflux: Option<ListingEntry>,
    #[serde(default)]
    pub icos: Option<IcosEntry>,
    #[serde(default)]
    pub prefix_overrides: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub metadata_timeout_secs: Option<u64>,
    #[serde(default)]
    pub download: Option<DownloadEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ListingEntry {
    #[serde(default)]
    pub sites_file: Option<PathBuf>,
    #[serde(default)]
    pub metadata_file: Option<PathBuf>,
    #[serde(default)]
    pub columns: Option<ListingColumns>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ListingColumns {
    #[serde(default)]
    pub site_id: Option<usize>,
    #[serde(default)]
    pub country: Option<usize>,
    #[serde(default)]
    pub pi: Option<usize>,
    #[serde(default)]
    pub description: Option<usize>,
    #[serde(default)]
    pub latitude: Option<usize>,
    #[serde(default)]
    pub longitude: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct IcosEntry {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub metadata_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DownloadEntry {
    #[serde(default)]
    pub catalog_file: Option<PathBuf>,
    #[serde(default)]
    pub sites_file: Option<PathBuf>,
    #[serde(default)]
    pub product_level: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub match_limit: Option<usize>,
    #[serde(default)]
    pub score_cutoff: Option<u8>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ListingSource {
    pub sites_file: PathBuf,
    pub metadata_file: PathBuf,
    pub layout: ListingLayout,
}

#[derive(Debug, Clone)]
pub struct IcosSource {
    pub endpoint: String,
    pub query: String,
    pub metadata_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub catalog_file: PathBuf,
    pub sites_file: PathBuf,
    pub product_level: String,
    pub frequency: String,
    pub match_limit: usize,
    pub score_cutoff: u8,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub networks: Vec<Network>,
    pub ameriflux: ListingSource,
    pub ozflux: ListingSource,
    pub icos: IcosSource,
    pub prefix_overrides: PrefixOverrides,
    pub metadata_timeout: Duration,
    pub download: DownloadSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `flux-stations.json` from the working directory when
    /// no path is given. A missing default file resolves to all defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, FluxError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default(), Path::new("."));
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| FluxError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| FluxError::ConfigParse(err.to_string()))?;
        let base_dir = config_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        Self::resolve_config(config, base_dir)
    }

    /// Relative paths in `config` are taken relative to `base_dir`.
    pub fn resolve_config(config: Config, base_dir: &Path) -> Result<ResolvedConfig, FluxError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(FluxError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let networks = match config.networks {
            Some(names) => {
                let mut networks = Vec::new();
                for name in names {
                    let network: Network = name.parse()?;
                    if !networks.contains(&network) {
                        networks.push(network);
                    }
                }
                networks
            }
            None => Network::ALL.to_vec(),
        };

        let ameriflux = resolve_listing(
            config.ameriflux.unwrap_or_default(),
            base_dir,
            "AmeriFlux-sites.csv",
            "ameriflux_meta.json",
            ListingLayout::ameriflux(),
        );
        let ozflux = resolve_listing(
            config.ozflux.unwrap_or_default(),
            base_dir,
            "ozflux_sites.csv",
            "ozflux_meta.json",
            ListingLayout::ozflux(),
        );

        let icos_entry = config.icos.unwrap_or_default();
        let icos = IcosSource {
            endpoint: icos_entry
                .endpoint
                .unwrap_or_else(|| DEFAULT_ICOS_ENDPOINT.to_string()),
            query: icos_entry
                .query
                .unwrap_or_else(|| DEFAULT_ICOS_QUERY.to_string()),
            metadata_file: resolve_path(base_dir, icos_entry.metadata_file, "icos_meta.json"),
        };

        let prefix_overrides = match config.prefix_overrides {
            Some(table) => {
                let mut overrides = PrefixOverrides::empty();
                for (prefix, network) in table {
                    if prefix.is_empty() {
                        return Err(FluxError::InvalidConfig(
                            "prefix override with empty prefix".to_string(),
                        ));
                    }
                    overrides.insert(prefix, network.parse()?);
                }
                overrides
            }
            None => PrefixOverrides::default(),
        };

        let download_entry = config.download.unwrap_or_default();
        let download = DownloadSettings {
            catalog_file: resolve_path(
                base_dir,
                download_entry.catalog_file,
                "ozflux_catalog.csv",
            ),
            sites_file: resolve_path(base_dir, download_entry.sites_file, "ozflux_sites.csv"),
            product_level: download_entry
                .product_level
                .unwrap_or_else(|| "L6".to_string()),
            frequency: download_entry
                .frequency
                .unwrap_or_else(|| "Daily".to_string()),
            match_limit: download_entry
                .match_limit
                .unwrap_or(catalog::DEFAULT_MATCH_LIMIT),
            score_cutoff: download_entry.score_cutoff.unwrap_or(0).min(100),
            timeout: Duration::from_secs(download_entry.timeout_secs.unwrap_or(300)),
        };

        Ok(ResolvedConfig {
            schema_version,
            networks,
            ameriflux,
            ozflux,
            icos,
            prefix_overrides,
            metadata_timeout: Duration::from_secs(config.metadata_timeout_secs.unwrap_or(30)),
            download,
        })
    }
}

fn resolve_listing(
    entry: ListingEntry,
    base_dir: &Path,
    default_sites: &str,
    default_metadata: &str,
    default_layout: ListingLayout,
) -> ListingSource {
    let layout = match entry.columns {
        Some(columns) => ListingLayout {
            site_id: columns.site_id.unwrap_or(default_layout.site_id),
            country: columns.country.or(default_layout.country),
            pi: columns.pi.unwrap_or(default_layout.pi),
            description: columns.description.unwrap_or(default_layout.description),
            latitude: columns.latitude.or(default_layout.latitude),
            longitude: columns.longitude.or(default_layout.longitude),
        },
        None => default_layout,
    };
    ListingSource {
        sites_file: resolve_path(base_dir, entry.sites_file, default_sites),
        metadata_file: resolve_path(base_dir, entry.metadata_file, default_metadata),
        layout,
    }
}

fn resolve_path(base_dir: &Path, configured: Option<PathBuf>, default: &str) -> PathBuf {
    let path = configured.unwrap_or_else(|| PathBuf::from(default));
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}
