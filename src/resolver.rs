use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::FluxError;
use crate::transport::ArtifactTransport;
use crate::version::CatalogEntry;

fn catalog_path_regex() -> &'static Regex {
    static PATH_RE: OnceLock<Regex> = OnceLock::new();
    PATH_RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)^(?P<prefix>.*/catalog/)(?P<segment>.+/)",
            r"(?P<site>[^/]+)/(?P<version>[^/]+)/catalog\.html$"
        ))
        .expect("valid catalog path regex")
    })
}

fn catalog_dir_regex() -> &'static Regex {
    static DIR_RE: OnceLock<Regex> = OnceLock::new();
    DIR_RE.get_or_init(|| Regex::new(r"(?i)/catalog/").expect("valid catalog dir regex"))
}

/// A THREDDS catalog page URL split into its components:
/// `<scheme>://<host><prefix>/catalog/<segment>/<site>/<version>/catalog.html`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPath {
    pub scheme: String,
    pub host: String,
    /// Path up to and including the `/catalog/` directory.
    pub path_prefix: String,
    /// One or more directories below the catalog root, with trailing slash.
    pub site_segment: String,
    pub site_name_token: String,
    pub version_token: String,
}

impl CatalogPath {
    pub fn parse(link: &str) -> Result<Self, FluxError> {
        let url = Url::parse(link.trim())
            .map_err(|err| FluxError::CatalogPath(format!("{link}: {err}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| FluxError::CatalogPath(format!("{link}: missing host")))?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let captures = catalog_path_regex()
            .captures(url.path())
            .ok_or_else(|| FluxError::CatalogPath(link.to_string()))?;
        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
            path_prefix: captures["prefix"].to_string(),
            site_segment: captures["segment"].to_string(),
            site_name_token: captures["site"].to_string(),
            version_token: captures["version"].to_string(),
        })
    }

    pub fn file_server_prefix(&self) -> String {
        catalog_dir_regex()
            .replace_all(&self.path_prefix, "/fileServer/")
            .into_owned()
    }

    /// The site name as spelled in the catalog path, spaces removed.
    pub fn site_name_stem(&self) -> String {
        strip_spaces(&self.site_name_token)
    }

    pub fn download_url(&self, product: &ProductSpec, stem: &str) -> String {
        format!(
            "{scheme}://{host}{prefix}{segment}{site}/{version}/{level}/default/{stem}_{level}_{freq}.nc",
            scheme = self.scheme,
            host = self.host,
            prefix = self.file_server_prefix(),
            segment = self.site_segment,
            site = self.site_name_token,
            version = self.version_token,
            level = product.level,
            freq = product.frequency,
        )
    }
}

fn strip_spaces(value: &str) -> String {
    value.replace("%20", "").replace(' ', "")
}

/// Quality tier and reporting frequency baked into artifact file names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSpec {
    pub level: String,
    pub frequency: String,
}

impl Default for ProductSpec {
    fn default() -> Self {
        Self {
            level: "L6".to_string(),
            frequency: "Daily".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedArtifact {
    pub site_id: String,
    pub download_url: String,
    pub local_path: PathBuf,
}

/// First URL of a ` | `-separated access link.
pub fn primary_link(access_link: &str) -> Option<&str> {
    access_link
        .split(" | ")
        .map(str::trim)
        .find(|link| !link.is_empty())
}

/// Candidate download URLs for `entry`, display-name stem first.
pub fn candidate_urls(
    entry: &CatalogEntry,
    site_name: &str,
    product: &ProductSpec,
) -> Result<Vec<String>, FluxError> {
    let link = primary_link(&entry.access_link)
        .ok_or_else(|| FluxError::CatalogPath(format!("{}: empty access link", entry.title)))?;
    let path = CatalogPath::parse(link)?;

    let mut stems = Vec::new();
    for stem in [strip_spaces(site_name), path.site_name_stem()] {
        if !stem.is_empty() && !stems.contains(&stem) {
            stems.push(stem);
        }
    }
    Ok(stems
        .iter()
        .map(|stem| path.download_url(product, stem))
        .collect())
}

pub struct ArtifactResolver<'a> {
    transport: &'a dyn ArtifactTransport,
    product: ProductSpec,
}

impl<'a> ArtifactResolver<'a> {
    pub fn new(transport: &'a dyn ArtifactTransport, product: ProductSpec) -> Self {
        Self { transport, product }
    }

    pub fn product(&self) -> &ProductSpec {
        &self.product
    }

    /// Probes candidate URLs in order; the first 2xx answer wins and the
    /// remaining candidates are not tried.
    pub fn resolve(
        &self,
        entry: &CatalogEntry,
        site_name: &str,
        site_id: &str,
        local_path: PathBuf,
    ) -> Result<ResolvedArtifact, FluxError> {
        let candidates = candidate_urls(entry, site_name, &self.product)?;
        for url in &candidates {
            match self.transport.probe(url) {
                Ok(status) if (200..300).contains(&status) => {
                    debug!(site = %site_id, url = %url, "artifact URL responded");
                    return Ok(ResolvedArtifact {
                        site_id: site_id.to_string(),
                        download_url: url.clone(),
                        local_path,
                    });
                }
                Ok(status) => {
                    debug!(site = %site_id, url = %url, status, "candidate URL rejected");
                }
                Err(err) => {
                    warn!(site = %site_id, url = %url, error = %err, "candidate URL probe failed");
                }
            }
        }
        Err(FluxError::ProbesExhausted {
            site: site_id.to_string(),
            tried: candidates.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINK: &str = "https://dap.tern.org.au/thredds/catalog/ecosystem_process/ozflux/AliceSpringsMulga/2022_v2/catalog.html";

    #[test]
    fn parses_catalog_path() {
        let path = CatalogPath::parse(LINK).unwrap();
        assert_eq!(path.scheme, "https");
        assert_eq!(path.host, "dap.tern.org.au");
        assert_eq!(path.path_prefix, "/thredds/catalog/");
        assert_eq!(path.site_segment, "ecosystem_process/ozflux/");
        assert_eq!(path.site_name_token, "AliceSpringsMulga");
        assert_eq!(path.version_token, "2022_v2");
        assert_eq!(path.file_server_prefix(), "/thredds/fileServer/");
    }

    #[test]
    fn keeps_explicit_port() {
        let path = CatalogPath::parse(
            "http://localhost:8080/thredds/catalog/ozflux/Site/2021_v1/catalog.html",
        )
        .unwrap();
        assert_eq!(path.host, "localhost:8080");
    }

    #[test]
    fn primary_link_takes_first_of_many() {
        assert_eq!(primary_link("a | b"), Some("a"));
        assert_eq!(primary_link(" | b"), Some("b"));
        assert_eq!(primary_link(""), None);
    }
}
