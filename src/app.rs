use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::warn;

use crate::catalog::{self, CatalogMatcher, CatalogRow, SiteRequest};
use crate::config::ResolvedConfig;
use crate::convert::TableConverter;
use crate::error::{ErrorCategory, FluxError};
use crate::fetcher::{ArtifactFetcher, ArtifactLayout, FetchOutcome};
use crate::networks::NetworkAdapter;
use crate::normalize::RecordNormalizer;
use crate::registry::{RegistryAssembler, SiteRegistry};
use crate::resolver::{ArtifactResolver, ProductSpec};
use crate::transport::ArtifactTransport;
use crate::version::{CatalogEntry, VersionSelector};

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub csv_path: PathBuf,
    pub shapefile_path: Option<PathBuf>,
}

impl RegistryOptions {
    /// Shapefile at `path`, flat table beside it with a `.csv` extension.
    pub fn from_shapefile(path: impl Into<PathBuf>) -> Self {
        let shapefile_path = path.into();
        Self {
            csv_path: shapefile_path.with_extension("csv"),
            shapefile_path: Some(shapefile_path),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryReport {
    pub sites: usize,
    pub spatial_sites: usize,
    pub warnings: usize,
    pub per_network: BTreeMap<String, usize>,
    pub csv_path: String,
    pub shapefile_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub dest_dir: PathBuf,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub items: Vec<SiteOutcome>,
    pub resolved: usize,
    pub already_present: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteOutcome {
    pub site_id: String,
    pub name: String,
    pub action: String,
    pub url: Option<String>,
    pub raw_path: Option<String>,
    pub table_path: Option<String>,
    pub error: Option<String>,
    pub category: Option<ErrorCategory>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<T: ArtifactTransport, C: TableConverter> {
    config: ResolvedConfig,
    transport: T,
    converter: C,
}

impl<T: ArtifactTransport, C: TableConverter> App<T, C> {
    pub fn new(config: ResolvedConfig, transport: T, converter: C) -> Self {
        Self {
            config,
            transport,
            converter,
        }
    }

    pub fn assemble(
        &self,
        adapters: &[Box<dyn NetworkAdapter>],
    ) -> Result<SiteRegistry, FluxError> {
        let normalizer = RecordNormalizer::new(self.config.prefix_overrides.clone());
        RegistryAssembler::new(normalizer).assemble(adapters)
    }

    /// Rebuilds the registry from every adapter and writes both exports.
    pub fn build_registry(
        &self,
        adapters: &[Box<dyn NetworkAdapter>],
        options: &RegistryOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RegistryReport, FluxError> {
        let start = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Load; {} networks", adapters.len()),
            elapsed: None,
        });
        let registry = self.assemble(adapters)?;

        sink.event(ProgressEvent {
            message: format!("phase=Export; {} sites", registry.len()),
            elapsed: Some(start.elapsed()),
        });
        registry.write_csv(&options.csv_path)?;
        let spatial_sites = match &options.shapefile_path {
            Some(path) => registry.write_shapefile(path)?,
            None => registry.spatial().count(),
        };

        let mut per_network = BTreeMap::new();
        for record in registry.records() {
            *per_network.entry(record.network.to_string()).or_insert(0) += 1;
        }

        sink.event(ProgressEvent {
            message: "phase=Done; registry written".to_string(),
            elapsed: Some(start.elapsed()),
        });
        Ok(RegistryReport {
            sites: registry.len(),
            spatial_sites,
            warnings: registry.warnings().len(),
            per_network,
            csv_path: options.csv_path.display().to_string(),
            shapefile_path: options
                .shapefile_path
                .as_ref()
                .map(|path| path.display().to_string()),
        })
    }

    /// Reads the configured catalog and sites tables, then resolves and
    /// fetches every site. Unreadable tables abort; per-site failures do not.
    pub fn download(
        &self,
        options: &DownloadOptions,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadReport, FluxError> {
        let catalog = catalog::read_catalog(&self.config.download.catalog_file)?;
        let sites = catalog::read_site_requests(&self.config.download.sites_file)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Resolve; {} sites against {} catalog entries",
                sites.len(),
                catalog.len()
            ),
            elapsed: None,
        });
        Ok(self.download_sites(&catalog, &sites, options, sink))
    }

    pub fn download_sites(
        &self,
        catalog: &[CatalogRow],
        sites: &[SiteRequest],
        options: &DownloadOptions,
        sink: &dyn ProgressSink,
    ) -> DownloadReport {
        let settings = &self.config.download;
        let product = ProductSpec {
            level: settings.product_level.clone(),
            frequency: settings.frequency.clone(),
        };
        let layout = ArtifactLayout::new(&options.dest_dir, &product.frequency);
        let matcher = CatalogMatcher::new(settings.score_cutoff);
        let resolver = ArtifactResolver::new(&self.transport, product);
        let fetcher = ArtifactFetcher::new(&self.transport, &self.converter, options.overwrite);

        let versioned: Vec<CatalogRow> = catalog
            .iter()
            .filter(|row| CatalogEntry::is_versioned(row))
            .cloned()
            .collect();

        let mut report = DownloadReport {
            items: Vec::with_capacity(sites.len()),
            resolved: 0,
            already_present: 0,
            failed: 0,
        };

        for request in sites {
            let start = Instant::now();
            let site_id = request.site_id();
            let paths = layout.paths(&site_id);
            let mut outcome = SiteOutcome {
                site_id: site_id.clone(),
                name: request.name.clone(),
                action: String::new(),
                url: None,
                raw_path: None,
                table_path: None,
                error: None,
                category: None,
            };

            let result = if fetcher.is_present(&paths) {
                Ok(FetchOutcome::AlreadyPresent {
                    paths: paths.clone(),
                })
            } else {
                let candidates = matcher.rank(&request.name, &versioned, settings.match_limit);
                if candidates.is_empty() {
                    Err(FluxError::NoMatch(request.name.clone()))
                } else {
                    VersionSelector::select_latest(&candidates)
                        .ok_or_else(|| FluxError::NoVersion(request.name.clone()))
                        .and_then(|entry| {
                            resolver.resolve(&entry, &request.name, &site_id, paths.raw.clone())
                        })
                        .and_then(|resolved| {
                            outcome.url = Some(resolved.download_url.clone());
                            fetcher.fetch_and_convert(resolved)
                        })
                }
            };

            match result {
                Ok(FetchOutcome::AlreadyPresent { paths }) => {
                    outcome.action = "already-present".to_string();
                    outcome.raw_path = Some(paths.raw.display().to_string());
                    outcome.table_path = Some(paths.table.display().to_string());
                    report.already_present += 1;
                }
                Ok(FetchOutcome::Downloaded { paths, .. }) => {
                    outcome.action = "downloaded".to_string();
                    outcome.raw_path = Some(paths.raw.display().to_string());
                    outcome.table_path = Some(paths.table.display().to_string());
                    report.resolved += 1;
                }
                Ok(FetchOutcome::ConversionFailed { raw, reason, .. }) => {
                    outcome.action = "conversion-failed".to_string();
                    outcome.raw_path = Some(raw.display().to_string());
                    outcome.error = Some(reason);
                    outcome.category = Some(ErrorCategory::MalformedInput);
                    report.resolved += 1;
                }
                Err(err) => {
                    warn!(site = %site_id, name = %request.name, error = %err, "site skipped");
                    outcome.action = "failed".to_string();
                    outcome.category = Some(err.category());
                    outcome.error = Some(err.to_string());
                    report.failed += 1;
                }
            }

            sink.event(ProgressEvent {
                message: format!("site={site_id}; {}", outcome.action),
                elapsed: Some(start.elapsed()),
            });
            report.items.push(outcome);
        }
        report
    }
}
