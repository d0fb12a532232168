use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::convert::{ConversionSummary, TableConverter};
use crate::error::FluxError;
use crate::resolver::ResolvedArtifact;
use crate::transport::ArtifactTransport;

pub const CHUNK_SIZE: usize = 8192;

/// Where a site's artifact pair lives: `<dest>/<site_id>_<frequency>.nc`
/// and the flattened `.csv` twin next to it.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    dest_dir: PathBuf,
    frequency: String,
}

impl ArtifactLayout {
    pub fn new(dest_dir: impl Into<PathBuf>, frequency: &str) -> Self {
        Self {
            dest_dir: dest_dir.into(),
            frequency: frequency.to_lowercase(),
        }
    }

    pub fn paths(&self, site_id: &str) -> ArtifactPaths {
        ArtifactPaths::for_raw(
            self.dest_dir
                .join(format!("{site_id}_{}.nc", self.frequency)),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactPaths {
    pub raw: PathBuf,
    pub table: PathBuf,
}

impl ArtifactPaths {
    pub fn for_raw(raw: PathBuf) -> Self {
        let table = raw.with_extension("csv");
        Self { raw, table }
    }

    pub fn both_exist(&self) -> bool {
        self.raw.exists() && self.table.exists()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum FetchOutcome {
    AlreadyPresent {
        paths: ArtifactPaths,
    },
    Downloaded {
        paths: ArtifactPaths,
        bytes: u64,
        conversion: ConversionSummary,
    },
    /// The raw artifact is on disk but could not be flattened.
    ConversionFailed {
        raw: PathBuf,
        bytes: u64,
        reason: String,
    },
}

pub struct ArtifactFetcher<'a> {
    transport: &'a dyn ArtifactTransport,
    converter: &'a dyn TableConverter,
    overwrite: bool,
}

impl<'a> ArtifactFetcher<'a> {
    pub fn new(
        transport: &'a dyn ArtifactTransport,
        converter: &'a dyn TableConverter,
        overwrite: bool,
    ) -> Self {
        Self {
            transport,
            converter,
            overwrite,
        }
    }

    /// Whether a site can be skipped before any request is made.
    pub fn is_present(&self, paths: &ArtifactPaths) -> bool {
        !self.overwrite && paths.both_exist()
    }

    pub fn fetch_and_convert(&self, resolved: ResolvedArtifact) -> Result<FetchOutcome, FluxError> {
        let paths = ArtifactPaths::for_raw(resolved.local_path.clone());
        if self.is_present(&paths) {
            info!(site = %resolved.site_id, "artifact already present");
            return Ok(FetchOutcome::AlreadyPresent { paths });
        }

        let bytes = self.download(&resolved)?;
        info!(
            site = %resolved.site_id,
            url = %resolved.download_url,
            path = %paths.raw.display(),
            bytes,
            "downloaded artifact"
        );

        remove_stale(&paths.table)?;
        match self.converter.convert(&paths.raw, &paths.table) {
            Ok(conversion) => {
                info!(
                    site = %resolved.site_id,
                    path = %paths.table.display(),
                    rows = conversion.rows,
                    "converted artifact"
                );
                Ok(FetchOutcome::Downloaded {
                    paths,
                    bytes,
                    conversion,
                })
            }
            Err(err) => {
                warn!(site = %resolved.site_id, error = %err, "artifact conversion failed");
                Ok(FetchOutcome::ConversionFailed {
                    raw: paths.raw,
                    bytes,
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Streams into a temp file beside the target, renamed into place only
    /// once the body has been read completely.
    fn download(&self, resolved: &ResolvedArtifact) -> Result<u64, FluxError> {
        let parent = resolved
            .local_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(parent).map_err(|err| FluxError::Filesystem(err.to_string()))?;

        let mut body = self.transport.open(&resolved.download_url)?;
        let mut temp = tempfile::Builder::new()
            .prefix(".flux-stations")
            .suffix(".part")
            .tempfile_in(parent)
            .map_err(|err| FluxError::Filesystem(err.to_string()))?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let read = match body.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(FluxError::Transfer(format!(
                        "{} after {total} bytes: {err}",
                        resolved.download_url
                    )));
                }
            };
            temp.write_all(&buffer[..read])
                .map_err(|err| FluxError::Filesystem(err.to_string()))?;
            total += read as u64;
        }
        temp.flush()
            .map_err(|err| FluxError::Filesystem(err.to_string()))?;
        temp.persist(&resolved.local_path)
            .map_err(|err| FluxError::Filesystem(err.to_string()))?;
        Ok(total)
    }
}

/// Drops an earlier run's table so it cannot pair with a new raw artifact.
fn remove_stale(path: &Path) -> Result<(), FluxError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(FluxError::Filesystem(format!("{}: {err}", path.display()))),
    }
}
