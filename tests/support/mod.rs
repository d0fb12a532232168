#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::Path;
use std::sync::{Arc, Mutex};

use flux_stations::catalog::CatalogRow;
use flux_stations::convert::{ConversionSummary, TableConverter};
use flux_stations::error::FluxError;
use flux_stations::transport::ArtifactTransport;

pub const ALICE_LINK: &str = "https://dap.tern.org.au/thredds/catalog/ecosystem_process/ozflux/\
AliceSpringsMulga/2022_v2/catalog.html";

pub fn row(title: &str, access_link: &str) -> CatalogRow {
    CatalogRow {
        title: title.to_string(),
        access_link: access_link.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct CallLog {
    pub probes: Vec<String>,
    pub opens: Vec<String>,
    pub conversions: usize,
}

/// Answers probes from a status table (404 for anything unlisted) and
/// serves `body` for every open.
#[derive(Clone, Default)]
pub struct MockTransport {
    pub statuses: HashMap<String, u16>,
    pub body: Vec<u8>,
    pub truncate_after: Option<usize>,
    pub log: Arc<Mutex<CallLog>>,
}

impl MockTransport {
    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.statuses.insert(url.to_string(), status);
        self
    }

    pub fn with_body(mut self, body: &[u8]) -> Self {
        self.body = body.to_vec();
        self
    }

    pub fn probes(&self) -> Vec<String> {
        self.log.lock().unwrap().probes.clone()
    }

    pub fn opens(&self) -> Vec<String> {
        self.log.lock().unwrap().opens.clone()
    }
}

struct TruncatedBody {
    inner: Cursor<Vec<u8>>,
    remaining: usize,
}

impl Read for TruncatedBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"));
        }
        let limit = buf.len().min(self.remaining);
        let read = self.inner.read(&mut buf[..limit])?;
        self.remaining -= read;
        Ok(read)
    }
}

impl ArtifactTransport for MockTransport {
    fn probe(&self, url: &str) -> Result<u16, FluxError> {
        self.log.lock().unwrap().probes.push(url.to_string());
        Ok(*self.statuses.get(url).unwrap_or(&404))
    }

    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, FluxError> {
        self.log.lock().unwrap().opens.push(url.to_string());
        let inner = Cursor::new(self.body.clone());
        match self.truncate_after {
            Some(remaining) => Ok(Box::new(TruncatedBody { inner, remaining })),
            None => Ok(Box::new(inner)),
        }
    }
}

/// Writes a one-line table, or fails when `fail` is set.
#[derive(Clone, Default)]
pub struct MockConverter {
    pub fail: bool,
    pub log: Arc<Mutex<CallLog>>,
}

impl TableConverter for MockConverter {
    fn convert(&self, source: &Path, target: &Path) -> Result<ConversionSummary, FluxError> {
        self.log.lock().unwrap().conversions += 1;
        if self.fail {
            return Err(FluxError::Conversion(format!("{}: not NetCDF", source.display())));
        }
        fs::write(target, "time\n0\n").map_err(|err| FluxError::Filesystem(err.to_string()))?;
        Ok(ConversionSummary {
            rows: 1,
            columns: 1,
        })
    }
}
