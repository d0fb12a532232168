use std::fs;
use std::path::Path;

use geo_types::Point;
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use tracing::{debug, info};

use crate::domain::{CanonicalSiteRecord, MalformedInput};
use crate::error::FluxError;
use crate::networks::NetworkAdapter;
use crate::normalize::RecordNormalizer;

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub record: CanonicalSiteRecord,
    pub geometry: Option<Point<f64>>,
}

/// All normalized sites of one run, network-major in adapter order.
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    entries: Vec<RegistryEntry>,
    warnings: Vec<MalformedInput>,
}

impl SiteRegistry {
    pub fn from_records(
        records: impl IntoIterator<Item = CanonicalSiteRecord>,
        warnings: Vec<MalformedInput>,
    ) -> Self {
        let entries = records
            .into_iter()
            .map(|record| {
                let geometry = if record.is_spatially_valid() {
                    record.coordinates().map(|(lat, lon)| Point::new(lon, lat))
                } else {
                    None
                };
                RegistryEntry { record, geometry }
            })
            .collect();
        Self { entries, warnings }
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn records(&self) -> impl Iterator<Item = &CanonicalSiteRecord> {
        self.entries.iter().map(|entry| &entry.record)
    }

    /// Entries carrying a point geometry.
    pub fn spatial(&self) -> impl Iterator<Item = (&CanonicalSiteRecord, Point<f64>)> {
        self.entries
            .iter()
            .filter_map(|entry| entry.geometry.map(|point| (&entry.record, point)))
    }

    pub fn warnings(&self) -> &[MalformedInput] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flat export of every site, spatially valid or not.
    pub fn write_csv(&self, path: &Path) -> Result<usize, FluxError> {
        let export_err = |reason: String| FluxError::Export {
            path: path.to_path_buf(),
            reason,
        };
        ensure_parent(path)?;
        let mut writer = csv::Writer::from_path(path).map_err(|err| export_err(err.to_string()))?;
        for record in self.records() {
            writer
                .serialize(record)
                .map_err(|err| export_err(err.to_string()))?;
        }
        if self.is_empty() {
            writer
                .write_record(CanonicalSiteRecord::COLUMNS)
                .map_err(|err| export_err(err.to_string()))?;
        }
        writer.flush().map_err(|err| export_err(err.to_string()))?;
        Ok(self.len())
    }

    /// Point shapefile of the spatially valid sites, with the canonical
    /// columns as attributes.
    pub fn write_shapefile(&self, path: &Path) -> Result<usize, FluxError> {
        let export_err = |reason: String| FluxError::Export {
            path: path.to_path_buf(),
            reason,
        };
        ensure_parent(path)?;

        let mut table = TableWriterBuilder::new();
        for column in CanonicalSiteRecord::COLUMNS {
            let name = FieldName::try_from(column).map_err(|err| export_err(format!("{err:?}")))?;
            table = match column {
                "lat" | "lon" => table.add_numeric_field(name, 18, 8),
                "network" | "country" | "sid" | "start" | "end" => {
                    table.add_character_field(name, 32)
                }
                _ => table.add_character_field(name, 254),
            };
        }

        let mut writer = shapefile::Writer::from_path(path, table)
            .map_err(|err| export_err(err.to_string()))?;
        let mut written = 0;
        for (record, point) in self.spatial() {
            let shape = shapefile::Point::new(point.x(), point.y());
            writer
                .write_shape_and_record(&shape, &dbase_record(record))
                .map_err(|err| export_err(err.to_string()))?;
            written += 1;
        }
        drop(writer);
        Ok(written)
    }
}

fn dbase_record(record: &CanonicalSiteRecord) -> Record {
    let text = |value: &str| FieldValue::Character(Some(truncate(value, 254)));
    let optional_text = |value: Option<String>| FieldValue::Character(value);

    let mut row = Record::default();
    row.insert("network".to_string(), text(record.network.as_str()));
    row.insert("country".to_string(), optional_text(record.country.clone()));
    row.insert("sid".to_string(), text(&record.site_id));
    row.insert("pi".to_string(), text(&record.pi));
    row.insert("desc".to_string(), text(&record.description));
    row.insert("lat".to_string(), FieldValue::Numeric(record.latitude));
    row.insert("lon".to_string(), FieldValue::Numeric(record.longitude));
    row.insert(
        "start".to_string(),
        optional_text(record.start_date.map(|date| date.to_string())),
    );
    row.insert(
        "end".to_string(),
        optional_text(record.end_date.map(|date| date.to_string())),
    );
    row
}

fn truncate(value: &str, max_bytes: usize) -> String {
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

fn ensure_parent(path: &Path) -> Result<(), FluxError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| FluxError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

pub struct RegistryAssembler {
    normalizer: RecordNormalizer,
}

impl RegistryAssembler {
    pub fn new(normalizer: RecordNormalizer) -> Self {
        Self { normalizer }
    }

    /// Loads every adapter in order. The first adapter that cannot load
    /// aborts the run; there is no partial registry.
    pub fn assemble(
        &self,
        adapters: &[Box<dyn NetworkAdapter>],
    ) -> Result<SiteRegistry, FluxError> {
        let mut records = Vec::new();
        let mut warnings = Vec::new();
        for adapter in adapters {
            let network = adapter.network();
            let raw_sites = adapter.load()?;
            info!(network = %network, sites = raw_sites.len(), "loaded network listing");
            for raw in raw_sites {
                let (record, site_warnings) = self.normalizer.normalize(raw, network);
                if record.network != network {
                    debug!(
                        site = %record.site_id,
                        from = %network,
                        to = %record.network,
                        "reclassified by identifier prefix"
                    );
                }
                warnings.extend(site_warnings);
                records.push(record);
            }
        }
        let registry = SiteRegistry::from_records(records, warnings);
        info!(
            sites = registry.len(),
            spatial = registry.spatial().count(),
            warnings = registry.warnings().len(),
            "assembled site registry"
        );
        Ok(registry)
    }
}
