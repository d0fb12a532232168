use chrono::NaiveDate;
use tracing::warn;

use crate::domain::{CanonicalSiteRecord, MalformedInput, Network, RawSiteRecord};
use crate::metadata_cache::CachedValue;

/// Identifier prefixes that place a site in a network other than the one
/// whose listing it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixOverrides {
    entries: Vec<(String, Network)>,
}

impl Default for PrefixOverrides {
    fn default() -> Self {
        let mut overrides = Self::empty();
        overrides.insert("AU-", Network::Ozflux);
        overrides
    }
}

impl PrefixOverrides {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, prefix: impl Into<String>, network: Network) {
        let prefix = prefix.into();
        self.entries.retain(|(existing, _)| *existing != prefix);
        self.entries.push((prefix, network));
        // longest prefix first
        self.entries
            .sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
    }

    pub fn lookup(&self, site_id: &str) -> Option<Network> {
        self.entries
            .iter()
            .find(|(prefix, _)| site_id.starts_with(prefix.as_str()))
            .map(|(_, network)| *network)
    }

    pub fn classify(&self, site_id: &str, declared: Network) -> Network {
        self.lookup(site_id).unwrap_or(declared)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordNormalizer {
    overrides: PrefixOverrides,
}

impl RecordNormalizer {
    pub fn new(overrides: PrefixOverrides) -> Self {
        Self { overrides }
    }

    /// Never fails: fields that do not parse come back as `None` and are
    /// listed in the returned warnings.
    pub fn normalize(
        &self,
        raw: RawSiteRecord,
        declared: Network,
    ) -> (CanonicalSiteRecord, Vec<MalformedInput>) {
        let mut warnings = Vec::new();
        let site_id = raw.site_id.trim().to_string();
        let network = self.overrides.classify(&site_id, declared);

        let cached = raw.cached.unwrap_or_default();
        let latitude = pick_coordinate(
            cached.latitude.as_ref(),
            raw.listing_latitude.as_deref(),
            &site_id,
            "latitude",
            &mut warnings,
        );
        let longitude = pick_coordinate(
            cached.longitude.as_ref(),
            raw.listing_longitude.as_deref(),
            &site_id,
            "longitude",
            &mut warnings,
        );
        let start_date = date_field(
            cached.start_date.as_ref(),
            &site_id,
            "start_date",
            &mut warnings,
        );
        let end_date = date_field(cached.end_date.as_ref(), &site_id, "end_date", &mut warnings);

        let country = raw
            .country
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        for warning in &warnings {
            warn!(
                site = %warning.site_id,
                field = warning.field,
                value = %warning.value,
                "unparseable site metadata, field left empty"
            );
        }

        let record = CanonicalSiteRecord {
            network,
            country,
            site_id,
            pi: raw.pi.trim().to_string(),
            description: raw.description.trim().to_string(),
            latitude,
            longitude,
            start_date,
            end_date,
        };
        (record, warnings)
    }
}

fn pick_coordinate(
    cached: Option<&CachedValue>,
    listing: Option<&str>,
    site_id: &str,
    field: &'static str,
    warnings: &mut Vec<MalformedInput>,
) -> Option<f64> {
    let raw = match cached {
        Some(CachedValue::Number(value)) => return finite(*value, site_id, field, warnings),
        Some(CachedValue::Text(text)) if !text.trim().is_empty() => text.as_str(),
        _ => listing?,
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<f64>() {
        Ok(value) => finite(value, site_id, field, warnings),
        Err(_) => {
            warnings.push(MalformedInput {
                site_id: site_id.to_string(),
                field,
                value: trimmed.to_string(),
            });
            None
        }
    }
}

fn finite(
    value: f64,
    site_id: &str,
    field: &'static str,
    warnings: &mut Vec<MalformedInput>,
) -> Option<f64> {
    if value.is_finite() {
        Some(value)
    } else {
        warnings.push(MalformedInput {
            site_id: site_id.to_string(),
            field,
            value: value.to_string(),
        });
        None
    }
}

fn date_field(
    cached: Option<&CachedValue>,
    site_id: &str,
    field: &'static str,
    warnings: &mut Vec<MalformedInput>,
) -> Option<NaiveDate> {
    let text = cached?.as_text();
    if text.trim().is_empty() {
        return None;
    }
    let parsed = parse_site_date(&text);
    if parsed.is_none() {
        warnings.push(MalformedInput {
            site_id: site_id.to_string(),
            field,
            value: text,
        });
    }
    parsed
}

/// Parses the date encodings used across networks: compact `YYYYMMDDHHMM`
/// (possibly rendered as a float), bare `YYYYMMDD`, then ISO `YYYY-MM-DD`
/// with an optional trailing time.
pub fn parse_site_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.len() < 8 {
        return None;
    }

    let compact = trimmed
        .strip_suffix(".0")
        .unwrap_or(trimmed)
        .split('.')
        .next()
        .unwrap_or(trimmed);
    if compact.chars().all(|ch| ch.is_ascii_digit()) {
        if compact.len() == 12 {
            if let Ok(stamp) = chrono::NaiveDateTime::parse_from_str(compact, "%Y%m%d%H%M") {
                return Some(stamp.date());
            }
        }
        if compact.len() >= 8 {
            if let Ok(date) = NaiveDate::parse_from_str(&compact[..8], "%Y%m%d") {
                return Some(date);
            }
        }
        return None;
    }

    let date_part = trimmed
        .split(|ch: char| ch == ' ' || ch == 'T')
        .next()
        .unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}
