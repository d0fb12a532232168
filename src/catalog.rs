use std::fs::File;
use std::io::Read;
use std::path::Path;

use rapidfuzz::fuzz;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::FluxError;

pub const DEFAULT_MATCH_LIMIT: usize = 5;

/// One titled entry of the remote file catalog export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRow {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Access Data link", default)]
    pub access_link: String,
}

/// A site to resolve: display name plus optional canonical identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRequest {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Fluxnet", default)]
    pub fluxnet_id: Option<String>,
}

impl SiteRequest {
    /// The canonical identifier, or the display name with spaces removed.
    pub fn site_id(&self) -> String {
        self.fluxnet_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.name.replace(' ', ""))
    }
}

pub fn read_catalog(path: &Path) -> Result<Vec<CatalogRow>, FluxError> {
    let file = File::open(path).map_err(|err| FluxError::CatalogRead {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    parse_table(file).map_err(|reason| FluxError::CatalogRead {
        path: path.to_path_buf(),
        reason,
    })
}

pub fn read_site_requests(path: &Path) -> Result<Vec<SiteRequest>, FluxError> {
    let file = File::open(path).map_err(|err| FluxError::CatalogRead {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    let requests: Vec<SiteRequest> =
        parse_table(file).map_err(|reason| FluxError::CatalogRead {
            path: path.to_path_buf(),
            reason,
        })?;
    Ok(requests
        .into_iter()
        .filter(|request| !request.name.trim().is_empty())
        .collect())
}

fn parse_table<R: Read, T: DeserializeOwned>(reader: R) -> Result<Vec<T>, String> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    rdr.deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|err| err.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCandidate {
    pub row: CatalogRow,
    pub score: u8,
    /// Position in the shortlist, 0 is the best match.
    pub rank: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogMatcher {
    score_cutoff: u8,
}

impl CatalogMatcher {
    pub fn new(score_cutoff: u8) -> Self {
        Self { score_cutoff }
    }

    /// Ranks `rows` by token-sort similarity of their titles to `site_name`,
    /// best first, keeping catalog order among equal scores.
    pub fn rank(&self, site_name: &str, rows: &[CatalogRow], limit: usize) -> Vec<MatchCandidate> {
        if limit == 0 || rows.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(u8, &CatalogRow)> = rows
            .iter()
            .map(|row| (token_sort_ratio(site_name, &row.title), row))
            .filter(|(score, _)| *score >= self.score_cutoff)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(rank, (score, row))| MatchCandidate {
                row: row.clone(),
                score,
                rank,
            })
            .collect()
    }
}

/// Similarity in 0..=100 that ignores case, punctuation and token order.
/// The indel ratio of the sorted token strings, rounded half to even.
pub fn token_sort_ratio(left: &str, right: &str) -> u8 {
    let left = sorted_tokens(left);
    let right = sorted_tokens(right);
    if left.is_empty() || right.is_empty() {
        return 0;
    }
    let ratio = fuzz::ratio(left.chars(), right.chars());
    (ratio * 100.0).round_ties_even().clamp(0.0, 100.0) as u8
}

fn sorted_tokens(value: &str) -> String {
    let mut cleaned = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_alphanumeric() {
            cleaned.extend(ch.to_lowercase());
        } else {
            cleaned.push(' ');
        }
    }
    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}
