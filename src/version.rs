use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::catalog::{CatalogRow, MatchCandidate};

fn title_regex() -> &'static Regex {
    static TITLE_RE: OnceLock<Regex> = OnceLock::new();
    TITLE_RE.get_or_init(|| {
        Regex::new(r"^(?P<prefix>.+)_(?P<year>\d{1,9})_v(?P<version>\d{1,9})$")
            .expect("valid title regex")
    })
}

/// A catalog row whose title carries a `<prefix>_<year>_v<version>` suffix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub title: String,
    pub prefix: String,
    pub year: u32,
    pub version: u32,
    pub access_link: String,
}

impl CatalogEntry {
    /// `None` for titles outside the versioned grammar; they are never read
    /// as version 0.
    pub fn parse(row: &CatalogRow) -> Option<Self> {
        let title = row.title.trim();
        let captures = title_regex().captures(title)?;
        let year = captures["year"].parse().ok()?;
        let version = captures["version"].parse().ok()?;
        Some(Self {
            title: title.to_string(),
            prefix: captures["prefix"].to_string(),
            year,
            version,
            access_link: row.access_link.clone(),
        })
    }

    pub fn release(&self) -> (u32, u32) {
        (self.year, self.version)
    }

    pub fn is_versioned(row: &CatalogRow) -> bool {
        Self::parse(row).is_some()
    }
}

pub struct VersionSelector;

impl VersionSelector {
    /// Candidates whose titles parse, in their original order.
    pub fn eligible(candidates: &[MatchCandidate]) -> Vec<(usize, CatalogEntry)> {
        candidates
            .iter()
            .filter_map(|candidate| {
                CatalogEntry::parse(&candidate.row).map(|entry| (candidate.rank, entry))
            })
            .collect()
    }

    /// Highest `(year, version)`; equal releases go to the better-ranked
    /// candidate.
    pub fn select_latest(candidates: &[MatchCandidate]) -> Option<CatalogEntry> {
        let mut best: Option<(usize, CatalogEntry)> = None;
        for (rank, entry) in Self::eligible(candidates) {
            let replace = match &best {
                None => true,
                Some((best_rank, current)) => {
                    entry.release() > current.release()
                        || (entry.release() == current.release() && rank < *best_rank)
                }
            };
            if replace {
                best = Some((rank, entry));
            }
        }
        best.map(|(_, entry)| entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(title: &str) -> CatalogRow {
        CatalogRow {
            title: title.to_string(),
            access_link: String::new(),
        }
    }

    #[test]
    fn parses_versioned_titles() {
        let entry = CatalogEntry::parse(&row("AliceSpringsMulga_2022_v2")).unwrap();
        assert_eq!(entry.prefix, "AliceSpringsMulga");
        assert_eq!(entry.release(), (2022, 2));
    }

    #[test]
    fn rejects_unversioned_titles() {
        for title in [
            "AliceSpringsMulga",
            "AliceSpringsMulga_2022",
            "AliceSpringsMulga_2022_v",
            "AliceSpringsMulga_2022_vX",
            "_2022_v1",
            "AliceSpringsMulga_2022_v1.nc",
        ] {
            assert!(CatalogEntry::parse(&row(title)).is_none(), "{title}");
        }
    }
}
