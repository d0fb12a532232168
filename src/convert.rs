use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use netcdf3::{DataSet, DataVector, FileReader};
use serde::Serialize;
use tracing::debug;

use crate::error::FluxError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionSummary {
    pub rows: usize,
    pub columns: usize,
}

/// Flattens a downloaded array artifact into a tabular file.
pub trait TableConverter: Send + Sync {
    fn convert(&self, source: &Path, target: &Path) -> Result<ConversionSummary, FluxError>;
}

/// Row-per-timestamp CSV from a NetCDF (classic or 64-bit offset) file.
///
/// The first column is the time coordinate, rendered as
/// `YYYY-MM-DD HH:MM:SS` when its `units` attribute reads
/// `<unit> since <epoch>` and as stored otherwise. Every numeric variable laid out
/// along the time dimension (other dimensions of size 1) becomes a column;
/// single-valued variables such as the site latitude are repeated on each
/// row. Character variables and variables spanning other non-trivial
/// dimensions are left out.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetcdfFlattener;

#[derive(Debug)]
enum ColumnKind {
    Series,
    Constant,
}

impl TableConverter for NetcdfFlattener {
    fn convert(&self, source: &Path, target: &Path) -> Result<ConversionSummary, FluxError> {
        let conversion_err =
            |reason: String| FluxError::Conversion(format!("{}: {reason}", source.display()));

        let mut reader =
            FileReader::open(source).map_err(|err| conversion_err(format!("{err:?}")))?;
        let (time_dim, time_len, layout) = plan_columns(reader.data_set())
            .ok_or_else(|| conversion_err("no time dimension".to_string()))?;
        let time_units = reader
            .data_set()
            .get_var_attr_as_string(&time_dim, "units")
            .and_then(|units| {
                let parsed = TimeUnits::parse(&units);
                if parsed.is_none() {
                    debug!(units = %units, "time units not understood, keeping raw offsets");
                }
                parsed
            });

        let mut time_values: Option<Vec<String>> = None;
        let mut columns: Vec<(String, Vec<String>, ColumnKind)> = Vec::new();
        for (name, kind) in layout {
            let data = reader
                .read_var(&name)
                .map_err(|err| conversion_err(format!("variable {name}: {err:?}")))?;
            let Some(values) = render_values(&data) else {
                continue;
            };
            if name == time_dim {
                let decoded = time_units
                    .as_ref()
                    .and_then(|units| units.render(&data));
                time_values = Some(decoded.unwrap_or(values));
            } else {
                columns.push((name, values, kind));
            }
        }

        let time_values =
            time_values.unwrap_or_else(|| (0..time_len).map(|index| index.to_string()).collect());

        let parent = target
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let temp = tempfile::Builder::new()
            .prefix(".flux-stations")
            .suffix(".csv.part")
            .tempfile_in(parent)
            .map_err(|err| FluxError::Filesystem(err.to_string()))?;
        let mut writer = csv::Writer::from_writer(temp.as_file());

        let mut header = vec![time_dim.clone()];
        header.extend(columns.iter().map(|(name, _, _)| name.clone()));
        writer
            .write_record(&header)
            .map_err(|err| conversion_err(err.to_string()))?;
        for row in 0..time_len {
            let mut record = Vec::with_capacity(header.len());
            record.push(time_values.get(row).cloned().unwrap_or_default());
            for (_, values, kind) in &columns {
                let value = match kind {
                    ColumnKind::Series => values.get(row),
                    ColumnKind::Constant => values.first(),
                };
                record.push(value.cloned().unwrap_or_default());
            }
            writer
                .write_record(&record)
                .map_err(|err| conversion_err(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| conversion_err(err.to_string()))?;
        drop(writer);
        temp.persist(target)
            .map_err(|err| FluxError::Filesystem(err.to_string()))?;

        Ok(ConversionSummary {
            rows: time_len,
            columns: header.len(),
        })
    }
}

/// Picks the time dimension and the variables that fit a row-per-timestamp
/// layout, in file order.
fn plan_columns(data_set: &DataSet) -> Option<(String, usize, Vec<(String, ColumnKind)>)> {
    let dim_names = data_set.dim_names();
    let time_dim = dim_names
        .iter()
        .find(|name| name.eq_ignore_ascii_case("time"))
        .cloned()
        .or_else(|| {
            data_set
                .get_unlimited_dim()
                .map(|dim| dim.name().to_string())
        })?;
    let time_len = data_set.dim_size(&time_dim)?;

    let mut layout = Vec::new();
    for name in data_set.get_var_names() {
        let Some(var) = data_set.get_var(&name) else {
            continue;
        };
        let dims = var.dim_names();
        let others: usize = dims
            .iter()
            .filter(|dim| **dim != time_dim)
            .map(|dim| data_set.dim_size(dim).unwrap_or(0))
            .product();
        let has_time = dims.iter().any(|dim| *dim == time_dim);
        if has_time && dims.first() == Some(&time_dim) && others == 1 {
            layout.push((name, ColumnKind::Series));
        } else if !has_time && others == 1 {
            layout.push((name, ColumnKind::Constant));
        }
    }
    Some((time_dim, time_len, layout))
}

fn render_values(data: &DataVector) -> Option<Vec<String>> {
    fn integer<T: ToString>(values: &[T]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    match data {
        DataVector::U8(_) => None,
        DataVector::I8(values) => Some(integer(values)),
        DataVector::I16(values) => Some(integer(values)),
        DataVector::I32(values) => Some(integer(values)),
        DataVector::F32(values) => Some(
            values
                .iter()
                .map(|value| if value.is_nan() { String::new() } else { value.to_string() })
                .collect(),
        ),
        DataVector::F64(values) => Some(
            values
                .iter()
                .map(|value| if value.is_nan() { String::new() } else { value.to_string() })
                .collect(),
        ),
    }
}

/// CF-style `<unit> since <epoch>` time coordinate units, epoch in UTC.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TimeUnits {
    step_seconds: f64,
    epoch: NaiveDateTime,
}

impl TimeUnits {
    fn parse(units: &str) -> Option<Self> {
        let units = units.trim().to_ascii_lowercase();
        let (step, epoch) = units.split_once(" since ")?;
        let step_seconds = match step.trim() {
            "days" | "day" | "d" => 86_400.0,
            "hours" | "hour" | "hrs" | "hr" | "h" => 3_600.0,
            "minutes" | "minute" | "mins" | "min" => 60.0,
            "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
            _ => return None,
        };
        Some(Self {
            step_seconds,
            epoch: parse_epoch(epoch)?,
        })
    }

    fn timestamp(&self, offset: f64) -> Option<NaiveDateTime> {
        let seconds = (offset * self.step_seconds).round();
        if !seconds.is_finite() || seconds.abs() > i64::MAX as f64 {
            return None;
        }
        self.epoch
            .checked_add_signed(TimeDelta::try_seconds(seconds as i64)?)
    }

    /// The decoded column, or `None` when any offset falls outside the
    /// representable range. Missing values stay empty.
    fn render(&self, data: &DataVector) -> Option<Vec<String>> {
        numeric_values(data)?
            .into_iter()
            .map(|offset| {
                if offset.is_nan() {
                    return Some(String::new());
                }
                self.timestamp(offset)
                    .map(|stamp| stamp.format("%Y-%m-%d %H:%M:%S").to_string())
            })
            .collect()
    }
}

fn parse_epoch(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    let value = value
        .strip_suffix("utc")
        .or_else(|| value.strip_suffix('z'))
        .unwrap_or(value)
        .replacen('t', " ", 1);
    let mut parts = value.split_whitespace();
    let date = NaiveDate::parse_from_str(parts.next()?, "%Y-%m-%d").ok()?;
    let time = match parts.next() {
        Some(time) => ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"]
            .iter()
            .find_map(|format| NaiveTime::parse_from_str(time, format).ok())?,
        None => NaiveTime::from_hms_opt(0, 0, 0)?,
    };
    match parts.next() {
        None | Some("+00:00" | "+0000" | "00:00" | "0") => {}
        Some(_) => return None,
    }
    if parts.next().is_some() {
        return None;
    }
    Some(date.and_time(time))
}

fn numeric_values(data: &DataVector) -> Option<Vec<f64>> {
    match data {
        DataVector::U8(_) => None,
        DataVector::I8(values) => Some(values.iter().map(|value| f64::from(*value)).collect()),
        DataVector::I16(values) => Some(values.iter().map(|value| f64::from(*value)).collect()),
        DataVector::I32(values) => Some(values.iter().map(|value| f64::from(*value)).collect()),
        DataVector::F32(values) => Some(values.iter().map(|value| f64::from(*value)).collect()),
        DataVector::F64(values) => Some(values.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(value: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn units_with_fractional_epoch_seconds() {
        let units = TimeUnits::parse("days since 1800-01-01 00:00:00.0").unwrap();
        assert_eq!(units.step_seconds, 86_400.0);
        assert_eq!(units.epoch, stamp("1800-01-01 00:00:00"));
        assert_eq!(units.timestamp(80_000.0), Some(stamp("2019-01-13 00:00:00")));
        assert_eq!(units.timestamp(80_001.5), Some(stamp("2019-01-14 12:00:00")));
    }

    #[test]
    fn epoch_forms() {
        let units = TimeUnits::parse("seconds since 2000-01-01T06:30:00Z").unwrap();
        assert_eq!(units.epoch, stamp("2000-01-01 06:30:00"));
        assert_eq!(units.timestamp(90.0), Some(stamp("2000-01-01 06:31:30")));

        let units = TimeUnits::parse("minutes since 2010-03-01 00:00 UTC").unwrap();
        assert_eq!(units.timestamp(30.0), Some(stamp("2010-03-01 00:30:00")));

        let units = TimeUnits::parse("Hours since 2010-03-01").unwrap();
        assert_eq!(units.timestamp(-1.0), Some(stamp("2010-02-28 23:00:00")));
    }

    #[test]
    fn unknown_units_are_rejected() {
        assert_eq!(TimeUnits::parse("degrees_north"), None);
        assert_eq!(TimeUnits::parse("fortnights since 2000-01-01"), None);
        assert_eq!(TimeUnits::parse("days since yesterday"), None);
        assert_eq!(TimeUnits::parse("days since 2000-01-01 00:00:00 +10:00"), None);
    }

    #[test]
    fn missing_offsets_stay_empty() {
        let units = TimeUnits::parse("days since 1800-01-01").unwrap();
        let rendered = units
            .render(&DataVector::F64(vec![80_000.0, f64::NAN]))
            .unwrap();
        assert_eq!(rendered, vec!["2019-01-13 00:00:00".to_string(), String::new()]);
        assert_eq!(units.render(&DataVector::F64(vec![f64::MAX])), None);
        assert_eq!(units.render(&DataVector::U8(vec![1])), None);
    }
}
