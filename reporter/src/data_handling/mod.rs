pub mod excel;
pub mod normative;
pub mod scan_record;
pub mod study_database;

use std::collections::BTreeMap;

use polars::prelude::*;

use crate::errors::{ReportError, ReportResult};
use crate::models::ScanRecord;

/// Every column of `df` cast to Float64, keyed by trimmed name.
/// Text cells are parsed after trimming; anything non-numeric comes back as null.
pub(crate) fn numeric_columns(df: &DataFrame) -> ReportResult<Vec<(String, Float64Chunked)>> {
    let mut out = Vec::with_capacity(df.width());
    for column in df.get_columns() {
        let name = column.name().trim().to_string();
        let values: Float64Chunked = if column.dtype() == &DataType::String {
            column
                .str()?
                .into_iter()
                .map(|v| v.and_then(|s| s.trim().parse::<f64>().ok()))
                .collect()
        } else {
            column.cast(&DataType::Float64)?.f64()?.clone()
        };
        out.push((name, values));
    }
    Ok(out)
}

/// Builds the record for row `idx` from pre-cast columns, skipping nulls.
pub(crate) fn record_at(columns: &[(String, Float64Chunked)], idx: usize, source: &str) -> ScanRecord {
    let values: BTreeMap<String, f64> = columns
        .iter()
        .filter_map(|(name, values)| values.get(idx).map(|v| (name.clone(), v)))
        .collect();
    ScanRecord::new(source, values)
}

pub(crate) fn require_column<'a>(df: &'a DataFrame, name: &str, source: &str) -> ReportResult<&'a Column> {
    df.column(name).map_err(|_| ReportError::MissingColumn {
        column: name.trim().to_string(),
        source_name: source.to_string(),
    })
}

/// A column as optional strings, whatever its stored type.
pub(crate) fn string_column(df: &DataFrame, name: &str, source: &str) -> ReportResult<Vec<Option<String>>> {
    let casted = require_column(df, name, source)?.cast(&DataType::String)?;
    Ok(casted
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

pub(crate) fn float_column(df: &DataFrame, name: &str, source: &str) -> ReportResult<Vec<Option<f64>>> {
    let casted = require_column(df, name, source)?.cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    #[test]
    fn records_trim_names_and_skip_text() {
        let df = df![
            " 2HG" => &[1.5, 2.5],
            " 2HG %SD" => &[12i64, 30],
            "File" => &["a", "b"]
        ]
        .unwrap();
        let cols = numeric_columns(&df).unwrap();
        let rec = record_at(&cols, 1, "frame");
        assert_eq!(rec.get("2HG").unwrap(), 2.5);
        assert_eq!(rec.get("2HG %SD").unwrap(), 30.0);
        assert!(rec.get("File").is_err());
    }

    #[test]
    fn missing_column_names_the_source() {
        let df = df!["a" => &[1.0]].unwrap();
        match string_column(&df, "folder", "index.xlsx") {
            Err(ReportError::MissingColumn { column, source_name }) => {
                assert_eq!(column, "folder");
                assert_eq!(source_name, "index.xlsx");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
