use std::path::Path;

use polars::prelude::*;
use tracing::debug;

use crate::data_handling::{numeric_columns, record_at};
use crate::errors::{ReportError, ReportResult};
use crate::helper_functions::read_csv;
use crate::models::ScanRecord;

/// Reads the first data row of a pipeline result CSV.
pub fn read_scan_record(path: &Path) -> ReportResult<ScanRecord> {
    debug!("Reading scan results from {}", path.display());
    let df = read_csv(path).map_err(|e| ReportError::MalformedFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    first_row_record(&df, path)
}

pub fn first_row_record(df: &DataFrame, path: &Path) -> ReportResult<ScanRecord> {
    if df.height() == 0 {
        return Err(ReportError::EmptyFile {
            path: path.to_path_buf(),
        });
    }
    let columns = numeric_columns(df).map_err(|e| ReportError::MalformedFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(record_at(&columns, 0, &path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn only_first_row_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PT01_20200101_svs_se_97-Osprey.CSV");
        fs::write(
            &path,
            "Pipeline, 2HG, 2HG %SD, 2HG/Cr+PCr, Gln, Glu\nOsprey,1.2345,17,0.21,0.5,2.0\nOsprey,9,9,9,9,9\n",
        )
        .unwrap();

        let rec = read_scan_record(&path).unwrap();
        assert_eq!(rec.get("2HG").unwrap(), 1.2345);
        assert_eq!(rec.get("2HG %SD").unwrap(), 17.0);
        assert_eq!(rec.get("Glu").unwrap(), 2.0);
        assert!(rec.source().ends_with("Osprey.CSV"));
    }

    #[test]
    fn header_only_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.CSV");
        fs::write(&path, " 2HG, Gln, Glu\n").unwrap();
        assert!(matches!(read_scan_record(&path), Err(ReportError::EmptyFile { .. })));
    }

    #[test]
    fn missing_file_is_malformed() {
        let err = read_scan_record(Path::new("/nonexistent/x.CSV")).unwrap_err();
        assert!(err.is_per_file());
    }
}
