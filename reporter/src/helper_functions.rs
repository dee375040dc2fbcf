use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::NaiveDate;
use polars::prelude::*;
use regex::Regex;
use tracing::{debug, info};

use crate::errors::{ReportError, ReportResult};

pub fn read_csv(file_path: &Path) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(file_path.to_path_buf()))?
        .finish()
}

/// Writes `df` to `path`, creating the parent directory first.
pub fn dataframe_to_csv(df: &mut DataFrame, path: &Path) -> ReportResult<()> {
    ensure_parent_dir(path)?;
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    info!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}

pub fn ensure_parent_dir(path: &Path) -> ReportResult<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            debug!("Creating {}", dir.display());
            fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}

/// `<output_dir>/<scan_id>`
pub fn scan_output_dir(output_dir: &Path, scan_id: &str) -> PathBuf {
    output_dir.join(scan_id)
}

/// Rounds to `digits` decimals using the exact binary value, so 0.86725 (stored
/// just below the tie) becomes 0.867.
pub fn round_to(value: f64, digits: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    format!("{:.*}", digits as usize, value)
        .parse()
        .unwrap_or(value)
}

/// Renders a float the way the report tables show it: shortest form, always with a decimal point.
pub fn format_value(value: f64) -> String {
    let s = value.to_string();
    if value.is_finite() && !s.contains('.') && !s.contains('e') {
        format!("{s}.0")
    } else {
        s
    }
}

pub fn print_delimiter(ch: char, width: usize) {
    println!("{}", ch.to_string().repeat(width));
}

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9]{8}").expect("static regex"))
}

/// First `YYYYMMDD` run in `text`.
pub fn extract_date(text: &str) -> ReportResult<NaiveDate> {
    let malformed = |reason: String| ReportError::MalformedFilename {
        path: PathBuf::from(text),
        reason,
    };
    let digits = date_regex()
        .find(text)
        .ok_or_else(|| malformed("no YYYYMMDD date".to_string()))?;
    NaiveDate::parse_from_str(digits.as_str(), "%Y%m%d")
        .map_err(|e| malformed(format!("invalid date {}: {e}", digits.as_str())))
}
