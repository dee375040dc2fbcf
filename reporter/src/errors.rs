use std::path::PathBuf;

use polars::prelude::PolarsError;
use thiserror::Error;

/// Where an unconventional ROI name was found during automatic progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoiSource {
    AutoProc,
    Database,
}

impl std::fmt::Display for RoiSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RoiSource::AutoProc => "AutoProc",
            RoiSource::Database => "the study database",
        };
        write!(f, "{s}")
    }
}

/// Errors raised while resolving, reading and reporting scan results
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("No results found matching the following glob query: {query}")]
    NoResults { query: String },

    #[error("Invalid glob query {query}: {reason}")]
    InvalidQuery { query: String, reason: String },

    #[error(
        "{patient} has no past scans.\nIf this is incorrect, double check that the folder name in \
         input/ matches the past scans in the study database 'folder' column."
    )]
    NoHistory { patient: String },

    #[error(
        "{patient} has unconventional ROIs in {origin}: ({}).\nPlease pass in a scan history to process this patient manually.",
        .rois.join(", ")
    )]
    UnconventionalRoi {
        patient: String,
        origin: RoiSource,
        rois: Vec<String>,
    },

    #[error("Malformed result filename {}: {reason}", .path.display())]
    MalformedFilename { path: PathBuf, reason: String },

    #[error("Malformed result file {}: {reason}", .path.display())]
    MalformedFile { path: PathBuf, reason: String },

    #[error("Column '{column}' missing from {source_name}")]
    MissingColumn { column: String, source_name: String },

    #[error("{} contains no data rows", .path.display())]
    EmptyFile { path: PathBuf },

    #[error("Scan id '{0}' is not of the form <patient>_<YYYYMMDD>")]
    MalformedScanId(String),

    #[error("ROI {roi} has more than one best pipeline ({first}, {second})")]
    AmbiguousBestPipeline {
        roi: String,
        first: String,
        second: String,
    },

    #[error("AllPipelines file {} belongs to ROI {roi}, which has no best pipeline file", .path.display())]
    UnknownRoi { roi: String, path: PathBuf },

    #[error("No result file for pipeline {pipeline} in ROI {roi}")]
    MissingPipeline { roi: String, pipeline: String },

    #[error("No study result with SpecN {0}")]
    MissingStudyResult(i64),

    #[error("Workbook error in {}: {reason}", .path.display())]
    Workbook { path: PathBuf, reason: String },

    #[error("Plotting failed: {0}")]
    Plot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReportError {
    /// Failure kinds tied to a single input file. A plot batch logs these and
    /// moves on to the next file; everything else aborts the run.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            ReportError::MalformedFile { .. }
                | ReportError::MissingColumn { .. }
                | ReportError::MalformedFilename { .. }
                | ReportError::EmptyFile { .. }
        )
    }
}

pub type ReportResult<T> = Result<T, ReportError>;

/// Wraps a plotters drawing error.
pub fn plot_err(e: impl std::fmt::Display) -> ReportError {
    ReportError::Plot(e.to_string())
}
