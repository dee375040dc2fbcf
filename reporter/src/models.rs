use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::errors::{ReportError, ReportResult};

/// ROI name used when a result filename carries no ROI part.
pub const DEFAULT_ROI: &str = "Lesion";
/// Path marker of aggregate files holding every pipeline's output.
pub const ALL_PIPELINES_MARKER: &str = "AllPipelines";

// ─── Metabolites ─────────────────────────────────────────────────────────────

/// The three quantities reported for every scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metabolite {
    TwoHg,
    TwoHgCr,
    TwoHgGlnGlu,
}

impl Metabolite {
    pub const ALL: [Metabolite; 3] = [Metabolite::TwoHg, Metabolite::TwoHgCr, Metabolite::TwoHgGlnGlu];

    pub fn label(&self) -> &'static str {
        match self {
            Metabolite::TwoHg => "2HG",
            Metabolite::TwoHgCr => "2HG/Cr+PCr",
            Metabolite::TwoHgGlnGlu => "(2HG+Gln)/Glu",
        }
    }
}

impl std::fmt::Display for Metabolite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ─── ScanRecord ──────────────────────────────────────────────────────────────

/// First data row of a result CSV, keyed by trimmed column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanRecord {
    source: String,
    values: BTreeMap<String, f64>,
}

impl ScanRecord {
    pub fn new(source: impl Into<String>, values: BTreeMap<String, f64>) -> Self {
        Self {
            source: source.into(),
            values,
        }
    }

    #[cfg(test)]
    pub fn from_pairs(source: impl Into<String>, pairs: &[(&str, f64)]) -> Self {
        let values = pairs.iter().map(|(k, v)| (k.trim().to_string(), *v)).collect();
        Self::new(source, values)
    }

    #[cfg(test)]
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn get(&self, field: &str) -> ReportResult<f64> {
        self.values
            .get(field.trim())
            .copied()
            .ok_or_else(|| ReportError::MissingColumn {
                column: field.trim().to_string(),
                source_name: self.source.clone(),
            })
    }
}

// ─── Resolved files and ROI grouping ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub roi: String,
    pub pipeline: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiEntry {
    pub roi: String,
    pub best_pipeline: String,
    pub best_file: PathBuf,
    /// pipeline name → AllPipelines file
    pub pipelines: BTreeMap<String, PathBuf>,
}

impl RoiEntry {
    pub fn file_for(&self, pipeline: &str) -> ReportResult<&PathBuf> {
        match self.pipelines.get(pipeline) {
            Some(path) => Ok(path),
            None if pipeline == self.best_pipeline => Ok(&self.best_file),
            None => Err(ReportError::MissingPipeline {
                roi: self.roi.clone(),
                pipeline: pipeline.to_string(),
            }),
        }
    }
}

// ─── Table and series rows ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub roi_pipeline: String,
    pub two_hg_crlb: String,
    pub two_hg_cr: String,
    pub two_hg_gln_glu: String,
}

impl TableRow {
    pub const HEADER: [&'static str; 4] = ["ROI (Pipeline)", "2HG (CRLB)", "2HG/Cr+PCr", "(2HG+Gln)/Glu"];
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub roi: String,
    pub metabolite: Metabolite,
    pub value: f64,
}

// ─── Normative data ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TissueType {
    Normal,
    Tumor,
}

impl TissueType {
    pub const ALL: [TissueType; 2] = [TissueType::Normal, TissueType::Tumor];

    /// Maps the workbook's lowercase labels.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "normal" | "Normal" => Some(TissueType::Normal),
            "tumor" | "Tumor" => Some(TissueType::Tumor),
            _ => None,
        }
    }
}

impl std::fmt::Display for TissueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TissueType::Normal => "Normal",
            TissueType::Tumor => "Tumor",
        };
        write!(f, "{s}")
    }
}

/// One long-form normative observation.
#[derive(Debug, Clone, PartialEq)]
pub struct NormativeRange {
    pub tissue: TissueType,
    pub metabolite: Metabolite,
    pub value: f64,
}

// ─── Progression input ───────────────────────────────────────────────────────

/// A scan named in a manual history: a CSV path/directory or a study database key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScanRef {
    SpecN(i64),
    Path(String),
}

/// ROI → scans of that ROI, in the order they were listed.
pub type ScanHistory = BTreeMap<String, Vec<ScanRef>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressionMode {
    Manual,
    Auto,
}

impl std::fmt::Display for ProgressionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProgressionMode::Manual => "manual",
            ProgressionMode::Auto => "auto",
        };
        write!(f, "{s}")
    }
}
