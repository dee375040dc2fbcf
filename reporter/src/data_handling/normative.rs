use std::path::Path;

use polars::prelude::*;
use tracing::{info, warn};

use crate::data_handling::excel::{read_excel, Sheet};
use crate::data_handling::{numeric_columns, record_at, require_column, string_column};
use crate::errors::ReportResult;
use crate::metrics::{compute_ratio, UNDEFINED_RATIO};
use crate::models::{Metabolite, NormativeRange, ScanRecord, TissueType};

const TISSUE_COLUMN: &str = "Tissue Type";

/// Workbook columns holding the three reported quantities.
const METABOLITE_COLUMNS: [(&str, Metabolite); 3] = [
    (" 2HG", Metabolite::TwoHg),
    (" 2HG/Cr+PCr", Metabolite::TwoHgCr),
    ("(2HG+Gln)/Glu", Metabolite::TwoHgGlnGlu),
];

#[derive(Debug, Clone, PartialEq)]
pub struct NormativeSample {
    pub tissue: TissueType,
    pub record: ScanRecord,
}

/// Population reference data for Normal and Tumor tissue.
#[derive(Debug, Clone, Default)]
pub struct NormativeTable {
    pub samples: Vec<NormativeSample>,
}

impl NormativeTable {
    pub fn load(path: &Path, sheet: &str) -> ReportResult<Self> {
        info!("Reading normative ranges from {} (sheet {})", path.display(), sheet);
        let df = read_excel(path, Sheet::Named(sheet))?;
        Self::from_frame(&df, &path.display().to_string())
    }

    pub fn from_frame(df: &DataFrame, source: &str) -> ReportResult<Self> {
        for (column, _) in METABOLITE_COLUMNS {
            require_column(df, column, source)?;
        }
        let tissues = string_column(df, TISSUE_COLUMN, source)?;
        let columns = numeric_columns(df)?;

        let mut samples = Vec::with_capacity(df.height());
        for (idx, label) in tissues.iter().enumerate() {
            let Some(tissue) = label.as_deref().and_then(TissueType::from_label) else {
                warn!("Skipping normative row {} with tissue type {:?}", idx + 2, label);
                continue;
            };
            samples.push(NormativeSample {
                tissue,
                record: record_at(&columns, idx, source),
            });
        }
        info!("Loaded {} normative samples", samples.len());
        Ok(Self { samples })
    }

    /// One row per (tissue, metabolite, value); absent cells are dropped.
    pub fn long_form(&self) -> Vec<NormativeRange> {
        let mut rows = Vec::with_capacity(self.samples.len() * METABOLITE_COLUMNS.len());
        for (column, metabolite) in METABOLITE_COLUMNS {
            for sample in &self.samples {
                if let Ok(value) = sample.record.get(column) {
                    rows.push(NormativeRange {
                        tissue: sample.tissue,
                        metabolite,
                        value,
                    });
                }
            }
        }
        rows
    }

    /// Normal-tissue reference values for the progression chart. The ratio is
    /// recomputed from each sample's 2HG, Gln and Glu; rows where it is
    /// undefined are left out.
    pub fn normal_reference(&self, metabolite: Metabolite) -> Vec<f64> {
        self.samples
            .iter()
            .filter(|s| s.tissue == TissueType::Normal)
            .filter_map(|s| match metabolite {
                Metabolite::TwoHgGlnGlu => compute_ratio(&s.record, None)
                    .ok()
                    .filter(|v| *v != UNDEFINED_RATIO),
                other => s.record.get(other.label()).ok(),
            })
            .collect()
    }
}

/// Values of one tissue/metabolite pair in a long-form table.
pub fn values_for(rows: &[NormativeRange], tissue: TissueType, metabolite: Metabolite) -> Vec<f64> {
    rows.iter()
        .filter(|r| r.tissue == tissue && r.metabolite == metabolite)
        .map(|r| r.value)
        .collect()
}
