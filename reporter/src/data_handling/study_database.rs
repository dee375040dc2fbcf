use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::info;

use crate::data_handling::excel::{read_excel, Sheet};
use crate::data_handling::{float_column, numeric_columns, record_at, string_column};
use crate::errors::{ReportError, ReportResult};
use crate::models::{Metabolite, ScanRecord};
use crate::resolver::compile_inputs;

const RESULTS_SHEET: &str = "BestPipeline";

/// Row of the study's patient-scan index. `spec_n` is the row position,
/// which is what the results sheet's `SpecN` column refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientScan {
    pub spec_n: i64,
    pub folder: String,
    pub name: String,
}

/// Row of the study's best-pipeline results sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct StudyResult {
    pub spec_n: i64,
    pub id: String,
    pub record: ScanRecord,
}

impl StudyResult {
    /// Values are taken as stored, including the ratio column.
    pub fn value(&self, metabolite: Metabolite) -> ReportResult<f64> {
        self.record.get(metabolite.label())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StudyDatabase {
    pub scans: Vec<PatientScan>,
    pub results: Vec<StudyResult>,
}

impl StudyDatabase {
    /// Opens `Input*` (index) and `Output*` (results) in `study_dir`.
    pub fn load(study_dir: &Path) -> ReportResult<Self> {
        let index_path = first_match(study_dir, "Input*")?;
        let results_path = first_match(study_dir, "Output*")?;
        info!(
            "Reading study database from {} and {}",
            index_path.display(),
            results_path.display()
        );

        let index = read_excel(&index_path, Sheet::First)?;
        let results = read_excel(&results_path, Sheet::Named(RESULTS_SHEET))?;
        Self::from_frames(
            &index,
            &index_path.display().to_string(),
            &results,
            &results_path.display().to_string(),
        )
    }

    pub fn from_frames(
        index: &DataFrame,
        index_source: &str,
        results: &DataFrame,
        results_source: &str,
    ) -> ReportResult<Self> {
        let folders = string_column(index, "folder", index_source)?;
        let names = string_column(index, "name", index_source)?;
        let scans = folders
            .into_iter()
            .zip(names)
            .enumerate()
            .map(|(row, (folder, name))| PatientScan {
                spec_n: row as i64,
                folder: folder.unwrap_or_default(),
                name: name.unwrap_or_default(),
            })
            .collect();

        let spec_ns = float_column(results, "SpecN", results_source)?;
        let ids = string_column(results, "ID", results_source)?;
        let columns = numeric_columns(results)?;
        let results = spec_ns
            .into_iter()
            .zip(ids)
            .enumerate()
            .filter_map(|(row, (spec_n, id))| {
                Some(StudyResult {
                    spec_n: spec_n? as i64,
                    id: id.unwrap_or_default(),
                    record: record_at(&columns, row, results_source),
                })
            })
            .collect();

        Ok(Self { scans, results })
    }

    /// Index rows whose folder mentions `patient`.
    pub fn patient_scans(&self, patient: &str) -> Vec<&PatientScan> {
        self.scans.iter().filter(|s| s.folder.contains(patient)).collect()
    }

    pub fn result(&self, spec_n: i64) -> ReportResult<&StudyResult> {
        self.results
            .iter()
            .find(|r| r.spec_n == spec_n)
            .ok_or(ReportError::MissingStudyResult(spec_n))
    }
}

fn first_match(dir: &Path, pattern: &str) -> ReportResult<PathBuf> {
    let query = dir.join(pattern).display().to_string();
    let mut matches = compile_inputs(&query)?;
    Ok(matches.remove(0))
}

/// Loads the study database on first use; most runs never touch it.
#[derive(Debug)]
pub struct LazyStudyDatabase {
    dir: PathBuf,
    loaded: Option<StudyDatabase>,
}

impl LazyStudyDatabase {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: None,
        }
    }

    #[cfg(test)]
    pub fn preloaded(db: StudyDatabase) -> Self {
        Self {
            dir: PathBuf::new(),
            loaded: Some(db),
        }
    }

    pub fn get(&mut self) -> ReportResult<&StudyDatabase> {
        let db = match self.loaded.take() {
            Some(db) => db,
            None => StudyDatabase::load(&self.dir)?,
        };
        Ok(self.loaded.insert(db))
    }
}
