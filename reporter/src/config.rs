use std::path::PathBuf;

use crate::helper_functions::scan_output_dir;
use crate::resolver::autoproc_query;

pub const DEFAULT_SCAN_TYPE: &str = "svs_se_97";
pub const DEFAULT_OUTPUT_DIR: &str = "./output";
pub const DEFAULT_AUTOPROC_ROOT: &str = "/external/SFA/SPECTRO_PROC/CCS_AutoProc/output";
pub const DEFAULT_NORMATIVE_PATH: &str = "normative_ranges.xlsx";
pub const DEFAULT_NORMATIVE_SHEET: &str = "SVS97";
const STUDY_SUBDIR: &str = "mnt/spectro_proc/CCS_Proc/Study_2HG/SVS-PRESS";

/// Settings shared by every entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub scan_id: String,
    pub scan_type: String,
    pub output_dir: PathBuf,
    pub verbose: u8,
}

impl ScanConfig {
    /// `<output_dir>/<scan_id>`
    pub fn scan_output_dir(&self) -> PathBuf {
        scan_output_dir(&self.output_dir, &self.scan_id)
    }
}

/// Where inputs live.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSources {
    pub autoproc_root: PathBuf,
    pub normative_path: PathBuf,
    pub normative_sheet: String,
    pub study_dir: PathBuf,
}

impl DataSources {
    pub fn autoproc_query(&self, scan: &ScanConfig) -> String {
        autoproc_query(&self.autoproc_root, &scan.scan_id, &scan.scan_type)
    }
}

impl Default for DataSources {
    fn default() -> Self {
        Self {
            autoproc_root: PathBuf::from(DEFAULT_AUTOPROC_ROOT),
            normative_path: PathBuf::from(DEFAULT_NORMATIVE_PATH),
            normative_sheet: DEFAULT_NORMATIVE_SHEET.to_string(),
            study_dir: default_study_dir(),
        }
    }
}

/// Study database location under the user's home, or the working directory
/// when no home is known.
pub fn default_study_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STUDY_SUBDIR)
}
