use std::path::{Component, Path, PathBuf};

use globset::GlobBuilder;
use polars::prelude::*;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::errors::{ReportError, ReportResult};
use crate::helper_functions::print_delimiter;
use crate::models::{ResolvedFile, ALL_PIPELINES_MARKER, DEFAULT_ROI};

/// `<root>/<scan_id>/**/*_<scan_type>*.CSV`
pub fn autoproc_query(root: &Path, scan_id: &str, scan_type: &str) -> String {
    format!("{}/{}/**/*_{}*.CSV", root.display(), scan_id, scan_type)
}

// ─── Discovery ───────────────────────────────────────────────────────────────

/// Recursive glob: `**` spans directories, `*` stays within one.
/// Symlinked files and directories are followed. Matches are returned sorted;
/// an empty match set is an error.
pub fn compile_inputs(query: &str) -> ReportResult<Vec<PathBuf>> {
    let matcher = GlobBuilder::new(query)
        .literal_separator(true)
        .build()
        .map_err(|e| ReportError::InvalidQuery {
            query: query.to_string(),
            reason: e.to_string(),
        })?
        .compile_matcher();

    let base = literal_prefix(query);
    let walk_root = if base.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        base.clone()
    };
    debug!("Walking {} for {}", walk_root.display(), query);

    let mut results: Vec<PathBuf> = WalkDir::new(&walk_root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            if base.as_os_str().is_empty() {
                e.path().strip_prefix(".").unwrap_or(e.path()).to_path_buf()
            } else {
                e.into_path()
            }
        })
        .filter(|p| matcher.is_match(p))
        .collect();

    if results.is_empty() {
        return Err(ReportError::NoResults {
            query: query.to_string(),
        });
    }
    results.sort();
    info!("{} files match {}", results.len(), query);
    Ok(results)
}

/// Leading path components free of glob metacharacters.
fn literal_prefix(query: &str) -> PathBuf {
    Path::new(query)
        .components()
        .take_while(|c| match c {
            Component::Normal(part) => !part.to_string_lossy().contains(&['*', '?', '[', '{'][..]),
            _ => true,
        })
        .collect()
}

// ─── Filename grammar ────────────────────────────────────────────────────────
//
// <anything><scan_type><suffix>.<ext>
// suffix   = [<sep><roi>] "-" <pipeline>
// <sep> is a single character and the ROI/pipeline split is the last '-'.

pub fn parse_filename(path: &Path, scan_type: &str) -> ReportResult<(String, String)> {
    let malformed = |reason: &str| ReportError::MalformedFilename {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| malformed("no file name"))?;
    let (_, after_tag) = file_name
        .rsplit_once(scan_type)
        .ok_or_else(|| malformed(&format!("scan type '{scan_type}' not in file name")))?;
    let suffix = after_tag.split('.').next().unwrap_or_default();
    let (roi_part, pipeline) = suffix
        .rsplit_once('-')
        .ok_or_else(|| malformed("no '-<pipeline>' suffix"))?;

    if pipeline.is_empty() {
        return Err(malformed("empty pipeline name"));
    }

    let roi = if roi_part.is_empty() {
        DEFAULT_ROI.to_string()
    } else {
        let mut chars = roi_part.chars();
        chars.next();
        let stripped = chars.as_str();
        if stripped.is_empty() {
            return Err(malformed("empty ROI name after separator"));
        }
        stripped.to_string()
    };

    Ok((roi, pipeline.to_string()))
}

pub fn resolve_file(path: &Path, scan_type: &str) -> ReportResult<ResolvedFile> {
    let (roi, pipeline) = parse_filename(path, scan_type)?;
    Ok(ResolvedFile {
        roi,
        pipeline,
        path: path.to_path_buf(),
    })
}

pub fn is_all_pipelines(path: &Path) -> bool {
    path.to_string_lossy().contains(ALL_PIPELINES_MARKER)
}

/// Splits discovered files into (per-pipeline, AllPipelines), keeping order.
pub fn partition_pipelines(paths: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    paths.iter().cloned().partition(|p| !is_all_pipelines(p))
}

// ─── Scan summary ────────────────────────────────────────────────────────────

pub fn scan_info_frame(paths: &[PathBuf], scan_type: &str) -> ReportResult<DataFrame> {
    let (best, _) = partition_pipelines(paths);
    let resolved = best
        .iter()
        .map(|p| resolve_file(p, scan_type))
        .collect::<ReportResult<Vec<_>>>()?;

    let df = DataFrame::new(vec![
        Series::new("ROI".into(), resolved.iter().map(|r| r.roi.clone()).collect::<Vec<_>>()).into(),
        Series::new(
            "Best Pipeline".into(),
            resolved.iter().map(|r| r.pipeline.clone()).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "File".into(),
            resolved
                .iter()
                .map(|r| r.path.display().to_string())
                .collect::<Vec<_>>(),
        )
        .into(),
    ])?;
    Ok(df)
}

/// Discovers the scan's files and prints which pipeline won for each ROI.
pub fn generate_init(query: &str, scan_id: &str, scan_type: &str) -> ReportResult<Vec<PathBuf>> {
    let results = compile_inputs(query)?;
    let info = scan_info_frame(&results, scan_type)?;
    println!("Scan: {scan_id}");
    println!("{info}");
    print_delimiter('=', 50);
    Ok(results)
}
