use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::{debug, info};

use crate::config::{DataSources, ScanConfig};
use crate::data_handling::scan_record::read_scan_record;
use crate::errors::{ReportError, ReportResult};
use crate::helper_functions::{dataframe_to_csv, format_value, round_to};
use crate::metrics::compute_ratio;
use crate::models::{RoiEntry, ScanRecord, TableRow};
use crate::resolver::{generate_init, partition_pipelines, resolve_file};

/// ROI → pipeline to report instead of the best one.
pub type PipelineOverrides = BTreeMap<String, String>;

/// Groups resolved files by ROI in the order of the sorted per-pipeline files.
pub fn group_rois(files: &[PathBuf], scan_type: &str) -> ReportResult<Vec<RoiEntry>> {
    let (best, all) = partition_pipelines(files);
    let mut entries: Vec<RoiEntry> = Vec::new();

    for path in &best {
        let resolved = resolve_file(path, scan_type)?;
        if let Some(existing) = entries.iter().find(|e| e.roi == resolved.roi) {
            return Err(ReportError::AmbiguousBestPipeline {
                roi: resolved.roi,
                first: existing.best_pipeline.clone(),
                second: resolved.pipeline,
            });
        }
        entries.push(RoiEntry {
            roi: resolved.roi,
            best_pipeline: resolved.pipeline,
            best_file: resolved.path,
            pipelines: BTreeMap::new(),
        });
    }

    for path in &all {
        let resolved = resolve_file(path, scan_type)?;
        let entry = entries
            .iter_mut()
            .find(|e| e.roi == resolved.roi)
            .ok_or_else(|| ReportError::UnknownRoi {
                roi: resolved.roi.clone(),
                path: resolved.path.clone(),
            })?;
        entry.pipelines.insert(resolved.pipeline, resolved.path);
    }

    debug!("Grouped {} files into {} ROIs", files.len(), entries.len());
    Ok(entries)
}

/// Formats one summary row from the selected pipeline's record.
pub fn table_row(entry: &RoiEntry, pipeline: &str, record: &ScanRecord) -> ReportResult<TableRow> {
    let roi_pipeline = if pipeline == entry.best_pipeline {
        format!("{} ({}*)", entry.roi, pipeline)
    } else {
        format!("{} ({})", entry.roi, pipeline)
    };
    let crlb = record.get("2HG %SD")?.trunc() as i64;

    Ok(TableRow {
        roi_pipeline,
        two_hg_crlb: format!("{} ({}%)", format_value(round_to(record.get("2HG")?, 3)), crlb),
        two_hg_cr: format_value(round_to(record.get("2HG/Cr+PCr")?, 3)),
        two_hg_gln_glu: format_value(round_to(compute_ratio(record, None)?, 3)),
    })
}

/// One row per ROI. The first unreadable file aborts the whole table.
pub fn build_table(
    files: &[PathBuf],
    scan_type: &str,
    overrides: &PipelineOverrides,
) -> ReportResult<Vec<TableRow>> {
    let entries = group_rois(files, scan_type)?;
    entries
        .iter()
        .map(|entry| {
            let pipeline = overrides
                .get(&entry.roi)
                .map(String::as_str)
                .unwrap_or(&entry.best_pipeline);
            let file = entry.file_for(pipeline)?;
            info!("{}: reporting {} from {}", entry.roi, pipeline, file.display());
            let record = read_scan_record(file)?;
            table_row(entry, pipeline, &record)
        })
        .collect()
}

pub fn rows_to_frame(rows: &[TableRow]) -> PolarsResult<DataFrame> {
    let column = |idx: usize, pick: fn(&TableRow) -> &String| -> Column {
        Series::new(
            PlSmallStr::from(TableRow::HEADER[idx]),
            rows.iter().map(|r| pick(r).clone()).collect::<Vec<_>>(),
        )
        .into()
    };
    DataFrame::new(vec![
        column(0, |r| &r.roi_pipeline),
        column(1, |r| &r.two_hg_crlb),
        column(2, |r| &r.two_hg_cr),
        column(3, |r| &r.two_hg_gln_glu),
    ])
}

/// Builds, prints and saves the summary table to `<output_dir>/<scan_id>/<scan_id>.csv`.
pub fn generate_table(
    scan: &ScanConfig,
    sources: &DataSources,
    overrides: &PipelineOverrides,
) -> ReportResult<PathBuf> {
    let query = sources.autoproc_query(scan);
    let files = generate_init(&query, &scan.scan_id, &scan.scan_type)?;

    let rows = build_table(&files, &scan.scan_type, overrides)?;
    let mut df = rows_to_frame(&rows)?;
    println!("{df}");

    let out_path = table_path(&scan.output_dir, &scan.scan_id);
    dataframe_to_csv(&mut df, &out_path)?;

    println!(
        "Processing complete. Table saved to {}",
        scan.scan_output_dir().display()
    );
    Ok(out_path)
}

/// `<output_dir>/<scan_id>/<scan_id>.csv`
pub fn table_path(output_dir: &Path, scan_id: &str) -> PathBuf {
    output_dir.join(scan_id).join(format!("{scan_id}.csv"))
}
