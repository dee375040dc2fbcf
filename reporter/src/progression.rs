use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use polars::prelude::*;
use tracing::{info, warn};

use crate::analysis::progression_plot::plot_progression;
use crate::config::{DataSources, ScanConfig};
use crate::data_handling::normative::NormativeTable;
use crate::data_handling::scan_record::read_scan_record;
use crate::data_handling::study_database::LazyStudyDatabase;
use crate::errors::{ReportError, ReportResult, RoiSource};
use crate::helper_functions::extract_date;
use crate::metrics::metabolite_value;
use crate::models::{Metabolite, ProgressionMode, ScanHistory, ScanRef, SeriesPoint};
use crate::resolver::{compile_inputs, generate_init, partition_pipelines};

const CONTRALATERAL: &str = "Contralateral";
const LESION: &str = "Lesion";

/// How the scans of a progression chart are chosen.
#[derive(Debug, Clone)]
pub enum ProgressionRequest {
    /// Explicit scans per ROI.
    Manual(ScanHistory),
    /// Infer past scans of the same patient from the study database.
    Auto { dates_to_exclude: Vec<NaiveDate> },
}

impl ProgressionRequest {
    pub fn mode(&self) -> ProgressionMode {
        match self {
            ProgressionRequest::Manual(_) => ProgressionMode::Manual,
            ProgressionRequest::Auto { .. } => ProgressionMode::Auto,
        }
    }
}

pub fn load_history(path: &Path) -> ReportResult<ScanHistory> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(file)?)
}

/// Splits `<patient>_<YYYYMMDD>` at its last underscore.
pub fn split_scan_id(scan_id: &str) -> ReportResult<(String, NaiveDate)> {
    let (patient, date) = scan_id
        .rsplit_once('_')
        .filter(|(p, d)| !p.is_empty() && d.len() == 8)
        .ok_or_else(|| ReportError::MalformedScanId(scan_id.to_string()))?;
    let date = NaiveDate::parse_from_str(date, "%Y%m%d")
        .map_err(|_| ReportError::MalformedScanId(scan_id.to_string()))?;
    Ok((patient.to_string(), date))
}

// ─── Aggregation ─────────────────────────────────────────────────────────────

/// Series for a progression chart, sorted by date (stable within a date),
/// with one point per date, ROI and metabolite.
pub fn aggregate(
    request: &ProgressionRequest,
    scan: &ScanConfig,
    best_files: &[PathBuf],
    study: &mut LazyStudyDatabase,
) -> ReportResult<Vec<SeriesPoint>> {
    let mut points = match request {
        ProgressionRequest::Manual(history) => aggregate_manual(history, study)?,
        ProgressionRequest::Auto { dates_to_exclude } => {
            aggregate_auto(scan, best_files, study, dates_to_exclude)?
        }
    };
    points.sort_by_key(|p| p.date);
    Ok(dedup_points(points))
}

/// Keeps the last point collected for each date, ROI and metabolite, so the
/// current scan's CSV overrides a database row for the same day.
fn dedup_points(points: Vec<SeriesPoint>) -> Vec<SeriesPoint> {
    let mut seen = HashSet::new();
    let mut kept: Vec<SeriesPoint> = Vec::with_capacity(points.len());
    for point in points.into_iter().rev() {
        if seen.insert((point.date, point.roi.clone(), point.metabolite)) {
            kept.push(point);
        } else {
            warn!(
                "Dropping duplicate {} {} point from {}",
                point.roi,
                point.metabolite.label(),
                point.date
            );
        }
    }
    kept.reverse();
    kept
}

fn points_from_csv(path: &Path, date: NaiveDate, roi: &str) -> ReportResult<Vec<SeriesPoint>> {
    let record = read_scan_record(path)?;
    Metabolite::ALL
        .iter()
        .map(|&metabolite| {
            Ok(SeriesPoint {
                date,
                roi: roi.to_string(),
                metabolite,
                value: metabolite_value(&record, metabolite)?,
            })
        })
        .collect()
}

fn points_from_study(
    study: &mut LazyStudyDatabase,
    spec_n: i64,
    roi: &str,
) -> ReportResult<Vec<SeriesPoint>> {
    let result = study.get()?.result(spec_n)?;
    let date = extract_date(&result.id)?;
    Metabolite::ALL
        .iter()
        .map(|&metabolite| {
            Ok(SeriesPoint {
                date,
                roi: roi.to_string(),
                metabolite,
                value: result.value(metabolite)?,
            })
        })
        .collect()
}

pub fn aggregate_manual(history: &ScanHistory, study: &mut LazyStudyDatabase) -> ReportResult<Vec<SeriesPoint>> {
    let mut points = Vec::new();
    for (roi, scans) in history {
        for scan in scans {
            match scan {
                ScanRef::Path(location) => {
                    let pattern = if location.ends_with(".CSV") {
                        location.clone()
                    } else {
                        format!("{location}/*.CSV")
                    };
                    let file = compile_inputs(&pattern)?.remove(0);
                    points.extend(points_from_csv(&file, extract_date(location)?, roi)?);
                }
                ScanRef::SpecN(spec_n) => {
                    points.extend(points_from_study(study, *spec_n, roi)?);
                }
            }
        }
    }
    Ok(points)
}

/// Keeps first occurrences, in order.
fn unique(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

fn parent_dir_name(path: &Path) -> String {
    path.parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// AutoProc result directories not named `..<scan_type>` or `..<scan_type>_CL`.
pub fn unconventional_autoproc_rois(best_files: &[PathBuf], scan_type: &str) -> Vec<String> {
    let cl_suffix = format!("{scan_type}_CL");
    unique(
        best_files
            .iter()
            .map(|p| parent_dir_name(p))
            .filter(|dir| !dir.ends_with(&cl_suffix) && !dir.ends_with(scan_type)),
    )
}

/// Database measurement names other than `_<scan_type>.dat` / `_<scan_type>_CL.dat`,
/// reduced to the part after `_<scan_type>_`.
pub fn unconventional_database_rois<'a>(
    names: impl IntoIterator<Item = &'a str>,
    scan_type: &str,
) -> Vec<String> {
    let lesion = format!("_{scan_type}.dat");
    let contralateral = format!("_{scan_type}_CL.dat");
    let separator = format!("_{scan_type}_");
    unique(
        names
            .into_iter()
            .filter(|name| !name.ends_with(&lesion) && !name.ends_with(&contralateral))
            .map(|name| match name.split_once(&separator) {
                Some((_, roi)) => roi.replace(".dat", ""),
                None => name.to_string(),
            }),
    )
}

pub fn aggregate_auto(
    scan: &ScanConfig,
    best_files: &[PathBuf],
    study: &mut LazyStudyDatabase,
    dates_to_exclude: &[NaiveDate],
) -> ReportResult<Vec<SeriesPoint>> {
    let (patient, scan_date) = split_scan_id(&scan.scan_id)?;
    let scan_type = scan.scan_type.as_str();
    let db = study.get()?;
    let patient_scans = db.patient_scans(&patient);

    if patient_scans.is_empty() {
        return Err(ReportError::NoHistory { patient });
    }
    let autoproc_rois = unconventional_autoproc_rois(best_files, scan_type);
    if !autoproc_rois.is_empty() {
        return Err(ReportError::UnconventionalRoi {
            patient,
            origin: RoiSource::AutoProc,
            rois: autoproc_rois,
        });
    }
    let database_rois = unconventional_database_rois(patient_scans.iter().map(|s| s.name.as_str()), scan_type);
    if !database_rois.is_empty() {
        return Err(ReportError::UnconventionalRoi {
            patient,
            origin: RoiSource::Database,
            rois: database_rois,
        });
    }
    info!("{} has {} past scans", patient, patient_scans.len());

    let lesion_name = format!("_{scan_type}.dat");
    let mut points = Vec::new();
    for past in &patient_scans {
        let date = extract_date(&past.folder)?;
        if dates_to_exclude.contains(&date) {
            info!("Excluding scan {} from {}", past.spec_n, date);
            continue;
        }
        let roi = if past.name.ends_with(&lesion_name) { LESION } else { CONTRALATERAL };
        let result = db.result(past.spec_n)?;
        for metabolite in Metabolite::ALL {
            points.push(SeriesPoint {
                date,
                roi: roi.to_string(),
                metabolite,
                value: result.value(metabolite)?,
            });
        }
    }

    let lesion_dir = format!("_{scan_type}");
    let contralateral_dir = format!("_{scan_type}_CL");
    for file in best_files {
        let dir = parent_dir_name(file);
        let roi = if dir.ends_with(&lesion_dir) {
            LESION
        } else if dir.ends_with(&contralateral_dir) {
            CONTRALATERAL
        } else {
            warn!("Skipping {} outside a conventional ROI directory", file.display());
            continue;
        };
        points.extend(points_from_csv(file, scan_date, roi)?);
    }

    Ok(points)
}

// ─── Output ──────────────────────────────────────────────────────────────────

pub fn series_frame(points: &[SeriesPoint]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new(
            "date".into(),
            points.iter().map(|p| p.date.format("%Y%m%d").to_string()).collect::<Vec<_>>(),
        )
        .into(),
        Series::new("roi".into(), points.iter().map(|p| p.roi.clone()).collect::<Vec<_>>()).into(),
        Series::new(
            "metabolite".into(),
            points.iter().map(|p| p.metabolite.label()).collect::<Vec<_>>(),
        )
        .into(),
        Series::new("value".into(), points.iter().map(|p| p.value).collect::<Vec<_>>()).into(),
    ])
}

/// `<output_dir>/<scan_id>/<scan_id>_progression_<mode>.png`
pub fn progression_path(scan: &ScanConfig, mode: ProgressionMode) -> PathBuf {
    scan.scan_output_dir()
        .join(format!("{}_progression_{}.png", scan.scan_id, mode))
}

pub fn generate_progression(
    scan: &ScanConfig,
    sources: &DataSources,
    request: &ProgressionRequest,
) -> ReportResult<PathBuf> {
    let query = sources.autoproc_query(scan);
    let files = generate_init(&query, &scan.scan_id, &scan.scan_type)?;
    let (best_files, _) = partition_pipelines(&files);

    let mode = request.mode();
    println!("{} Mode", if mode == ProgressionMode::Manual { "Manual" } else { "Automatic" });

    let mut study = LazyStudyDatabase::new(&sources.study_dir);
    let points = aggregate(request, scan, &best_files, &mut study)?;
    println!("{}", series_frame(&points)?);

    let normative = NormativeTable::load(&sources.normative_path, &sources.normative_sheet)?;
    let path = progression_path(scan, mode);
    plot_progression(&points, &normative, &scan.scan_id, &path)?;

    println!(
        "Processing complete. Progression plot saved to {}",
        scan.scan_output_dir().display()
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_handling::study_database::tests::sample_database;
    use crate::data_handling::study_database::StudyDatabase;
    use crate::resolver::tests::write_scan_tree;
    use polars::df;

    const TAG: &str = "svs_se_97";
    const CSV: &str = "Pipeline, 2HG, 2HG %SD, 2HG/Cr+PCr, Gln, Glu\nX,3.0,10,0.3,1.0,8.0\n";

    fn scan(scan_id: &str) -> ScanConfig {
        ScanConfig {
            scan_id: scan_id.into(),
            scan_type: TAG.into(),
            output_dir: PathBuf::from("/tmp/out"),
            verbose: 0,
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y%m%d").unwrap()
    }

    fn current_scan_files(root: &Path) -> Vec<PathBuf> {
        write_scan_tree(
            root,
            "PT01_20200101",
            &[
                ("x_svs_se_97/PT01_20200101_svs_se_97-A.CSV", CSV),
                ("x_svs_se_97_CL/PT01_20200101_svs_se_97_CL-A.CSV", CSV),
            ],
        )
    }

    #[test]
    fn scan_id_splits_on_last_underscore() {
        assert_eq!(split_scan_id("PT01_20200101").unwrap(), ("PT01".to_string(), date("20200101")));
        assert_eq!(split_scan_id("PT_01_20200101").unwrap().0, "PT_01");
        assert!(matches!(split_scan_id("PT01"), Err(ReportError::MalformedScanId(_))));
        assert!(matches!(split_scan_id("PT01_2020"), Err(ReportError::MalformedScanId(_))));
    }

    #[test]
    fn auto_mode_without_history_fails() {
        let mut study = LazyStudyDatabase::preloaded(sample_database());
        let err = aggregate_auto(&scan("PT99_20200101"), &[], &mut study, &[]).unwrap_err();
        match err {
            ReportError::NoHistory { patient } => assert_eq!(patient, "PT99"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn auto_mode_rejects_unconventional_autoproc_dirs() {
        let files = vec![
            PathBuf::from("/o/PT01_20200101/x_svs_se_97/PT01_20200101_svs_se_97-A.CSV"),
            PathBuf::from("/o/PT01_20200101/x_svs_se_97_post/PT01_20200101_svs_se_97_post-A.CSV"),
        ];
        let mut study = LazyStudyDatabase::preloaded(sample_database());
        match aggregate_auto(&scan("PT01_20200101"), &files, &mut study, &[]).unwrap_err() {
            ReportError::UnconventionalRoi { origin, rois, .. } => {
                assert_eq!(origin, RoiSource::AutoProc);
                assert_eq!(rois, vec!["x_svs_se_97_post".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn database_roi_names_are_reduced() {
        let names = ["a_svs_se_97.dat", "b_svs_se_97_post.dat", "c_svs_se_97_CL.dat", "d_svs_se_97_post.dat", "odd.dat"];
        assert_eq!(
            unconventional_database_rois(names, TAG),
            vec!["post".to_string(), "odd.dat".to_string()]
        );
    }

    #[test]
    fn auto_mode_rejects_unconventional_database_names() {
        let index = df![
            "folder" => &["PT01_20190110"],
            "name" => &["meas_svs_se_97_left.dat"]
        ]
        .unwrap();
        let results = df!["SpecN" => &["0"], "ID" => &["PT01_20190110"]].unwrap();
        let db = StudyDatabase::from_frames(&index, "in", &results, "out").unwrap();
        let mut study = LazyStudyDatabase::preloaded(db);
        match aggregate_auto(&scan("PT01_20200101"), &[], &mut study, &[]).unwrap_err() {
            ReportError::UnconventionalRoi { origin, rois, .. } => {
                assert_eq!(origin, RoiSource::Database);
                assert_eq!(rois, vec!["left".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn auto_mode_merges_history_and_current_scan() {
        let dir = tempfile::tempdir().unwrap();
        let files = current_scan_files(dir.path());
        let request = ProgressionRequest::Auto {
            dates_to_exclude: vec![date("20190110")],
        };
        let mut study = LazyStudyDatabase::preloaded(sample_database());
        let points = aggregate(&request, &scan("PT01_20200101"), &files, &mut study).unwrap();

        // 20190605 lesion + CL from the database, current lesion + CL from CSVs
        assert_eq!(points.len(), 4 * Metabolite::ALL.len());
        assert!(points.windows(2).all(|w| w[0].date <= w[1].date));
        assert!(points.iter().all(|p| p.date != date("20190110")));

        let current_ratio = points
            .iter()
            .find(|p| p.date == date("20200101") && p.roi == "Contralateral" && p.metabolite == Metabolite::TwoHgGlnGlu)
            .unwrap();
        assert_eq!(current_ratio.value, 0.5);

        let past_cl = points
            .iter()
            .find(|p| p.date == date("20190605") && p.roi == "Contralateral" && p.metabolite == Metabolite::TwoHg)
            .unwrap();
        assert_eq!(past_cl.value, 0.4);
    }

    #[test]
    fn current_scan_overrides_database_row_on_same_day() {
        let dir = tempfile::tempdir().unwrap();
        let files = current_scan_files(dir.path());
        let index = df![
            "folder" => &["PT01_20190605", "PT01_20200101"],
            "name" => &["meas_svs_se_97.dat", "meas_svs_se_97.dat"]
        ]
        .unwrap();
        let results = df![
            "SpecN" => &["0", "1"],
            "ID" => &["PT01_20190605", "PT01_20200101"],
            " 2HG" => &["2.0", "2.9"],
            " 2HG/Cr+PCr" => &["0.2", "0.29"],
            "(2HG+Gln)/Glu" => &["0.6", "0.7"]
        ]
        .unwrap();
        let db = StudyDatabase::from_frames(&index, "in", &results, "out").unwrap();
        let mut study = LazyStudyDatabase::preloaded(db);
        let request = ProgressionRequest::Auto { dates_to_exclude: vec![] };
        let points = aggregate(&request, &scan("PT01_20200101"), &files, &mut study).unwrap();

        let current: Vec<&SeriesPoint> = points
            .iter()
            .filter(|p| p.date == date("20200101") && p.roi == "Lesion" && p.metabolite == Metabolite::TwoHg)
            .collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].value, 3.0);
        // past lesion + current lesion + current CL
        assert_eq!(points.len(), 3 * Metabolite::ALL.len());
    }

    #[test]
    fn manual_mode_keeps_last_listed_scan_for_a_date() {
        let history = ScanHistory::from([(
            "Lesion".to_string(),
            vec![ScanRef::SpecN(2), ScanRef::SpecN(2), ScanRef::SpecN(0)],
        )]);
        let mut study = LazyStudyDatabase::preloaded(sample_database());
        let request = ProgressionRequest::Manual(history);
        let points = aggregate(&request, &scan("PT01_20200101"), &[], &mut study).unwrap();

        assert_eq!(points.len(), 2 * Metabolite::ALL.len());
        assert_eq!(points[0].date, date("20190110"));
    }

    #[test]
    fn manual_mode_reads_paths_and_keys_sorted_by_date() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_scan_tree(
            dir.path(),
            "PT01_20210101",
            &[("svs/PT01_20210101_svs_se_97-A.CSV", CSV)],
        );
        let scan_dir = files[0].parent().unwrap().display().to_string();
        let history = ScanHistory::from([(
            "Lesion".to_string(),
            vec![ScanRef::Path(scan_dir), ScanRef::SpecN(0)],
        )]);

        let mut study = LazyStudyDatabase::preloaded(sample_database());
        let request = ProgressionRequest::Manual(history);
        let points = aggregate(&request, &scan("PT01_20210101"), &[], &mut study).unwrap();

        assert_eq!(points.len(), 2 * Metabolite::ALL.len());
        assert_eq!(points[0].date, date("20190110"));
        assert_eq!(points.last().unwrap().date, date("20210101"));
        assert!(points.iter().all(|p| p.roi == "Lesion"));
    }

    #[test]
    fn progression_path_names_mode() {
        let path = progression_path(&scan("PT01_20200101"), ProgressionMode::Auto);
        assert_eq!(
            path,
            PathBuf::from("/tmp/out/PT01_20200101/PT01_20200101_progression_auto.png")
        );
    }

    #[test]
    fn series_frame_has_one_row_per_point() {
        let points = vec![SeriesPoint {
            date: date("20200101"),
            roi: "Lesion".into(),
            metabolite: Metabolite::TwoHgCr,
            value: 0.2,
        }];
        let df = series_frame(&points).unwrap();
        assert_eq!(df.shape(), (1, 4));
    }
}
