use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use plotters::prelude::*;
use plotters::series::DashedLineSeries;
use regex::Regex;
use tracing::{info, warn};

use crate::analysis::normal_range::BoxStats;
use crate::config::{DataSources, ScanConfig};
use crate::data_handling::normative::{values_for, NormativeTable};
use crate::data_handling::scan_record::read_scan_record;
use crate::errors::{plot_err, ReportError, ReportResult};
use crate::helper_functions::{ensure_parent_dir, print_delimiter, round_to};
use crate::metrics::compute_ratio;
use crate::models::{Metabolite, NormativeRange, ScanRecord, TissueType};
use crate::resolver::{generate_init, is_all_pipelines, resolve_file};

const FIGURE_SIZE: (u32, u32) = (1350, 820);
const BOX_HALF_WIDTH: f64 = 0.3;
const X_RANGE: std::ops::Range<f64> = -0.5..1.9;

/// The patient's reported values, rounded the way they are annotated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatientValues {
    pub two_hg: f64,
    pub crlb: i64,
    pub two_hg_cr: f64,
    pub two_hg_gln_glu: f64,
}

impl PatientValues {
    pub fn from_record(record: &ScanRecord) -> ReportResult<Self> {
        Ok(Self {
            two_hg: round_to(record.get("2HG")?, 3),
            crlb: record.get("2HG %SD")?.trunc() as i64,
            two_hg_cr: round_to(record.get("2HG/Cr+PCr")?, 3),
            two_hg_gln_glu: round_to(compute_ratio(record, None)?, 3),
        })
    }

    pub fn value(&self, metabolite: Metabolite) -> f64 {
        match metabolite {
            Metabolite::TwoHg => self.two_hg,
            Metabolite::TwoHgCr => self.two_hg_cr,
            Metabolite::TwoHgGlnGlu => self.two_hg_gln_glu,
        }
    }
}

// ─── Naming ──────────────────────────────────────────────────────────────────

fn patient_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-zA-Z0-9_]*_[0-9]{8}").expect("static regex"))
}

/// `<patient>_<YYYYMMDD>` as it appears in the result path.
pub fn patient_name(path: &Path) -> ReportResult<String> {
    let text = path.to_string_lossy();
    patient_regex()
        .find(&text)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ReportError::MalformedFilename {
            path: path.to_path_buf(),
            reason: "no <patient>_<YYYYMMDD> in path".into(),
        })
}

/// Title-cases every word, where a word starts after any non-letter.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_alpha = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

/// `left_CL` → `Left Contralateral`
pub fn display_roi(roi: &str) -> String {
    title_case(&roi.replace('_', " ").replace("CL", "Contralateral"))
}

pub fn plot_title(patient: &str, roi: &str, pipeline: &str) -> String {
    format!("{}; ROI = {}; Pipeline = {}", patient, display_roi(roi), pipeline)
}

/// Mirrors the file's location below `<scan_id>/` into `<output_dir>/<scan_id>/`,
/// with `input` directories renamed `output` and a `.png` extension.
pub fn plot_output_path(output_dir: &Path, scan_id: &str, file: &Path) -> ReportResult<PathBuf> {
    let text = file.to_string_lossy();
    let marker = format!("{scan_id}/");
    let (_, relative) = text
        .split_once(&marker)
        .ok_or_else(|| ReportError::MalformedFilename {
            path: file.to_path_buf(),
            reason: format!("not below a '{scan_id}' directory"),
        })?;
    let relative = relative.replace("input", "output").replace(".CSV", ".png");
    Ok(output_dir.join(scan_id).join(relative))
}

// ─── Rendering ───────────────────────────────────────────────────────────────

fn tissue_colour(tissue: TissueType) -> RGBColor {
    match tissue {
        TissueType::Normal => RGBColor(76, 114, 176),
        TissueType::Tumor => RGBColor(221, 132, 82),
    }
}

fn facet_title(metabolite: Metabolite, patient: &PatientValues) -> String {
    match metabolite {
        Metabolite::TwoHg => format!("2HG (CRLB = {}%)", patient.crlb),
        other => other.label().to_string(),
    }
}

fn facet_y_desc(metabolite: Metabolite) -> &'static str {
    match metabolite {
        Metabolite::TwoHg => "Concentration (mmol/Kg water)",
        _ => "Ratio",
    }
}

fn tissue_label(x: f64) -> String {
    if (x - x.round()).abs() > 1e-6 {
        return String::new();
    }
    TissueType::ALL
        .get(x.round() as usize)
        .filter(|_| x >= -1e-6)
        .map(|t| t.to_string())
        .unwrap_or_default()
}

/// Y extent covering both boxes and the patient's value, padded by 10%.
fn y_range(boxes: &[(TissueType, BoxStats)], patient_value: f64) -> (f64, f64) {
    let (lo, hi) = boxes
        .iter()
        .map(|(_, stats)| stats.extent())
        .fold((patient_value, patient_value), |(lo, hi), (a, b)| (lo.min(a), hi.max(b)));
    let pad = if (hi - lo).abs() < 1e-9 { 1.0 } else { (hi - lo) * 0.1 };
    (lo - pad, hi + pad)
}

/// Draws one Normal-vs-Tumor boxplot facet per metabolite with the patient's
/// value overlaid, and writes the figure to `path`.
pub fn render(
    patient: &PatientValues,
    normative: &[NormativeRange],
    title: &str,
    path: &Path,
) -> ReportResult<()> {
    ensure_parent_dir(path)?;
    let root = BitMapBackend::new(path, FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let root = root.titled(title, ("sans-serif", 24)).map_err(plot_err)?;
    let facets = root.split_evenly((1, Metabolite::ALL.len()));

    for (area, metabolite) in facets.iter().zip(Metabolite::ALL) {
        let boxes: Vec<(TissueType, BoxStats)> = TissueType::ALL
            .iter()
            .filter_map(|&tissue| {
                BoxStats::from_values(&values_for(normative, tissue, metabolite)).map(|s| (tissue, s))
            })
            .collect();
        let value = patient.value(metabolite);
        let (y_lo, y_hi) = y_range(&boxes, value);

        let mut chart = ChartBuilder::on(area)
            .caption(facet_title(metabolite, patient), ("sans-serif", 20))
            .margin(15)
            .x_label_area_size(40)
            .y_label_area_size(70)
            .build_cartesian_2d(X_RANGE, y_lo..y_hi)
            .map_err(plot_err)?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(9)
            .x_label_formatter(&|x: &f64| tissue_label(*x))
            .x_desc("Tissue Type")
            .y_desc(facet_y_desc(metabolite))
            .axis_desc_style(("sans-serif", 16))
            .label_style(("sans-serif", 14))
            .draw()
            .map_err(plot_err)?;

        for (tissue, stats) in &boxes {
            let x = *tissue as usize as f64;
            let colour = tissue_colour(*tissue);
            let (left, right) = (x - BOX_HALF_WIDTH, x + BOX_HALF_WIDTH);

            chart
                .draw_series(std::iter::once(Rectangle::new(
                    [(left, stats.q1), (right, stats.q3)],
                    colour.mix(0.8).filled(),
                )))
                .map_err(plot_err)?;
            chart
                .draw_series(std::iter::once(Rectangle::new(
                    [(left, stats.q1), (right, stats.q3)],
                    BLACK.stroke_width(1),
                )))
                .map_err(plot_err)?;

            let cap = BOX_HALF_WIDTH / 2.0;
            let segments = vec![
                vec![(left, stats.median), (right, stats.median)],
                vec![(x, stats.q3), (x, stats.upper_whisker)],
                vec![(x, stats.q1), (x, stats.lower_whisker)],
                vec![(x - cap, stats.upper_whisker), (x + cap, stats.upper_whisker)],
                vec![(x - cap, stats.lower_whisker), (x + cap, stats.lower_whisker)],
            ];
            chart
                .draw_series(
                    segments
                        .into_iter()
                        .map(|points| PathElement::new(points, BLACK.stroke_width(2))),
                )
                .map_err(plot_err)?;
            chart
                .draw_series(
                    stats
                        .outliers
                        .iter()
                        .map(|&y| Circle::new((x, y), 4, BLACK.stroke_width(1))),
                )
                .map_err(plot_err)?;
        }

        // Patient reference
        chart
            .draw_series(DashedLineSeries::new(
                vec![(X_RANGE.start, value), (X_RANGE.end, value)],
                8,
                5,
                RED.stroke_width(2),
            ))
            .map_err(plot_err)?;
        chart
            .draw_series(
                [0.0, 1.0]
                    .into_iter()
                    .map(|x| Circle::new((x, value), 6, RED.filled())),
            )
            .map_err(plot_err)?;
        chart
            .draw_series(std::iter::once(Text::new(
                value.to_string(),
                (1.55, value),
                ("sans-serif", 16).into_font().color(&RED),
            )))
            .map_err(plot_err)?;
    }

    root.present().map_err(plot_err)?;
    Ok(())
}

// ─── Batch ───────────────────────────────────────────────────────────────────

/// Outcome of a plot batch.
#[derive(Debug, Default)]
pub struct PlotSummary {
    pub saved: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Plots one result file against the normative ranges.
pub fn generate_plot(file: &Path, scan: &ScanConfig, normative: &[NormativeRange]) -> ReportResult<PathBuf> {
    let record = read_scan_record(file)?;
    let patient = PatientValues::from_record(&record)?;
    let resolved = resolve_file(file, &scan.scan_type)?;
    let title = plot_title(&patient_name(file)?, &resolved.roi, &resolved.pipeline);
    let output = plot_output_path(&scan.output_dir, &scan.scan_id, file)?;

    render(&patient, normative, &title, &output)?;
    info!("Saved {}", output.display());

    let all_pipelines = is_all_pipelines(file);
    if scan.verbose > 0 && (scan.verbose > 1 || !all_pipelines) {
        if !all_pipelines {
            println!("Best Pipeline");
        }
        println!("{title}");
        println!("{}", output.display());
        print_delimiter('-', 50);
    }
    Ok(output)
}

/// Runs `plot_one` over `files`. Unreadable or malformed files are reported
/// and skipped; anything else stops the batch.
pub fn plot_batch<F>(files: &[PathBuf], mut plot_one: F) -> ReportResult<PlotSummary>
where
    F: FnMut(&Path) -> ReportResult<PathBuf>,
{
    let mut summary = PlotSummary::default();
    for file in files {
        match plot_one(file) {
            Ok(path) => summary.saved.push(path),
            Err(e) if e.is_per_file() => {
                warn!("{}: {}", file.display(), e);
                println!("File: {}\n Processing failed\n", file.display());
                print_delimiter('-', 50);
                summary.failed.push(file.clone());
            }
            Err(e) => return Err(e),
        }
    }
    Ok(summary)
}

/// Plots every file of the scan against the normative ranges.
pub fn generate_plots(scan: &ScanConfig, sources: &DataSources) -> ReportResult<PlotSummary> {
    let query = sources.autoproc_query(scan);
    let files = generate_init(&query, &scan.scan_id, &scan.scan_type)?;
    let normative = NormativeTable::load(&sources.normative_path, &sources.normative_sheet)?.long_form();

    let summary = plot_batch(&files, |file| generate_plot(file, scan, &normative))?;

    println!(
        "Processing complete. Plots saved to {}",
        scan.scan_output_dir().display()
    );
    if !summary.failed.is_empty() {
        println!("{} of {} files failed", summary.failed.len(), files.len());
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roi_display_names() {
        assert_eq!(display_roi("CL"), "Contralateral");
        assert_eq!(display_roi("Lesion"), "Lesion");
        assert_eq!(display_roi("left_frontal"), "Left Frontal");
        assert_eq!(display_roi("post_CL"), "Post Contralateral");
    }

    #[test]
    fn title_names_patient_roi_and_pipeline() {
        let file = Path::new("/auto/PT01_20200101/x_svs_se_97_CL/PT01_20200101_svs_se_97_CL-LCModel.CSV");
        let patient = patient_name(file).unwrap();
        assert_eq!(patient, "PT01_20200101");
        assert_eq!(
            plot_title(&patient, "CL", "LCModel"),
            "PT01_20200101; ROI = Contralateral; Pipeline = LCModel"
        );
        assert!(patient_name(Path::new("/auto/scan/file.CSV")).is_err());
    }

    #[test]
    fn output_path_mirrors_scan_layout() {
        let file = Path::new("/auto/PT01_20200101/input_svs/AllPipelines/PT01_20200101_svs_se_97-A.CSV");
        let out = plot_output_path(Path::new("./output"), "PT01_20200101", file).unwrap();
        assert_eq!(
            out,
            PathBuf::from("./output/PT01_20200101/output_svs/AllPipelines/PT01_20200101_svs_se_97-A.png")
        );
        assert!(plot_output_path(Path::new("./output"), "PT02_20200101", file).is_err());
    }

    #[test]
    fn patient_values_are_rounded_and_truncated() {
        let record = ScanRecord::from_pairs(
            "a.CSV",
            &[(" 2HG", 1.2345), (" 2HG %SD", 17.9), (" 2HG/Cr+PCr", 0.12345), (" Gln", 0.5), (" Glu", 2.0)],
        );
        let values = PatientValues::from_record(&record).unwrap();
        assert_eq!(values.crlb, 17);
        assert_eq!(values.two_hg, 1.234);
        assert_eq!(values.value(Metabolite::TwoHgGlnGlu), 0.867);
    }

    #[test]
    fn tissue_ticks_only_at_box_centres() {
        assert_eq!(tissue_label(0.0), "Normal");
        assert_eq!(tissue_label(1.0), "Tumor");
        assert_eq!(tissue_label(0.5), "");
        assert_eq!(tissue_label(-0.5), "");
    }

    #[test]
    fn y_range_includes_patient_value() {
        let boxes = vec![(TissueType::Normal, BoxStats::from_values(&[1.0, 2.0, 3.0]).unwrap())];
        let (lo, hi) = y_range(&boxes, 10.0);
        assert!(lo < 1.0 && hi > 10.0);
    }

    #[test]
    fn malformed_file_is_isolated_in_batch() {
        let dir = tempfile::tempdir().unwrap();
        let files = crate::resolver::tests::write_scan_tree(
            dir.path(),
            "PT01_20200101",
            &[("PT01_20200101_svs_se_97-A.CSV", "Pipeline, 2HG\nX,1.0\n")],
        );
        let scan = ScanConfig {
            scan_id: "PT01_20200101".into(),
            scan_type: "svs_se_97".into(),
            output_dir: dir.path().join("out"),
            verbose: 0,
        };
        let err = generate_plot(&files[0], &scan, &[]).unwrap_err();
        assert!(err.is_per_file(), "{err:?}");
    }

    #[test]
    fn batch_skips_bad_files_and_keeps_going() {
        let files = vec![PathBuf::from("bad.CSV"), PathBuf::from("good.CSV")];
        let mut seen = Vec::new();
        let summary = plot_batch(&files, |file| {
            seen.push(file.to_path_buf());
            if file == Path::new("bad.CSV") {
                Err(ReportError::EmptyFile { path: file.to_path_buf() })
            } else {
                Ok(file.with_extension("png"))
            }
        })
        .unwrap();

        assert_eq!(seen, files);
        assert_eq!(summary.failed, vec![PathBuf::from("bad.CSV")]);
        assert_eq!(summary.saved, vec![PathBuf::from("good.png")]);
    }

    #[test]
    fn batch_aborts_on_other_errors() {
        let files = vec![PathBuf::from("a.CSV"), PathBuf::from("b.CSV")];
        let mut calls = 0;
        let result = plot_batch(&files, |_| {
            calls += 1;
            Err(ReportError::Plot("no font".into()))
        });
        assert!(matches!(result, Err(ReportError::Plot(_))));
        assert_eq!(calls, 1);
    }
}
