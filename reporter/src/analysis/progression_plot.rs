use std::path::Path;

use chrono::{Datelike, NaiveDate};
use plotters::prelude::*;
use plotters::series::DashedLineSeries;
use plotters_backend::FontTransform::Rotate90;

use crate::analysis::normal_range::NormalRange;
use crate::data_handling::normative::NormativeTable;
use crate::errors::{plot_err, ReportResult};
use crate::helper_functions::ensure_parent_dir;
use crate::models::{Metabolite, SeriesPoint};

const NORMAL_COLOUR: RGBColor = RGBColor(90, 90, 90);

fn colour_for_roi(idx: usize) -> RGBColor {
    const PALETTE: [RGBColor; 6] = [
        RGBColor(76, 114, 176),
        RGBColor(221, 132, 82),
        RGBColor(85, 168, 104),
        RGBColor(196, 78, 82),
        RGBColor(129, 114, 179),
        RGBColor(147, 120, 96),
    ];
    PALETTE[idx % PALETTE.len()]
}

fn day_number(date: NaiveDate) -> f64 {
    date.num_days_from_ce() as f64
}

/// `MM/DD/YYYY` for whole day numbers, empty otherwise.
fn date_label(x: f64) -> String {
    if (x - x.round()).abs() > 1e-6 {
        return String::new();
    }
    NaiveDate::from_num_days_from_ce_opt(x.round() as i32)
        .map(|d| d.format("%m/%d/%Y").to_string())
        .unwrap_or_default()
}

/// ROI names in order of first appearance.
fn roi_order(points: &[SeriesPoint]) -> Vec<&str> {
    let mut rois: Vec<&str> = Vec::new();
    for p in points {
        if !rois.contains(&p.roi.as_str()) {
            rois.push(&p.roi);
        }
    }
    rois
}

fn padded(lo: f64, hi: f64, pct: f64, min_pad: f64) -> (f64, f64) {
    let pad = ((hi - lo) * pct).max(min_pad);
    (lo - pad, hi + pad)
}

/// One panel per metabolite: a line per ROI over the scan dates, and the
/// normal-tissue mean (solid) and min/max (dashed) from the normative table.
pub fn plot_progression(
    points: &[SeriesPoint],
    normative: &NormativeTable,
    title: &str,
    path: &Path,
) -> ReportResult<()> {
    ensure_parent_dir(path)?;
    let rois = roi_order(points);

    let root = BitMapBackend::new(path, (1920, 620)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let root = root.titled(title, ("sans-serif", 24)).map_err(plot_err)?;
    let panels = root.split_evenly((1, Metabolite::ALL.len()));

    let days: Vec<f64> = points.iter().map(|p| day_number(p.date)).collect();
    let day_lo = days.iter().copied().fold(f64::INFINITY, f64::min);
    let day_hi = days.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let (x_lo, x_hi) = if days.is_empty() {
        (0.0, 1.0)
    } else {
        padded(day_lo, day_hi, 0.05, 15.0)
    };

    for (panel_idx, (area, metabolite)) in panels.iter().zip(Metabolite::ALL).enumerate() {
        let normal = NormalRange::from_values(&normative.normal_reference(metabolite));
        let series: Vec<&SeriesPoint> = points.iter().filter(|p| p.metabolite == metabolite).collect();

        let mut y_values: Vec<f64> = series.iter().map(|p| p.value).collect();
        if let Some(range) = normal {
            y_values.extend([range.min, range.max, range.mean]);
        }
        let y_lo = y_values.iter().copied().fold(f64::INFINITY, f64::min);
        let y_hi = y_values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let (y_lo, y_hi) = if y_values.is_empty() {
            (0.0, 1.0)
        } else {
            padded(y_lo, y_hi, 0.1, 0.05)
        };

        let mut chart = ChartBuilder::on(area)
            .caption(metabolite.label(), ("sans-serif", 20))
            .margin(15)
            .x_label_area_size(90)
            .y_label_area_size(60)
            .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
            .map_err(plot_err)?;

        let x_label_style = TextStyle::from(("sans-serif", 13)).transform(Rotate90);
        chart
            .configure_mesh()
            .x_labels(6)
            .x_label_style(x_label_style)
            .x_label_formatter(&|x: &f64| date_label(*x))
            .label_style(("sans-serif", 14))
            .draw()
            .map_err(plot_err)?;

        let first_panel = panel_idx == 0;

        for (roi_idx, roi) in rois.iter().enumerate() {
            let colour = colour_for_roi(roi_idx);
            let line: Vec<(f64, f64)> = series
                .iter()
                .filter(|p| p.roi == *roi)
                .map(|p| (day_number(p.date), p.value))
                .collect();

            let drawn = chart
                .draw_series(LineSeries::new(line.clone(), colour.stroke_width(2)))
                .map_err(plot_err)?;
            if first_panel {
                drawn.label(*roi).legend(move |(x, y)| {
                    PathElement::new(vec![(x, y), (x + 25, y)], colour.stroke_width(2))
                });
            }
            chart
                .draw_series(line.iter().map(|&(x, y)| Circle::new((x, y), 5, colour.filled())))
                .map_err(plot_err)?;
        }

        if let Some(range) = normal {
            let mean = chart
                .draw_series(LineSeries::new(
                    vec![(x_lo, range.mean), (x_hi, range.mean)],
                    NORMAL_COLOUR.stroke_width(2),
                ))
                .map_err(plot_err)?;
            if first_panel {
                mean.label("Normal Tissue Mean").legend(|(x, y)| {
                    PathElement::new(vec![(x, y), (x + 25, y)], NORMAL_COLOUR.stroke_width(2))
                });
            }
            for (idx, bound) in [range.max, range.min].into_iter().enumerate() {
                let dashed = chart
                    .draw_series(DashedLineSeries::new(
                        vec![(x_lo, bound), (x_hi, bound)],
                        8,
                        5,
                        NORMAL_COLOUR.stroke_width(1),
                    ))
                    .map_err(plot_err)?;
                if first_panel && idx == 0 {
                    dashed.label("Normal Tissue Min/Max").legend(|(x, y)| {
                        PathElement::new(vec![(x, y), (x + 25, y)], NORMAL_COLOUR.stroke_width(1))
                    });
                }
            }
        }

        if first_panel {
            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(&BLACK)
                .label_font(("sans-serif", 14))
                .position(SeriesLabelPosition::UpperLeft)
                .draw()
                .map_err(plot_err)?;
        }
    }

    root.present().map_err(plot_err)?;
    Ok(())
}
