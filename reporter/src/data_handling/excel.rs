use std::path::Path;

use calamine::{open_workbook_auto, Reader};
use polars::prelude::*;
use tracing::debug;

use crate::errors::{ReportError, ReportResult};

fn cell_to_string(cell: &calamine::DataType) -> String {
    use calamine::DataType as Ct;
    match cell {
        Ct::String(s) => s.clone(),
        Ct::Empty => String::new(),
        Ct::Bool(b) => b.to_string(),
        Ct::Error(e) => format!("ERR({e:?})"),
        Ct::Float(n) | Ct::Duration(n) => n.to_string(),
        Ct::Int(i) => i.to_string(),
        Ct::DateTime(f) => f.to_string(),
        Ct::DateTimeIso(s) | Ct::DurationIso(s) => s.clone(),
    }
}

/// Which worksheet of a workbook to read.
#[derive(Debug, Clone, Copy)]
pub enum Sheet<'a> {
    First,
    Named(&'a str),
}

/// Loads one worksheet as an all-String frame; the first row is the header.
/// Empty cells become nulls.
pub fn read_excel(path: &Path, sheet: Sheet<'_>) -> ReportResult<DataFrame> {
    let workbook_err = |reason: String| ReportError::Workbook {
        path: path.to_path_buf(),
        reason,
    };

    let mut wb = open_workbook_auto(path).map_err(|e| workbook_err(e.to_string()))?;
    let range = match sheet {
        Sheet::First => wb.worksheet_range_at(0),
        Sheet::Named(name) => wb.worksheet_range(name),
    }
    .ok_or_else(|| workbook_err(format!("worksheet {sheet:?} missing")))?
    .map_err(|e| workbook_err(e.to_string()))?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| workbook_err("empty sheet".into()))?
        .iter()
        .enumerate()
        .map(|(i, cell)| match cell_to_string(cell) {
            h if h.is_empty() => format!("column_{i}"),
            h => h,
        })
        .collect();
    debug!("{} header = {:?}", path.display(), headers);

    let mut cols: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(range.height()); headers.len()];
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(headers.len()) {
            cols[i].push(match cell {
                calamine::DataType::Empty => None,
                _ => Some(cell_to_string(cell)),
            });
        }
    }

    let series: Vec<Series> = headers
        .into_iter()
        .zip(cols)
        .map(|(h, c)| Series::new(PlSmallStr::from(h), c))
        .collect();

    Ok(DataFrame::new(series.into_iter().map(Into::into).collect())?)
}
