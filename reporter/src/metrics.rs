use crate::errors::ReportResult;
use crate::helper_functions::round_to;
use crate::models::{Metabolite, ScanRecord};

/// Returned by [`compute_ratio`] when Glu is zero.
pub const UNDEFINED_RATIO: f64 = -1.0;

/// `(2HG + Gln) / Glu`, optionally rounded to `sigfig` decimals.
///
/// A zero Glu yields [`UNDEFINED_RATIO`] rather than an error; a record
/// lacking any of the three fields is an error.
pub fn compute_ratio(record: &ScanRecord, sigfig: Option<u32>) -> ReportResult<f64> {
    let glu = record.get("Glu")?;
    if glu == 0.0 {
        return Ok(UNDEFINED_RATIO);
    }

    let value = (record.get("2HG")? + record.get("Gln")?) / glu;
    Ok(match sigfig {
        Some(digits) => round_to(value, digits),
        None => value,
    })
}

/// Value of `metabolite` for a scan CSV row; the ratio is always derived.
pub fn metabolite_value(record: &ScanRecord, metabolite: Metabolite) -> ReportResult<f64> {
    match metabolite {
        Metabolite::TwoHg => record.get("2HG"),
        Metabolite::TwoHgCr => record.get("2HG/Cr+PCr"),
        Metabolite::TwoHgGlnGlu => compute_ratio(record, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ReportError;

    fn record(hg: f64, gln: f64, glu: f64) -> ScanRecord {
        ScanRecord::from_pairs("test.CSV", &[(" 2HG", hg), (" Gln", gln), (" Glu", glu)])
    }

    #[test]
    fn zero_glu_is_sentinel() {
        for &(hg, gln) in &[(0.0, 0.0), (1.2, 3.4), (-5.0, 1e9)] {
            assert_eq!(compute_ratio(&record(hg, gln, 0.0), None).unwrap(), -1.0);
            assert_eq!(compute_ratio(&record(hg, gln, 0.0), Some(3)).unwrap(), -1.0);
        }
    }

    #[test]
    fn ratio_matches_formula() {
        let r = compute_ratio(&record(1.1, 0.4, 3.0), None).unwrap();
        assert!((r - 0.5).abs() < 1e-12);
    }

    #[test]
    fn rounded_example() {
        let r = compute_ratio(&record(1.2345, 0.5, 2.0), Some(3)).unwrap();
        assert_eq!(r, 0.867);
    }

    #[test]
    fn missing_field_is_an_error() {
        let rec = ScanRecord::from_pairs("partial.CSV", &[(" 2HG", 1.0), (" Glu", 2.0)]);
        assert!(matches!(
            compute_ratio(&rec, None),
            Err(ReportError::MissingColumn { ref column, .. }) if column == "Gln"
        ));
    }

    #[test]
    fn metabolite_lookup_uses_derived_ratio() {
        let rec = ScanRecord::from_pairs(
            "a.CSV",
            &[(" 2HG", 2.0), (" 2HG/Cr+PCr", 0.25), (" Gln", 2.0), (" Glu", 4.0)],
        );
        assert_eq!(metabolite_value(&rec, Metabolite::TwoHg).unwrap(), 2.0);
        assert_eq!(metabolite_value(&rec, Metabolite::TwoHgCr).unwrap(), 0.25);
        assert_eq!(metabolite_value(&rec, Metabolite::TwoHgGlnGlu).unwrap(), 1.0);
    }
}
