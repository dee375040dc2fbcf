/// Percentile with linear interpolation between closest ranks.
/// `sorted` must be ascending and non-empty.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
}

fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Tukey box summary: whiskers reach the most extreme values within 1.5·IQR.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxStats {
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub lower_whisker: f64,
    pub upper_whisker: f64,
    pub outliers: Vec<f64>,
}

impl BoxStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let sorted = sorted_finite(values);
        if sorted.is_empty() {
            return None;
        }
        let q1 = percentile(&sorted, 0.25);
        let q3 = percentile(&sorted, 0.75);
        let iqr = q3 - q1;
        let (lo_fence, hi_fence) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);

        let inside = || sorted.iter().copied().filter(|v| *v >= lo_fence && *v <= hi_fence);
        let lower_whisker = inside().fold(f64::INFINITY, f64::min);
        let upper_whisker = inside().fold(f64::NEG_INFINITY, f64::max);

        Some(Self {
            q1,
            median: percentile(&sorted, 0.5),
            q3,
            lower_whisker,
            upper_whisker,
            outliers: sorted
                .iter()
                .copied()
                .filter(|v| *v < lo_fence || *v > hi_fence)
                .collect(),
        })
    }

    /// Smallest and largest values drawn, outliers included.
    pub fn extent(&self) -> (f64, f64) {
        let lo = self.outliers.iter().copied().fold(self.lower_whisker, f64::min);
        let hi = self.outliers.iter().copied().fold(self.upper_whisker, f64::max);
        (lo, hi)
    }
}

/// Reference band for normal tissue on the progression chart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalRange {
    pub mean: f64,
    /// Smallest value at or above Q1 − 1.5·IQR.
    pub min: f64,
    /// Largest value at or below Q3 + 1.5·IQR.
    pub max: f64,
}

impl NormalRange {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let stats = BoxStats::from_values(values)?;
        let sorted = sorted_finite(values);
        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
        Some(Self {
            mean,
            min: stats.lower_whisker,
            max: stats.upper_whisker,
        })
    }
}
