//! Small robust-statistics helpers shared by the detection and trimming
//! stages.

/// Median of a slice; `NaN` for empty input. Sorts a scratch copy.
pub(crate) fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut scratch: Vec<f64> = values.to_vec();
    scratch.sort_by(|a, b| a.total_cmp(b));
    let n = scratch.len();
    if n % 2 == 1 {
        scratch[n / 2]
    } else {
        0.5 * (scratch[n / 2 - 1] + scratch[n / 2])
    }
}

/// Robust sigma via the median absolute deviation, scaled to match a
/// Gaussian standard deviation.
pub(crate) fn mad_sigma(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let med = median(values);
    let dev: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    1.4826 * median(&dev)
}
