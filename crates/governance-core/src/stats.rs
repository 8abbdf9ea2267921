/// Statistics helpers shared by the weighting, trend and calibration stages.
///
/// Every function is total over its input: empty slices, single samples and
/// zero-variance series return neutral values instead of NaN so callers can
/// branch on explicit results.
use statrs::statistics::Statistics;

/// Compute the arithmetic mean of a data slice (0.0 when empty).
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().mean()
}

/// Compute the population standard deviation (0.0 for fewer than two samples).
pub fn population_std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let sd = data.iter().population_std_dev();
    if sd.is_finite() {
        sd
    } else {
        0.0
    }
}

/// Nearest-rank percentile (`p` in 0..=100) of an unsorted slice.
pub fn nearest_rank_percentile(data: &[f64], p: f64) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

/// Linear-interpolated quantile (`q` in 0..=1) of an ascending slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

/// Sort ascending and drop `trim_pct` of the samples from each end.
///
/// At least one sample is always kept when the input is non-empty.
pub fn trim_symmetric(values: &[f64], trim_pct: f64) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let cut = (sorted.len() as f64 * trim_pct.clamp(0.0, 0.5)).floor() as usize;
    if sorted.len() > 2 * cut {
        sorted[cut..sorted.len() - cut].to_vec()
    } else {
        sorted
    }
}

/// Ordinary least squares slope of `values` against their index.
///
/// Returns 0.0 when the index has no variance (fewer than two points).
pub fn ols_slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(values);

    let numerator: f64 = values
        .iter()
        .enumerate()
        .map(|(i, y)| (i as f64 - x_mean) * (y - y_mean))
        .sum();
    let denominator: f64 = (0..values.len()).map(|i| (i as f64 - x_mean).powi(2)).sum();

    if denominator.abs() < 1e-12 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Trailing moving average over full windows only.
pub fn trailing_moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || values.len() < window {
        return Vec::new();
    }
    values.windows(window).map(mean).collect()
}
