/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Computes the standard deviation given a pre-computed mean, dividing by
/// `n - dof`. Returns 0.0 when there are no remaining degrees of freedom.
pub fn stddev(values: &[f64], mean: f64, dof: usize) -> f64 {
    if values.len() <= dof {
        return 0.0;
    }
    let ss = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();

    (ss / (values.len() - dof) as f64).sqrt()
}

/// Quantile with linear interpolation between closest ranks (`h = (n - 1) * q`).
///
/// `q` is clamped to `[0, 1]`. Returns `None` for empty input.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let h = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    Some(sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]))
}
