/// Boundaries of the plateaus of a piecewise-constant voltage.
///
/// A sample is flagged when its absolute first difference reaches
/// `threshold_fraction` of the largest absolute difference. Flagged samples
/// closer than `max_change_window` to the previous flagged sample belong to
/// the same transition and are dropped. Index 0 and the final index are
/// always present.
pub fn voltage_change_points(signal: &[f64], max_change_window: usize, threshold_fraction: f64) -> Vec<usize> {
    match signal.len() {
        0 => return Vec::new(),
        1 => return vec![0],
        _ => {}
    }

    let diffs: Vec<f64> = signal.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let max_diff = diffs.iter().copied().fold(0.0_f64, f64::max);
    let threshold = max_diff * threshold_fraction;

    let mut boundaries = vec![0];
    let mut previous_flagged = 0;
    for (k, diff) in diffs.iter().enumerate() {
        if *diff < threshold || max_diff == 0.0 {
            continue;
        }
        let index = k + 1;
        if index - previous_flagged > max_change_window {
            boundaries.push(index);
        }
        previous_flagged = index;
    }

    let last = signal.len() - 1;
    if boundaries.last() != Some(&last) {
        boundaries.push(last);
    }
    boundaries
}

/// Piecewise-constant reconstruction: each segment `[b_k, b_{k+1})` is
/// replaced by its mean. The final boundary sample takes the value of the
/// last segment.
pub fn clean_voltage(signal: &[f64], boundaries: &[usize]) -> Vec<f64> {
    let mut clean = vec![0.0; signal.len()];
    if signal.is_empty() {
        return clean;
    }
    let last = signal.len() - 1;

    for pair in boundaries.windows(2) {
        let start = pair[0].min(last);
        let end = pair[1].min(last);
        if end <= start {
            continue;
        }
        let segment = &signal[start..end];
        let mean = segment.iter().sum::<f64>() / segment.len() as f64;
        clean[start..=end].iter_mut().for_each(|v| *v = mean);
    }
    clean
}
