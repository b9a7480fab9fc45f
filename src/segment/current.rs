use super::ChangePointSet;

/// Fraction of each window, at both ends, where extrema are ignored
const EDGE_FRACTION: f64 = 0.1;

/// Half-width of the averaging neighbourhood around an extremum
const AVERAGE_HALF_WIDTH: usize = 20;

/// Turning points of a piecewise-linear current.
///
/// Windows of `max_change_window` samples advance by
/// `max_change_window / sensitivity`. A window's minimum or maximum is
/// accepted when it does not sit in the first or last 10% of the window and
/// differs from the previously accepted extremum. The reported index is the
/// mean position of all samples tied at that value and the reported value is
/// the local mean over ±20 samples. Index 0 and the final index bracket the
/// result; neighbours found out of order are swapped. Windows without a
/// finite extremum are skipped.
pub fn current_change_points(signal: &[f64], max_change_window: usize, sensitivity: usize) -> ChangePointSet {
    let n = signal.len();
    if n == 0 {
        return ChangePointSet::default();
    }

    let window = max_change_window.max(1);
    let stride = (window / sensitivity.max(1)).max(1);
    let edge = (window as f64 * EDGE_FRACTION) as usize;

    let mut indices = vec![0];
    let mut values = vec![signal[0]];
    let mut last_peak = signal[0];

    for start in (0..n).step_by(stride) {
        let end = (start + window).min(n);
        let chunk = &signal[start..end];
        let (minimum, maximum) = chunk
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
        if !(minimum.is_finite() && maximum.is_finite()) {
            continue;
        }

        let head = &chunk[..edge.min(chunk.len())];
        let tail = &chunk[chunk.len().saturating_sub(edge)..];
        let in_head = |v: f64| head.contains(&v);
        let in_tail = |v: f64| tail.contains(&v);

        let clear_of_head = !in_head(minimum) && !in_head(maximum);
        let clear_of_tail = !in_tail(minimum) && !in_tail(maximum);
        if !(clear_of_head || clear_of_tail) {
            continue;
        }
        if maximum == last_peak || minimum == last_peak {
            continue;
        }

        for extremum in [minimum, maximum] {
            if in_head(extremum) || in_tail(extremum) {
                continue;
            }
            let Some((index, value)) = locate_extremum(signal, start, end, extremum) else {
                continue;
            };
            indices.push(index);
            values.push(value);
            last_peak = extremum;
        }
    }

    indices.push(n - 1);
    values.push(signal[n - 1]);

    for i in 0..indices.len() - 1 {
        if indices[i] > indices[i + 1] {
            indices.swap(i, i + 1);
            values.swap(i, i + 1);
        }
    }

    ChangePointSet::new(indices, values)
}

fn locate_extremum(signal: &[f64], start: usize, end: usize, extremum: f64) -> Option<(usize, f64)> {
    let (sum, count) = signal[start..end]
        .iter()
        .enumerate()
        .filter(|(_, v)| **v == extremum)
        .fold((0usize, 0usize), |(sum, count), (j, _)| (sum + start + j, count + 1));
    if count == 0 {
        return None;
    }
    let index = sum / count;

    let lo = index.saturating_sub(AVERAGE_HALF_WIDTH).max(start);
    let hi = (index + AVERAGE_HALF_WIDTH).min(end - 1);
    let neighbourhood: Vec<f64> = signal[lo..=hi].iter().copied().filter(|v| v.is_finite()).collect();
    let value = neighbourhood.iter().sum::<f64>() / neighbourhood.len().max(1) as f64;
    Some((index, value))
}

/// Piecewise-linear reconstruction between consecutive change points.
///
/// Zero-length segments are skipped and equal end values give a constant
/// segment. Samples outside the change points stay at zero.
pub fn clean_current(len: usize, change_points: &ChangePointSet) -> Vec<f64> {
    let mut clean = vec![0.0; len];
    if len == 0 {
        return clean;
    }
    let last = len - 1;
    let indices = change_points.indices();
    let values = change_points.values();

    for k in 0..indices.len().saturating_sub(1) {
        let start = indices[k].min(last);
        let end = indices[k + 1].min(last);
        if end <= start {
            continue;
        }
        let (v0, v1) = (values[k], values[k + 1]);
        let span = (end - start) as f64;
        for (offset, sample) in clean[start..=end].iter_mut().enumerate() {
            *sample = if v1 == v0 {
                v0
            } else {
                v0 + (v1 - v0) * offset as f64 / span
            };
        }
    }
    clean
}
