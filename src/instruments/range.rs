use super::InstrumentError;

/// Input ranges of the PicoScope 2408B, in V
pub const PICO_2408B_RANGES: [f64; 10] = [0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0];

const PICO_2408B_CLOCK: f64 = 125e6;

/// Pick the range for a requested full-scale value.
///
/// An exact match is used as is. Otherwise strict mode rejects the request
/// and non-strict mode takes the next larger range, or the largest one.
pub fn select_input_range(requested: f64, ranges: &[f64], strict: bool) -> Result<f64, InstrumentError> {
    if ranges.iter().any(|r| *r == requested) {
        return Ok(requested);
    }
    if strict {
        return Err(InstrumentError::Range {
            requested,
            available: ranges
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        });
    }
    ranges
        .iter()
        .copied()
        .find(|r| *r > requested)
        .or_else(|| ranges.last().copied())
        .ok_or_else(|| InstrumentError::InvalidSetting("no input ranges".to_string()))
}

/// Timebase index and realised interval for a requested sampling time.
///
/// 1, 2 and 4 ns map to indices 0..=2; longer intervals follow
/// `(n - 2) / 125 MHz`.
pub fn pico_2408b_timebase(sampling_time: f64) -> (u32, f64) {
    if sampling_time <= 1e-9 {
        (0, 1e-9)
    } else if sampling_time <= 2e-9 {
        (1, 2e-9)
    } else if sampling_time <= 4e-9 {
        (2, 4e-9)
    } else {
        let timebase = (sampling_time * PICO_2408B_CLOCK + 2.0) as u32;
        (timebase, (timebase - 2) as f64 / PICO_2408B_CLOCK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_range() {
        assert_eq!(select_input_range(5.0, &PICO_2408B_RANGES, true).unwrap(), 5.0);
    }

    #[test]
    fn test_next_range_up() {
        assert_eq!(select_input_range(6.0, &PICO_2408B_RANGES, false).unwrap(), 10.0);
        assert_eq!(select_input_range(0.001, &PICO_2408B_RANGES, false).unwrap(), 0.02);
        assert_eq!(select_input_range(50.0, &PICO_2408B_RANGES, false).unwrap(), 20.0);
    }

    #[test]
    fn test_strict_rejects() {
        let err = select_input_range(6.0, &PICO_2408B_RANGES, true).unwrap_err();
        assert!(matches!(err, InstrumentError::Range { .. }));
    }

    #[test]
    fn test_timebase() {
        assert_eq!(pico_2408b_timebase(1e-9).0, 0);
        assert_eq!(pico_2408b_timebase(3e-9), (2, 4e-9));
        let (timebase, actual) = pico_2408b_timebase(50e-9);
        assert_eq!(timebase, 8);
        assert!((actual - 48e-9).abs() < 1e-15);
    }
}
