//! # Reports
//!
//! CSV files for captures and session results, plus console summaries.
//!
//! | File | Columns |
//! |---|---|
//! | trace | `time,input_voltage,output_voltage,current` (s, V, V, A) |
//! | sweep | [`SWEEP_COLUMNS`] |
//! | core loss | [`CORE_LOSS_COLUMNS`] |
//!
//! Trace files can be read back with [`read_trace_file`] for offline
//! analysis.

mod error;
mod summary;
mod tables;

pub use error::ReportError;
pub use summary::{CoreLossSummary, SweepSummary};
pub use tables::{
    read_trace, read_trace_file, write_core_loss, write_core_loss_file, write_sweep, write_sweep_file, write_trace,
    write_trace_file, CoreLossRow, SweepRow, CORE_LOSS_COLUMNS, SWEEP_COLUMNS, TRACE_COLUMNS,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{CoreLossResult, FluxClosure};
    use crate::capture::CaptureTrace;
    use crate::measurement::{MeasurementPoint, MeasurementResult, StopReason};

    fn trace() -> CaptureTrace {
        let n = 64;
        let input: Vec<f64> = (0..n).map(|i| if (i / 8) % 2 == 0 { 5.0 } else { -5.0 }).collect();
        let current: Vec<f64> = (0..n).map(|i| i as f64 * 1e-3).collect();
        CaptureTrace::new(1e-8, input.clone(), input, current).unwrap()
    }

    fn point(frequency: f64, inductance: f64) -> MeasurementPoint {
        MeasurementPoint {
            frequency,
            voltage: 5.0,
            inductance,
            peak_current: 0.12,
            flux_density: 0.05,
            dc_bias_target: None,
            dc_current: None,
            ac_ripple: None,
            attempts: 1,
        }
    }

    #[test]
    fn test_trace_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.csv");
        let original = trace();
        write_trace_file(&path, &original).unwrap();

        let loaded = read_trace_file(&path).unwrap();
        assert_eq!(loaded.len(), original.len());
        assert_eq!(loaded.input_voltage(), original.input_voltage());
        assert_eq!(loaded.current(), original.current());
        assert!((loaded.sampling_interval() - 1e-8).abs() < 1e-15);
    }

    #[test]
    fn test_trace_reader_reorders_columns() {
        let data = "Current, Time, extra, Output_Voltage, Input_Voltage\n\
                    0.0, 0.0, x, 1.0, 2.0\n\
                    0.1, 1e-6, y, 1.0, 2.0\n\
                    0.2, 2e-6, z, 1.0, 2.0\n";
        let trace = read_trace(data.as_bytes()).unwrap();
        assert_eq!(trace.current(), &[0.0, 0.1, 0.2]);
        assert_eq!(trace.input_voltage(), &[2.0, 2.0, 2.0]);
        assert!((trace.sampling_interval() - 1e-6).abs() < 1e-18);
    }

    #[test]
    fn test_trace_reader_errors() {
        let missing = "time,input_voltage,current\n0,1,2\n1,1,2\n";
        assert!(matches!(
            read_trace(missing.as_bytes()),
            Err(ReportError::MissingColumn("output_voltage"))
        ));

        let garbage = "time,input_voltage,output_voltage,current\n0,1,1,0\n1e-6,abc,1,0\n";
        match read_trace(garbage.as_bytes()) {
            Err(ReportError::InvalidNumber { row, column, .. }) => {
                assert_eq!(row, 2);
                assert_eq!(column, "input_voltage");
            }
            other => panic!("unexpected: {:?}", other.map(|t| t.len())),
        }

        let not_finite = "time,input_voltage,output_voltage,current\n0,1,1,0\n1e-6,1,1,NaN\n2e-6,1,1,inf\n";
        match read_trace(not_finite.as_bytes()) {
            Err(ReportError::InvalidNumber { row, column, .. }) => {
                assert_eq!(row, 2);
                assert_eq!(column, "current");
            }
            other => panic!("unexpected: {:?}", other.map(|t| t.len())),
        }

        let short = "time,input_voltage,output_voltage,current\n0,1,1,0\n";
        assert!(matches!(read_trace(short.as_bytes()), Err(ReportError::CaptureError(_))));
    }

    #[test]
    fn test_sweep_rows_in_display_units() {
        let mut result = MeasurementResult::new("RM10", "N87", 26);
        result.points.push(point(100e3, 4.2e-3));
        let mut biased = point(100e3, 3.9e-3);
        biased.dc_bias_target = Some(0.05);
        biased.dc_current = Some(0.048);
        result.points.push(biased);

        let mut buffer = Vec::new();
        write_sweep(&mut buffer, &result).unwrap();

        let mut reader = csv::Reader::from_reader(buffer.as_slice());
        assert_eq!(reader.headers().unwrap().iter().collect::<Vec<_>>(), SWEEP_COLUMNS);
        let rows: Vec<SweepRow> = reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert!((rows[0].frequency_khz - 100.0).abs() < 1e-9);
        assert!((rows[0].inductance_mh - 4.2).abs() < 1e-9);
        assert_eq!(rows[0].dc_current_ma, None);
        assert!((rows[1].dc_current_ma.unwrap() - 48.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_reports_keep_header() {
        let mut buffer = Vec::new();
        write_core_loss(&mut buffer, &[]).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text.trim_end(), CORE_LOSS_COLUMNS.join(","));
    }

    #[test]
    fn test_core_loss_file() {
        let result = CoreLossResult {
            frequency: 50e3,
            energy_per_cycle: 2e-6,
            power: 0.1,
            flux_error_percent: 3.0,
            closure: FluxClosure::Closed,
            cycles_analyzed: 35,
            voltage_positive: 5.0,
            voltage_negative: -5.0,
            peak_current: 0.2,
            peak_flux_linkage: 1e-4,
            energies_per_cycle: vec![2e-6; 35],
            flux_errors_per_cycle: vec![3.0; 35],
            t_positive: None,
            t_negative: None,
            failed: false,
        }
        .with_timing(2e-6, 18e-6);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core_loss.csv");
        write_core_loss_file(&path, std::slice::from_ref(&result)).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<CoreLossRow> = reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].closure, "closed");
        assert!((rows[0].power_mw - 100.0).abs() < 1e-9);
        assert!((rows[0].t_positive_us.unwrap() - 2.0).abs() < 1e-9);
        assert!(!rows[0].failed);

        let failed = result.mark_failed();
        let text = CoreLossSummary::new(std::slice::from_ref(&failed)).to_string();
        assert!(text.contains("capture quality below threshold"));
    }

    #[test]
    fn test_sweep_summary_text() {
        let mut result = MeasurementResult::new("RM10", "N87", 26);
        result.points.push(point(10e3, 4e-3));
        result.stop_reason = StopReason::FluxLimit;
        result.saturation_detected = true;
        result.saturation_frequency = Some(10e3);

        let text = SweepSummary::new(&result).to_string();
        assert!(text.contains("RM10 (N87), N=26, 1 points"));
        assert!(text.contains("Stopped: flux limit at 10.00 kHz"));
        assert!(!SweepSummary::new(&result).format_colored().is_empty());
    }
}
