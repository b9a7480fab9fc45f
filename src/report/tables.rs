use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::ReportError;
use crate::analysis::CoreLossResult;
use crate::capture::CaptureTrace;
use crate::measurement::{MeasurementPoint, MeasurementResult};

/// Header of trace files
pub const TRACE_COLUMNS: [&str; 4] = ["time", "input_voltage", "output_voltage", "current"];

/// Write a trace as `time,input_voltage,output_voltage,current`, in s, V and A.
pub fn write_trace<W: Write>(writer: W, trace: &CaptureTrace) -> Result<(), ReportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(TRACE_COLUMNS)?;

    let columns = [trace.time(), trace.input_voltage(), trace.output_voltage(), trace.current()];
    for i in 0..trace.len() {
        csv_writer.write_record(columns.iter().map(|c| c[i].to_string()))?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_trace_file<P: AsRef<Path>>(path: P, trace: &CaptureTrace) -> Result<(), ReportError> {
    let path = path.as_ref();
    write_trace(BufWriter::new(File::create(path)?), trace)?;
    debug!("Wrote {} samples to {}", trace.len(), path.display());
    Ok(())
}

/// Read a trace written by [`write_trace`] or exported with the same column
/// names.
///
/// Header names are matched case-insensitively and column order is free;
/// extra columns are ignored. NaN and infinite cells are rejected.
pub fn read_trace<R: Read>(reader: R) -> Result<CaptureTrace, ReportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader.headers()?.iter().map(|h| h.to_lowercase()).collect();
    let mut indices = [0usize; 4];
    for (slot, name) in indices.iter_mut().zip(TRACE_COLUMNS) {
        *slot = headers
            .iter()
            .position(|h| h == name)
            .ok_or(ReportError::MissingColumn(name))?;
    }

    let mut columns: [Vec<f64>; 4] = Default::default();
    for (row, record) in csv_reader.records().enumerate() {
        let record = record?;
        for ((column, index), name) in columns.iter_mut().zip(indices).zip(TRACE_COLUMNS) {
            let cell = record.get(index).unwrap_or_default();
            let value = cell
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ReportError::InvalidNumber {
                    row: row + 1,
                    column: name,
                    value: cell.to_string(),
                })?;
            column.push(value);
        }
    }

    let [time, input_voltage, output_voltage, current] = columns;
    Ok(CaptureTrace::from_columns(time, input_voltage, output_voltage, current)?)
}

pub fn read_trace_file<P: AsRef<Path>>(path: P) -> Result<CaptureTrace, ReportError> {
    let trace = read_trace(BufReader::new(File::open(path.as_ref())?))?;
    info!("Loaded {} samples from {}", trace.len(), path.as_ref().display());
    Ok(trace)
}

/// Header of sweep reports, in [`SweepRow`] field order
pub const SWEEP_COLUMNS: [&str; 9] = [
    "frequency_khz",
    "voltage_v",
    "inductance_mh",
    "peak_current_a",
    "flux_density_mt",
    "dc_bias_target_ma",
    "dc_current_ma",
    "ac_ripple_ma",
    "attempts",
];

/// One row of a sweep report, in display units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRow {
    pub frequency_khz: f64,
    pub voltage_v: f64,
    pub inductance_mh: f64,
    pub peak_current_a: f64,
    pub flux_density_mt: f64,
    pub dc_bias_target_ma: Option<f64>,
    pub dc_current_ma: Option<f64>,
    pub ac_ripple_ma: Option<f64>,
    pub attempts: usize,
}

impl From<&MeasurementPoint> for SweepRow {
    fn from(point: &MeasurementPoint) -> Self {
        Self {
            frequency_khz: point.frequency / 1e3,
            voltage_v: point.voltage,
            inductance_mh: point.inductance * 1e3,
            peak_current_a: point.peak_current,
            flux_density_mt: point.flux_density * 1e3,
            dc_bias_target_ma: point.dc_bias_target.map(|i| i * 1e3),
            dc_current_ma: point.dc_current.map(|i| i * 1e3),
            ac_ripple_ma: point.ac_ripple.map(|i| i * 1e3),
            attempts: point.attempts,
        }
    }
}

/// Write every point of a sweep, one row each.
pub fn write_sweep<W: Write>(writer: W, result: &MeasurementResult) -> Result<(), ReportError> {
    let mut csv_writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv_writer.write_record(SWEEP_COLUMNS)?;
    for point in &result.points {
        csv_writer.serialize(SweepRow::from(point))?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_sweep_file<P: AsRef<Path>>(path: P, result: &MeasurementResult) -> Result<(), ReportError> {
    let path = path.as_ref();
    write_sweep(BufWriter::new(File::create(path)?), result)?;
    info!("Saved {} sweep points to {}", result.points.len(), path.display());
    Ok(())
}

/// Header of core-loss reports, in [`CoreLossRow`] field order
pub const CORE_LOSS_COLUMNS: [&str; 12] = [
    "frequency_khz",
    "t_positive_us",
    "t_negative_us",
    "energy_per_cycle_uj",
    "power_mw",
    "flux_error_percent",
    "closure",
    "cycles_analyzed",
    "voltage_positive_v",
    "voltage_negative_v",
    "peak_current_a",
    "failed",
];

/// One row of a core-loss report, in display units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreLossRow {
    pub frequency_khz: f64,
    pub t_positive_us: Option<f64>,
    pub t_negative_us: Option<f64>,
    pub energy_per_cycle_uj: f64,
    pub power_mw: f64,
    pub flux_error_percent: f64,
    pub closure: String,
    pub cycles_analyzed: usize,
    pub voltage_positive_v: f64,
    pub voltage_negative_v: f64,
    pub peak_current_a: f64,
    pub failed: bool,
}

impl From<&CoreLossResult> for CoreLossRow {
    fn from(result: &CoreLossResult) -> Self {
        Self {
            frequency_khz: result.frequency / 1e3,
            t_positive_us: result.t_positive.map(|t| t * 1e6),
            t_negative_us: result.t_negative.map(|t| t * 1e6),
            energy_per_cycle_uj: result.energy_per_cycle * 1e6,
            power_mw: result.power * 1e3,
            flux_error_percent: result.flux_error_percent,
            closure: result.closure.to_string(),
            cycles_analyzed: result.cycles_analyzed,
            voltage_positive_v: result.voltage_positive,
            voltage_negative_v: result.voltage_negative,
            peak_current_a: result.peak_current,
            failed: result.failed,
        }
    }
}

pub fn write_core_loss<W: Write>(writer: W, results: &[CoreLossResult]) -> Result<(), ReportError> {
    let mut csv_writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv_writer.write_record(CORE_LOSS_COLUMNS)?;
    for result in results {
        csv_writer.serialize(CoreLossRow::from(result))?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_core_loss_file<P: AsRef<Path>>(path: P, results: &[CoreLossResult]) -> Result<(), ReportError> {
    let path = path.as_ref();
    write_core_loss(BufWriter::new(File::create(path)?), results)?;
    info!("Saved {} core-loss results to {}", results.len(), path.display());
    Ok(())
}
