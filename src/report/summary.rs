use std::fmt;

#[cfg(feature = "colorized_output")]
use console::style;

use crate::analysis::{CoreLossResult, FluxClosure};
use crate::measurement::MeasurementResult;

/// Console summary of a sweep.
pub struct SweepSummary<'a> {
    pub result: &'a MeasurementResult,
}

impl<'a> SweepSummary<'a> {
    pub fn new(result: &'a MeasurementResult) -> Self {
        Self { result }
    }

    fn header(&self) -> String {
        format!(
            "{} ({}), N={}, {} points",
            self.result.core,
            self.result.material,
            self.result.turns,
            self.result.points.len()
        )
    }

    /// Format the summary with colors (requires the console feature)
    pub fn format_colored(&self) -> String {
        #[cfg(feature = "colorized_output")]
        {
            let result = self.result;
            let mut output = String::new();
            output.push_str(&format!("{}\n", style("Inductance Sweep").bold().cyan()));
            output.push_str(&format!("{}\n", style("================").cyan()));
            output.push_str(&format!("{}\n\n", self.header()));

            for point in &result.points {
                output.push_str(&format_point_row(point));
                output.push('\n');
            }
            output.push('\n');

            if let Some(nominal) = result.nominal_inductance {
                output.push_str(&format!("{}: {:.3} mH\n", style("Nominal L").bold(), nominal * 1e3));
            }
            if let Some(theoretical) = result.theoretical_inductance {
                output.push_str(&format!("{}: {:.3} mH\n", style("Theoretical L").bold(), theoretical * 1e3));
            }
            if result.failed_points > 0 {
                output.push_str(&format!(
                    "{}: {}\n",
                    style("Failed points").bold(),
                    style(result.failed_points).yellow()
                ));
            }

            let stop = format!("Stopped: {}", result.stop_reason);
            if result.saturation_detected {
                output.push_str(&format!(
                    "{} at {:.2} kHz\n",
                    style(stop).red().bold(),
                    result.saturation_frequency.unwrap_or_default() / 1e3
                ));
            } else if result.stop_reason == crate::measurement::StopReason::Completed {
                output.push_str(&format!("{}\n", style(stop).green().bold()));
            } else {
                output.push_str(&format!("{}\n", style(stop).yellow().bold()));
            }
            output
        }

        #[cfg(not(feature = "colorized_output"))]
        {
            self.to_string()
        }
    }
}

fn format_point_row(point: &crate::measurement::MeasurementPoint) -> String {
    let mut row = format!(
        "{:>9.2} kHz  L = {:>8.3} mH  I = {:>7.3} A  B = {:>6.1} mT",
        point.frequency / 1e3,
        point.inductance * 1e3,
        point.peak_current,
        point.flux_density * 1e3
    );
    if let Some(dc) = point.dc_current {
        row.push_str(&format!("  I_dc = {:.1} mA", dc * 1e3));
    }
    row
}

impl fmt::Display for SweepSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Inductance Sweep")?;
        writeln!(f, "================")?;
        writeln!(f, "{}", self.header())?;
        writeln!(f)?;
        for point in &self.result.points {
            writeln!(f, "{}", format_point_row(point))?;
        }
        writeln!(f)?;
        if let Some(nominal) = self.result.nominal_inductance {
            writeln!(f, "Nominal L: {:.3} mH", nominal * 1e3)?;
        }
        if let Some(theoretical) = self.result.theoretical_inductance {
            writeln!(f, "Theoretical L: {:.3} mH", theoretical * 1e3)?;
        }
        if self.result.failed_points > 0 {
            writeln!(f, "Failed points: {}", self.result.failed_points)?;
        }
        match self.result.saturation_frequency {
            Some(frequency) if self.result.saturation_detected => writeln!(
                f,
                "Stopped: {} at {:.2} kHz",
                self.result.stop_reason,
                frequency / 1e3
            ),
            _ => writeln!(f, "Stopped: {}", self.result.stop_reason),
        }
    }
}

/// Console table of core-loss results.
const FAILED_NOTE: &str = "capture quality below threshold, best capture used";

pub struct CoreLossSummary<'a> {
    pub results: &'a [CoreLossResult],
}

impl<'a> CoreLossSummary<'a> {
    pub fn new(results: &'a [CoreLossResult]) -> Self {
        Self { results }
    }

    fn row(result: &CoreLossResult) -> String {
        format!(
            "{:>9.2} kHz  E = {:>9.3} uJ  P = {:>8.2} mW  flux error {:>5.1}%",
            result.frequency / 1e3,
            result.energy_per_cycle * 1e6,
            result.power * 1e3,
            result.flux_error_percent
        )
    }

    /// Format the table with colors (requires the console feature)
    pub fn format_colored(&self) -> String {
        #[cfg(feature = "colorized_output")]
        {
            let mut output = String::new();
            output.push_str(&format!("{}\n", style("Core Loss").bold().cyan()));
            output.push_str(&format!("{}\n", style("=========").cyan()));
            for result in self.results {
                let closure = match result.closure {
                    FluxClosure::Closed => style(result.closure.to_string()).green(),
                    FluxClosure::Inflated => style(result.closure.to_string()).yellow(),
                    FluxClosure::Invalid => style(result.closure.to_string()).red(),
                };
                output.push_str(&format!("{}  [{}]\n", Self::row(result), closure));
                if result.failed {
                    output.push_str(&format!("    {}\n", style(FAILED_NOTE).red()));
                }
            }
            output
        }

        #[cfg(not(feature = "colorized_output"))]
        {
            self.to_string()
        }
    }
}

impl fmt::Display for CoreLossSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Core Loss")?;
        writeln!(f, "=========")?;
        for result in self.results {
            writeln!(f, "{}  [{}]", Self::row(result), result.closure)?;
            if result.closure != FluxClosure::Closed {
                writeln!(f, "    loop not closed, power includes reactive energy")?;
            }
            if result.failed {
                writeln!(f, "    {}", FAILED_NOTE)?;
            }
        }
        Ok(())
    }
}
