//! # Waveform Analysis
//!
//! Numeric extraction on captured traces:
//!
//! - [`InductanceExtractor`] fits the current slope inside positive pulses
//!   (`L = V / (dI/dt)`), with a DC-bias variant that skips the bias and
//!   stabilization pulses.
//! - [`CoreLossIntegrator`] integrates `V·I` over steady-state cycles and
//!   reports the flux-closure error alongside the power figure. It also
//!   selects the best-closing current loop used to re-balance the supply.
//!
//! Both work on borrowed [`CaptureTrace`](crate::capture::CaptureTrace)s and
//! never touch the instruments.

mod core_loss;
mod inductance;

pub use core_loss::{
    cumulative_flux, rising_edges, select_closed_loop, voltage_correction, voltage_proportion,
    CoreLossIntegrator, CoreLossResult, CoreLossSettings, FluxClosure, LoopAnalysis, LoopWindow,
    INFLATED_FLUX_ERROR_PERCENT, INVALID_FLUX_ERROR_PERCENT,
};
pub use inductance::{
    ols_slope, positive_pulses, smooth, DcBiasEstimate, InductanceEstimate, InductanceExtractor,
    PulseSlope, DC_BIAS_SKIPPED_EDGES, DC_BUILDUP_SPREAD_PERCENT,
};

/// Errors raised by the analysis stages
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Too few rising edges to leave two steady cycles
    #[error("Not enough cycles: found {found} rising edges, need {required}")]
    NotEnoughCycles { found: usize, required: usize },

    #[error("Invalid frequency: {0} Hz")]
    InvalidFrequency(f64),

    /// No pair of current segments forms a loop
    #[error("No closed current loop in the capture")]
    NoClosedLoop,

    /// The steady cycles do not return to their starting flux
    #[error("Flux closure error {0:.1}% leaves the B-H loop open")]
    OpenLoop(f64),
}
