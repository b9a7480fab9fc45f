//! # Measurement Engine
//!
//! Drives the bench through one excitation at a time and builds the
//! measurement sessions on top of it.
//!
//! [`AcquisitionController`] owns the three instruments. Each attempt sets
//! up the scope and the board, switches both rails on, fires the train,
//! reads the block back and switches the rails off again, regardless of
//! whether anything failed in between. Captures are scored
//! ([`CaptureQuality`]) and retried up to the configured budget.
//!
//! Sessions borrow the controller:
//!
//! - [`SaturationSweepController`]: descending frequency sweeps with
//!   saturation and safety stops, DC-bias sweeps and constant-voltage
//!   inductance sweeps
//! - [`CoreLossSession`]: core loss from symmetric, asymmetric and
//!   flux-targeted trains, with rail balancing and timing search
//! - [`DemagnetizationSequencer`]: decaying ramp back to zero flux
//!
//! Waits go through a [`Clock`] so that sessions against the virtual
//! bench run without sleeping.
//!
//! ## Example
//!
//! ```rust
//! use tpt::instruments::{InductorModel, VirtualBench};
//! use tpt::measurement::{AcquisitionController, ManualClock};
//! use tpt::pulse::PulseTrainPlanner;
//!
//! let bench = VirtualBench::new(InductorModel::default(), 7);
//! let mut controller = AcquisitionController::new(
//!     bench.power_supply(),
//!     bench.oscilloscope(),
//!     bench.pulse_board(),
//! )
//! .with_clock(ManualClock::new());
//!
//! let params = PulseTrainPlanner::default().balanced(10.0, 10e3, 4)?;
//! let acquisition = controller.measure_inductance(&params)?;
//! assert_eq!(bench.outputs_enabled(), [false, false]);
//! assert!(acquisition.attempts >= 1);
//! # Ok::<(), tpt::measurement::MeasurementError>(())
//! ```

mod acquisition;
mod clock;
mod core_loss;
mod demag;
mod error;
mod setup;
mod sweep;

#[cfg(test)]
mod tests;

pub use acquisition::{
    capture_wait, retry_settle_time, settle_time, Acquisition, AcquisitionController, AcquisitionState,
    BenchController, CaptureQuality, DEFAULT_MAX_RETRIES, MIN_DISTINCT_CURRENT_LEVELS, VOLTAGE_QUALITY_FRACTION,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use core_loss::{
    CoreLossSession, CoreLossSessionSettings, TimingCandidate, TimingSearch, DEFAULT_T_POSITIVE_RATIO,
};
pub use demag::{demag_amplitudes, DemagnetizationReport, DemagnetizationSequencer, DemagnetizationSettings};
pub use error::MeasurementError;
pub use setup::{
    disable_outputs, setup_board, setup_oscilloscope, setup_power_supply, ScopeSettings, SupplyState,
    VoltageReadback, RETRYABLE_READBACK_ERROR, STARTUP_CURRENT_LIMIT,
};
pub use sweep::{
    detect_saturation, nominal_inductance, DcBiasSweepSettings, InductanceSweepSummary, MeasurementPoint,
    MeasurementResult, SaturationSweepController, StopReason, SweepSettings, CLIPPING_FRACTION,
    DC_BIAS_DROP_WARNING_PERCENT, MIN_SATURATION_POINTS, NOMINAL_POINTS,
};
