//! # Pulse Train Planning
//!
//! Turns an excitation request into [`TestParameters`]: the rail voltages,
//! the current range hint for the scope and the ordered list of pulse
//! durations the pulse board plays back.
//!
//! Four layouts are available through [`PulseTrainPlanner`]:
//!
//! - **Balanced**: `2·n` equal half-periods, zero net volt-seconds
//! - **Padded**: balanced pairs plus a padding pulse up to the minimum
//!   capture time (leaves residual flux)
//! - **DC bias**: triple-pulse train that settles at a target bias current
//! - **Asymmetric**: unequal `t+`/`t-` pairs balanced through timing
//!
//! ## Example
//!
//! ```rust
//! use tpt::pulse::PulseTrainPlanner;
//!
//! let planner = PulseTrainPlanner::default();
//! let params = planner.balanced(10.0, 100e3, 4)?;
//! assert_eq!(params.pulse_periods().len(), 8);
//! assert!(params.is_flux_balanced());
//! # Ok::<(), tpt::pulse::PlanError>(())
//! ```

mod capture;
mod error;
mod params;
mod planner;


pub use capture::{CapturePlan, MAX_SAMPLES, MIN_SAMPLES, MIN_SAMPLING_TIME, SAMPLES_PER_PULSE};
pub use error::PlanError;
pub use params::{PulseMode, TestParameters};
pub use planner::{
    first_pulse_width, linspace, log_spaced, steady_period, FluxTarget, PulseTrainPlanner,
    DEFAULT_INDUCTANCE_ESTIMATE, MIN_CAPTURE_TIME, STABILIZATION_CYCLES, STEADY_REPETITIONS,
};
