//! # TPT - Trapezoidal Pulse Testing
//!
//! `tpt` characterizes magnetic components (inductors, transformer windings)
//! by driving them with timed voltage pulse trains from a half bridge and
//! analysing the captured voltage and current waveforms.
//!
//! ## Key Features
//!
//! - **Pulse planning**: balanced, padded, DC-bias and asymmetric trains that
//!   respect the volt-second balance of the core.
//!
//! - **Acquisition with retries**: every excitation is armed, fired, read
//!   back and scored; the supply outputs are switched off after each attempt.
//!
//! - **Extraction**: inductance from the current slope, closed-loop core
//!   loss with a flux-closure diagnostic, saturation detection.
//!
//! - **Virtual bench**: a seedable simulated supply, pulse board and scope
//!   around a saturating inductor model, for tests and dry runs.
//!
//! ## Quick Start
//!
//! ```rust
//! use tpt::config::HardwareConfig;
//! use tpt::measurement::{BenchController, ManualClock, SaturationSweepController, SweepSettings};
//!
//! let bench = HardwareConfig::simulated().connect()?;
//! let mut controller = BenchController::from_bench(bench).with_clock(ManualClock::new());
//!
//! let settings = SweepSettings {
//!     voltage: 5.0,
//!     start_frequency: 50e3,
//!     min_frequency: 10e3,
//!     frequency_steps: 3,
//!     ..SweepSettings::default()
//! };
//! let result = SaturationSweepController::new(&mut controller).run(&settings)?;
//! println!("{} points, stopped: {}", result.points.len(), result.stop_reason);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - [`magnetics`]: core and material tables, theoretical inductance,
//!   core-loss timing
//! - [`pulse`]: [`TestParameters`](pulse::TestParameters) and the planner
//! - [`capture`]: immutable captured traces
//! - [`segment`]: change-point detection and clean reconstructions
//! - [`analysis`]: inductance and core-loss extraction
//! - [`instruments`]: instrument traits, SCPI drivers, virtual bench
//! - [`measurement`]: acquisition state machine and measurement sessions
//! - [`config`]: hardware configuration and instrument factory
//! - [`report`]: CSV files and console summaries

#![deny(rustdoc::missing_crate_level_docs)]
#![allow(clippy::too_many_arguments)]

pub mod analysis;
pub mod capture;
pub mod config;
pub mod instruments;
pub mod magnetics;
pub mod measurement;
pub mod pulse;
pub mod report;
pub mod segment;

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::analysis::{CoreLossIntegrator, CoreLossResult, InductanceEstimate, InductanceExtractor};
    pub use crate::capture::CaptureTrace;
    pub use crate::config::{Bench, ConfigError, HardwareConfig, ProbeScales};
    pub use crate::instruments::{InstrumentError, Oscilloscope, PowerSupply, PulseBoard, VirtualBench};
    pub use crate::measurement::{
        AcquisitionController, BenchController, CoreLossSession, DemagnetizationSequencer, MeasurementError,
        MeasurementResult, SaturationSweepController, StopReason, SweepSettings,
    };
    pub use crate::pulse::{PulseMode, PulseTrainPlanner, TestParameters};
    pub use crate::report::{write_sweep_file, write_trace_file, ReportError};
}
