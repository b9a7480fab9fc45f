//! # TPT
//!
//! Command-line front end of the trapezoidal pulse test bench.
//!
//! ## Usage
//!
//! ```bash
//! # Show the train planned for an excitation
//! tpt plan --voltage 10 --frequency 100e3 --pulses 4
//!
//! # Saturation sweep on the virtual bench, saved as CSV
//! tpt --simulate -v sweep --core RM10 --turns 26 -o sweep.csv
//!
//! # Core loss on real hardware
//! tpt --hardware bench.json core-loss --voltage 5 -f 50e3,100e3
//!
//! # Offline analysis of a saved trace
//! tpt analyze trace.csv --mode core-loss -f 100e3
//! ```

mod cli;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli::init_logging(cli.verbosity());
    cli::dispatch(cli)
}
