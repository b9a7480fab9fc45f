use anyhow::{Context, Result};
use log::info;
use std::path::PathBuf;

use tpt::config::HardwareConfig;
use tpt::instruments::InductorModel;
use tpt::measurement::{BenchController, Clock, ManualClock, SystemClock};

/// Controller used by the commands: boxed instruments and a boxed clock.
pub type CliController = BenchController<Box<dyn Clock>>;

/// Where the commands run.
pub struct BenchTarget {
    pub hardware: Option<PathBuf>,
    pub simulate: bool,
    pub seed: u64,
}

impl BenchTarget {
    fn hardware_config(&self) -> Result<HardwareConfig> {
        match (&self.hardware, self.simulate) {
            (Some(path), false) => HardwareConfig::from_file(path)
                .with_context(|| format!("Failed to load hardware configuration: {}", path.display())),
            (_, true) => Ok(HardwareConfig::simulated()),
            (None, false) => anyhow::bail!("No hardware configuration: pass --hardware <FILE> or --simulate"),
        }
    }

    /// Connect the instruments and wrap them in a controller.
    ///
    /// The virtual bench runs on a recording clock, so simulated sessions
    /// do not sleep.
    pub fn open(&self) -> Result<CliController> {
        let config = self.hardware_config()?;
        let bench = config
            .connect_with_model(InductorModel::default(), self.seed)
            .context("Failed to connect to the bench")?;

        let clock: Box<dyn Clock> = if bench.virtual_bench.is_some() {
            info!("Virtual bench, seed {}", self.seed);
            Box::new(ManualClock::new())
        } else {
            Box::new(SystemClock)
        };
        Ok(BenchController::from_bench(bench).with_clock(clock))
    }
}
