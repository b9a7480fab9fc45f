use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use tpt::pulse::PulseMode;

mod analyze;
mod bench;
mod config;
mod core_loss;
mod demag;
mod plan;
mod sweep;

/// TPT - Trapezoidal pulse testing of magnetic components
#[derive(Parser)]
#[command(name = "tpt")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Hardware configuration (JSON)
    #[arg(long, value_name = "FILE", global = true)]
    hardware: Option<PathBuf>,

    /// Run against the virtual bench
    #[arg(long, global = true)]
    simulate: bool,

    /// Noise seed of the virtual bench
    #[arg(long, default_value_t = 0, global = true, hide = true)]
    seed: u64,

    /// Measurement settings (TOML)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Pulse train layout for `tpt plan`.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum TrainArg {
    #[default]
    Balanced,
    Padded,
    DcBias,
    Asymmetric,
}

impl From<TrainArg> for PulseMode {
    fn from(arg: TrainArg) -> Self {
        match arg {
            TrainArg::Balanced => PulseMode::Balanced,
            TrainArg::Padded => PulseMode::Padded,
            TrainArg::DcBias => PulseMode::DcBias,
            TrainArg::Asymmetric => PulseMode::Asymmetric,
        }
    }
}

/// What `tpt analyze` extracts from a trace.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum AnalysisArg {
    #[default]
    Inductance,
    DcBias,
    CoreLoss,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the pulse train and capture plan for an excitation
    Plan {
        /// Train layout
        #[arg(short = 'm', long, default_value = "balanced", value_enum)]
        mode: TrainArg,

        /// Rail voltage in V
        #[arg(long, default_value_t = 10.0)]
        voltage: f64,

        /// Switching frequency in Hz
        #[arg(short = 'f', long, default_value_t = 100e3)]
        frequency: f64,

        /// Pulse pairs
        #[arg(short = 'n', long, default_value_t = 4)]
        pulses: usize,

        /// Target DC bias in A (dc-bias mode)
        #[arg(long, default_value_t = 0.1)]
        dc_bias: f64,

        /// Inductance estimate in H (dc-bias mode)
        #[arg(long, default_value_t = 3e-3)]
        inductance: f64,

        /// Positive phase in s (asymmetric mode)
        #[arg(long)]
        t_positive: Option<f64>,
    },

    /// Descending frequency sweep with saturation detection
    Sweep {
        /// Core designation
        #[arg(long)]
        core: Option<String>,

        /// Material grade
        #[arg(long)]
        material: Option<String>,

        /// Winding turns
        #[arg(short = 'N', long)]
        turns: Option<u32>,

        /// Rail voltage in V
        #[arg(long)]
        voltage: Option<f64>,

        /// First frequency in Hz
        #[arg(long)]
        start_frequency: Option<f64>,

        /// Last frequency in Hz
        #[arg(long)]
        min_frequency: Option<f64>,

        /// Frequency points
        #[arg(long)]
        steps: Option<usize>,

        /// CSV report path
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Inductance at increasing DC bias
    DcBias {
        /// Rail voltage in V
        #[arg(long)]
        voltage: Option<f64>,

        /// Frequency in Hz
        #[arg(short = 'f', long)]
        frequency: Option<f64>,

        /// Bias currents in A, comma separated
        #[arg(long, value_delimiter = ',')]
        currents: Option<Vec<f64>>,

        /// CSV report path
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Core loss versus frequency
    CoreLoss {
        /// Rail voltage in V
        #[arg(long)]
        voltage: Option<f64>,

        /// Frequencies in Hz, comma separated
        #[arg(short = 'f', long, value_delimiter = ',')]
        frequencies: Option<Vec<f64>>,

        /// Share of the period given to the positive phase
        #[arg(long)]
        t_positive_ratio: Option<f64>,

        /// Search the positive phase with the lowest flux error first
        #[arg(long)]
        optimize_timing: bool,

        /// Peak-to-peak flux density target in T, balancing the rails
        #[arg(long)]
        flux_density: Option<f64>,

        /// Negative rail in V; with --flux-density times t+ and t- from the core
        #[arg(long)]
        negative_voltage: Option<f64>,

        /// CSV report path
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Bring the core back to zero flux
    Demag {
        /// First step amplitude in V
        #[arg(long)]
        max_voltage: Option<f64>,

        /// Frequency in Hz
        #[arg(short = 'f', long)]
        frequency: Option<f64>,

        /// Ramp steps
        #[arg(long)]
        steps: Option<usize>,
    },

    /// Analyse a trace saved as CSV
    Analyze {
        /// Trace file (time,input_voltage,output_voltage,current)
        #[arg(value_name = "TRACE")]
        trace: PathBuf,

        /// Extraction to run
        #[arg(short = 'm', long, default_value = "inductance", value_enum)]
        mode: AnalysisArg,

        /// Rail voltage of the capture in V (defaults to the input peak)
        #[arg(long)]
        voltage: Option<f64>,

        /// Switching frequency in Hz (core-loss mode)
        #[arg(short = 'f', long)]
        frequency: Option<f64>,
    },
}

impl Cli {
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }
}

pub fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
}

pub fn dispatch(cli: Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::default(),
    };
    let target = bench::BenchTarget {
        hardware: cli.hardware,
        simulate: cli.simulate,
        seed: cli.seed,
    };

    match cli.command {
        Commands::Plan {
            mode,
            voltage,
            frequency,
            pulses,
            dc_bias,
            inductance,
            t_positive,
        } => plan::run(PulseMode::from(mode), voltage, frequency, pulses, dc_bias, inductance, t_positive),
        Commands::Sweep {
            core,
            material,
            turns,
            voltage,
            start_frequency,
            min_frequency,
            steps,
            output,
        } => {
            let mut sweep = settings.sweep;
            sweep.core = core.unwrap_or(sweep.core);
            sweep.material = material.unwrap_or(sweep.material);
            sweep.turns = turns.unwrap_or(sweep.turns);
            sweep.voltage = voltage.unwrap_or(sweep.voltage);
            sweep.start_frequency = start_frequency.unwrap_or(sweep.start_frequency);
            sweep.min_frequency = min_frequency.unwrap_or(sweep.min_frequency);
            sweep.frequency_steps = steps.unwrap_or(sweep.frequency_steps);
            sweep::run(&target, &sweep, output)
        }
        Commands::DcBias {
            voltage,
            frequency,
            currents,
            output,
        } => {
            let mut dc_bias = settings.dc_bias;
            dc_bias.voltage = voltage.unwrap_or(dc_bias.voltage);
            dc_bias.frequency = frequency.unwrap_or(dc_bias.frequency);
            dc_bias.dc_currents = currents.unwrap_or(dc_bias.dc_currents);
            sweep::run_dc_bias(&target, &dc_bias, output)
        }
        Commands::CoreLoss {
            voltage,
            frequencies,
            t_positive_ratio,
            optimize_timing,
            flux_density,
            negative_voltage,
            output,
        } => {
            let mut core_loss = settings.core_loss;
            core_loss.voltage = voltage.unwrap_or(core_loss.voltage);
            core_loss.frequencies = frequencies.unwrap_or(core_loss.frequencies);
            core_loss.t_positive_ratio = t_positive_ratio.unwrap_or(core_loss.t_positive_ratio);
            core_loss.optimize_timing |= optimize_timing;
            core_loss.flux_density = flux_density.or(core_loss.flux_density);
            core_loss.negative_voltage = negative_voltage.or(core_loss.negative_voltage);
            core_loss::run(&target, &core_loss, output)
        }
        Commands::Demag {
            max_voltage,
            frequency,
            steps,
        } => {
            let mut demag = settings.demag;
            demag.max_voltage = max_voltage.unwrap_or(demag.max_voltage);
            demag.frequency = frequency.unwrap_or(demag.frequency);
            demag.num_steps = steps.unwrap_or(demag.num_steps);
            demag::run(&target, &demag)
        }
        Commands::Analyze {
            trace,
            mode,
            voltage,
            frequency,
        } => analyze::run(trace, mode, voltage, frequency),
    }
}
