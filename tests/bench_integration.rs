//! Integration tests for measurement sessions on the virtual bench
//!
//! These tests drive full sweeps, core-loss sessions and demagnetization
//! through the simulated instruments and check both the results and the
//! state the bench is left in.

use tpt::analysis::FluxClosure;
use tpt::config::HardwareConfig;
use tpt::instruments::{InductorModel, VirtualBench};
use tpt::magnetics::{CoreLossTiming, CoreLossTimingRequest};
use tpt::measurement::{
    BenchController, CoreLossSession, CoreLossSessionSettings, DcBiasSweepSettings, DemagnetizationSequencer,
    DemagnetizationSettings, ManualClock, MeasurementError, SaturationSweepController, StopReason, SweepSettings,
};
use tpt::pulse::FluxTarget;
use tpt::report::{read_trace_file, write_sweep_file, write_trace_file};
use tempfile::tempdir;

/// Winding that stays linear over the currents used here
fn linear_model() -> InductorModel {
    InductorModel {
        saturation_current: 100.0,
        ..InductorModel::default()
    }
}

fn open_bench(model: InductorModel, seed: u64) -> (BenchController<ManualClock>, VirtualBench) {
    let bench = HardwareConfig::simulated().connect_with_model(model, seed).unwrap();
    let handle = bench.virtual_bench.clone().unwrap();
    let controller = BenchController::from_bench(bench).with_clock(ManualClock::new());
    (controller, handle)
}

/// One point at 9.5 V and 6.25 kHz: the expected ripple fills a 1 A range
/// well enough to resolve the current.
fn single_point_settings() -> SweepSettings {
    SweepSettings {
        voltage: 9.5,
        start_frequency: 6250.0,
        min_frequency: 6250.0,
        frequency_steps: 1,
        max_flux_density: 1.0,
        ..SweepSettings::default()
    }
}

#[test]
fn test_single_point_sweep() {
    let (mut controller, bench) = open_bench(linear_model(), 11);
    let result = SaturationSweepController::new(&mut controller)
        .run(&single_point_settings())
        .unwrap();

    assert_eq!(result.points.len(), 1);
    assert_eq!(result.failed_points, 0);
    assert_eq!(result.stop_reason, StopReason::Completed);
    assert!(!result.saturation_detected);

    let point = &result.points[0];
    assert!((point.inductance - 4e-3).abs() / 4e-3 < 0.1, "L = {}", point.inductance);
    assert!(point.peak_current > 0.15 && point.peak_current < 0.25);
    assert_eq!(result.nominal_inductance, Some(point.inductance));
    assert!(result.theoretical_inductance.unwrap() > 1e-3);

    assert_eq!(bench.outputs_enabled(), [false, false]);
    assert_eq!(bench.rail_voltages(), [9.5, 9.5]);
}

#[test]
fn test_current_limit_trip() {
    let (mut controller, bench) = open_bench(linear_model(), 12);
    let settings = SweepSettings {
        max_current: 0.05,
        ..single_point_settings()
    };
    let result = SaturationSweepController::new(&mut controller).run(&settings).unwrap();

    assert_eq!(result.stop_reason, StopReason::CurrentLimit);
    assert!(result.stop_reason.is_safety_trip());
    assert!(result.saturation_detected);
    assert_eq!(result.saturation_frequency, Some(6250.0));
    // the tripping point is kept
    assert_eq!(result.points.len(), 1);
    assert_eq!(bench.outputs_enabled(), [false, false]);
}

#[test]
fn test_flux_limit_checked_first() {
    let (mut controller, _bench) = open_bench(linear_model(), 13);
    let settings = SweepSettings {
        max_flux_density: 0.05,
        max_current: 0.05,
        ..single_point_settings()
    };
    let result = SaturationSweepController::new(&mut controller).run(&settings).unwrap();
    assert_eq!(result.stop_reason, StopReason::FluxLimit);
    assert!(result.max_flux_density().unwrap() > 0.05);
}

#[test]
fn test_repeated_inductance_sweep() {
    let (mut controller, bench) = open_bench(linear_model(), 25);
    let summary = SaturationSweepController::new(&mut controller)
        .run_inductance_sweep(9.5, &[6250.0, 6250.0, 6250.0], 2)
        .unwrap();

    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.points.len(), 3);
    assert_eq!(summary.success_rate, 1.0);
    let mean = summary.mean_inductance.unwrap();
    assert!((mean - 4e-3).abs() / 4e-3 < 0.1);
    assert!(summary.std_inductance.unwrap() < 0.05 * mean);
    assert_eq!(bench.outputs_enabled(), [false, false]);
}

#[test]
fn test_unresolved_points_are_counted() {
    // 1 V at these frequencies gives a few mA of ripple on a 50 mA range
    let (controller, bench) = open_bench(InductorModel::default(), 14);
    let mut controller = controller.with_max_retries(2);
    let settings = SweepSettings {
        voltage: 1.0,
        start_frequency: 500e3,
        min_frequency: 100e3,
        frequency_steps: 3,
        ..SweepSettings::default()
    };
    let result = SaturationSweepController::new(&mut controller).run(&settings).unwrap();

    assert!(result.points.is_empty());
    assert_eq!(result.failed_points, 3);
    assert_eq!(result.stop_reason, StopReason::Completed);
    assert_eq!(result.nominal_inductance, None);

    // one enable per attempt; startup, every attempt and the end of the
    // sweep each switch the rails off
    assert_eq!(bench.enable_events(), [6, 6]);
    assert_eq!(bench.disable_events(), [8, 8]);
    assert_eq!(bench.fired_trains(), 6);
    assert_eq!(bench.outputs_enabled(), [false, false]);
}

#[test]
fn test_invalid_point_does_not_end_sweep() {
    let (mut controller, bench) = open_bench(linear_model(), 25);
    let summary = SaturationSweepController::new(&mut controller)
        .run_inductance_sweep(9.5, &[6250.0, 0.0, 6250.0], 2)
        .unwrap();

    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.points.len(), 2);
    assert!((summary.success_rate - 2.0 / 3.0).abs() < 1e-12);
    assert_eq!(bench.fired_trains(), 2);
    assert_eq!(bench.outputs_enabled(), [false, false]);
}

#[test]
fn test_unknown_core_is_rejected() {
    let (mut controller, bench) = open_bench(InductorModel::default(), 15);
    let settings = SweepSettings {
        core: "XX99".to_string(),
        ..SweepSettings::default()
    };
    let result = SaturationSweepController::new(&mut controller).run(&settings);
    assert!(matches!(result, Err(MeasurementError::ConfigError(_))));
    assert_eq!(bench.fired_trains(), 0);
}

#[test]
fn test_dc_bias_sweep() {
    let (mut controller, bench) = open_bench(linear_model(), 16);
    let settings = DcBiasSweepSettings {
        voltage: 5.0,
        frequency: 20e3,
        dc_currents: vec![0.05, 0.1],
        inductance_estimate: 4e-3,
        ..DcBiasSweepSettings::default()
    };
    let result = SaturationSweepController::new(&mut controller)
        .run_dc_bias_sweep(&settings)
        .unwrap();

    assert_eq!(result.points.len(), 2);
    for (point, target) in result.points.iter().zip([0.05, 0.1]) {
        assert_eq!(point.dc_bias_target, Some(target));
        assert!((point.inductance - 4e-3).abs() / 4e-3 < 0.15, "L = {}", point.inductance);
        let dc = point.dc_current.unwrap();
        assert!((dc - target).abs() < 0.4 * target, "I_dc = {} for {}", dc, target);
        assert!(point.ac_ripple.unwrap() > 0.0);
    }
    assert!(result.inductance_drop_percent().unwrap().abs() < 15.0);
    assert_eq!(bench.outputs_enabled(), [false, false]);
}

fn core_loss_settings() -> CoreLossSessionSettings {
    CoreLossSessionSettings {
        current_range: 0.1,
        ..CoreLossSessionSettings::default()
    }
}

#[test]
fn test_core_loss_balanced_train() {
    let (mut controller, bench) = open_bench(linear_model(), 17);
    let result = CoreLossSession::new(&mut controller, core_loss_settings())
        .measure_asymmetric(10.0, 25e-6, 25e-6)
        .unwrap();

    assert!((result.frequency - 20e3).abs() < 1e-6);
    assert_eq!(result.t_positive, Some(25e-6));
    assert_eq!(result.t_negative, Some(25e-6));
    assert!(result.cycles_analyzed >= 2);
    assert!(result.flux_error_percent < 5.0, "flux error {}", result.flux_error_percent);

    // loss is the core-loss resistance seeing 10 V in both phases
    let expected = 10.0 * 10.0 / InductorModel::default().core_loss_resistance;
    assert!((result.power - expected).abs() / expected < 0.3, "P = {}", result.power);
    assert_eq!(bench.outputs_enabled(), [false, false]);
}

#[test]
fn test_core_loss_from_poor_captures_is_tagged() {
    // 1 V leaves a few mA of ripple on a 2 A range: no attempt resolves it
    let (controller, bench) = open_bench(linear_model(), 26);
    let mut controller = controller.with_max_retries(2);
    let result = CoreLossSession::new(&mut controller, CoreLossSessionSettings::default())
        .measure_asymmetric(1.0, 25e-6, 25e-6)
        .unwrap();

    assert!(result.failed);
    assert_eq!(bench.fired_trains(), 2);
    assert_eq!(bench.outputs_enabled(), [false, false]);
}

#[test]
fn test_core_loss_from_half_bridge_timing() {
    let request = CoreLossTimingRequest {
        frequency: 13.3e3,
        flux_density_pp: 0.2,
        positive_voltage: 10.0,
        negative_voltage: 5.0,
        ..CoreLossTimingRequest::default()
    };
    let timing = CoreLossTiming::from_request(&request).unwrap();
    assert!((timing.t_negative - 2.0 * timing.t_positive).abs() < 1e-12);

    let (mut controller, bench) = open_bench(linear_model(), 27);
    let result = CoreLossSession::new(&mut controller, core_loss_settings())
        .measure_from_timing(&timing, 10.0, 5.0)
        .unwrap();

    assert_eq!(result.t_positive, Some(timing.t_positive));
    assert_eq!(result.t_negative, Some(timing.t_negative));
    assert!((result.frequency - timing.actual_frequency).abs() < 1e-6);
    assert!(!result.failed);
    assert!(result.flux_error_percent < 5.0, "flux error {}", result.flux_error_percent);

    // 10 V for one third of the period and 5 V for two thirds across 2 kohm
    let resistance = InductorModel::default().core_loss_resistance;
    let expected = (100.0 + 2.0 * 25.0) / 3.0 / resistance;
    assert!((result.power - expected).abs() / expected < 0.3, "P = {}", result.power);
    assert_eq!(bench.rail_voltages(), [10.0, 5.0]);
    assert_eq!(bench.outputs_enabled(), [false, false]);
}

/// 50 mT peak-to-peak at 20 kHz on 26 turns of an RM10: about ±5.02 V
fn rm10_flux_target() -> FluxTarget {
    FluxTarget {
        flux_density_ac_pp: 0.05,
        flux_density_dc_bias: 0.0,
        frequency: 20e3,
        turns: 26,
        effective_area: 96.6e-6,
        inductance: 4e-3,
    }
}

#[test]
fn test_flux_target_keeps_balanced_rails() {
    let (mut controller, bench) = open_bench(linear_model(), 31);
    let result = CoreLossSession::new(&mut controller, CoreLossSessionSettings::default())
        .run_flux_target(&rm10_flux_target())
        .unwrap();

    assert_eq!(result.closure, FluxClosure::Closed);
    assert!(result.flux_error_percent < 5.0, "flux error {}", result.flux_error_percent);
    assert!(!result.failed);
    assert!((result.frequency - 20e3).abs() < 1e-6);

    // a balanced bench converges on the planned rails at the first capture
    let planned = 26.0 * 96.6e-6 * 0.05 / 25e-6;
    for rail in bench.rail_voltages() {
        assert!((rail - planned).abs() / planned < 0.03, "rail {} V", rail);
    }
    assert_eq!(bench.fired_trains(), 1);
    assert_eq!(bench.outputs_enabled(), [false, false]);
}

#[test]
fn test_flux_target_respects_current_ceiling() {
    let (mut controller, bench) = open_bench(linear_model(), 32);
    let settings = CoreLossSessionSettings {
        max_current: 0.01,
        ..CoreLossSessionSettings::default()
    };
    let result = CoreLossSession::new(&mut controller, settings).run_flux_target(&rm10_flux_target());
    assert!(matches!(result, Err(MeasurementError::SafetyTrip(_))));
    assert_eq!(bench.outputs_enabled(), [false, false]);
}

#[test]
fn test_core_loss_vs_frequency() {
    let (mut controller, _bench) = open_bench(linear_model(), 18);
    let results = CoreLossSession::new(&mut controller, core_loss_settings())
        .run_vs_frequency(10.0, &[20e3, 10e3], 0.5)
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!((results[0].frequency - 20e3).abs() < 1e-6);
    assert!((results[1].frequency - 10e3).abs() < 1e-6);
    assert!(results.iter().all(|r| r.power > 0.0));
}

#[test]
fn test_core_loss_ratio_is_validated() {
    let (mut controller, bench) = open_bench(linear_model(), 19);
    let mut session = CoreLossSession::new(&mut controller, core_loss_settings());
    for ratio in [0.0, 1.0, 1.5] {
        let result = session.run_vs_frequency(10.0, &[20e3], ratio);
        assert!(matches!(result, Err(MeasurementError::InvalidSetting(_))));
    }
    assert_eq!(bench.fired_trains(), 0);
}

#[test]
fn test_core_loss_safety_trip() {
    let (mut controller, bench) = open_bench(linear_model(), 20);
    let settings = CoreLossSessionSettings {
        max_current: 0.01,
        ..core_loss_settings()
    };
    let result = CoreLossSession::new(&mut controller, settings).run_vs_frequency(10.0, &[20e3, 10e3], 0.5);
    assert!(matches!(result, Err(MeasurementError::SafetyTrip(_))));
    // the second frequency is never excited
    assert_eq!(bench.fired_trains(), 1);
    assert_eq!(bench.outputs_enabled(), [false, false]);
}

#[test]
fn test_timing_search_prefers_balanced_timing() {
    let (mut controller, _bench) = open_bench(linear_model(), 21);
    let search = CoreLossSession::new(&mut controller, core_loss_settings())
        .find_optimal_timing(10.0, 50e-6, (15e-6, 35e-6), 3)
        .unwrap()
        .unwrap();

    assert_eq!(search.candidates.len(), 3);
    assert!((search.optimal.t_positive - 25e-6).abs() < 1e-12);
    assert!((search.optimal.t_negative - 25e-6).abs() < 1e-12);
    let worst = search
        .candidates
        .iter()
        .map(|c| c.flux_error)
        .fold(0.0_f64, f64::max);
    assert!(worst > 20.0);
}

#[test]
fn test_demagnetization_on_bench() {
    let (mut controller, bench) = open_bench(InductorModel::default(), 22);
    let settings = DemagnetizationSettings {
        max_voltage: 4.0,
        num_steps: 4,
        pulses_per_step: 3,
        minimum_voltage: 0.5,
        frequency: 10e3,
    };
    let report = DemagnetizationSequencer::new(settings).run(&mut controller).unwrap();

    assert_eq!(report.amplitudes, vec![4.0, 3.0, 2.0, 1.0]);
    assert_eq!(report.steady_period, 50e-6);
    assert_eq!(bench.fired_trains(), 4);
    assert_eq!(bench.loaded_pulses(), vec![50e-6; 6]);
    assert_eq!(bench.rail_voltages(), [0.0, 0.0]);
    assert_eq!(bench.outputs_enabled(), [false, false]);
    assert_eq!(bench.enable_events(), [4, 4]);
}

#[test]
fn test_sweep_after_demagnetization_reprograms_rails() {
    let (mut controller, bench) = open_bench(linear_model(), 23);
    DemagnetizationSequencer::default().run(&mut controller).unwrap();
    assert_eq!(bench.rail_voltages(), [0.0, 0.0]);

    let result = SaturationSweepController::new(&mut controller)
        .run(&single_point_settings())
        .unwrap();
    assert_eq!(result.points.len(), 1);
    assert_eq!(bench.rail_voltages(), [9.5, 9.5]);
}

#[test]
fn test_saved_capture_reanalyzed() {
    let dir = tempdir().unwrap();
    let trace_path = dir.path().join("capture.csv");
    let sweep_path = dir.path().join("sweep.csv");

    let (mut controller, _bench) = open_bench(linear_model(), 24);
    let settings = single_point_settings();
    let parameters = tpt::pulse::PulseTrainPlanner::default()
        .balanced(settings.voltage, settings.start_frequency, settings.num_pulses)
        .unwrap();
    let acquisition = controller.measure_inductance(&parameters).unwrap();
    assert!(!acquisition.failed);
    let live = acquisition.extraction.unwrap();

    write_trace_file(&trace_path, &acquisition.trace).unwrap();
    let reloaded = read_trace_file(&trace_path).unwrap();
    assert_eq!(reloaded.len(), acquisition.trace.len());

    let offline = tpt::analysis::InductanceExtractor::default()
        .extract(&reloaded, settings.voltage)
        .unwrap();
    assert!((offline.inductance - live.inductance).abs() / live.inductance < 1e-6);

    let result = SaturationSweepController::new(&mut controller).run(&settings).unwrap();
    write_sweep_file(&sweep_path, &result).unwrap();
    let text = std::fs::read_to_string(&sweep_path).unwrap();
    assert_eq!(text.lines().count(), 2);
}

#[test]
fn test_mixed_bench_is_rejected() {
    let json = r#"{
        "power_supply": "Simulated",
        "oscilloscope": "PicoScope2408B",
        "board": "Simulated"
    }"#;
    let config = HardwareConfig::from_json(json).unwrap();
    assert!(!config.is_simulated());
    assert!(matches!(
        config.connect(),
        Err(tpt::config::ConfigError::InconsistentModels(_))
    ));
}
