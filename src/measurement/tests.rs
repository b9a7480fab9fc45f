//! Controller behaviour against recording mock instruments.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::*;
use crate::capture::CaptureTrace;
use crate::instruments::{
    ChannelConfiguration, InstrumentError, Oscilloscope, PowerSupply, PulseBoard, ScopeChannel,
};
use crate::pulse::{PulseTrainPlanner, TestParameters};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Enable(u8),
    Disable(u8),
    SetVoltage(u8, f64),
    ResetLimits,
    CurrentLimit(u8),
    Arm,
    SetSamples,
    SetSamplingTime,
    RunBlock,
    ReadData,
    BoardReset,
    AddPulse,
    RunPulses,
}

type Log = Rc<RefCell<Vec<Call>>>;

fn count(log: &Log, call: &Call) -> usize {
    log.borrow().iter().filter(|c| *c == call).count()
}

fn position(log: &Log, call: &Call) -> Option<usize> {
    log.borrow().iter().position(|c| c == call)
}

struct MockSupply {
    log: Log,
    rails: [f64; 2],
    readback_offsets: VecDeque<f64>,
    fail_enable_negative: bool,
}

impl PowerSupply for MockSupply {
    fn enable_output(&mut self, channel: u8) -> Result<(), InstrumentError> {
        self.log.borrow_mut().push(Call::Enable(channel));
        if channel == 2 && self.fail_enable_negative {
            return Err(InstrumentError::ProtocolTimeout {
                command: "OUTP:STAT 1".to_string(),
            });
        }
        Ok(())
    }
    fn disable_output(&mut self, channel: u8) -> Result<(), InstrumentError> {
        self.log.borrow_mut().push(Call::Disable(channel));
        Ok(())
    }
    fn set_source_voltage(&mut self, channel: u8, voltage: f64) -> Result<(), InstrumentError> {
        self.log.borrow_mut().push(Call::SetVoltage(channel, voltage));
        self.rails[usize::from(channel - 1)] = voltage;
        Ok(())
    }
    fn source_voltage(&mut self, channel: u8) -> Result<f64, InstrumentError> {
        let offset = self.readback_offsets.pop_front().unwrap_or(0.0);
        Ok(self.rails[usize::from(channel - 1)] + offset)
    }
    fn set_current_limit(&mut self, channel: u8, _limit: f64) -> Result<(), InstrumentError> {
        self.log.borrow_mut().push(Call::CurrentLimit(channel));
        Ok(())
    }
    fn set_voltage_limit(&mut self, _channel: u8, _limit: f64) -> Result<(), InstrumentError> {
        Ok(())
    }
    fn measured_voltage(&mut self, _channel: u8) -> Result<f64, InstrumentError> {
        Ok(0.0)
    }
    fn measured_current(&mut self, _channel: u8) -> Result<f64, InstrumentError> {
        Ok(0.0)
    }
    fn measured_power(&mut self, _channel: u8) -> Result<f64, InstrumentError> {
        Ok(0.0)
    }
    fn reset_limits(&mut self) -> Result<(), InstrumentError> {
        self.log.borrow_mut().push(Call::ResetLimits);
        Ok(())
    }
}

struct MockScope {
    log: Log,
    traces: VecDeque<CaptureTrace>,
    fallback: CaptureTrace,
}

impl Oscilloscope for MockScope {
    fn set_channel_configuration(
        &mut self,
        _channel: ScopeChannel,
        configuration: ChannelConfiguration,
    ) -> Result<f64, InstrumentError> {
        Ok(configuration.input_range)
    }
    fn set_rising_trigger(&mut self, _channel: ScopeChannel, _threshold: f64, _timeout_ms: u32) -> Result<(), InstrumentError> {
        Ok(())
    }
    fn arm_trigger(&mut self, _channel: ScopeChannel) -> Result<(), InstrumentError> {
        self.log.borrow_mut().push(Call::Arm);
        Ok(())
    }
    fn disarm_trigger(&mut self, _channel: ScopeChannel) -> Result<(), InstrumentError> {
        Ok(())
    }
    fn set_number_samples(&mut self, _number_samples: usize) -> Result<(), InstrumentError> {
        self.log.borrow_mut().push(Call::SetSamples);
        Ok(())
    }
    fn set_sampling_time(&mut self, sampling_time: f64) -> Result<f64, InstrumentError> {
        self.log.borrow_mut().push(Call::SetSamplingTime);
        Ok(sampling_time)
    }
    fn set_probe_scale(&mut self, _channel: ScopeChannel, _scale: f64) -> Result<(), InstrumentError> {
        Ok(())
    }
    fn run_acquisition_block(&mut self) -> Result<(), InstrumentError> {
        self.log.borrow_mut().push(Call::RunBlock);
        Ok(())
    }
    fn read_data(&mut self) -> Result<CaptureTrace, InstrumentError> {
        self.log.borrow_mut().push(Call::ReadData);
        Ok(self.traces.pop_front().unwrap_or_else(|| self.fallback.clone()))
    }
}

struct MockBoard {
    log: Log,
    fail_run: bool,
}

impl PulseBoard for MockBoard {
    fn reset(&mut self) -> Result<(), InstrumentError> {
        self.log.borrow_mut().push(Call::BoardReset);
        Ok(())
    }
    fn clear_pulses(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }
    fn add_pulse(&mut self, _period: f64) -> Result<(), InstrumentError> {
        self.log.borrow_mut().push(Call::AddPulse);
        Ok(())
    }
    fn read_pulses(&mut self) -> Result<Vec<f64>, InstrumentError> {
        Ok(Vec::new())
    }
    fn run_pulses(&mut self, _repetitions: u32) -> Result<(), InstrumentError> {
        self.log.borrow_mut().push(Call::RunPulses);
        if self.fail_run {
            return Err(InstrumentError::UnexpectedResponse {
                command: "PULSE:RUN 1".to_string(),
                response: "ERR".to_string(),
            });
        }
        Ok(())
    }
    fn identification(&mut self) -> Result<String, InstrumentError> {
        Ok("MOCK".to_string())
    }
    fn version(&mut self) -> Result<String, InstrumentError> {
        Ok("0".to_string())
    }
    fn minimum_period(&mut self) -> Result<f64, InstrumentError> {
        Ok(1e-7)
    }
    fn maximum_period(&mut self) -> Result<f64, InstrumentError> {
        Ok(1.0)
    }
}

/// 10 V on the input and 50 distinct current codes.
fn good_trace() -> CaptureTrace {
    let current: Vec<f64> = (0..1000).map(|i| (i % 50) as f64 * 1e-3).collect();
    CaptureTrace::new(1e-8, vec![10.0; 1000], vec![10.0; 1000], current).unwrap()
}

/// Missed trigger: nothing on the input, flat current.
fn idle_trace() -> CaptureTrace {
    CaptureTrace::new(1e-8, vec![0.0; 1000], vec![0.0; 1000], vec![0.0; 1000]).unwrap()
}

struct Rig {
    log: Log,
    controller: AcquisitionController<MockSupply, MockScope, MockBoard, ManualClock>,
}

fn rig(traces: Vec<CaptureTrace>, fallback: CaptureTrace) -> Rig {
    let log: Log = Rc::default();
    let supply = MockSupply {
        log: Rc::clone(&log),
        rails: [0.0; 2],
        readback_offsets: VecDeque::new(),
        fail_enable_negative: false,
    };
    let scope = MockScope {
        log: Rc::clone(&log),
        traces: traces.into(),
        fallback,
    };
    let board = MockBoard {
        log: Rc::clone(&log),
        fail_run: false,
    };
    let controller = AcquisitionController::new(supply, scope, board)
        .with_clock(ManualClock::new())
        .with_max_retries(3);
    Rig { log, controller }
}

fn params(voltage: f64) -> TestParameters {
    PulseTrainPlanner::default().balanced(voltage, 100e3, 2).unwrap()
}

/// Rail disables after the supply's startup sequence
fn attempt_disables(log: &Log, channel: u8) -> usize {
    count(log, &Call::Disable(channel)) - 1
}

#[test]
fn test_accepted_first_attempt_disables_once() {
    let mut rig = rig(vec![good_trace()], idle_trace());
    let acquisition = rig.controller.acquire(&params(10.0), |_| Some(())).unwrap();

    assert!(!acquisition.failed);
    assert_eq!(acquisition.attempts, 1);
    assert_eq!(rig.controller.state(), AcquisitionState::Accepted);
    assert_eq!(count(&rig.log, &Call::Enable(1)), 1);
    assert_eq!(attempt_disables(&rig.log, 1), 1);
    assert_eq!(attempt_disables(&rig.log, 2), 1);
}

#[test]
fn test_scope_armed_before_train_fires() {
    let mut rig = rig(vec![good_trace()], idle_trace());
    rig.controller.acquire(&params(10.0), |_| Some(())).unwrap();

    let arm = position(&rig.log, &Call::Arm).unwrap();
    let block = position(&rig.log, &Call::RunBlock).unwrap();
    let enable = position(&rig.log, &Call::Enable(1)).unwrap();
    let fire = position(&rig.log, &Call::RunPulses).unwrap();
    let read = position(&rig.log, &Call::ReadData).unwrap();
    assert!(arm < enable);
    assert!(enable < block);
    assert!(block < fire);
    assert!(fire < read);

    let samples = position(&rig.log, &Call::SetSamples).unwrap();
    let timebase = position(&rig.log, &Call::SetSamplingTime).unwrap();
    assert!(samples < timebase);

    let log = rig.log.borrow();
    let tail = &log[log.len() - 2..];
    assert_eq!(tail, &[Call::Disable(1), Call::Disable(2)]);
}

#[test]
fn test_exhaustion_returns_best_capture() {
    let mut rig = rig(Vec::new(), idle_trace());
    let acquisition = rig.controller.acquire(&params(10.0), |_| Some(())).unwrap();

    assert!(acquisition.failed);
    assert!(acquisition.extraction.is_none());
    assert_eq!(acquisition.attempts, 3);
    assert_eq!(rig.controller.state(), AcquisitionState::Failed);
    assert_eq!(count(&rig.log, &Call::RunPulses), 3);
    assert_eq!(count(&rig.log, &Call::Enable(1)), 3);
    assert_eq!(attempt_disables(&rig.log, 1), 3);
    assert_eq!(attempt_disables(&rig.log, 2), 3);
}

#[test]
fn test_extraction_failure_retries() {
    let mut rig = rig(Vec::new(), good_trace());
    let mut calls = 0;
    let acquisition = rig
        .controller
        .acquire(&params(10.0), |_| {
            calls += 1;
            (calls == 2).then_some(calls)
        })
        .unwrap();

    assert_eq!(acquisition.extraction, Some(2));
    assert_eq!(acquisition.attempts, 2);
    assert_eq!(attempt_disables(&rig.log, 1), 2);
}

#[test]
fn test_retry_waits() {
    let mut rig = rig(vec![idle_trace()], good_trace());
    rig.controller.acquire(&params(10.0), |_| Some(())).unwrap();

    let sleeps = rig.controller.clock().sleeps();
    // settle, capture wait, pause, retry settle, settle, capture wait
    assert_eq!(sleeps.len(), 6);
    assert_eq!(sleeps[2], std::time::Duration::from_millis(100));
    assert_eq!(sleeps[3], retry_settle_time(100e3));
}

#[test]
fn test_fire_error_still_disables_outputs() {
    let mut rig = rig(Vec::new(), good_trace());
    rig.controller.board_mut().fail_run = true;
    let err = rig.controller.acquire(&params(10.0), |_| Some(())).unwrap_err();

    assert!(matches!(err, MeasurementError::InstrumentError(_)));
    assert_eq!(count(&rig.log, &Call::RunPulses), 1);
    assert_eq!(attempt_disables(&rig.log, 1), 1);
    assert_eq!(attempt_disables(&rig.log, 2), 1);
    let log = rig.log.borrow();
    assert_eq!(log.last(), Some(&Call::Disable(2)));
}

#[test]
fn test_enable_error_still_disables_both_rails() {
    let mut rig = rig(Vec::new(), good_trace());
    rig.controller.power_supply_mut().fail_enable_negative = true;
    let err = rig.controller.acquire(&params(10.0), |_| Some(())).unwrap_err();

    assert!(matches!(err, MeasurementError::InstrumentError(InstrumentError::ProtocolTimeout { .. })));
    assert_eq!(count(&rig.log, &Call::RunPulses), 0);
    assert_eq!(attempt_disables(&rig.log, 1), 1);
    assert_eq!(attempt_disables(&rig.log, 2), 1);
}

#[test]
fn test_supply_startup_and_reprogram_cache() {
    let mut rig = rig(Vec::new(), good_trace());
    rig.controller.acquire(&params(10.0), |_| Some(())).unwrap();
    rig.controller.acquire(&params(10.0), |_| Some(())).unwrap();

    assert_eq!(count(&rig.log, &Call::ResetLimits), 1);
    assert_eq!(count(&rig.log, &Call::CurrentLimit(1)), 1);
    assert_eq!(count(&rig.log, &Call::SetVoltage(1, 10.0)), 1);
    assert_eq!(count(&rig.log, &Call::SetVoltage(2, 10.0)), 1);

    rig.controller.acquire(&params(8.0), |_| Some(())).unwrap();
    assert_eq!(count(&rig.log, &Call::SetVoltage(1, 8.0)), 1);
    assert_eq!(count(&rig.log, &Call::ResetLimits), 1);
}

#[test]
fn test_small_readback_error_reprograms_once() {
    let mut rig = rig(Vec::new(), good_trace());
    rig.controller.power_supply_mut().readback_offsets = vec![0.02].into();
    rig.controller.acquire(&params(10.0), |_| Some(())).unwrap();

    assert_eq!(count(&rig.log, &Call::SetVoltage(1, 10.0)), 2);
    assert_eq!(count(&rig.log, &Call::SetVoltage(2, 10.0)), 1);
}

#[test]
fn test_large_readback_error_is_fatal() {
    let mut rig = rig(Vec::new(), good_trace());
    rig.controller.power_supply_mut().readback_offsets = vec![1.0].into();
    let err = rig.controller.acquire(&params(10.0), |_| Some(())).unwrap_err();

    assert!(matches!(err, MeasurementError::VoltageMismatch { channel: 1, .. }));
    assert_eq!(count(&rig.log, &Call::RunPulses), 0);

    // The failed rail is programmed again on the next request.
    rig.controller.acquire(&params(10.0), |_| Some(())).unwrap();
    assert_eq!(count(&rig.log, &Call::SetVoltage(1, 10.0)), 2);
}

#[test]
fn test_demagnetization_ramp() {
    let mut rig = rig(Vec::new(), good_trace());
    let sequencer = DemagnetizationSequencer::new(DemagnetizationSettings {
        max_voltage: 4.0,
        num_steps: 4,
        minimum_voltage: 1.0,
        ..DemagnetizationSettings::default()
    });
    let report = sequencer.run(&mut rig.controller).unwrap();

    assert_eq!(report.amplitudes, vec![4.0, 3.0, 2.0, 1.0]);
    assert_eq!(count(&rig.log, &Call::RunPulses), 4);
    assert_eq!(count(&rig.log, &Call::AddPulse), 4 * 2 * 2);

    let log = rig.log.borrow();
    let positive: Vec<f64> = log
        .iter()
        .filter_map(|c| match c {
            Call::SetVoltage(1, v) => Some(*v),
            _ => None,
        })
        .collect();
    assert_eq!(positive, vec![4.0, 3.0, 2.0, 1.0, 0.0]);
    assert_eq!(&log[log.len() - 2..], &[Call::Disable(1), Call::Disable(2)]);
    assert_eq!(
        log.iter().filter(|c| **c == Call::Enable(1)).count(),
        log.iter().filter(|c| **c == Call::Disable(1)).count() - 1
    );
}

#[test]
fn test_demagnetization_error_disables_outputs() {
    let mut rig = rig(Vec::new(), good_trace());
    rig.controller.board_mut().fail_run = true;
    let err = DemagnetizationSequencer::default().run(&mut rig.controller).unwrap_err();

    assert!(matches!(err, MeasurementError::InstrumentError(_)));
    let log = rig.log.borrow();
    assert_eq!(&log[log.len() - 2..], &[Call::Disable(1), Call::Disable(2)]);
}

#[test]
fn test_demagnetization_rejects_zero_steps() {
    let mut rig = rig(Vec::new(), good_trace());
    let sequencer = DemagnetizationSequencer::new(DemagnetizationSettings {
        num_steps: 0,
        ..DemagnetizationSettings::default()
    });
    assert!(matches!(
        sequencer.run(&mut rig.controller),
        Err(MeasurementError::InvalidSetting(_))
    ));
    assert!(rig.log.borrow().is_empty());
}

#[test]
fn test_sweep_skips_point_with_readback_mismatch() {
    let mut rig = rig(Vec::new(), idle_trace());
    rig.controller.power_supply_mut().readback_offsets = vec![1.0].into();
    let summary = SaturationSweepController::new(&mut rig.controller)
        .run_inductance_sweep(10.0, &[100e3, 100e3, 100e3], 2)
        .unwrap();

    assert_eq!(summary.attempted, 3);
    assert!(summary.points.is_empty());
    // the rejected rail is programmed again for the next point, which fires
    assert_eq!(count(&rig.log, &Call::SetVoltage(1, 10.0)), 2);
    assert_eq!(count(&rig.log, &Call::RunPulses), 6);
    let log = rig.log.borrow();
    assert_eq!(&log[log.len() - 2..], &[Call::Disable(1), Call::Disable(2)]);
}

#[test]
fn test_errors_that_end_a_sweep() {
    assert!(MeasurementError::SafetyTrip("peak current".to_string()).aborts_sweep());
    assert!(MeasurementError::InvalidSetting("ratio".to_string()).aborts_sweep());
    assert!(!MeasurementError::AnalysisError(crate::analysis::AnalysisError::NoClosedLoop).aborts_sweep());
    assert!(!MeasurementError::VoltageMismatch {
        channel: 1,
        requested: 10.0,
        readback: 11.0
    }
    .aborts_sweep());
}
