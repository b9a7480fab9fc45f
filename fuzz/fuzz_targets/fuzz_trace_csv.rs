#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

use tpt::analysis::{CoreLossIntegrator, InductanceExtractor};
use tpt::report::read_trace;

fuzz_target!(|data: &[u8]| {
    // Malformed files must be rejected with an error, never a panic
    let Ok(trace) = read_trace(Cursor::new(data)) else {
        return;
    };

    // Whatever parses must also survive both extraction stages
    let voltage = trace.max_input_voltage();
    let _ = InductanceExtractor::default().extract(&trace, voltage);
    let _ = InductanceExtractor::default().extract_dc_biased(&trace, voltage);

    let integrator = CoreLossIntegrator::default();
    let _ = integrator.integrate(&trace, 100e3);
    let _ = integrator.analyze_loops(&trace, 100e3);
    let _ = integrator.steady_flux_error(&trace);
});
