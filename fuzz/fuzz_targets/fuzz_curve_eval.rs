//! Fuzz target for curve sanitizing and evaluation
//!
//! Arbitrary point lists must sanitize into a valid curve and evaluate
//! without panicking at any temperature.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use bs2ctl::{evaluate, sanitize_curve, validate_curve, CurvePoint};

#[derive(Debug, Arbitrary)]
struct FuzzCurve {
    points: Vec<(i16, i16)>,
    probe: i16,
}

fuzz_target!(|input: FuzzCurve| {
    let mut curve: Vec<CurvePoint> = input
        .points
        .iter()
        .map(|&(t, r)| CurvePoint::new(t as i32, r as i32))
        .collect();
    sanitize_curve(&mut curve);
    assert!(validate_curve(&curve).is_ok());
    let rpm = evaluate(&curve, input.probe as i32);
    assert!((0..=4000).contains(&rpm) || curve.is_empty());
});
