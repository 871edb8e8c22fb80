//! Target RPM calculation
//!
//! Translates the current and previous averaged temperatures into a target
//! fan speed. The baseline comes from the effective curve (baseline curve
//! plus the trend-selected learned offsets); on top of that the calculator
//! stacks an error term, a learned rate-of-change bias, a pre-heating boost,
//! a trend feed-forward term, and an overheat boost, then clamps to the
//! device range.
//!
//! All arithmetic is integer with division truncating toward zero. The error
//! term pushes only upward: below the setpoint the baseline curve floor
//! governs, and slowing the fan under the curve is left to the learned
//! offsets.

use crate::config::SmartControl;
use crate::curve::{evaluate, CurvePoint};
use crate::offsets::{effective_curve, rate_bucket, RATE_BUCKETS};

/// Pick the offset table matching the current temperature trend: heat while
/// rising, cool while falling, blended when flat (or when a side is empty)
pub fn select_offsets(sc: &SmartControl, delta_t: i32) -> &[i32] {
    if delta_t > 0 && !sc.offsets_heat.is_empty() {
        &sc.offsets_heat
    } else if delta_t < 0 && !sc.offsets_cool.is_empty() {
        &sc.offsets_cool
    } else {
        &sc.blended_offsets
    }
}

/// Compute the target RPM for one tick
///
/// `avg_temp` and `prev_temp` are this tick's and the previous tick's
/// averaged temperatures. The result is clamped to `[0, max_rpm]`; a curve
/// that evaluates to nothing yields 0 ("no control").
pub fn compute_target(
    avg_temp: i32,
    prev_temp: i32,
    curve: &[CurvePoint],
    sc: &SmartControl,
    max_rpm: i32,
) -> i32 {
    let delta_t = avg_temp - prev_temp;

    let active = select_offsets(sc, delta_t);
    let eff = effective_curve(curve, active);
    let base = evaluate(&eff, avg_temp);
    if base <= 0 {
        return 0;
    }
    let mut target = base;

    let err = avg_temp - sc.target_temp;
    if err > sc.hysteresis {
        target += err * (12 + sc.aggressiveness * 4);
    }

    let rate = if delta_t >= 0 { &sc.rate_heat } else { &sc.rate_cool };
    if rate.len() == RATE_BUCKETS {
        target += rate[rate_bucket(delta_t)];
    }

    // Pre-heating boost: closing in on the setpoint from below while rising
    let preheat_band = sc.hysteresis + 4 + sc.trend_gain / 2;
    let gap = sc.target_temp - avg_temp;
    if delta_t > 0 && gap >= 0 && gap <= preheat_band {
        target += (preheat_band - gap) * (4 + sc.aggressiveness + sc.trend_gain);
    }

    if delta_t > 0 {
        target += delta_t * (8 + sc.aggressiveness * 2 + sc.trend_gain * 3);
    } else if delta_t < 0 {
        target += delta_t * (1 + sc.trend_gain / 3);
    }

    if avg_temp >= sc.target_temp + 15 {
        target += 320 + sc.overheat_weight * 15;
    }

    target.clamp(0, max_rpm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::normalize_smart_control;
    use crate::curve::{default_curve, DEVICE_MAX_RPM};

    fn defaults() -> (Vec<CurvePoint>, SmartControl) {
        let curve = default_curve();
        let mut sc = SmartControl::default();
        normalize_smart_control(&mut sc, &curve);
        (curve, sc)
    }

    #[test]
    fn test_steady_below_setpoint_tracks_curve() {
        let (curve, sc) = defaults();
        // 50 C flat, 18 degrees under the setpoint: the curve floor governs
        assert_eq!(compute_target(50, 50, &curve, &sc, DEVICE_MAX_RPM), 1800);
    }

    #[test]
    fn test_error_term_above_setpoint() {
        let (curve, sc) = defaults();
        // 72 C flat: base 2800 plus err 4 * (12 + 5*4) = 128
        assert_eq!(compute_target(72, 72, &curve, &sc, DEVICE_MAX_RPM), 2928);
    }

    #[test]
    fn test_error_term_silent_inside_deadband() {
        let (curve, sc) = defaults();
        // err = 2 = hysteresis: no error term, flat trend, base only
        assert_eq!(compute_target(70, 70, &curve, &sc, DEVICE_MAX_RPM), 2600);
    }

    #[test]
    fn test_empty_curve_returns_zero() {
        let (_, sc) = defaults();
        assert_eq!(compute_target(50, 50, &[], &sc, DEVICE_MAX_RPM), 0);
    }

    #[test]
    fn test_overheat_boost() {
        let (curve, sc) = defaults();
        // 83 C flat, raised clamp so the boost is visible:
        // base 3680 + err 15*32 = 480 + overheat 320 + 8*15 = 440
        assert_eq!(compute_target(83, 83, &curve, &sc, 10_000), 4600);
        // At the device clamp
        assert_eq!(compute_target(83, 83, &curve, &sc, DEVICE_MAX_RPM), 4000);
    }

    #[test]
    fn test_trend_term_rising() {
        let (curve, sc) = defaults();
        // 56 -> 58: base 1800, no error term, trend 2 * (8 + 10 + 12) = 60,
        // no pre-heat (gap 10 > band 8)
        assert_eq!(compute_target(58, 56, &curve, &sc, DEVICE_MAX_RPM), 1860);
    }

    #[test]
    fn test_preheat_boost_near_setpoint() {
        let (curve, sc) = defaults();
        // 62 -> 64 rising, gap 4 inside band 8: base 2100,
        // preheat (8-4)*(4+5+4) = 52, trend 2*30 = 60
        assert_eq!(compute_target(64, 62, &curve, &sc, DEVICE_MAX_RPM), 2212);
    }

    #[test]
    fn test_falling_trend_drops_target() {
        let (curve, sc) = defaults();
        // 72 -> 70 falling: base 2600, err 2 inside deadband,
        // trend -2 * (1 + 4/3 = 2) = -4
        assert_eq!(compute_target(70, 72, &curve, &sc, DEVICE_MAX_RPM), 2596);
    }

    #[test]
    fn test_rate_bias_applied() {
        let (curve, mut sc) = defaults();
        sc.rate_heat[crate::offsets::rate_bucket(0)] = 150;
        assert_eq!(compute_target(70, 70, &curve, &sc, DEVICE_MAX_RPM), 2750);
        sc.rate_cool[crate::offsets::rate_bucket(-2)] = -40;
        // 72 -> 70 falling: 2596 from the falling-trend case, minus 40
        assert_eq!(compute_target(70, 72, &curve, &sc, DEVICE_MAX_RPM), 2556);
    }

    #[test]
    fn test_active_offsets_follow_trend() {
        let (curve, mut sc) = defaults();
        sc.offsets_heat = vec![200; curve.len()];
        sc.offsets_cool = vec![0; curve.len()];
        // Rising at 70: heat table lifts the base (2600 -> 2800),
        // trend 2*30 = 60, err 2 inside deadband, no preheat (gap < 0)
        assert_eq!(compute_target(70, 68, &curve, &sc, DEVICE_MAX_RPM), 2860);
        // Falling at 70: cool table leaves the base alone
        assert_eq!(compute_target(70, 72, &curve, &sc, DEVICE_MAX_RPM), 2596);
    }
}
