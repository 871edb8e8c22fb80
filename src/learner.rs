//! Stability-gated learning of fan-curve offsets and rate biases
//!
//! After every active tick the learner scores how well the emitted fan speed
//! served the thermal state and folds that score back into the learned
//! state: the per-curve-point offset tables (heat while rising, cool while
//! falling) and the rate-of-change bias tables.
//!
//! Updates are gated on a stable window of recent averaged temperatures so
//! that the score reflects an equilibrium rather than a transient, with an
//! overheat override that keeps learning alive when the pad is clearly too
//! hot. The curve point receiving the update is chosen from a delayed sample
//! to compensate the thermal inertia between a fan action and the
//! temperature response. Each update is spread over neighbouring points,
//! mirrored at reduced strength onto the passive table, smoothed, and
//! clamped back into the admissible envelope.
//!
//! All arithmetic is integer with division truncating toward zero.

use crate::config::SmartControl;
use crate::curve::CurvePoint;
use crate::offsets::{
    blend, clamp_offset_for_point, edge_bounds, rate_bucket, rate_cap, RATE_BUCKETS,
};

/// Scores below this magnitude are ignored
pub const SCORE_DEAD_BAND: i32 = 4;

/// RPM above which the noise penalty starts accruing
pub const NOISE_FLOOR_RPM: i32 = 2800;

/// Bounds on a single per-point offset step
pub const OFFSET_STEP_MIN: i32 = -4;
pub const OFFSET_STEP_MAX: i32 = 6;

/// Bounds on a single rate-bias step
pub const RATE_STEP_MIN: i32 = -3;
pub const RATE_STEP_MAX: i32 = 4;

/// One tick's worth of learner inputs
#[derive(Debug, Clone)]
pub struct LearnInput<'a> {
    /// This tick's averaged temperature
    pub avg_temp: i32,
    /// Previous tick's averaged temperature
    pub prev_temp: i32,
    /// This tick's emitted target (attempted, whether or not submitted)
    pub target_rpm: i32,
    /// Previous tick's emitted target
    pub last_target_rpm: i32,
    /// Recent averaged temperatures, oldest first
    pub recent_temps: &'a [i32],
    /// Baseline curve
    pub curve: &'a [CurvePoint],
}

/// Index of the curve point nearest `temp` by absolute temperature
/// difference; ties resolve to the lower index
pub fn nearest_curve_index(curve: &[CurvePoint], temp: i32) -> Option<usize> {
    curve
        .iter()
        .enumerate()
        .min_by_key(|(_, p)| (p.temperature - temp).abs())
        .map(|(i, _)| i)
}

/// A window is stable when its spread stays within the setpoint dead-band
/// (at least 2 degrees)
pub fn window_is_stable(window: &[i32], hysteresis: i32) -> bool {
    let (mut min, mut max) = match window.first() {
        Some(&v) => (v, v),
        None => return false,
    };
    for &v in window {
        min = min.min(v);
        max = max.max(v);
    }
    max - min <= 2.max(hysteresis + 1)
}

/// Scale `x` by `num/den`, rounding magnitude up and never collapsing a
/// non-zero value to zero
pub fn scale(x: i32, num: i32, den: i32) -> i32 {
    if x == 0 {
        return 0;
    }
    let magnitude = (x.abs() * num + den - 1) / den;
    x.signum() * magnitude.max(1)
}

/// Divide a raw score into a bounded step; a quotient of zero falls back to
/// the score's sign so small persistent errors still move the tables
fn quantize(raw: i32, divisor: i32, lo: i32, hi: i32) -> i32 {
    let mut step = raw / divisor;
    if step == 0 {
        step = raw.signum();
    }
    step.clamp(lo, hi)
}

/// Raw learning score for one tick
///
/// Positive scores say "the fan should have been faster here", negative
/// scores say the opposite. The base terms weigh the setpoint error, the
/// overheat excess, and the current trend against penalties for RPM churn
/// and high-RPM noise; feed-forward corrections account for approach to the
/// setpoint, the delayed trend at the learning point, undershoot, and quiet
/// steady operation.
pub fn raw_score(sc: &SmartControl, input: &LearnInput<'_>, learn_delta_t: i32) -> i32 {
    let t = input.avg_temp;
    let err = t - sc.target_temp;
    let delta_t = t - input.prev_temp;
    let overheat = (t - (sc.target_temp + sc.hysteresis)).max(0);
    let rpm_delta = (input.target_rpm - input.last_target_rpm).abs();
    let noise = (input.target_rpm - NOISE_FLOOR_RPM).max(0);

    let mut raw = err * (4 + sc.learn_rate)
        + overheat * (2 + sc.overheat_weight)
        + delta_t * (2 + sc.trend_gain)
        - (rpm_delta / 30.max(sc.min_rpm_change)) * (2 + sc.rpm_delta_weight)
        - (noise / 180) * sc.noise_weight;

    // Approaching the setpoint from below while rising
    let gap = sc.target_temp - t;
    let band = sc.hysteresis + 4;
    if delta_t > 0 && gap >= 0 && gap <= band {
        raw += (band - gap) * (1 + sc.trend_gain / 2);
    }

    // Delayed trend at the learning point
    if learn_delta_t > 0 {
        raw += learn_delta_t * (2 + sc.trend_gain);
    } else if learn_delta_t < 0 {
        raw += learn_delta_t * 1.max(sc.trend_gain / 2);
    }

    // Undershoot: already past the low side of the band and not recovering
    if err < -sc.hysteresis - 1 && delta_t <= 0 {
        raw -= 3 + sc.noise_weight;
    }

    // Quiescent: warming gently with a settled fan near the band
    if delta_t > 0
        && rpm_delta <= 20.max(sc.min_rpm_change / 2)
        && err <= sc.hysteresis + 2
    {
        raw -= 4 + sc.noise_weight / 2;
    }

    raw
}

fn bump_offset(
    table: &mut [i32],
    idx: usize,
    delta: i32,
    curve: &[CurvePoint],
    edge_min: i32,
    edge_max: i32,
    max_learn_offset: i32,
) {
    if delta == 0 {
        return;
    }
    table[idx] = clamp_offset_for_point(
        table[idx] + delta,
        curve[idx].rpm,
        edge_min,
        edge_max,
        max_learn_offset,
    );
}

fn bump_rate(table: &mut [i32], bucket: usize, delta: i32, cap: i32) {
    if delta == 0 {
        return;
    }
    table[bucket] = (table[bucket] + delta).clamp(-cap, cap);
}

/// 3-tap weighted smoothing followed by a neighbour-jump clamp
///
/// The weighted mean runs over a snapshot so the pass is order-independent;
/// the jump clamp then walks left to right keeping successive entries within
/// `max_jump` of each other.
fn smooth_table(table: &mut [i32], weights: (i32, i32, i32), max_jump: i32) {
    let snapshot: Vec<i32> = table.to_vec();
    let n = snapshot.len();
    for i in 0..n {
        let mut sum = weights.1 * snapshot[i];
        let mut div = weights.1;
        if i > 0 {
            sum += weights.0 * snapshot[i - 1];
            div += weights.0;
        }
        if i + 1 < n {
            sum += weights.2 * snapshot[i + 1];
            div += weights.2;
        }
        table[i] = sum / div;
    }
    for i in 1..n {
        let lo = table[i - 1] - max_jump;
        let hi = table[i - 1] + max_jump;
        table[i] = table[i].clamp(lo, hi);
    }
}

fn smooth_offsets(
    table: &mut [i32],
    curve: &[CurvePoint],
    edge_min: i32,
    edge_max: i32,
    max_learn_offset: i32,
) {
    let max_jump = (max_learn_offset / 10).clamp(20, 90);
    smooth_table(table, (1, 5, 1), max_jump);
    for (i, p) in curve.iter().enumerate() {
        table[i] = clamp_offset_for_point(table[i], p.rpm, edge_min, edge_max, max_learn_offset);
    }
}

fn smooth_rates(table: &mut [i32], cap: i32, max_learn_offset: i32) {
    let max_jump = (max_learn_offset / 20).clamp(12, 45);
    smooth_table(table, (2, 4, 2), max_jump);
    for v in table.iter_mut() {
        *v = (*v).clamp(-cap, cap);
    }
}

/// Run one learning step; returns true if any learned array changed
///
/// Skips when history is too short, when the stability window shows a
/// transient (unless the pad is overheating), and at a cold equilibrium far
/// below the setpoint where the curve floor already pins the fan.
pub fn learn_tick(sc: &mut SmartControl, input: &LearnInput<'_>) -> bool {
    if !sc.learning || input.curve.is_empty() {
        return false;
    }
    let len = input.recent_temps.len();
    let min_required = sc.learn_window + sc.learn_delay;
    if len < min_required {
        return false;
    }

    let t = input.avg_temp;
    let start = len - min_required;
    let window = &input.recent_temps[start..start + sc.learn_window];
    let stable = window_is_stable(window, sc.hysteresis);
    let overheat_override = t >= sc.target_temp + sc.hysteresis + 3;
    if !stable && !overheat_override {
        return false;
    }

    let learn_temp = input.recent_temps[len - sc.learn_delay];
    let learn_prev = input.recent_temps[len - sc.learn_delay - 1];
    let learn_delta_t = learn_temp - learn_prev;
    let delta_t = t - input.prev_temp;
    let err = t - sc.target_temp;

    // Cold equilibrium: far under the setpoint with nothing moving. The
    // admissible range at the curve floor is empty downward, so there is
    // nothing to learn.
    if stable && err < -sc.hysteresis - 1 && delta_t <= 0 && learn_delta_t <= 0 {
        return false;
    }

    let raw = raw_score(sc, input, learn_delta_t);
    if raw.abs() < SCORE_DEAD_BAND {
        return false;
    }

    let idx = match nearest_curve_index(input.curve, learn_temp) {
        Some(i) => i,
        None => return false,
    };

    let before = (
        sc.offsets_heat.clone(),
        sc.offsets_cool.clone(),
        sc.rate_heat.clone(),
        sc.rate_cool.clone(),
    );

    let step = quantize(raw, 10.max(24 - 2 * sc.learn_rate), OFFSET_STEP_MIN, OFFSET_STEP_MAX);
    let (edge_min, edge_max) = edge_bounds(input.curve);
    let n = input.curve.len();
    let heating = delta_t >= 0;

    {
        let (active, passive) = if heating {
            (&mut sc.offsets_heat, &mut sc.offsets_cool)
        } else {
            (&mut sc.offsets_cool, &mut sc.offsets_heat)
        };

        // Full step at the learning point, tapering over its neighbours
        let spread = [
            (0i32, step),
            (-1, scale(step, 2, 3)),
            (1, scale(step, 2, 3)),
            (-2, scale(step, 1, 3)),
            (2, scale(step, 1, 3)),
        ];
        for (shift, delta) in spread {
            let j = idx as i32 + shift;
            if j >= 0 && (j as usize) < n {
                bump_offset(
                    active,
                    j as usize,
                    delta,
                    input.curve,
                    edge_min,
                    edge_max,
                    sc.max_learn_offset,
                );
            }
        }
        bump_offset(
            passive,
            idx,
            scale(step, 1, 8),
            input.curve,
            edge_min,
            edge_max,
            sc.max_learn_offset,
        );

        smooth_offsets(active, input.curve, edge_min, edge_max, sc.max_learn_offset);
        smooth_offsets(passive, input.curve, edge_min, edge_max, sc.max_learn_offset);
    }

    // Rate-of-change bias update, same shape over the bucket axis
    if sc.rate_heat.len() == RATE_BUCKETS && sc.rate_cool.len() == RATE_BUCKETS {
        let rate_step = quantize(raw, 14.max(28 - 2 * sc.learn_rate), RATE_STEP_MIN, RATE_STEP_MAX);
        let cap = rate_cap(sc.max_learn_offset);
        let bucket = rate_bucket(delta_t);
        let (active, passive) = if heating {
            (&mut sc.rate_heat, &mut sc.rate_cool)
        } else {
            (&mut sc.rate_cool, &mut sc.rate_heat)
        };

        bump_rate(active, bucket, rate_step, cap);
        for shift in [-1i32, 1] {
            let b = bucket as i32 + shift;
            if b >= 0 && (b as usize) < RATE_BUCKETS {
                bump_rate(active, b as usize, scale(rate_step, 2, 3), cap);
            }
        }
        bump_rate(passive, bucket, scale(rate_step, 1, 8), cap);

        smooth_rates(active, cap, sc.max_learn_offset);
        smooth_rates(passive, cap, sc.max_learn_offset);
    }

    sc.blended_offsets = blend(&sc.offsets_heat, &sc.offsets_cool);
    for (i, p) in input.curve.iter().enumerate() {
        sc.blended_offsets[i] = clamp_offset_for_point(
            sc.blended_offsets[i],
            p.rpm,
            edge_min,
            edge_max,
            sc.max_learn_offset,
        );
    }

    before
        != (
            sc.offsets_heat.clone(),
            sc.offsets_cool.clone(),
            sc.rate_heat.clone(),
            sc.rate_cool.clone(),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::normalize_smart_control;
    use crate::curve::default_curve;

    fn setup() -> (Vec<CurvePoint>, SmartControl) {
        let curve = default_curve();
        let mut sc = SmartControl::default();
        normalize_smart_control(&mut sc, &curve);
        (curve, sc)
    }

    #[test]
    fn test_nearest_curve_index_ties_to_lower() {
        let curve = default_curve();
        // 66 is equidistant between 64 and 68
        assert_eq!(nearest_curve_index(&curve, 66), Some(7));
        assert_eq!(nearest_curve_index(&curve, 68), Some(8));
        assert_eq!(nearest_curve_index(&curve, 0), Some(0));
        assert_eq!(nearest_curve_index(&curve, 200), Some(13));
        assert_eq!(nearest_curve_index(&[], 50), None);
    }

    #[test]
    fn test_window_is_stable() {
        assert!(window_is_stable(&[70, 71, 70, 72], 2));
        assert!(!window_is_stable(&[64, 66, 68, 70], 2));
        // Floor of 2 even with zero hysteresis
        assert!(window_is_stable(&[70, 72], 0));
        assert!(!window_is_stable(&[70, 73], 0));
        assert!(!window_is_stable(&[], 2));
    }

    #[test]
    fn test_scale_never_collapses() {
        assert_eq!(scale(0, 2, 3), 0);
        assert_eq!(scale(1, 1, 8), 1);
        assert_eq!(scale(-1, 1, 8), -1);
        assert_eq!(scale(4, 2, 3), 3);
        assert_eq!(scale(-4, 2, 3), -3);
        assert_eq!(scale(4, 1, 3), 2);
        assert_eq!(scale(6, 1, 8), 1);
    }

    #[test]
    fn test_skip_on_short_history() {
        let (curve, mut sc) = setup();
        let recent = vec![72; 3];
        let input = LearnInput {
            avg_temp: 72,
            prev_temp: 72,
            target_rpm: 2900,
            last_target_rpm: 2900,
            recent_temps: &recent,
            curve: &curve,
        };
        assert!(!learn_tick(&mut sc, &input));
        assert_eq!(sc.offsets_heat, vec![0; curve.len()]);
    }

    #[test]
    fn test_skip_on_unstable_window() {
        let (curve, mut sc) = setup();
        // Rising fast, not yet overheating
        let recent = vec![58, 61, 64, 67, 70];
        let input = LearnInput {
            avg_temp: 70,
            prev_temp: 67,
            target_rpm: 2700,
            last_target_rpm: 2500,
            recent_temps: &recent,
            curve: &curve,
        };
        assert!(!learn_tick(&mut sc, &input));
    }

    #[test]
    fn test_overheat_override_learns_through_transient() {
        let (curve, mut sc) = setup();
        // Unstable window but 80 C is past target + hysteresis + 3
        let recent = vec![70, 73, 76, 78, 80];
        let input = LearnInput {
            avg_temp: 80,
            prev_temp: 78,
            target_rpm: 3600,
            last_target_rpm: 3400,
            recent_temps: &recent,
            curve: &curve,
        };
        assert!(learn_tick(&mut sc, &input));
        assert!(sc.offsets_heat.iter().any(|&v| v > 0));
    }

    #[test]
    fn test_cold_equilibrium_skips() {
        let (curve, mut sc) = setup();
        let recent = vec![50; 8];
        let input = LearnInput {
            avg_temp: 50,
            prev_temp: 50,
            target_rpm: 1800,
            last_target_rpm: 1800,
            recent_temps: &recent,
            curve: &curve,
        };
        assert!(!learn_tick(&mut sc, &input));
        assert_eq!(sc.offsets_heat, vec![0; curve.len()]);
        assert_eq!(sc.offsets_cool, vec![0; curve.len()]);
        assert_eq!(sc.rate_heat, vec![0; RATE_BUCKETS]);
    }

    #[test]
    fn test_score_dead_band_skips() {
        let (curve, mut sc) = setup();
        // Settled exactly at the setpoint: every term is zero
        let recent = vec![68; 8];
        let input = LearnInput {
            avg_temp: 68,
            prev_temp: 68,
            target_rpm: 2400,
            last_target_rpm: 2400,
            recent_temps: &recent,
            curve: &curve,
        };
        assert_eq!(raw_score(&sc, &input, 0), 0);
        assert!(!learn_tick(&mut sc, &input));
    }

    #[test]
    fn test_stable_hot_tail_learns_positive_heat_offsets() {
        let (curve, mut sc) = setup();
        // Settled at 72 after a climb: err 4, overheat 2
        let recent = vec![70, 72, 72, 72, 72];
        let input = LearnInput {
            avg_temp: 72,
            prev_temp: 72,
            target_rpm: 2928,
            last_target_rpm: 2928,
            recent_temps: &recent,
            curve: &curve,
        };
        assert!(learn_tick(&mut sc, &input));
        // Nearest point to 72 is index 9; the spread covers 7..=11
        assert!(sc.offsets_heat[9] > 0);
        assert!(sc.offsets_heat[8] > 0);
        // Passive table moves at most one step per tick
        assert!(sc.offsets_cool.iter().all(|&v| v.abs() <= 1));
    }

    #[test]
    fn test_falling_updates_cool_table() {
        let (curve, mut sc) = setup();
        // Hot and falling through the override region
        let recent = vec![84, 82, 80, 78, 76];
        let input = LearnInput {
            avg_temp: 76,
            prev_temp: 78,
            target_rpm: 3400,
            last_target_rpm: 3500,
            recent_temps: &recent,
            curve: &curve,
        };
        assert!(learn_tick(&mut sc, &input));
        assert!(sc.offsets_cool.iter().any(|&v| v != 0));
        // Heat sees only the passive mirror
        assert!(sc.offsets_heat.iter().all(|&v| v.abs() <= 1));
        assert!(sc.rate_cool.iter().any(|&v| v != 0));
    }

    #[test]
    fn test_offsets_respect_admissible_range() {
        let (curve, mut sc) = setup();
        let (edge_min, edge_max) = edge_bounds(&curve);
        let recent = vec![84, 84, 84, 84, 84];
        let input = LearnInput {
            avg_temp: 84,
            prev_temp: 84,
            target_rpm: 4000,
            last_target_rpm: 4000,
            recent_temps: &recent,
            curve: &curve,
        };
        for _ in 0..300 {
            learn_tick(&mut sc, &input);
        }
        for (i, p) in curve.iter().enumerate() {
            let clamped = clamp_offset_for_point(
                sc.offsets_heat[i],
                p.rpm,
                edge_min,
                edge_max,
                sc.max_learn_offset,
            );
            assert_eq!(sc.offsets_heat[i], clamped);
        }
        let cap = rate_cap(sc.max_learn_offset);
        assert!(sc.rate_heat.iter().all(|&v| v.abs() <= cap));
    }

    #[test]
    fn test_blended_identity_after_learning() {
        let (curve, mut sc) = setup();
        let recent = vec![73, 72, 72, 73, 72];
        let input = LearnInput {
            avg_temp: 72,
            prev_temp: 73,
            target_rpm: 2950,
            last_target_rpm: 2960,
            recent_temps: &recent,
            curve: &curve,
        };
        learn_tick(&mut sc, &input);
        let expected = blend(&sc.offsets_heat, &sc.offsets_cool);
        assert_eq!(sc.blended_offsets, expected);
    }

    #[test]
    fn test_smooth_table_pulls_toward_neighbours() {
        let mut table = vec![0, 0, 14, 0, 0];
        smooth_table(&mut table, (1, 5, 1), 90);
        // Peak shrinks, neighbours pick up a share
        assert_eq!(table[2], 10);
        assert_eq!(table[1], 2);
        assert_eq!(table[3], 2);
    }

    #[test]
    fn test_smooth_table_jump_clamp() {
        let mut table = vec![0, 200, 0];
        smooth_table(&mut table, (1, 5, 1), 20);
        // After the mean pass the jump clamp caps successive diffs
        for pair in table.windows(2) {
            assert!((pair[1] - pair[0]).abs() <= 20);
        }
    }
}
