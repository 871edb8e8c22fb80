//! Fan curve representation and piecewise-linear evaluation
//!
//! The baseline curve is a user-supplied ordered list of (temperature, RPM)
//! points, strictly increasing in temperature. Evaluation is pure integer
//! arithmetic: temperatures between two points interpolate linearly, anything
//! outside the covered range pins to the nearest endpoint.

use serde::{Deserialize, Serialize};

/// Upper RPM bound of the BS2/BS2 PRO fan
pub const DEVICE_MAX_RPM: i32 = 4000;

/// A single point on the baseline fan curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurvePoint {
    /// Temperature in Celsius
    pub temperature: i32,
    /// Fan speed in RPM
    pub rpm: i32,
}

impl CurvePoint {
    pub fn new(temperature: i32, rpm: i32) -> Self {
        CurvePoint { temperature, rpm }
    }
}

/// Factory default curve shipped with the device: 1800 RPM floor up to
/// 60 C, then ramping to the 4000 RPM ceiling at 90 C.
pub fn default_curve() -> Vec<CurvePoint> {
    [
        (30, 1800),
        (35, 1800),
        (40, 1800),
        (45, 1800),
        (50, 1800),
        (55, 1800),
        (60, 1800),
        (64, 2100),
        (68, 2400),
        (72, 2800),
        (76, 3200),
        (80, 3500),
        (85, 3800),
        (90, 4000),
    ]
    .into_iter()
    .map(|(t, r)| CurvePoint::new(t, r))
    .collect()
}

/// Evaluate the curve at temperature `t`
///
/// - Empty curve returns 0, signalling "no control".
/// - Below the first point: the first point's RPM.
/// - Above the last point: the last point's RPM.
/// - Between two points: integer linear interpolation (truncating division).
pub fn evaluate(curve: &[CurvePoint], t: i32) -> i32 {
    let first = match curve.first() {
        Some(p) => p,
        None => return 0,
    };
    if t <= first.temperature {
        return first.rpm;
    }
    let last = curve[curve.len() - 1];
    if t >= last.temperature {
        return last.rpm;
    }

    for pair in curve.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if t >= a.temperature && t <= b.temperature {
            let span = b.temperature - a.temperature;
            if span == 0 {
                return a.rpm;
            }
            return a.rpm + (b.rpm - a.rpm) * (t - a.temperature) / span;
        }
    }

    last.rpm
}

/// Check that a curve is usable: strictly increasing temperatures.
///
/// An empty curve is accepted (it disables control); a single point is
/// accepted and evaluates as a constant.
pub fn validate_curve(points: &[CurvePoint]) -> Result<(), String> {
    for pair in points.windows(2) {
        if pair[1].temperature <= pair[0].temperature {
            return Err(format!(
                "Curve temperatures must be strictly increasing ({} C followed by {} C)",
                pair[0].temperature, pair[1].temperature
            ));
        }
    }
    Ok(())
}

/// Repair an externally supplied curve: sort by temperature, drop duplicate
/// temperatures (first occurrence wins), clamp RPM into the device range.
///
/// Returns true if anything was modified.
pub fn sanitize_curve(points: &mut Vec<CurvePoint>) -> bool {
    let before = points.clone();
    points.sort_by_key(|p| p.temperature);
    points.dedup_by_key(|p| p.temperature);
    for p in points.iter_mut() {
        p.rpm = p.rpm.clamp(0, DEVICE_MAX_RPM);
    }
    *points != before
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve(points: &[(i32, i32)]) -> Vec<CurvePoint> {
        points.iter().map(|&(t, r)| CurvePoint::new(t, r)).collect()
    }

    #[test]
    fn test_empty_curve_returns_zero() {
        assert_eq!(evaluate(&[], 50), 0);
    }

    #[test]
    fn test_endpoints_pin() {
        let c = curve(&[(40, 1800), (80, 4000)]);
        assert_eq!(evaluate(&c, 30), 1800);
        assert_eq!(evaluate(&c, 40), 1800);
        assert_eq!(evaluate(&c, 80), 4000);
        assert_eq!(evaluate(&c, 95), 4000);
    }

    #[test]
    fn test_linear_interpolation() {
        let c = curve(&[(40, 1800), (80, 4000)]);
        // At 60 C: 1800 + 2200 * 20/40 = 2900
        assert_eq!(evaluate(&c, 60), 2900);
        // Truncating division: at 41 C: 1800 + 2200/40 = 1855
        assert_eq!(evaluate(&c, 41), 1855);
    }

    #[test]
    fn test_single_point_is_constant() {
        let c = curve(&[(60, 2500)]);
        assert_eq!(evaluate(&c, 20), 2500);
        assert_eq!(evaluate(&c, 60), 2500);
        assert_eq!(evaluate(&c, 90), 2500);
    }

    #[test]
    fn test_default_curve_shape() {
        let c = default_curve();
        assert_eq!(c.len(), 14);
        assert_eq!(evaluate(&c, 50), 1800);
        assert_eq!(evaluate(&c, 90), 4000);
        // Flat floor through 60 C
        assert_eq!(evaluate(&c, 60), 1800);
        // Between 80 (3500) and 85 (3800): 3500 + 300 * 3/5 = 3680
        assert_eq!(evaluate(&c, 83), 3680);
    }

    #[test]
    fn test_validate_curve() {
        assert!(validate_curve(&curve(&[(40, 1800), (80, 4000)])).is_ok());
        assert!(validate_curve(&[]).is_ok());
        assert!(validate_curve(&curve(&[(40, 1800), (40, 2000)])).is_err());
        assert!(validate_curve(&curve(&[(80, 4000), (40, 1800)])).is_err());
    }

    #[test]
    fn test_sanitize_curve() {
        let mut c = curve(&[(80, 9000), (40, 1800), (40, 2000)]);
        assert!(sanitize_curve(&mut c));
        assert_eq!(c, curve(&[(40, 1800), (80, 4000)]));
        // Already clean: untouched
        assert!(!sanitize_curve(&mut c));
    }
}
