//! Fuzz target for configuration parsing and normalization
//!
//! Arbitrary JSON documents either fail to parse or normalize into a
//! consistent configuration; normalization itself must be idempotent and
//! panic-free.

#![no_main]

use libfuzzer_sys::fuzz_target;

use bs2ctl::{normalize_config, AppConfig, RATE_BUCKETS};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(mut cfg) = serde_json::from_str::<AppConfig>(text) else {
        return;
    };
    normalize_config(&mut cfg);
    let n = cfg.fan_curve.len();
    assert_eq!(cfg.smart_control.offsets_heat.len(), n);
    assert_eq!(cfg.smart_control.offsets_cool.len(), n);
    assert_eq!(cfg.smart_control.blended_offsets.len(), n);
    assert_eq!(cfg.smart_control.rate_heat.len(), RATE_BUCKETS);
    // Idempotence
    assert!(!normalize_config(&mut cfg));
});
