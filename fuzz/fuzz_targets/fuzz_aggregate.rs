#![no_main]

use libfuzzer_sys::fuzz_target;

use calcflow_core::CalcStatus;
use calcflow_orchestration::aggregate;

fuzz_target!(|data: &[u8]| {
    let Ok(statuses) = serde_json::from_slice::<Vec<CalcStatus>>(data) else {
        return;
    };

    let agg = aggregate(&statuses);
    assert_eq!(agg.calculations.len(), statuses.len());
    if statuses.iter().any(CalcStatus::is_error) {
        assert!(agg.is_error());
    }
});
