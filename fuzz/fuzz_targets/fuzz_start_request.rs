#![no_main]

use libfuzzer_sys::fuzz_target;

use calcflow_core::{CalcKind, CalculationTarget, StartConfig, StartRequest};

fuzz_target!(|data: &[u8]| {
    let Ok(request) = serde_json::from_slice::<StartRequest>(data) else {
        return;
    };

    // Validation must never panic, and accepted configs must be coherent.
    if let Ok(config) = StartConfig::try_from(&request) {
        assert!(!config.calc_id().as_str().trim().is_empty());
        assert!(!config.params().country_id.is_empty());
        if config.kind() == CalcKind::Economy {
            assert_eq!(config.target_type(), CalculationTarget::Report);
        }
        if let Some(link) = config.target().parent() {
            assert!(link.simulation_ids.contains(config.calc_id()));
        }
    }
});
