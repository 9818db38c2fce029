//! Property-based tests for cache write ordering and prefix matching.

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::json;

use calcflow_cache::{CacheEvent, CalcCache, QueryKey};
use calcflow_core::{CalcError, CalcId, CalcStatus, CalculationTarget};

fn status_strategy() -> impl Strategy<Value = CalcStatus> {
    prop_oneof![
        Just(CalcStatus::Initializing),
        (0.0f64..100.0).prop_map(|p| CalcStatus::pending(p, "running")),
        (0u32..10).prop_map(|n| CalcStatus::complete(json!({ "n": n }))),
        any::<bool>().prop_map(|retryable| {
            CalcStatus::Error(CalcError::new("failed", "CALCULATION_FAILED", retryable))
        }),
    ]
}

fn segment() -> impl Strategy<Value = String> {
    "[a-z]{1,3}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// The first terminal write sticks; every later write is refused.
    #[test]
    fn first_terminal_write_sticks(writes in prop::collection::vec(status_strategy(), 1..20)) {
        let cache = CalcCache::new();
        let key = QueryKey::calculation(CalculationTarget::Simulation, &CalcId::new("s1").unwrap());
        let mut first_terminal: Option<CalcStatus> = None;
        for status in writes {
            let accepted = cache.set(key.clone(), status.clone());
            prop_assert_eq!(accepted, first_terminal.is_none());
            if first_terminal.is_none() && status.is_terminal() {
                first_terminal = Some(status);
            }
            let current = cache.get(&key).unwrap();
            if let Some(terminal) = &first_terminal {
                prop_assert_eq!(&current, terminal);
            }
        }
    }

    /// Every accepted write is observed exactly once by a prefix subscriber.
    #[test]
    fn accepted_writes_are_observed(writes in prop::collection::vec(status_strategy(), 1..20)) {
        let cache = CalcCache::new();
        let key = QueryKey::calculation(CalculationTarget::Report, &CalcId::new("r1").unwrap());
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        cache.subscribe(
            QueryKey::calculations_all(),
            Arc::new(move |e: &CacheEvent| {
                if matches!(e, CacheEvent::Updated { .. }) {
                    *sink.lock() += 1;
                }
            }),
        );
        let accepted = writes.into_iter().filter(|s| cache.set(key.clone(), s.clone())).count();
        prop_assert_eq!(*seen.lock(), accepted);
    }

    /// `overlaps` is symmetric and implied by `starts_with`.
    #[test]
    fn overlap_is_symmetric(
        a in prop::collection::vec(segment(), 0..4),
        b in prop::collection::vec(segment(), 0..4),
    ) {
        let ka = QueryKey::new(a);
        let kb = QueryKey::new(b);
        prop_assert_eq!(ka.overlaps(&kb), kb.overlaps(&ka));
        if ka.starts_with(&kb) {
            prop_assert!(ka.overlaps(&kb));
        }
    }
}
