//! Property-based tests for the core runtime.
//!
//! Uses proptest to generate random registry mutation sequences and unit
//! arithmetic, then verify structural invariants hold.

use std::collections::BTreeSet;
use std::sync::Arc;

use pipeworks_core::config::SimConfig;
use pipeworks_core::entity::Entity;
use pipeworks_core::fixed::{Portion, Volume};
use pipeworks_core::test_utils::TrackedEntity;
use pipeworks_core::world::SimulationWorld;
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

#[derive(Debug, Clone)]
enum RegistryOp {
    Add,
    Readd(usize),
    Remove(usize),
    Tick,
}

fn arb_registry_ops(max_ops: usize) -> impl Strategy<Value = Vec<RegistryOp>> {
    proptest::collection::vec(
        prop_oneof![
            3 => Just(RegistryOp::Add),
            1 => (0..32usize).prop_map(RegistryOp::Readd),
            2 => (0..32usize).prop_map(RegistryOp::Remove),
            2 => Just(RegistryOp::Tick),
        ],
        1..=max_ops,
    )
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The registry always matches a model set, every removed tracker was
    /// destroyed exactly once, and live trackers were never destroyed.
    #[test]
    fn registry_matches_model(ops in arb_registry_ops(60)) {
        let world = SimulationWorld::new(&SimConfig::default());
        let mut trackers: Vec<Arc<TrackedEntity>> = Vec::new();
        let mut live = BTreeSet::new();

        for op in ops {
            match op {
                RegistryOp::Add => {
                    let tracker = Arc::new(TrackedEntity::new());
                    world.add_entity(tracker.clone()).unwrap();
                    live.insert(tracker.reference());
                    trackers.push(tracker);
                }
                RegistryOp::Readd(i) if !trackers.is_empty() => {
                    let tracker = &trackers[i % trackers.len()];
                    let added = world.add_entity(tracker.clone()).is_ok();
                    prop_assert_eq!(added, live.insert(tracker.reference()));
                }
                RegistryOp::Remove(i) if !trackers.is_empty() => {
                    let tracker = &trackers[i % trackers.len()];
                    let removed = world.remove_entity(tracker.reference());
                    prop_assert_eq!(removed, live.remove(&tracker.reference()));
                }
                RegistryOp::Tick => {
                    world.tick_once();
                }
                _ => {}
            }
            prop_assert_eq!(world.entity_count(), live.len());
        }

        for tracker in &trackers {
            prop_assert_eq!(world.contains(tracker.reference()), live.contains(&tracker.reference()));
        }
    }

    /// Portions never leave [0, 1] regardless of input.
    #[test]
    fn portion_is_always_clamped(v in -10.0f64..10.0) {
        let p = Portion::from_f64(v);
        prop_assert!(p >= Portion::ZERO && p <= Portion::ONE);
    }

    /// Saturating volume arithmetic never goes negative when subtracting
    /// at most what is present.
    #[test]
    fn volume_subtract_within_bounds(a in 0.0f64..1e6, frac in 0.0f64..=1.0) {
        let total = Volume::from_f64(a);
        let part = total.scale(Portion::from_f64(frac).get());
        let rest = total - part;
        prop_assert!(rest >= Volume::ZERO);
        prop_assert_eq!(rest + part, total);
    }
}
