//! Integration test: the two loops fail independently.
//!
//! Neither loop is supervised. A panic inside a tick kills the tick thread
//! only; the physics thread keeps stepping and the two silently diverge.
//! The frozen tick glyph is the only outward sign.

use std::sync::Arc;
use std::time::Duration;

use pipeworks_core::config::SimConfig;
use pipeworks_core::entity::Entity;
use pipeworks_core::test_utils::TrackedEntity;
use pipeworks_fluid::test_utils::Rig;

#[test]
fn tick_panic_leaves_physics_running() {
    let rig = Rig::new();
    let tracker = Arc::new(TrackedEntity::panicking_at(5));
    rig.world.add_entity(tracker.clone()).unwrap();

    let ticker = rig.world.start_ticking().unwrap();
    let stepper = rig.physics.run().unwrap();
    std::thread::sleep(Duration::from_millis(300));

    assert!(ticker.is_finished());
    assert!(!stepper.is_finished());
    let glyph = rig.world.liveness_glyph();
    let beats = rig.world.liveness().beats();
    let steps = rig.physics.step_count();

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(rig.world.liveness_glyph(), glyph);
    assert_eq!(rig.world.liveness().beats(), beats);
    assert!(rig.physics.step_count() > steps);
    assert_eq!(tracker.tick_count(), 4);

    assert!(ticker.stop().is_err());
    stepper.stop().unwrap();

    // The registry is still usable from other threads.
    assert!(rig.world.remove_entity(tracker.reference()));
    assert_eq!(tracker.destroy_count(), 1);
}

#[test]
fn physics_honors_pause_when_configured() {
    let config = SimConfig {
        physics_honors_pause: true,
        ..SimConfig::default()
    };
    let rig = Rig::with_config(config);
    assert!(rig.physics.honors_pause());

    rig.world.set_paused(true);
    let stepper = rig.physics.run().unwrap();
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(rig.physics.step_count(), 0);

    rig.world.set_paused(false);
    std::thread::sleep(Duration::from_millis(150));
    assert!(rig.physics.step_count() > 0);
    stepper.stop().unwrap();
}

#[test]
fn loops_refuse_a_second_start() {
    let rig = Rig::new();
    let ticker = rig.world.start_ticking().unwrap();
    let stepper = rig.physics.run().unwrap();
    assert!(rig.world.start_ticking().is_err());
    assert!(rig.physics.run().is_err());
    ticker.stop().unwrap();
    stepper.stop().unwrap();
}
