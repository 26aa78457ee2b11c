//! Pipeworks Core -- the fixed-rate simulation runtime for pipe-network games.
//!
//! This crate provides entity identity, the hybrid-wait clock, deterministic
//! fixed-point units, the entity registry with its dedicated tick thread,
//! and the subscription-token listener lists that the physics and fluid
//! crates build on.
//!
//! # Tick Loop
//!
//! [`world::SimulationWorld::start_ticking`] spawns one OS thread that, once
//! per tick interval:
//!
//! 1. **Pause check** -- skips the pass when the shared [`clock::PauseFlag`] is set.
//! 2. **Measure** -- records wall time since the previous pass.
//! 3. **Pass** -- locks the registry and calls [`entity::Entity::tick`] on
//!    every entity, serially.
//! 4. **Liveness** -- beats the rotating glyph so observers can spot a stall.
//! 5. **Wait** -- sleeps, yields, then spins until the next deadline.
//!
//! # Key Types
//!
//! - [`world::SimulationWorld`] -- Entity registry and tick thread owner.
//! - [`entity::Entity`] -- Tick / interact / destroy capability.
//! - [`clock::Clock`] -- Fixed rates and the hybrid [`clock::WaitThresholds::wait_until`].
//! - [`clock::Liveness`] -- Lock-free rotating glyph per loop.
//! - [`fixed::Volume`] / [`fixed::Portion`] -- Q32.32 fixed-point units.
//! - [`event::Listeners`] -- Explicit subscribe/unsubscribe event lists.
//! - [`config::SimConfig`] -- TOML-loadable runtime configuration.

pub mod clock;
pub mod config;
pub mod entity;
pub mod event;
pub mod fixed;
pub mod id;
pub mod world;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
