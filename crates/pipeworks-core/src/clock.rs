//! Fixed rates, the hybrid deadline wait, and per-loop liveness.
//!
//! Every background loop in the runtime is a [`spawn_fixed_loop`]: it runs a
//! step, beats its [`Liveness`], then calls [`WaitThresholds::wait_until`]
//! for the next deadline on an absolute schedule so that rounding in one
//! step never accumulates into drift.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::fixed::{Fixed64, interval_for_rate};

/// Gameplay ticks per second.
pub const DEFAULT_TICK_RATE: u32 = 50;

/// Physics steps per second.
pub const DEFAULT_PHYSICS_RATE: u32 = 60;

// ---------------------------------------------------------------------------
// FixedRate
// ---------------------------------------------------------------------------

/// A fixed number of steps per second and the intervals derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixedRate {
    per_second: u32,
}

impl FixedRate {
    /// A rate of zero is raised to one step per second.
    pub const fn new(per_second: u32) -> Self {
        Self {
            per_second: if per_second == 0 { 1 } else { per_second },
        }
    }

    pub fn per_second(self) -> u32 {
        self.per_second
    }

    pub fn interval(self) -> Duration {
        Duration::from_secs(1) / self.per_second
    }

    /// The interval in seconds as fixed-point, for simulation math.
    pub fn interval_fixed(self) -> Fixed64 {
        interval_for_rate(self.per_second)
    }

    pub fn interval_secs_f32(self) -> f32 {
        1.0 / self.per_second as f32
    }

    /// Offset of step `index` from the start of the schedule. Exact for any
    /// index; no per-step rounding accumulates.
    pub fn deadline(self, index: u64) -> Duration {
        let nanos = index as u128 * 1_000_000_000 / self.per_second as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }
}

// ---------------------------------------------------------------------------
// Hybrid wait
// ---------------------------------------------------------------------------

/// Where the hybrid wait switches from sleeping to yielding to spinning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitThresholds {
    /// Sleep while more than this remains.
    pub sleep_above: Duration,
    /// Spin once less than this remains; yield in between.
    pub spin_below: Duration,
}

impl Default for WaitThresholds {
    fn default() -> Self {
        Self {
            sleep_above: Duration::from_millis(10),
            spin_below: Duration::from_millis(2),
        }
    }
}

impl WaitThresholds {
    /// Block until `start + deadline`. Returns immediately if it has passed.
    pub fn wait_until(&self, start: Instant, deadline: Duration) {
        let target = start + deadline;
        loop {
            let now = Instant::now();
            if now >= target {
                return;
            }
            let remaining = target - now;
            if remaining > self.sleep_above {
                thread::sleep(remaining - self.sleep_above);
            } else if remaining > self.spin_below {
                thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// The two fixed rates of the runtime plus the wait policy they share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    pub tick: FixedRate,
    pub physics: FixedRate,
    pub wait: WaitThresholds,
}

impl Default for Clock {
    fn default() -> Self {
        Self {
            tick: FixedRate::new(DEFAULT_TICK_RATE),
            physics: FixedRate::new(DEFAULT_PHYSICS_RATE),
            wait: WaitThresholds::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------------------

const GLYPHS: [char; 4] = ['|', '/', '-', '\\'];

/// How long each glyph is shown while the loop is healthy.
const GLYPH_PERIOD: Duration = Duration::from_millis(125);

/// A rotating glyph proving a loop is still completing steps.
///
/// Written by the owning loop once per completed step, read by anyone with
/// plain atomic loads. A loop that hangs leaves its glyph frozen.
#[derive(Debug)]
pub struct Liveness {
    origin: Instant,
    phase: AtomicU8,
    beats: AtomicU64,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            phase: AtomicU8::new(0),
            beats: AtomicU64::new(0),
        }
    }

    /// Record a completed step.
    pub fn beat(&self) {
        let slot = self.origin.elapsed().as_millis() / GLYPH_PERIOD.as_millis();
        self.phase.store((slot % GLYPHS.len() as u128) as u8, Ordering::Relaxed);
        self.beats.fetch_add(1, Ordering::Relaxed);
    }

    pub fn glyph(&self) -> char {
        GLYPHS[self.phase.load(Ordering::Relaxed) as usize % GLYPHS.len()]
    }

    /// Total completed steps.
    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// PauseFlag
// ---------------------------------------------------------------------------

/// Shared best-effort pause switch. Checked at the top of a loop iteration;
/// an in-progress step always completes.
#[derive(Debug, Clone, Default)]
pub struct PauseFlag(Arc<AtomicBool>);

impl PauseFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.0.store(paused, Ordering::Release);
    }

    /// Flip the flag and return the new value.
    pub fn toggle(&self) -> bool {
        !self.0.fetch_xor(true, Ordering::AcqRel)
    }
}

// ---------------------------------------------------------------------------
// Fixed loops
// ---------------------------------------------------------------------------

/// Handle to a running fixed-rate loop thread.
///
/// Dropping the handle detaches the thread; the loop keeps running until
/// process exit.
#[derive(Debug)]
pub struct LoopHandle {
    name: String,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl LoopHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the thread has exited, including by panic.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Ask the loop to exit after its current iteration and join it.
    /// Returns the panic payload if the loop died by panic.
    pub fn stop(mut self) -> thread::Result<()> {
        self.stop.store(true, Ordering::Release);
        match self.thread.take() {
            Some(t) => t.join(),
            None => Ok(()),
        }
    }
}

/// Timing knobs for [`spawn_fixed_loop`].
#[derive(Debug, Clone, Copy)]
pub struct LoopTiming {
    pub rate: FixedRate,
    pub wait: WaitThresholds,
    /// Intervals the loop may fall behind before its schedule is rebased.
    pub max_catch_up: u32,
}

/// Spawn a named thread that calls `step` once per interval.
///
/// `step` receives the wall time since the previous call and returns
/// whether it completed a step (`false` while paused); only completed steps
/// beat `liveness`.
pub fn spawn_fixed_loop<F>(
    name: &str,
    timing: LoopTiming,
    liveness: Arc<Liveness>,
    mut step: F,
) -> std::io::Result<LoopHandle>
where
    F: FnMut(Duration) -> bool + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    let loop_name = name.to_string();

    let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
        tracing::info!(loop_name = %loop_name, rate = timing.rate.per_second(), "loop started");
        let mut origin = Instant::now();
        let mut index: u64 = 0;
        let mut previous = origin;
        let slack = timing.rate.interval() * timing.max_catch_up.max(1);

        while !stop_flag.load(Ordering::Acquire) {
            let now = Instant::now();
            let elapsed = now - previous;
            previous = now;

            if step(elapsed) {
                liveness.beat();
            }

            index += 1;
            let deadline = timing.rate.deadline(index);
            let behind = origin.elapsed().saturating_sub(deadline);
            if behind > slack {
                tracing::warn!(
                    loop_name = %loop_name,
                    behind_ms = behind.as_millis() as u64,
                    "loop fell behind schedule, rebasing"
                );
                origin = Instant::now();
                index = 0;
                continue;
            }
            timing.wait.wait_until(origin, deadline);
        }
        tracing::info!(loop_name = %loop_name, "loop stopped");
    })?;

    Ok(LoopHandle {
        name: name.to_string(),
        stop,
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_rate_interval() {
        let rate = FixedRate::new(50);
        assert_eq!(rate.interval(), Duration::from_millis(20));
        assert_eq!(rate.per_second(), 50);
    }

    #[test]
    fn zero_rate_is_raised_to_one() {
        assert_eq!(FixedRate::new(0).per_second(), 1);
    }

    #[test]
    fn deadline_does_not_drift() {
        let rate = FixedRate::new(60);
        assert_eq!(rate.deadline(60), Duration::from_secs(1));
        assert_eq!(rate.deadline(6_000), Duration::from_secs(100));
    }

    #[test]
    fn wait_until_returns_at_or_after_deadline() {
        let wait = WaitThresholds::default();
        let start = Instant::now();
        wait.wait_until(start, Duration::from_millis(15));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(15));
        assert!(elapsed < Duration::from_millis(100), "overslept: {elapsed:?}");
    }

    #[test]
    fn wait_until_past_deadline_returns_immediately() {
        let wait = WaitThresholds::default();
        let start = Instant::now() - Duration::from_secs(1);
        let before = Instant::now();
        wait.wait_until(start, Duration::from_millis(1));
        assert!(before.elapsed() < Duration::from_millis(5));
    }

    #[test]
    fn liveness_counts_beats() {
        let live = Liveness::new();
        assert_eq!(live.beats(), 0);
        live.beat();
        live.beat();
        assert_eq!(live.beats(), 2);
        assert!(GLYPHS.contains(&live.glyph()));
    }

    #[test]
    fn liveness_glyph_rotates_over_time() {
        let live = Liveness::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..6 {
            live.beat();
            seen.insert(live.glyph());
            thread::sleep(GLYPH_PERIOD);
        }
        assert!(seen.len() >= 2, "glyph never moved: {seen:?}");
    }

    #[test]
    fn pause_flag_is_shared_between_clones() {
        let a = PauseFlag::new();
        let b = a.clone();
        assert!(!b.is_paused());
        a.set_paused(true);
        assert!(b.is_paused());
        assert!(!b.toggle());
        assert!(!a.is_paused());
    }

    #[test]
    fn fixed_loop_runs_and_stops() {
        let live = Arc::new(Liveness::new());
        let timing = LoopTiming {
            rate: FixedRate::new(200),
            wait: WaitThresholds::default(),
            max_catch_up: 5,
        };
        let handle = spawn_fixed_loop("test-loop", timing, Arc::clone(&live), |_| true).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(!handle.is_finished());
        handle.stop().unwrap();
        assert!(live.beats() > 5);
    }

    #[test]
    fn skipped_steps_do_not_beat() {
        let live = Arc::new(Liveness::new());
        let timing = LoopTiming {
            rate: FixedRate::new(200),
            wait: WaitThresholds::default(),
            max_catch_up: 5,
        };
        let handle = spawn_fixed_loop("idle-loop", timing, Arc::clone(&live), |_| false).unwrap();
        thread::sleep(Duration::from_millis(50));
        handle.stop().unwrap();
        assert_eq!(live.beats(), 0);
    }

    #[test]
    fn panicking_step_finishes_the_loop() {
        let live = Arc::new(Liveness::new());
        let timing = LoopTiming {
            rate: FixedRate::new(200),
            wait: WaitThresholds::default(),
            max_catch_up: 5,
        };
        let handle = spawn_fixed_loop("doomed-loop", timing, live, |_| panic!("step failed")).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(handle.is_finished());
        assert!(handle.stop().is_err());
    }
}
