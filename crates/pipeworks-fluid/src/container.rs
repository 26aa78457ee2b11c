//! Resource containers and the per-edge equalization rule.

use std::fmt;

use pipeworks_core::fixed::{Fixed64, Portion, Volume};

use crate::connector::Side;

/// Something that holds a resource by volume.
///
/// The thermodynamics of what is inside is up to the implementation; the
/// network only needs capacity, fullness, and volume transfer.
pub trait ResourceContainer: Send + fmt::Debug + 'static {
    /// An empty container with the given capacity.
    fn with_volume(volume: Volume) -> Self
    where
        Self: Sized;

    /// Capacity.
    fn volume(&self) -> Volume;

    /// Volume currently held.
    fn contents(&self) -> Volume;

    fn fullness(&self) -> Portion {
        Portion::ratio(self.contents(), self.volume())
    }

    fn fill_to(&mut self, fullness: Portion);

    /// Move up to `amount` into `recipient`. Returns the volume actually
    /// moved, limited by what this container holds and what the recipient
    /// has room for.
    fn transfer_by_volume(&mut self, recipient: &mut Self, amount: Volume) -> Volume
    where
        Self: Sized;

    /// Advance internal state by one tick of `interval` seconds.
    fn tick(&mut self, interval: Fixed64) {
        let _ = interval;
    }
}

/// A plain incompressible fluid container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FluidContainer {
    volume: Volume,
    contents: Volume,
}

impl FluidContainer {
    pub fn new(volume: Volume, fullness: Portion) -> Self {
        let mut c = Self::with_volume(volume);
        c.fill_to(fullness);
        c
    }

    pub fn free_space(&self) -> Volume {
        self.volume - self.contents
    }
}

impl ResourceContainer for FluidContainer {
    fn with_volume(volume: Volume) -> Self {
        Self {
            volume: volume.max(Volume::ZERO),
            contents: Volume::ZERO,
        }
    }

    fn volume(&self) -> Volume {
        self.volume
    }

    fn contents(&self) -> Volume {
        self.contents
    }

    fn fill_to(&mut self, fullness: Portion) {
        self.contents = fullness.of(self.volume);
    }

    fn transfer_by_volume(&mut self, recipient: &mut Self, amount: Volume) -> Volume {
        let moved = amount
            .max(Volume::ZERO)
            .min(self.contents)
            .min(recipient.free_space());
        self.contents -= moved;
        recipient.contents += moved;
        moved
    }
}

/// Outcome of one [`equalize`] call that moved something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow {
    /// The recipient side: the one with the lower fullness.
    pub toward: Side,
    pub moved: Volume,
}

/// Move volume from the fuller of `a` and `b` to the emptier one.
///
/// `amount = donor.volume * |fullness_a - fullness_b| * interval`. Nothing
/// moves when the fullness values are equal or differ by less than
/// `epsilon`.
pub fn equalize<C: ResourceContainer>(a: &mut C, b: &mut C, interval: Fixed64, epsilon: Portion) -> Option<Flow> {
    let fa = a.fullness();
    let fb = b.fullness();
    let diff = fa.abs_diff(fb);
    if diff == Fixed64::ZERO || diff < epsilon.get() {
        return None;
    }
    let (donor, recipient, toward) = if fa > fb { (a, b, Side::B) } else { (b, a, Side::A) };
    let amount = donor.volume().scale(diff).scale(interval);
    let moved = donor.transfer_by_volume(recipient, amount);
    Some(Flow { toward, moved })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeworks_core::fixed::interval_for_rate;

    fn tank(volume: f64, fullness: f64) -> FluidContainer {
        FluidContainer::new(Volume::from_f64(volume), Portion::from_f64(fullness))
    }

    #[test]
    fn transfer_is_limited_by_contents_and_room() {
        let mut a = tank(10.0, 0.1);
        let mut b = tank(10.0, 0.95);
        let moved = a.transfer_by_volume(&mut b, Volume::from_f64(5.0));
        assert!((moved.to_f64() - 0.5).abs() < 1e-6);
        assert_eq!(b.contents(), b.volume());
    }

    #[test]
    fn empty_container_reports_zero_fullness() {
        let c = FluidContainer::with_volume(Volume::ZERO);
        assert_eq!(c.fullness(), Portion::ZERO);
    }

    #[test]
    fn equalize_moves_toward_lower_side() {
        let mut a = tank(10.0, 1.0);
        let mut b = tank(10.0, 0.0);
        let flow = equalize(&mut a, &mut b, interval_for_rate(50), Portion::ZERO).unwrap();
        assert_eq!(flow.toward, Side::B);
        assert!((a.fullness().to_f64() - 0.98).abs() < 1e-6);
        assert!((b.fullness().to_f64() - 0.02).abs() < 1e-6);

        let flow = equalize(&mut b, &mut a, interval_for_rate(50), Portion::ZERO).unwrap();
        assert_eq!(flow.toward, Side::B);
    }

    #[test]
    fn equal_fullness_moves_nothing() {
        let mut a = tank(10.0, 0.5);
        let mut b = tank(4.0, 0.5);
        assert!(equalize(&mut a, &mut b, Fixed64::ONE, Portion::ZERO).is_none());
        assert_eq!(a, tank(10.0, 0.5));
    }

    #[test]
    fn difference_below_epsilon_moves_nothing() {
        let mut a = tank(10.0, 0.50005);
        let mut b = tank(10.0, 0.5);
        assert!(equalize(&mut a, &mut b, Fixed64::ONE, Portion::from_f64(1e-4)).is_none());
        assert!(equalize(&mut a, &mut b, Fixed64::ONE, Portion::ZERO).is_some());
    }

    #[test]
    fn donor_volume_sets_the_rate() {
        let mut big = tank(100.0, 1.0);
        let mut small = tank(1.0, 0.0);
        let flow = equalize(&mut big, &mut small, interval_for_rate(50), Portion::ZERO).unwrap();
        // 100 * 1.0 * 0.02 = 2.0 requested, capped by the recipient's room.
        assert!((flow.moved.to_f64() - 1.0).abs() < 1e-6);
    }
}
