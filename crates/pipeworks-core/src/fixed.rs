use fixed::types::I32F32;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
pub type Fixed64 = I32F32;

/// Ticks are the atomic unit of simulation time.
pub type Ticks = u64;

/// Convert an f64 to Fixed64. Use only for initialization, never in sim loop.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

/// Convert Fixed64 to f64. Use only for display/FFI, never in sim loop.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Duration of one step at `rate` steps per second, in seconds.
/// A rate of zero yields zero.
#[inline]
pub fn interval_for_rate(rate: u32) -> Fixed64 {
    if rate == 0 {
        return Fixed64::ZERO;
    }
    Fixed64::ONE / Fixed64::from_num(rate)
}

// ---------------------------------------------------------------------------
// Volume
// ---------------------------------------------------------------------------

/// A resource volume in cubic metres. Never negative in practice, but
/// subtraction is not clamped; callers clamp where it matters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Volume(pub Fixed64);

impl Volume {
    pub const ZERO: Volume = Volume(Fixed64::ZERO);

    pub fn from_f64(v: f64) -> Self {
        Self(f64_to_fixed64(v))
    }

    /// `None` for NaN, infinities, negatives, and values beyond the
    /// fixed-point range. Use for anything read from outside the process.
    pub fn checked_from_f64(v: f64) -> Option<Self> {
        if v < 0.0 {
            return None;
        }
        Fixed64::checked_from_num(v).map(Self)
    }

    pub fn to_f64(self) -> f64 {
        fixed64_to_f64(self.0)
    }

    pub fn get(self) -> Fixed64 {
        self.0
    }

    /// Scale by a raw fixed-point factor, saturating on overflow.
    pub fn scale(self, factor: Fixed64) -> Volume {
        Volume(self.0.saturating_mul(factor))
    }

    pub fn min(self, other: Volume) -> Volume {
        if self <= other { self } else { other }
    }

    pub fn max(self, other: Volume) -> Volume {
        if self >= other { self } else { other }
    }
}

impl Add for Volume {
    type Output = Volume;
    fn add(self, rhs: Volume) -> Volume {
        Volume(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Volume {
    fn add_assign(&mut self, rhs: Volume) {
        *self = *self + rhs;
    }
}

impl Sub for Volume {
    type Output = Volume;
    fn sub(self, rhs: Volume) -> Volume {
        Volume(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Volume {
    fn sub_assign(&mut self, rhs: Volume) {
        *self = *self - rhs;
    }
}

// ---------------------------------------------------------------------------
// Portion
// ---------------------------------------------------------------------------

/// A fraction in `[0, 1]`, e.g. the fullness of a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Fixed64", into = "Fixed64")]
pub struct Portion(Fixed64);

impl Portion {
    pub const ZERO: Portion = Portion(Fixed64::ZERO);
    pub const ONE: Portion = Portion(Fixed64::ONE);

    /// Clamp `v` into `[0, 1]`.
    pub fn new(v: Fixed64) -> Self {
        Self(v.clamp(Fixed64::ZERO, Fixed64::ONE))
    }

    pub fn from_f64(v: f64) -> Self {
        Self::new(f64_to_fixed64(v))
    }

    /// `None` unless `v` lies in `[0, 1]`. NaN is rejected.
    pub fn checked_from_f64(v: f64) -> Option<Self> {
        if !(0.0..=1.0).contains(&v) {
            return None;
        }
        Fixed64::checked_from_num(v).map(Portion)
    }

    pub fn to_f64(self) -> f64 {
        fixed64_to_f64(self.0)
    }

    pub fn get(self) -> Fixed64 {
        self.0
    }

    /// `part / whole`, clamped. An empty whole is reported as empty.
    pub fn ratio(part: Volume, whole: Volume) -> Portion {
        if whole.0 <= Fixed64::ZERO {
            return Portion::ZERO;
        }
        match part.0.checked_div(whole.0) {
            Some(v) => Portion::new(v),
            None => Portion::ONE,
        }
    }

    /// `|self - other|`, always in `[0, 1]`.
    pub fn abs_diff(self, other: Portion) -> Fixed64 {
        if self.0 >= other.0 {
            self.0 - other.0
        } else {
            other.0 - self.0
        }
    }

    /// This portion of `volume`.
    pub fn of(self, volume: Volume) -> Volume {
        volume.scale(self.0)
    }
}

impl TryFrom<Fixed64> for Portion {
    type Error = String;

    fn try_from(v: Fixed64) -> Result<Self, Self::Error> {
        if v < Fixed64::ZERO || v > Fixed64::ONE {
            return Err(format!("portion {v} outside [0, 1]"));
        }
        Ok(Portion(v))
    }
}

impl From<Portion> for Fixed64 {
    fn from(p: Portion) -> Fixed64 {
        p.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed64_basic_arithmetic() {
        let a = f64_to_fixed64(1.5);
        let b = f64_to_fixed64(2.0);
        assert_eq!(fixed64_to_f64(a + b), 3.5);
    }

    #[test]
    fn interval_for_fifty_hertz() {
        let dt = interval_for_rate(50);
        assert!((fixed64_to_f64(dt) - 0.02).abs() < 1e-9);
        assert_eq!(interval_for_rate(0), Fixed64::ZERO);
    }

    #[test]
    fn volume_saturates_instead_of_wrapping() {
        let big = Volume(Fixed64::MAX);
        assert_eq!(big + Volume::from_f64(1.0), big);
        assert_eq!(Volume(Fixed64::MIN) - Volume::from_f64(1.0), Volume(Fixed64::MIN));
    }

    #[test]
    fn portion_is_clamped() {
        assert_eq!(Portion::from_f64(1.5), Portion::ONE);
        assert_eq!(Portion::from_f64(-0.5), Portion::ZERO);
        assert_eq!(Portion::from_f64(0.25).to_f64(), 0.25);
    }

    #[test]
    fn checked_conversions_reject_bad_input() {
        assert!(Portion::checked_from_f64(f64::NAN).is_none());
        assert!(Portion::checked_from_f64(1e12).is_none());
        assert!(Portion::checked_from_f64(-0.1).is_none());
        assert_eq!(Portion::checked_from_f64(1.0), Some(Portion::ONE));

        assert!(Volume::checked_from_f64(f64::NAN).is_none());
        assert!(Volume::checked_from_f64(f64::INFINITY).is_none());
        assert!(Volume::checked_from_f64(1e12).is_none());
        assert!(Volume::checked_from_f64(-1.0).is_none());
        assert_eq!(Volume::checked_from_f64(10.0), Some(Volume::from_f64(10.0)));
    }

    #[test]
    fn portion_ratio_handles_empty_whole() {
        assert_eq!(Portion::ratio(Volume::from_f64(3.0), Volume::ZERO), Portion::ZERO);
        let half = Portion::ratio(Volume::from_f64(5.0), Volume::from_f64(10.0));
        assert_eq!(half.to_f64(), 0.5);
    }

    #[test]
    fn portion_abs_diff_is_symmetric() {
        let a = Portion::from_f64(0.75);
        let b = Portion::from_f64(0.25);
        assert_eq!(a.abs_diff(b), b.abs_diff(a));
        assert_eq!(fixed64_to_f64(a.abs_diff(b)), 0.5);
    }

    #[test]
    fn portion_of_volume() {
        let v = Portion::from_f64(0.5).of(Volume::from_f64(10.0));
        assert_eq!(v, Volume::from_f64(5.0));
    }

    #[test]
    fn portion_deserialize_rejects_out_of_range() {
        assert!(Portion::try_from(Fixed64::from_num(2)).is_err());
        assert!(Portion::try_from(Fixed64::from_num(1)).is_ok());
    }
}
