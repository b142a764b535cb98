//! `[a, b]` intervals over `f64`, the building block of `Cube3`.

use crate::error::InvalidArgument;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub a: f64,
    pub b: f64,
}

impl Interval {
    /// Fails with `InvalidArgument::InvalidInterval` if `a > b`.
    pub fn new(a: f64, b: f64) -> Result<Self, InvalidArgument> {
        if a > b {
            return Err(InvalidArgument::InvalidInterval { a, b });
        }
        Ok(Self { a, b })
    }

    /// Like `new`, but panics on a non-monotonic range. Used for literal
    /// intervals constructed from trusted internal computation, mirroring
    /// the teacher's `Point2D::new` which never validates either.
    pub fn new_unchecked(a: f64, b: f64) -> Self {
        debug_assert!(a <= b, "non-monotonic interval [{a}, {b}]");
        Self { a, b }
    }

    pub fn distance(&self) -> f64 {
        self.b - self.a
    }

    pub fn contains(&self, other: &Interval) -> bool {
        self.a <= other.a && other.b <= self.b
    }

    pub fn contains_value(&self, v: f64) -> bool {
        self.a <= v && v <= self.b
    }

    pub fn intersects(&self, other: &Interval) -> bool {
        self.a <= other.b && other.a <= self.b
    }

    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let a = self.a.max(other.a);
        let b = self.b.min(other.b);
        if a <= b {
            Some(Interval::new_unchecked(a, b))
        } else {
            None
        }
    }

    /// Smallest enclosing interval (axis-aligned hull).
    pub fn combine(&self, other: &Interval) -> Interval {
        Interval::new_unchecked(self.a.min(other.a), self.b.max(other.b))
    }

    pub fn near_eq(&self, other: &Interval, epsilon: f64) -> bool {
        (self.a - other.a).abs() <= epsilon && (self.b - other.b).abs() <= epsilon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_monotonic() {
        assert!(Interval::new(5.0, 1.0).is_err());
    }

    #[test]
    fn intersect_and_combine() {
        let a = Interval::new(0.0, 10.0).unwrap();
        let b = Interval::new(5.0, 15.0).unwrap();
        assert_eq!(a.intersect(&b), Interval::new(5.0, 10.0).ok());
        assert_eq!(a.combine(&b), Interval::new(0.0, 15.0).unwrap());
    }

    #[test]
    fn disjoint_intervals_do_not_intersect() {
        let a = Interval::new(0.0, 1.0).unwrap();
        let b = Interval::new(2.0, 3.0).unwrap();
        assert!(!a.intersects(&b));
        assert!(a.intersect(&b).is_none());
    }
}
