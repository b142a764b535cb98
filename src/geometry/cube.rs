//! Axis-aligned (x, y, t) cubes — the algebraic heart of the planner.

use super::interval::Interval;
use crate::error::InvalidArgument;
use serde::{Deserialize, Serialize};

/// A fixed epsilon substituted for a zero-width time dimension so volumes
/// stay strictly positive (a point-in-time query must still out-score a
/// zero-volume candidate in the planner's heap).
pub const TIME_EPSILON: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cube3 {
    pub x: Interval,
    pub y: Interval,
    pub t: Interval,
}

impl Cube3 {
    pub fn new(x: Interval, y: Interval, t: Interval) -> Self {
        Self { x, y, t }
    }

    pub fn from_bounds(
        x1: f64,
        x2: f64,
        y1: f64,
        y2: f64,
        t1: f64,
        t2: f64,
    ) -> Result<Self, InvalidArgument> {
        Ok(Self {
            x: Interval::new(x1, x2)?,
            y: Interval::new(y1, y2)?,
            t: Interval::new(t1, t2)?,
        })
    }

    pub fn volume(&self) -> f64 {
        let tw = if self.t.distance() == 0.0 {
            TIME_EPSILON
        } else {
            self.t.distance()
        };
        self.x.distance() * self.y.distance() * tw
    }

    pub fn intersects(&self, other: &Cube3) -> bool {
        self.x.intersects(&other.x) && self.y.intersects(&other.y) && self.t.intersects(&other.t)
    }

    pub fn intersect(&self, other: &Cube3) -> Option<Cube3> {
        Some(Cube3 {
            x: self.x.intersect(&other.x)?,
            y: self.y.intersect(&other.y)?,
            t: self.t.intersect(&other.t)?,
        })
    }

    pub fn intersection_volume(&self, other: &Cube3) -> f64 {
        self.intersect(other).map(|c| c.volume()).unwrap_or(0.0)
    }

    /// Smallest enclosing cube.
    pub fn combine(&self, other: &Cube3) -> Cube3 {
        Cube3 {
            x: self.x.combine(&other.x),
            y: self.y.combine(&other.y),
            t: self.t.combine(&other.t),
        }
    }

    /// Returns 0-6 axis-aligned cubes whose union equals `self \ other`.
    ///
    /// Standard axis-planar subtraction: for each dimension in turn, emit
    /// the slab(s) that fall outside `other`'s extent on that axis,
    /// restricted to the intersection already established on the prior
    /// axes so the resulting pieces are pairwise disjoint. If `other`
    /// doesn't intersect `self` at all, the result is `self` unchanged.
    pub fn dissect_by(&self, other: &Cube3) -> Vec<Cube3> {
        let (ix, iy, it) = match (
            self.x.intersect(&other.x),
            self.y.intersect(&other.y),
            self.t.intersect(&other.t),
        ) {
            (Some(ix), Some(iy), Some(it)) => (ix, iy, it),
            _ => return vec![*self],
        };

        let mut pieces = Vec::with_capacity(6);

        if self.x.a < ix.a {
            pieces.push(Cube3::new(Interval::new_unchecked(self.x.a, ix.a), self.y, self.t));
        }
        if self.x.b > ix.b {
            pieces.push(Cube3::new(Interval::new_unchecked(ix.b, self.x.b), self.y, self.t));
        }
        if self.y.a < iy.a {
            pieces.push(Cube3::new(ix, Interval::new_unchecked(self.y.a, iy.a), self.t));
        }
        if self.y.b > iy.b {
            pieces.push(Cube3::new(ix, Interval::new_unchecked(iy.b, self.y.b), self.t));
        }
        if self.t.a < it.a {
            pieces.push(Cube3::new(ix, iy, Interval::new_unchecked(self.t.a, it.a)));
        }
        if self.t.b > it.b {
            pieces.push(Cube3::new(ix, iy, Interval::new_unchecked(it.b, self.t.b)));
        }

        pieces
    }

    /// Greedy near-adjacent merge: combine `self` and `other` into their
    /// hull if that doesn't grow volume more than 1% over the sum of the
    /// parts (spec.md §4.C step 3).
    pub fn try_union_near_equal_volume(&self, other: &Cube3) -> Option<Cube3> {
        let combined = self.combine(other);
        if combined.volume() <= (self.volume() + other.volume()) * 1.01 {
            Some(combined)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(x1: f64, x2: f64, y1: f64, y2: f64, t1: f64, t2: f64) -> Cube3 {
        Cube3::from_bounds(x1, x2, y1, y2, t1, t2).unwrap()
    }

    #[test]
    fn volume_uses_time_epsilon_for_point_in_time() {
        let c = cube(0.0, 10.0, 0.0, 10.0, 5.0, 5.0);
        assert_eq!(c.volume(), 10.0 * 10.0 * TIME_EPSILON);
    }

    #[test]
    fn dissect_by_disjoint_other_returns_self() {
        let a = cube(0.0, 10.0, 0.0, 10.0, 0.0, 1.0);
        let b = cube(20.0, 30.0, 0.0, 10.0, 0.0, 1.0);
        let pieces = a.dissect_by(&b);
        assert_eq!(pieces, vec![a]);
    }

    #[test]
    fn dissect_by_union_equals_difference_and_pieces_disjoint_from_other() {
        let a = cube(0.0, 10.0, 0.0, 10.0, 0.0, 10.0);
        let b = cube(3.0, 6.0, 2.0, 8.0, 1.0, 9.0);
        let pieces = a.dissect_by(&b);
        assert!(!pieces.is_empty());

        for p in &pieces {
            assert_eq!(p.intersection_volume(&b), 0.0);
        }

        let total: f64 = pieces.iter().map(|p| p.volume()).sum();
        let expected = a.volume() - a.intersection_volume(&b);
        assert!((total - expected).abs() < 1e-9, "{total} vs {expected}");

        for pz in &pieces {
            assert!(a.intersect(pz) == Some(*pz), "piece must lie within self");
        }
    }

    #[test]
    fn dissect_by_fully_contained_other_yields_six_pieces() {
        let a = cube(0.0, 10.0, 0.0, 10.0, 0.0, 10.0);
        let b = cube(4.0, 6.0, 4.0, 6.0, 4.0, 6.0);
        assert_eq!(a.dissect_by(&b).len(), 6);
    }

    #[test]
    fn union_near_equal_volume_rejects_far_apart_cubes() {
        let a = cube(0.0, 1.0, 0.0, 1.0, 0.0, 1.0);
        let b = cube(100.0, 101.0, 0.0, 1.0, 0.0, 1.0);
        assert!(a.try_union_near_equal_volume(&b).is_none());
    }

    #[test]
    fn union_near_equal_volume_accepts_adjacent_slabs() {
        let a = cube(0.0, 5.0, 0.0, 10.0, 0.0, 1.0);
        let b = cube(5.0, 10.0, 0.0, 10.0, 0.0, 1.0);
        assert!(a.try_union_near_equal_volume(&b).is_some());
    }
}
