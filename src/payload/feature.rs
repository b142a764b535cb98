//! Point/line/polygon collection payload (spec.md §4.I feature puzzling).

use crate::geometry::Cube3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeArray {
    Numeric(Vec<f64>),
    Text(Vec<String>),
}

impl AttributeArray {
    fn empty_like(&self) -> AttributeArray {
        match self {
            AttributeArray::Numeric(_) => AttributeArray::Numeric(Vec::new()),
            AttributeArray::Text(_) => AttributeArray::Text(Vec::new()),
        }
    }

    fn extend_from(&mut self, other: &AttributeArray) {
        match (self, other) {
            (AttributeArray::Numeric(a), AttributeArray::Numeric(b)) => a.extend_from_slice(b),
            (AttributeArray::Text(a), AttributeArray::Text(b)) => a.extend_from_slice(b),
            _ => {}
        }
    }

    fn select(&self, indices: &[usize]) -> AttributeArray {
        match self {
            AttributeArray::Numeric(v) => {
                AttributeArray::Numeric(indices.iter().map(|&i| v[i]).collect())
            }
            AttributeArray::Text(v) => {
                AttributeArray::Text(indices.iter().map(|&i| v[i].clone()).collect())
            }
        }
    }
}

/// A heterogeneous collection of point/line/polygon features. Coordinates
/// for all features are stored in one flat buffer; `coordinate_offsets`
/// (length `feature_count + 1`) marks where each feature's coordinates
/// begin, with a trailing sentinel equal to `coordinates.len()` — the same
/// "index vector with trailing total" shape the original implementation
/// used for its per-feature offset arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCollection {
    pub coordinates: Vec<(f64, f64)>,
    pub coordinate_offsets: Vec<usize>,
    pub time_start: Vec<f64>,
    pub time_end: Vec<f64>,
    pub attributes: HashMap<String, AttributeArray>,
}

impl FeatureCollection {
    pub fn empty() -> Self {
        Self {
            coordinates: Vec::new(),
            coordinate_offsets: vec![0],
            time_start: Vec::new(),
            time_end: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    pub fn feature_count(&self) -> usize {
        self.time_start.len()
    }

    pub fn size_bytes(&self) -> u64 {
        let coord_bytes = self.coordinates.len() * std::mem::size_of::<(f64, f64)>();
        let offset_bytes = self.coordinate_offsets.len() * std::mem::size_of::<usize>();
        let time_bytes = (self.time_start.len() + self.time_end.len()) * std::mem::size_of::<f64>();
        (coord_bytes + offset_bytes + time_bytes) as u64
    }

    fn feature_coords(&self, feature: usize) -> &[(f64, f64)] {
        &self.coordinates[self.coordinate_offsets[feature]..self.coordinate_offsets[feature + 1]]
    }

    fn feature_intersects(&self, feature: usize, bbox: &Cube3) -> bool {
        let t_start = self.time_start[feature];
        let t_end = self.time_end[feature];
        if t_end < bbox.t.a || t_start > bbox.t.b {
            return false;
        }
        self.feature_coords(feature)
            .iter()
            .any(|(x, y)| bbox.x.contains_value(*x) && bbox.y.contains_value(*y))
    }

    /// New collection containing only features that intersect `bbox`
    /// spatially and overlap it temporally, with all index arrays
    /// renumbered from zero.
    pub fn filter(&self, bbox: &Cube3) -> FeatureCollection {
        let keep: Vec<usize> = (0..self.feature_count())
            .filter(|&f| self.feature_intersects(f, bbox))
            .collect();

        let mut out = FeatureCollection::empty();
        out.coordinate_offsets.clear();
        out.coordinate_offsets.push(0);

        for &f in &keep {
            out.coordinates.extend_from_slice(self.feature_coords(f));
            out.coordinate_offsets.push(out.coordinates.len());
            out.time_start.push(self.time_start[f]);
            out.time_end.push(self.time_end[f]);
        }

        for (key, arr) in &self.attributes {
            out.attributes.insert(key.clone(), arr.select(&keep));
        }

        out
    }

    /// Concatenates `other`'s features onto `self`, shifting `other`'s
    /// coordinate offsets by `self`'s current coordinate count and
    /// dropping `self`'s trailing sentinel before appending `other`'s
    /// (spec.md §4.I: "the last element of the previous vector is popped,
    /// the new vector's values are shifted by that offset and appended").
    pub fn append(&mut self, other: &FeatureCollection) {
        let coord_offset = self.coordinates.len();
        self.coordinates.extend_from_slice(&other.coordinates);
        self.time_start.extend_from_slice(&other.time_start);
        self.time_end.extend_from_slice(&other.time_end);

        self.coordinate_offsets.pop();
        self.coordinate_offsets
            .extend(other.coordinate_offsets.iter().map(|&o| o + coord_offset));

        for (key, arr) in &other.attributes {
            self.attributes
                .entry(key.clone())
                .or_insert_with(|| arr.empty_like())
                .extend_from(arr);
        }
    }

    /// Envelope over every feature's coordinates and time span.
    pub fn bounds(&self) -> Option<Cube3> {
        use crate::geometry::Interval;
        if self.coordinates.is_empty() {
            return None;
        }
        let (mut x1, mut x2) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut y1, mut y2) = (f64::INFINITY, f64::NEG_INFINITY);
        for (x, y) in &self.coordinates {
            x1 = x1.min(*x);
            x2 = x2.max(*x);
            y1 = y1.min(*y);
            y2 = y2.max(*y);
        }
        let t1 = self.time_start.iter().cloned().fold(f64::INFINITY, f64::min);
        let t2 = self.time_end.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        Some(Cube3::new(
            Interval::new_unchecked(x1, x2),
            Interval::new_unchecked(y1, y2),
            Interval::new_unchecked(t1, t2),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Interval;

    fn sample() -> FeatureCollection {
        let mut fc = FeatureCollection::empty();
        fc.coordinates = vec![(0.0, 0.0), (1.0, 1.0), (50.0, 50.0)];
        fc.coordinate_offsets = vec![0, 2, 3];
        fc.time_start = vec![0.0, 0.0];
        fc.time_end = vec![1.0, 1.0];
        fc.attributes.insert(
            "name".to_string(),
            AttributeArray::Text(vec!["a".to_string(), "b".to_string()]),
        );
        fc
    }

    #[test]
    fn filter_keeps_intersecting_features_and_renumbers_offsets() {
        let fc = sample();
        let bbox = Cube3::new(
            Interval::new_unchecked(-1.0, 2.0),
            Interval::new_unchecked(-1.0, 2.0),
            Interval::new_unchecked(0.0, 1.0),
        );
        let filtered = fc.filter(&bbox);
        assert_eq!(filtered.feature_count(), 1);
        assert_eq!(filtered.coordinate_offsets, vec![0, 2]);
        assert_eq!(
            filtered.attributes.get("name"),
            Some(&AttributeArray::Text(vec!["a".to_string()]))
        );
    }

    #[test]
    fn append_shifts_offsets_and_merges_attributes() {
        let mut a = sample();
        let b = sample();
        let before_coords = a.coordinates.len();
        a.append(&b);
        assert_eq!(a.feature_count(), 4);
        assert_eq!(a.coordinate_offsets.last(), Some(&a.coordinates.len()));
        assert_eq!(a.coordinate_offsets[2], before_coords);
        let AttributeArray::Text(names) = a.attributes.get("name").unwrap() else {
            panic!("expected text attribute");
        };
        assert_eq!(names.len(), 4);
    }
}
