//! `QueryCube` and `QueryRectangle` (spec.md §3.1).

use super::cube::Cube3;
use super::interval::Interval;
use crate::error::InvalidArgument;
use serde::{Deserialize, Serialize};

/// Coordinate reference system id (EPSG code).
pub type Epsg = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeType {
    Unreferenced,
    UnixSeconds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionType {
    None,
    Pixels,
}

/// A `Cube3` tagged with the coordinate space it lives in. Queries are
/// only ever compared within the same (epsg, timetype) space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryCube {
    pub cube: Cube3,
    pub epsg: Epsg,
    pub time_type: TimeType,
}

impl QueryCube {
    pub fn same_space(&self, other: &QueryCube) -> bool {
        self.epsg == other.epsg && self.time_type == other.time_type
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryRectangle {
    pub epsg: Epsg,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub time_type: TimeType,
    pub t1: f64,
    pub t2: f64,
    pub resolution_type: ResolutionType,
    pub xres: u32,
    pub yres: u32,
}

impl QueryRectangle {
    pub fn none(
        epsg: Epsg,
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        time_type: TimeType,
        t1: f64,
        t2: f64,
    ) -> Result<Self, InvalidArgument> {
        if x1 > x2 || y1 > y2 || t1 > t2 {
            return Err(InvalidArgument::Other(
                "non-monotonic query rectangle bounds".to_string(),
            ));
        }
        Ok(Self {
            epsg,
            x1,
            y1,
            x2,
            y2,
            time_type,
            t1,
            t2,
            resolution_type: ResolutionType::None,
            xres: 0,
            yres: 0,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn pixels(
        epsg: Epsg,
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        time_type: TimeType,
        t1: f64,
        t2: f64,
        xres: u32,
        yres: u32,
    ) -> Result<Self, InvalidArgument> {
        let mut qr = Self::none(epsg, x1, y1, x2, y2, time_type, t1, t2)?;
        qr.resolution_type = ResolutionType::Pixels;
        qr.xres = xres;
        qr.yres = yres;
        Ok(qr)
    }

    pub fn cube(&self) -> Cube3 {
        Cube3::new(
            Interval::new_unchecked(self.x1, self.x2),
            Interval::new_unchecked(self.y1, self.y2),
            Interval::new_unchecked(self.t1, self.t2),
        )
    }

    pub fn query_cube(&self) -> QueryCube {
        QueryCube {
            cube: self.cube(),
            epsg: self.epsg,
            time_type: self.time_type,
        }
    }

    pub fn pixel_scale_x(&self) -> f64 {
        if self.xres == 0 {
            0.0
        } else {
            (self.x2 - self.x1) / self.xres as f64
        }
    }

    pub fn pixel_scale_y(&self) -> f64 {
        if self.yres == 0 {
            0.0
        } else {
            (self.y2 - self.y1) / self.yres as f64
        }
    }

    pub fn is_pixels(&self) -> bool {
        self.resolution_type == ResolutionType::Pixels
    }

    /// Within `tolerance` (e.g. 0.01 for 1%) of another query's pixel
    /// scales on both axes.
    pub fn pixel_scale_matches(&self, other: &QueryRectangle, tolerance: f64) -> bool {
        let rel_close = |a: f64, b: f64| {
            if a == 0.0 && b == 0.0 {
                true
            } else {
                (a - b).abs() <= tolerance * a.abs().max(b.abs())
            }
        };
        rel_close(self.pixel_scale_x(), other.pixel_scale_x())
            && rel_close(self.pixel_scale_y(), other.pixel_scale_y())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_monotonic_rectangle() {
        assert!(QueryRectangle::none(4326, 10.0, 0.0, 0.0, 10.0, TimeType::UnixSeconds, 0.0, 1.0).is_err());
    }

    #[test]
    fn pixel_scale_computed_from_extent_and_resolution() {
        let qr = QueryRectangle::pixels(4326, 0.0, 0.0, 25.6, 25.6, TimeType::UnixSeconds, 0.0, 1.0, 256, 256).unwrap();
        assert!((qr.pixel_scale_x() - 0.1).abs() < 1e-9);
    }
}
