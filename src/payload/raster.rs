//! Raster tile payload (spec.md §4.I raster puzzling).

use serde::{Deserialize, Serialize};

/// A rectangular grid of `f64` samples with an explicit spatial origin and
/// pixel scale, so pieces can be blitted into a larger result raster by
/// simple offset arithmetic (spec.md §4.I).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterTile {
    pub x1: f64,
    pub y1: f64,
    pub pixel_scale_x: f64,
    pub pixel_scale_y: f64,
    pub width: usize,
    pub height: usize,
    pub no_data: f64,
    pub data: Vec<f64>,
}

impl RasterTile {
    pub fn new(
        x1: f64,
        y1: f64,
        pixel_scale_x: f64,
        pixel_scale_y: f64,
        width: usize,
        height: usize,
        no_data: f64,
    ) -> Self {
        Self {
            x1,
            y1,
            pixel_scale_x,
            pixel_scale_y,
            width,
            height,
            no_data,
            data: vec![no_data; width * height],
        }
    }

    pub fn size_bytes(&self) -> u64 {
        (self.data.len() * std::mem::size_of::<f64>()) as u64
    }

    pub fn get(&self, px: usize, py: usize) -> f64 {
        self.data[py * self.width + px]
    }

    pub fn set(&mut self, px: usize, py: usize, value: f64) {
        self.data[py * self.width + px] = value;
    }

    /// Pixel offset of `self`'s origin within a result raster whose
    /// origin is `(result_x1, result_y1)` at the same pixel scale.
    pub fn offset_in(&self, result_x1: f64, result_y1: f64) -> (i64, i64) {
        let ox = ((self.x1 - result_x1) / self.pixel_scale_x).round() as i64;
        let oy = ((self.y1 - result_y1) / self.pixel_scale_y).round() as i64;
        (ox, oy)
    }

    /// Blits this tile into `result` at the computed offset, dropping any
    /// pixels that fall fully outside the destination (the caller should
    /// have already warned and planned a remainder covering them).
    pub fn blit_into(&self, result: &mut RasterTile) {
        let (ox, oy) = self.offset_in(result.x1, result.y1);
        for y in 0..self.height {
            let ry = oy + y as i64;
            if ry < 0 || ry as usize >= result.height {
                continue;
            }
            for x in 0..self.width {
                let rx = ox + x as i64;
                if rx < 0 || rx as usize >= result.width {
                    continue;
                }
                let v = self.get(x, y);
                if v != self.no_data {
                    result.set(rx as usize, ry as usize, v);
                }
            }
        }
    }

    /// True if this tile lies entirely outside `result`'s extent.
    pub fn fully_outside(&self, result: &RasterTile) -> bool {
        let (ox, oy) = self.offset_in(result.x1, result.y1);
        ox + self.width as i64 <= 0
            || oy + self.height as i64 <= 0
            || ox >= result.width as i64
            || oy >= result.height as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blit_places_pixels_at_correct_offset() {
        let mut result = RasterTile::new(0.0, 0.0, 1.0, 1.0, 4, 4, -1.0);
        let mut piece = RasterTile::new(2.0, 2.0, 1.0, 1.0, 2, 2, -1.0);
        piece.set(0, 0, 42.0);
        piece.blit_into(&mut result);
        assert_eq!(result.get(2, 2), 42.0);
        assert_eq!(result.get(0, 0), -1.0);
    }

    #[test]
    fn fully_outside_tiles_are_detected() {
        let result = RasterTile::new(0.0, 0.0, 1.0, 1.0, 4, 4, -1.0);
        let piece = RasterTile::new(100.0, 100.0, 1.0, 1.0, 2, 2, -1.0);
        assert!(piece.fully_outside(&result));
    }
}
