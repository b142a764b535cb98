//! The puzzle executor (spec.md §4.I): reassembles a `PuzzleRequest`'s
//! cached parts plus freshly-computed remainders into one `Payload`.
//!
//! Fetching parts is split from computing remainders: parts are already
//! materialized data (local or on another node), while a remainder is a
//! hole the planner couldn't cover and has to be produced by the
//! underlying data engine. That production step is out of this module's
//! scope (it's the operator-graph evaluation the spec treats as an
//! external system); `RemainderSource` is the seam this module calls
//! through to get it, so the reassembly algorithm itself is
//! engine-independent and testable without one.

use crate::error::{DeliveryError, GeocacheError};
use crate::geometry::{Cube3, QueryRectangle};
use crate::node::cache_manager::NodeCacheManager;
use crate::payload::{FeatureCollection, Payload, RasterTile};
use crate::wire::messages::{CacheRef, PuzzleRequest};
use std::sync::Arc;

/// Produces the data for a remainder cube the cache couldn't supply.
/// Implemented by whatever drives the actual compute engine; a test stub
/// can hand back fixed tiles/collections.
pub trait RemainderSource {
    fn compute_raster(&self, cube: &Cube3, pixel_scale_x: f64, pixel_scale_y: f64) -> Result<RasterTile, GeocacheError>;
    fn compute_features(&self, cube: &Cube3) -> Result<FeatureCollection, GeocacheError>;
}

/// Snaps `(v1, v2)` onto the pixel grid anchored at `reference` with
/// spacing `scale`: `v1' = reference + floor((v1-reference)/scale)*scale`,
/// `v2' = v1' + ceil((v2-v1')/scale)*scale` (spec.md §4.I).
fn snap_to_grid(v1: f64, v2: f64, reference: f64, scale: f64) -> (f64, f64) {
    if scale <= 0.0 {
        return (v1, v2);
    }
    let v1p = reference + ((v1 - reference) / scale).floor() * scale;
    let v2p = v1p + ((v2 - v1p) / scale).ceil() * scale;
    (v1p, v2p)
}

/// A snapped remainder thinner than half a pixel on either axis is
/// dropped rather than computed (spec.md §4.I: avoids degenerate
/// slivers the engine would round away anyway).
fn is_too_thin(x1: f64, x2: f64, y1: f64, y2: f64, scale_x: f64, scale_y: f64) -> bool {
    (x2 - x1) < 0.5 * scale_x || (y2 - y1) < 0.5 * scale_y
}

pub fn reassemble_raster(
    parts: &[RasterTile],
    remainders: &[Cube3],
    covered: &QueryRectangle,
    remainder_source: &dyn RemainderSource,
) -> Result<RasterTile, GeocacheError> {
    let (scale_x, scale_y, origin_x, origin_y) = parts
        .first()
        .map(|p| (p.pixel_scale_x, p.pixel_scale_y, p.x1, p.y1))
        .unwrap_or((covered.pixel_scale_x(), covered.pixel_scale_y(), covered.x1, covered.y1));

    let width = if scale_x > 0.0 { ((covered.x2 - covered.x1) / scale_x).round() as usize } else { 0 };
    let height = if scale_y > 0.0 { ((covered.y2 - covered.y1) / scale_y).round() as usize } else { 0 };
    let mut result = RasterTile::new(covered.x1, covered.y1, scale_x, scale_y, width, height, f64::NAN);

    for part in parts {
        if !part.fully_outside(&result) {
            part.blit_into(&mut result);
        }
    }

    for remainder in remainders {
        let (x1, x2) = snap_to_grid(remainder.x.a, remainder.x.b, origin_x, scale_x);
        let (y1, y2) = snap_to_grid(remainder.y.a, remainder.y.b, origin_y, scale_y);
        if is_too_thin(x1, x2, y1, y2, scale_x, scale_y) {
            continue;
        }
        let snapped = Cube3::new(
            crate::geometry::Interval::new_unchecked(x1, x2),
            crate::geometry::Interval::new_unchecked(y1, y2),
            remainder.t,
        );
        let tile = remainder_source.compute_raster(&snapped, scale_x, scale_y)?;
        if !tile.fully_outside(&result) {
            tile.blit_into(&mut result);
        }
    }

    Ok(result)
}

pub fn reassemble_features(
    parts: &[FeatureCollection],
    remainders: &[Cube3],
    remainder_source: &dyn RemainderSource,
) -> Result<FeatureCollection, GeocacheError> {
    let mut result = FeatureCollection::empty();
    for part in parts {
        result.append(part);
    }
    for remainder in remainders {
        let fetched = remainder_source.compute_features(remainder)?;
        result.append(&fetched);
    }
    Ok(result)
}

/// Full puzzle execution: gathers every part (local cache hit or a
/// delivery fetch from its owning node) and every remainder, then
/// dispatches to the type-specific reassembly routine.
pub async fn execute(
    request: &PuzzleRequest,
    cache_manager: &NodeCacheManager,
    remainder_source: &dyn RemainderSource,
    local_host: &str,
    local_port: u16,
) -> Result<Payload, GeocacheError> {
    let mut payloads = Vec::with_capacity(request.parts.len());
    for part in &request.parts {
        let payload = if part.host == local_host && part.port == local_port {
            cache_manager
                .get(request.base.cache_type, &request.base.semantic_id, part.entry_id)
                .ok_or_else(|| GeocacheError::Delivery(DeliveryError::InvalidDeliveryId(part.entry_id)))?
        } else {
            fetch_remote_part(part).await?
        };
        payloads.push(payload);
    }

    match request.base.cache_type {
        crate::cache::CacheType::Raster => {
            let tiles: Vec<RasterTile> = payloads
                .iter()
                .filter_map(|p| match p.as_ref() {
                    Payload::Raster(r) => Some(r.clone()),
                    _ => None,
                })
                .collect();
            let tile = reassemble_raster(&tiles, &request.remainder, &request.base.query, remainder_source)?;
            Ok(Payload::Raster(tile))
        }
        cache_type @ (crate::cache::CacheType::Points | crate::cache::CacheType::Lines | crate::cache::CacheType::Polygons) => {
            let collections: Vec<FeatureCollection> = payloads
                .iter()
                .filter_map(|p| match p.as_ref() {
                    Payload::Points(f) | Payload::Lines(f) | Payload::Polygons(f) => Some(f.clone()),
                    _ => None,
                })
                .collect();
            let merged = reassemble_features(&collections, &request.remainder, remainder_source)?;
            Ok(match cache_type {
                crate::cache::CacheType::Points => Payload::Points(merged),
                crate::cache::CacheType::Lines => Payload::Lines(merged),
                _ => Payload::Polygons(merged),
            })
        }
        crate::cache::CacheType::Plot => Err(GeocacheError::Internal("puzzling is not supported for plot payloads".to_string())),
    }
}

async fn fetch_remote_part(cache_ref: &CacheRef) -> Result<Arc<Payload>, GeocacheError> {
    use crate::wire::codes::delivery as delivery_codes;
    use crate::wire::framing::{read_frame, write_message};
    use tokio::net::TcpStream;

    let mut stream = TcpStream::connect((cache_ref.host.as_str(), cache_ref.port))
        .await
        .map_err(|e| GeocacheError::Wire(e.into()))?;
    write_message(&mut stream, delivery_codes::CMD_GET_CACHED_ITEM, &cache_ref.entry_id)
        .await
        .map_err(GeocacheError::Wire)?;
    let frame = read_frame(&mut stream, 256 * 1024 * 1024).await.map_err(GeocacheError::Wire)?;
    if frame.code != delivery_codes::RESP_CACHED_ITEM {
        return Err(GeocacheError::Delivery(DeliveryError::UnknownResponse(frame.code)));
    }
    let payload: Payload = frame.decode().map_err(GeocacheError::Wire)?;
    Ok(Arc::new(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Interval;

    struct ZeroSource;
    impl RemainderSource for ZeroSource {
        fn compute_raster(&self, cube: &Cube3, psx: f64, psy: f64) -> Result<RasterTile, GeocacheError> {
            let w = ((cube.x.b - cube.x.a) / psx).round() as usize;
            let h = ((cube.y.b - cube.y.a) / psy).round() as usize;
            Ok(RasterTile::new(cube.x.a, cube.y.a, psx, psy, w.max(1), h.max(1), f64::NAN))
        }
        fn compute_features(&self, _cube: &Cube3) -> Result<FeatureCollection, GeocacheError> {
            Ok(FeatureCollection::empty())
        }
    }

    #[test]
    fn snap_to_grid_aligns_to_pixel_boundaries() {
        let (x1, x2) = snap_to_grid(1.3, 4.7, 0.0, 1.0);
        assert_eq!((x1, x2), (1.0, 5.0));
    }

    #[test]
    fn sub_half_pixel_remainder_is_dropped() {
        assert!(is_too_thin(0.0, 0.3, 0.0, 10.0, 1.0, 1.0));
    }

    #[test]
    fn reassemble_raster_blits_parts_and_fills_remainder() {
        let covered = QueryRectangle::pixels(
            4326,
            0.0,
            0.0,
            4.0,
            4.0,
            crate::geometry::TimeType::UnixSeconds,
            0.0,
            1.0,
            4,
            4,
        )
        .unwrap();
        let mut part = RasterTile::new(0.0, 0.0, 1.0, 1.0, 2, 4, f64::NAN);
        part.set(0, 0, 9.0);
        let remainder = Cube3::new(Interval::new_unchecked(2.0, 4.0), Interval::new_unchecked(0.0, 4.0), Interval::new_unchecked(0.0, 1.0));

        let result = reassemble_raster(&[part], &[remainder], &covered, &ZeroSource).unwrap();
        assert_eq!(result.get(0, 0), 9.0);
    }
}
