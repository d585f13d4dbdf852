//! Viewport helpers for map callers: region to bbox, the zoom that fits a
//! bbox, and the region that covers a set of markers.

use std::f64::consts::{LN_2, PI};

use crate::types::{BBox, LatLng, MapDimensions, Region};

/// `[lng - lngΔ, lat - latΔ, lng + lngΔ, lat + latΔ]`. A negative longitude
/// delta (a region spanning the antimeridian) is taken modulo 360.
pub fn region_to_bbox(region: &Region) -> BBox {
    let lng_delta = if region.longitude_delta < 0.0 {
        region.longitude_delta + 360.0
    } else {
        region.longitude_delta
    };

    [
        region.longitude - lng_delta,
        region.latitude - region.latitude_delta,
        region.longitude + lng_delta,
        region.latitude + region.latitude_delta,
    ]
}

/// Highest zoom at which `bounds` still fits, capped at `max_zoom`.
pub fn bounds_zoom_level(bounds: BBox, dims: &MapDimensions, max_zoom: i32) -> i32 {
    let lat_fraction = (lat_rad(bounds[3]) - lat_rad(bounds[1])) / PI;
    let lng_diff = bounds[2] - bounds[0];
    let lng_fraction = (if lng_diff < 0.0 { lng_diff + 360.0 } else { lng_diff }) / 360.0;

    let lat_zoom = fit_zoom(dims.height, dims.height, lat_fraction);
    let lng_zoom = fit_zoom(dims.width, dims.width, lng_fraction);

    lat_zoom.min(lng_zoom).min(max_zoom)
}

/// Centre of the points' bounding box, with deltas twice its extent.
/// `None` for an empty slice.
pub fn markers_region(points: &[LatLng]) -> Option<Region> {
    let first = points.first()?;
    let (mut min_lat, mut max_lat) = (first.latitude, first.latitude);
    let (mut min_lng, mut max_lng) = (first.longitude, first.longitude);

    for p in &points[1..] {
        min_lat = min_lat.min(p.latitude);
        max_lat = max_lat.max(p.latitude);
        min_lng = min_lng.min(p.longitude);
        max_lng = max_lng.max(p.longitude);
    }

    Some(Region {
        latitude: (min_lat + max_lat) / 2.0,
        longitude: (min_lng + max_lng) / 2.0,
        latitude_delta: (max_lat - min_lat) * 2.0,
        longitude_delta: (max_lng - min_lng) * 2.0,
    })
}

fn lat_rad(lat: f64) -> f64 {
    let sin = (lat * PI / 180.0).sin();
    let rad_x2 = ((1.0 + sin) / (1.0 - sin)).ln() / 2.0;
    rad_x2.clamp(-PI, PI) / 2.0
}

fn fit_zoom(map_px: f64, world_px: f64, fraction: f64) -> i32 {
    // A zero fraction gives +inf, which saturates and loses to max_zoom.
    ((map_px / world_px / fraction).ln() / LN_2).floor() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> MapDimensions {
        MapDimensions {
            width: 390.0,
            height: 844.0,
        }
    }

    #[test]
    fn region_to_bbox_uses_full_deltas() {
        let bbox = region_to_bbox(&Region {
            latitude: 10.0,
            longitude: 20.0,
            latitude_delta: 1.0,
            longitude_delta: 2.0,
        });
        assert_eq!(bbox, [18.0, 9.0, 22.0, 11.0]);
    }

    #[test]
    fn region_to_bbox_wraps_negative_delta() {
        let bbox = region_to_bbox(&Region {
            latitude: 0.0,
            longitude: 0.0,
            latitude_delta: 1.0,
            longitude_delta: -350.0,
        });
        assert_eq!(bbox, [-10.0, -1.0, 10.0, 1.0]);
    }

    #[test]
    fn world_bbox_is_zoom_zero() {
        assert_eq!(bounds_zoom_level([-180.0, -85.0, 180.0, 85.0], &dims(), 20), 0);
    }

    #[test]
    fn one_degree_bbox_and_cap() {
        let bbox = [0.0, -0.5, 1.0, 0.5];
        assert_eq!(bounds_zoom_level(bbox, &dims(), 20), 8);
        assert_eq!(bounds_zoom_level(bbox, &dims(), 5), 5);
    }

    #[test]
    fn antimeridian_bbox_wraps_longitude_span() {
        // 20 degrees of longitude across the antimeridian limits the zoom.
        assert_eq!(bounds_zoom_level([170.0, -1.0, -170.0, 1.0], &dims(), 20), 4);
    }

    #[test]
    fn degenerate_bbox_falls_back_to_max_zoom() {
        assert_eq!(bounds_zoom_level([5.0, 5.0, 5.0, 5.0], &dims(), 17), 17);
    }

    #[test]
    fn markers_region_centres_and_doubles() {
        let region = markers_region(&[
            LatLng {
                latitude: 10.0,
                longitude: 20.0,
            },
            LatLng {
                latitude: 12.0,
                longitude: 26.0,
            },
        ])
        .unwrap();

        assert_eq!(
            region,
            Region {
                latitude: 11.0,
                longitude: 23.0,
                latitude_delta: 4.0,
                longitude_delta: 12.0,
            }
        );
    }

    #[test]
    fn markers_region_of_nothing() {
        assert!(markers_region(&[]).is_none());
    }
}
