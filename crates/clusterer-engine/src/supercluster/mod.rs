//! Hierarchical point clustering over zoom levels.
//!
//! Input points are projected to Web-Mercator unit space and indexed at
//! `max_zoom + 1`. Each lower level is built by greedily merging neighbours of
//! the level above within `radius / (extent * 2^z)`, so a cluster id encodes
//! both the level it came from and its position there. The index is immutable
//! after construction.
//!
//! # Cluster ids
//!
//! `id = (index << 5) + (zoom + 1)`: the low five bits name the zoom whose
//! entries the cluster absorbed, the rest is the cluster's index at that zoom.
//! Child and leaf lookups decode the id and search that level for entries
//! whose `parent_id` matches.

mod zoom;

use std::f64::consts::PI;
use std::time::Instant;

use serde_json::{json, Value};

use crate::errors::ClusterError;
use crate::region::{bounds_zoom_level, markers_region, region_to_bbox};
use crate::types::{
    BBox, ClusterOptions, LatLng, MapDimensions, PointFeature, Properties, Region, Tile,
    TileFeature, TILE_POINT,
};

use zoom::{Cluster, Zoom};

/// Default page size for [`Supercluster::get_leaves`].
pub const DEFAULT_LEAVES_LIMIT: usize = 10;

/// Longitude deltas at or above this use `min_zoom` in
/// [`Supercluster::clusters_for_region`].
const WIDE_REGION_LNG_DELTA: f64 = 40.0;

/// A loaded, immutable cluster index.
#[derive(Debug, Clone)]
pub struct Supercluster {
    features: Vec<PointFeature>,
    options: ClusterOptions,
    /// `levels[0]` is `min_zoom`, the last entry is `max_zoom + 1`.
    levels: Vec<Zoom>,
}

impl Supercluster {
    /// Index `features` and build every zoom level from `max_zoom + 1` down
    /// to `min_zoom`.
    pub fn new(features: Vec<PointFeature>, options: ClusterOptions) -> Result<Self, ClusterError> {
        options.validate()?;

        let started = Instant::now();
        let mut levels = Vec::with_capacity(usize::from(options.max_zoom - options.min_zoom) + 2);
        let mut current = Zoom::from_features(&features, &options);

        for z in (options.min_zoom..=options.max_zoom).rev() {
            let r = f64::from(options.radius) / (f64::from(options.extent) * 2f64.powi(i32::from(z)));
            let next = Zoom::cluster(&mut current, r, z, &options);
            levels.push(std::mem::replace(&mut current, next));
        }
        levels.push(current);
        levels.reverse();

        tracing::debug!(
            points = features.len(),
            min_zoom = options.min_zoom,
            max_zoom = options.max_zoom,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "cluster index built"
        );

        Ok(Self {
            features,
            options,
            levels,
        })
    }

    /// Parse a JSON feature array (or `FeatureCollection`) and index it.
    pub fn from_json(features: &Value, options: ClusterOptions) -> Result<Self, ClusterError> {
        let features = crate::types::parse_features(features)?;
        Self::new(features, options)
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    /// The input features, in load order.
    pub fn features(&self) -> &[PointFeature] {
        &self.features
    }

    /// Clusters and points intersecting `bbox` (`[west, south, east, north]`)
    /// at `zoom`.
    ///
    /// Longitudes wrap, so a bbox crossing the antimeridian returns the
    /// eastern half followed by the western half.
    pub fn get_clusters(&self, bbox: BBox, zoom: u8) -> Result<Vec<PointFeature>, ClusterError> {
        if bbox.iter().any(|v| !v.is_finite()) {
            return Err(ClusterError::InvalidBbox {
                message: "all four bounds must be finite numbers".into(),
            });
        }

        let mut min_lng = wrap_lng(bbox[0]);
        let min_lat = bbox[1].clamp(-90.0, 90.0);
        let mut max_lng = if bbox[2] == 180.0 { 180.0 } else { wrap_lng(bbox[2]) };
        let max_lat = bbox[3].clamp(-90.0, 90.0);

        if bbox[2] - bbox[0] >= 360.0 {
            min_lng = -180.0;
            max_lng = 180.0;
        } else if min_lng > max_lng {
            let mut eastern = self.get_clusters([min_lng, min_lat, 180.0, max_lat], zoom)?;
            let western = self.get_clusters([-180.0, min_lat, max_lng, max_lat], zoom)?;
            eastern.extend(western);
            return Ok(eastern);
        }

        let level = self.level(zoom);
        let mut result = Vec::new();
        level.tree.range(
            lng_x(min_lng),
            lat_y(max_lat),
            lng_x(max_lng),
            lat_y(min_lat),
            |id| result.push(self.to_feature(&level.clusters[id as usize])),
        );
        Ok(result)
    }

    /// geojson-vt compatible tile `(z, x, y)`, including a `radius / extent`
    /// buffer that wraps across the antimeridian on edge tiles.
    pub fn get_tile(&self, z: u8, x: u32, y: u32) -> Tile {
        let level = self.level(z);
        let z2 = 2f64.powi(i32::from(z));
        let r = f64::from(self.options.radius) / f64::from(self.options.extent);
        let (xf, yf) = (f64::from(x), f64::from(y));

        let top = (yf - r) / z2;
        let bottom = (yf + 1.0 + r) / z2;

        let mut features = Vec::new();
        self.add_tile_features(
            level,
            [(xf - r) / z2, top, (xf + 1.0 + r) / z2, bottom],
            z2,
            xf,
            yf,
            &mut features,
        );

        if x == 0 {
            self.add_tile_features(level, [1.0 - r / z2, top, 1.0, bottom], z2, z2, yf, &mut features);
        }
        if xf == z2 - 1.0 {
            self.add_tile_features(level, [0.0, top, r / z2, bottom], z2, -1.0, yf, &mut features);
        }

        Tile { features }
    }

    /// Children of a cluster on the next zoom level.
    pub fn get_children(&self, cluster_id: u32) -> Result<Vec<PointFeature>, ClusterError> {
        Ok(self
            .children_of(cluster_id)?
            .into_iter()
            .map(|c| self.to_feature(c))
            .collect())
    }

    /// Original points under a cluster, depth first, skipping `offset` and
    /// returning at most `limit`. Pass `usize::MAX` for every point.
    pub fn get_leaves(
        &self,
        cluster_id: u32,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PointFeature>, ClusterError> {
        let mut leaves = Vec::new();
        let mut remaining = limit;
        let mut skipped = 0;
        self.collect_leaves(cluster_id, &mut remaining, offset, &mut skipped, &mut leaves)?;
        Ok(leaves.into_iter().map(|c| self.to_feature(c)).collect())
    }

    /// Zoom at which the cluster splits into more than one child.
    pub fn get_cluster_expansion_zoom(&self, cluster_id: u32) -> Result<u8, ClusterError> {
        let mut id = cluster_id;
        let mut cluster_zoom = (cluster_id % 32) as i32 - 1;

        while cluster_zoom <= i32::from(self.options.max_zoom) {
            let children = self.children_of(id)?;
            cluster_zoom += 1;
            if children.len() != 1 {
                break;
            }
            id = children[0].id;
        }

        Ok(cluster_zoom.max(0) as u8)
    }

    /// Region covering the points a cluster expands into, following
    /// single-child chains down until the cluster actually splits.
    pub fn cluster_expansion_region(&self, cluster_id: u32) -> Result<Region, ClusterError> {
        let mut id = cluster_id;
        let children = loop {
            let children = self.children_of(id)?;
            match children.as_slice() {
                [only] if only.num_points > 1 => id = only.id,
                _ => break children,
            }
        };

        let points: Vec<LatLng> = children
            .into_iter()
            .map(|c| {
                let f = self.to_feature(c);
                LatLng {
                    latitude: f.lat(),
                    longitude: f.lng(),
                }
            })
            .collect();

        markers_region(&points).ok_or(ClusterError::ClusterNotFound { id: cluster_id })
    }

    /// Clusters visible in a map viewport, picking the zoom from the region
    /// span.
    pub fn clusters_for_region(
        &self,
        region: &Region,
        dimensions: &MapDimensions,
    ) -> Result<Vec<PointFeature>, ClusterError> {
        let bbox = region_to_bbox(region);

        if region.longitude_delta >= WIDE_REGION_LNG_DELTA {
            return self.get_clusters(bbox, self.options.min_zoom);
        }

        let max = i32::from(self.options.max_zoom) + 1;
        let zoom = bounds_zoom_level(bbox, dimensions, max).clamp(i32::from(self.options.min_zoom), max);
        self.get_clusters(bbox, zoom as u8)
    }

    fn level(&self, zoom: u8) -> &Zoom {
        let z = zoom.clamp(self.options.min_zoom, self.options.max_zoom + 1);
        &self.levels[usize::from(z - self.options.min_zoom)]
    }

    fn children_of(&self, cluster_id: u32) -> Result<Vec<&Cluster>, ClusterError> {
        let not_found = || ClusterError::ClusterNotFound { id: cluster_id };
        let origin_id = (cluster_id >> 5) as usize;
        let origin_zoom = (cluster_id % 32) as usize;

        // Zoom bits of 0 never occur in a cluster id, and levels below
        // min_zoom don't exist.
        if origin_zoom == 0 {
            return Err(not_found());
        }
        let level = origin_zoom
            .checked_sub(usize::from(self.options.min_zoom))
            .and_then(|i| self.levels.get(i))
            .ok_or_else(not_found)?;
        let origin = level.clusters.get(origin_id).ok_or_else(not_found)?;

        let r = f64::from(self.options.radius)
            / (f64::from(self.options.extent) * 2f64.powi(origin_zoom as i32 - 1));

        let mut children = Vec::new();
        level.tree.within(origin.pos[0], origin.pos[1], r, |id| {
            let child = &level.clusters[id as usize];
            if child.parent_id == cluster_id {
                children.push(child);
            }
        });

        if children.is_empty() {
            return Err(not_found());
        }
        Ok(children)
    }

    fn collect_leaves<'a>(
        &'a self,
        cluster_id: u32,
        remaining: &mut usize,
        offset: usize,
        skipped: &mut usize,
        leaves: &mut Vec<&'a Cluster>,
    ) -> Result<(), ClusterError> {
        for child in self.children_of(cluster_id)? {
            if *remaining == 0 {
                break;
            }
            let points = child.num_points as usize;
            if points > 1 {
                if *skipped + points <= offset {
                    // The whole sub-cluster falls inside the offset.
                    *skipped += points;
                } else {
                    self.collect_leaves(child.id, remaining, offset, skipped, leaves)?;
                }
            } else if *skipped < offset {
                *skipped += 1;
            } else {
                leaves.push(child);
                *remaining -= 1;
            }
        }
        Ok(())
    }

    fn add_tile_features(
        &self,
        level: &Zoom,
        bounds: [f64; 4],
        z2: f64,
        x: f64,
        y: f64,
        out: &mut Vec<TileFeature>,
    ) {
        let extent = f64::from(self.options.extent);
        level
            .tree
            .range(bounds[0], bounds[1], bounds[2], bounds[3], |id| {
                let c = &level.clusters[id as usize];
                let point = [
                    (extent * (c.pos[0] * z2 - x)).round() as i16,
                    (extent * (c.pos[1] * z2 - y)).round() as i16,
                ];

                let feature = if c.num_points == 1 {
                    let original = &self.features[c.id as usize];
                    let id = if self.options.generate_id {
                        Some(json!(c.id))
                    } else {
                        original.id.clone()
                    };
                    TileFeature {
                        kind: TILE_POINT,
                        geometry: vec![point],
                        tags: original.properties.clone(),
                        id,
                    }
                } else {
                    TileFeature {
                        kind: TILE_POINT,
                        geometry: vec![point],
                        tags: cluster_properties(c),
                        id: Some(json!(c.id)),
                    }
                };
                out.push(feature);
            });
    }

    fn to_feature(&self, c: &Cluster) -> PointFeature {
        if c.num_points == 1 {
            return self.features[c.id as usize].clone();
        }
        let [lng, lat] = unproject(c.pos);
        PointFeature {
            id: Some(json!(c.id)),
            geometry: crate::types::PointGeometry {
                coordinates: [lng, lat],
            },
            properties: cluster_properties(c),
        }
    }
}

fn cluster_properties(c: &Cluster) -> Properties {
    let mut properties = Properties::new();
    properties.insert("cluster".into(), Value::Bool(true));
    properties.insert("cluster_id".into(), json!(c.id));
    properties.insert("point_count".into(), json!(c.num_points));
    properties.insert(
        "point_count_abbreviated".into(),
        Value::String(abbreviate(c.num_points)),
    );
    properties
}

/// `1298` → `"1.3k"`, `25400` → `"25k"`, small counts verbatim.
fn abbreviate(count: u32) -> String {
    let n = f64::from(count);
    if count >= 10_000 {
        format!("{}k", (n / 1000.0).round())
    } else if count >= 1000 {
        format!("{}k", (n / 100.0).round() / 10.0)
    } else {
        count.to_string()
    }
}

fn wrap_lng(lng: f64) -> f64 {
    ((lng + 180.0) % 360.0 + 360.0) % 360.0 - 180.0
}

fn lng_x(lng: f64) -> f64 {
    lng / 360.0 + 0.5
}

fn lat_y(lat: f64) -> f64 {
    let sin = (lat * PI / 180.0).sin();
    let y = 0.5 - 0.25 * ((1.0 + sin) / (1.0 - sin)).ln() / PI;
    y.clamp(0.0, 1.0)
}

pub(crate) fn project(lng: f64, lat: f64) -> [f64; 2] {
    [lng_x(lng), lat_y(lat)]
}

fn unproject(pos: [f64; 2]) -> [f64; 2] {
    let lng = (pos[0] - 0.5) * 360.0;
    let lat = 360.0 * ((180.0 - pos[1] * 360.0) * PI / 180.0).exp().atan() / PI - 90.0;
    [lng, lat]
}
