//! One zoom level of the cluster hierarchy and the pass that builds it.

use crate::index::KdIndex;
use crate::types::{ClusterOptions, PointFeature};

use super::project;

/// Point indices are stored in the upper 27 bits of a cluster id.
const MAX_CLUSTER_INDEX: usize = 0x7ff_ffff;

/// A point or cluster at one zoom level, in projected unit coordinates.
#[derive(Debug, Clone)]
pub(crate) struct Cluster {
    pub pos: [f64; 2],
    pub num_points: u32,
    /// Input feature index for single points, encoded cluster id otherwise.
    pub id: u32,
    /// Id of the cluster that absorbed this entry one zoom level down; 0 if none.
    pub parent_id: u32,
    visited: bool,
}

impl Cluster {
    fn new(pos: [f64; 2], num_points: u32, id: u32) -> Self {
        Self {
            pos,
            num_points,
            id,
            parent_id: 0,
            visited: false,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Zoom {
    pub tree: KdIndex,
    pub clusters: Vec<Cluster>,
}

impl Zoom {
    /// The unclustered level: one entry per input feature.
    pub fn from_features(features: &[PointFeature], options: &ClusterOptions) -> Self {
        let clusters: Vec<Cluster> = features
            .iter()
            .enumerate()
            .map(|(i, f)| Cluster::new(project(f.lng(), f.lat()), 1, i as u32))
            .collect();
        Self::indexed(clusters, options)
    }

    /// Cluster `previous` (zoom `zoom + 1`) into zoom `zoom` with radius `r`.
    ///
    /// Marks every entry of `previous` as visited and records which cluster
    /// absorbed it, which is what child lookups rely on later.
    pub fn cluster(previous: &mut Zoom, r: f64, zoom: u8, options: &ClusterOptions) -> Self {
        let Zoom {
            tree,
            clusters: prev,
        } = previous;

        let mut clusters = Vec::new();
        let count = prev.len().min(MAX_CLUSTER_INDEX);

        for i in 0..count {
            if prev[i].visited {
                continue;
            }
            prev[i].visited = true;

            let [px, py] = prev[i].pos;
            let origin_points = prev[i].num_points;

            // Count the points of a potential cluster.
            let mut num_points = origin_points;
            tree.within(px, py, r, |n| {
                let b = &prev[n as usize];
                if !b.visited {
                    num_points += b.num_points;
                }
            });

            if num_points >= options.min_points {
                let id = ((i as u32) << 5) + (u32::from(zoom) + 1);
                let mut wx = px * f64::from(origin_points);
                let mut wy = py * f64::from(origin_points);

                tree.within(px, py, r, |n| {
                    let b = &mut prev[n as usize];
                    if b.visited {
                        return;
                    }
                    b.visited = true;
                    b.parent_id = id;
                    wx += b.pos[0] * f64::from(b.num_points);
                    wy += b.pos[1] * f64::from(b.num_points);
                });

                prev[i].parent_id = id;
                let total = f64::from(num_points);
                clusters.push(Cluster::new([wx / total, wy / total], num_points, id));
            } else {
                clusters.push(Cluster::new(prev[i].pos, origin_points, prev[i].id));
                if num_points > origin_points {
                    tree.within(px, py, r, |n| {
                        let b = &mut prev[n as usize];
                        if b.visited {
                            return;
                        }
                        b.visited = true;
                        clusters.push(Cluster::new(b.pos, b.num_points, b.id));
                    });
                }
            }
        }

        Self::indexed(clusters, options)
    }

    fn indexed(clusters: Vec<Cluster>, options: &ClusterOptions) -> Self {
        let tree = KdIndex::new(clusters.iter().map(|c| c.pos), options.node_size);
        Self { tree, clusters }
    }
}
