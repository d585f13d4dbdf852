use serde::{Deserialize, Serialize};

use crate::errors::ClusterError;
use crate::index::DEFAULT_NODE_SIZE;

/// Highest usable `max_zoom`. Cluster ids keep `zoom + 1` in their low five
/// bits, so `max_zoom + 1` must stay below 32.
pub const MAX_ZOOM_LIMIT: u8 = 30;

/// Clustering parameters, deserialized from the camelCase options object the
/// script side passes (`{"radius": 60, "maxZoom": 14}`). Every field is
/// optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterOptions {
    /// Minimum zoom level at which clusters are generated. Default: 0.
    pub min_zoom: u8,
    /// Maximum zoom level at which clusters are generated. Default: 16.
    pub max_zoom: u8,
    /// Minimum number of points to form a cluster. Default: 2, never below 2.
    pub min_points: u32,
    /// Cluster radius in pixels. Default: 40.
    pub radius: u16,
    /// Tile extent; the radius is relative to it. Default: 512.
    pub extent: u16,
    /// Use the input index as the id of unclustered tile features. Default: false.
    pub generate_id: bool,
    /// KD-tree leaf size. Default: 64.
    pub node_size: usize,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            min_zoom: 0,
            max_zoom: 16,
            min_points: 2,
            radius: 40,
            extent: 512,
            generate_id: false,
            node_size: DEFAULT_NODE_SIZE,
        }
    }
}

impl ClusterOptions {
    pub fn validate(&self) -> Result<(), ClusterError> {
        let invalid = |message: String| Err(ClusterError::InvalidOptions { message });

        if self.max_zoom > MAX_ZOOM_LIMIT {
            return invalid(format!(
                "maxZoom must be at most {MAX_ZOOM_LIMIT}, got {}",
                self.max_zoom
            ));
        }
        if self.min_zoom > self.max_zoom {
            return invalid(format!(
                "minZoom ({}) must not exceed maxZoom ({})",
                self.min_zoom, self.max_zoom
            ));
        }
        if self.extent == 0 {
            return invalid("extent must be positive".into());
        }
        if self.radius == 0 {
            return invalid("radius must be positive".into());
        }
        if self.min_points < 2 {
            return invalid(format!("minPoints must be at least 2, got {}", self.min_points));
        }
        if self.node_size == 0 {
            return invalid("nodeSize must be positive".into());
        }
        Ok(())
    }
}
