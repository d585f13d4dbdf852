//! Core data types shared by the engine, the registry and the native ABI.

mod feature;
mod options;
mod region;

pub use feature::{
    parse_features, PointFeature, PointGeometry, Properties, Tile, TileFeature, TILE_POINT,
};
pub use options::{ClusterOptions, MAX_ZOOM_LIMIT};
pub use region::{BBox, LatLng, MapDimensions, Region};
