//! Clusterer: hierarchical GeoJSON point clustering for map views, plus the
//! host-side handshake that installs the native clusterer library into a
//! script runtime.
//!
//! The engine ([`Supercluster`]) is pure and synchronous. The bridge
//! ([`bridge`]) loads the native library built from `clusterer-native` and
//! drives its `initialize` / `destruct` entry points for the host.

pub mod bridge;
pub mod config;
pub mod errors;
pub mod index;
pub mod region;
pub mod registry;
pub mod supercluster;
pub mod types;

// Re-export public types at the crate level.

// bridge
#[cfg(feature = "dylib")]
pub use bridge::dylib::{DylibEntryPoints, DylibLoader};
pub use bridge::module::{ClustererModule, ClustererPackage, NativeModule, Package, ViewManager};
pub use bridge::{
    BridgeError, ContextHandle, InstallState, LibraryLoader, NativeBridgeInstaller,
    NativeEntryPoints, NATIVE_ABI_VERSION,
};

// config
pub use config::{BridgeConfig, NativeConfig};

// errors
pub use errors::{ClusterError, ConfigError};

// region
pub use region::{bounds_zoom_level, markers_region, region_to_bbox};

// registry
pub use registry::ClusterRegistry;

// supercluster
pub use supercluster::{Supercluster, DEFAULT_LEAVES_LIMIT};

// types
pub use types::{
    BBox, ClusterOptions, LatLng, MapDimensions, PointFeature, Region, Tile, TileFeature,
};
