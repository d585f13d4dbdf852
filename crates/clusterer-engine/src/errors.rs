//! Error types for clustering, the instance registry and configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from [`Supercluster`](super::supercluster::Supercluster) and
/// [`ClusterRegistry`](super::registry::ClusterRegistry).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClusterError {
    #[error("invalid feature at index {index}: {message}")]
    InvalidFeature { index: usize, message: String },

    #[error("expected an array of GeoJSON Feature objects")]
    NotAFeatureArray,

    #[error("invalid options: {message}")]
    InvalidOptions { message: String },

    #[error("invalid bounding box: {message}")]
    InvalidBbox { message: String },

    #[error("no cluster with the specified id: {id}")]
    ClusterNotFound { id: u32 },

    #[error("a clusterer named '{name}' is already loaded")]
    DuplicateName { name: String },

    #[error("no clusterer named '{name}'; it was never loaded or has been destroyed")]
    UnknownInstance { name: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from loading [`BridgeConfig`](super::config::BridgeConfig) or
/// [`NativeConfig`](super::config::NativeConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid value for {key}: {message}")]
    Env { key: String, message: String },

    #[error(transparent)]
    Options(#[from] ClusterError),
}
