//! C ABI over named cluster indexes.
//!
//! `name` arguments address a clusterer created by `clusterer_load`. Results
//! are GeoJSON: feature arrays for cluster, children and leaf queries, and a
//! geojson-vt `{ "features": [...] }` object for tiles.

use std::os::raw::c_char;

use clusterer_engine::types::parse_features;
use clusterer_engine::{BBox, ClusterOptions, Supercluster};
use serde::Serialize;
use serde_json::Value;

use super::{guarded, registry, require_installed, required_str, string_to_c, NativeError};

/// Look up `name` after checking the library is installed.
unsafe fn with_index<T>(
    name: *const c_char,
    f: impl FnOnce(&Supercluster) -> Result<T, NativeError>,
) -> Result<T, NativeError> {
    require_installed()?;
    let name = required_str(name, "name")?;
    registry().with(name, f)?
}

fn json_out<T: Serialize>(function: &str, f: impl FnOnce() -> Result<T, NativeError>) -> *mut c_char {
    guarded(function, || Ok(serde_json::to_string(&f()?)?))
        .map(string_to_c)
        .unwrap_or(std::ptr::null_mut())
}

fn non_negative(value: i32, name: &'static str) -> Result<u32, NativeError> {
    u32::try_from(value).map_err(|_| NativeError::invalid(name, format!("must be >= 0, got {value}")))
}

fn zoom_arg(value: i32) -> Result<u8, NativeError> {
    // Zooms above the index's max are clamped by the engine anyway.
    Ok(non_negative(value, "zoom")?.min(u32::from(u8::MAX)) as u8)
}

/// Index `features_json` (a GeoJSON point feature array or
/// `FeatureCollection`) under `name`. Returns 0 on success, -1 on error.
///
/// `options_json` may be null, in which case the `defaultOptions` from
/// `clusterer.json` apply.
///
/// # Safety
/// `name` and `features_json` must be valid NUL-terminated C strings;
/// `options_json` must be one or null.
#[no_mangle]
pub unsafe extern "C" fn clusterer_load(
    name: *const c_char,
    features_json: *const c_char,
    options_json: *const c_char,
) -> i32 {
    let loaded = guarded("clusterer_load", || {
        let ctx = require_installed()?;
        let name = required_str(name, "name")?;
        let raw: Value = serde_json::from_str(required_str(features_json, "features_json")?)?;
        let features = parse_features(&raw)?;

        let options = if options_json.is_null() {
            ctx.config.default_options
        } else {
            serde_json::from_str::<ClusterOptions>(required_str(options_json, "options_json")?)?
        };

        registry().load(name, features, options)?;
        Ok(())
    });
    if loaded.is_some() {
        0
    } else {
        -1
    }
}

/// Clusters and points in `bbox_json` (`[west, south, east, north]`) at
/// `zoom`, as a JSON feature array. Null on error.
///
/// # Safety
/// `name` and `bbox_json` must be valid NUL-terminated C strings.
#[no_mangle]
pub unsafe extern "C" fn clusterer_get_clusters(
    name: *const c_char,
    bbox_json: *const c_char,
    zoom: i32,
) -> *mut c_char {
    json_out("clusterer_get_clusters", || {
        let bbox: BBox = serde_json::from_str(required_str(bbox_json, "bbox_json")?)
            .map_err(|e| NativeError::invalid("bbox_json", e.to_string()))?;
        let zoom = zoom_arg(zoom)?;
        with_index(name, |sc| Ok(sc.get_clusters(bbox, zoom)?))
    })
}

/// Tile `(zoom, x, y)` as geojson-vt JSON. Null on error.
///
/// # Safety
/// `name` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn clusterer_get_tile(
    name: *const c_char,
    zoom: i32,
    x: i32,
    y: i32,
) -> *mut c_char {
    json_out("clusterer_get_tile", || {
        let zoom = zoom_arg(zoom)?;
        let x = non_negative(x, "x")?;
        let y = non_negative(y, "y")?;
        with_index(name, |sc| Ok(sc.get_tile(zoom, x, y)))
    })
}

/// Children of `cluster_id` on the next zoom level. Null on error.
///
/// # Safety
/// `name` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn clusterer_get_children(
    name: *const c_char,
    cluster_id: u32,
) -> *mut c_char {
    json_out("clusterer_get_children", || {
        with_index(name, |sc| Ok(sc.get_children(cluster_id)?))
    })
}

/// Up to `limit` points under `cluster_id`, skipping `offset`. A negative
/// `limit` returns every point. Null on error.
///
/// # Safety
/// `name` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn clusterer_get_leaves(
    name: *const c_char,
    cluster_id: u32,
    limit: i32,
    offset: i32,
) -> *mut c_char {
    json_out("clusterer_get_leaves", || {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        let offset = non_negative(offset, "offset")? as usize;
        with_index(name, |sc| Ok(sc.get_leaves(cluster_id, limit, offset)?))
    })
}

/// Zoom at which `cluster_id` splits. -1 on error.
///
/// # Safety
/// `name` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn clusterer_get_cluster_expansion_zoom(
    name: *const c_char,
    cluster_id: u32,
) -> i32 {
    guarded("clusterer_get_cluster_expansion_zoom", || {
        with_index(name, |sc| Ok(sc.get_cluster_expansion_zoom(cluster_id)?))
    })
    .map(i32::from)
    .unwrap_or(-1)
}

/// Drop the clusterer named `name`. Returns 1 if it existed, 0 if not, -1 on
/// error (including not initialized).
///
/// # Safety
/// `name` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn clusterer_destroy(name: *const c_char) -> i32 {
    guarded("clusterer_destroy", || {
        require_installed()?;
        let name = required_str(name, "name")?;
        Ok(registry().destroy(name))
    })
    .map(i32::from)
    .unwrap_or(-1)
}
