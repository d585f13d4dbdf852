use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::errors::ClusterError;

/// GeoJSON `properties` object.
pub type Properties = Map<String, Value>;

/// geojson-vt geometry type for points.
pub const TILE_POINT: u8 = 1;

/// GeoJSON `Point` geometry, `[lng, lat]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Point")]
pub struct PointGeometry {
    pub coordinates: [f64; 2],
}

/// GeoJSON `Feature` whose geometry is a `Point`.
///
/// Used both for input points and for query results; clusters come back as
/// features with `id = cluster_id` and the cluster properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Feature")]
pub struct PointFeature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub geometry: PointGeometry,
    #[serde(default, deserialize_with = "nullable_properties")]
    pub properties: Properties,
}

impl PointFeature {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self {
            id: None,
            geometry: PointGeometry {
                coordinates: [lng, lat],
            },
            properties: Properties::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn lng(&self) -> f64 {
        self.geometry.coordinates[0]
    }

    pub fn lat(&self) -> f64 {
        self.geometry.coordinates[1]
    }

    /// True when this feature is a cluster produced by the engine.
    pub fn is_cluster(&self) -> bool {
        self.properties
            .get("cluster")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// `cluster_id` property of a cluster feature.
    pub fn cluster_id(&self) -> Option<u32> {
        self.properties
            .get("cluster_id")
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok())
    }
}

/// `"properties": null` is valid GeoJSON and means no properties.
fn nullable_properties<'de, D>(deserializer: D) -> Result<Properties, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Properties>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse an array of point features, or a `FeatureCollection` wrapping one.
///
/// Errors name the offending index so script callers can find the bad input.
pub fn parse_features(value: &Value) -> Result<Vec<PointFeature>, ClusterError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(obj) if obj.get("type").and_then(Value::as_str) == Some("FeatureCollection") => {
            obj.get("features")
                .and_then(Value::as_array)
                .ok_or(ClusterError::NotAFeatureArray)?
        }
        _ => return Err(ClusterError::NotAFeatureArray),
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let feature: PointFeature =
                serde_json::from_value(item.clone()).map_err(|e| ClusterError::InvalidFeature {
                    index,
                    message: e.to_string(),
                })?;
            if !feature.lng().is_finite() || !feature.lat().is_finite() {
                return Err(ClusterError::InvalidFeature {
                    index,
                    message: "coordinates must be finite numbers".into(),
                });
            }
            Ok(feature)
        })
        .collect()
}

/// One feature of a geojson-vt compatible tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileFeature {
    #[serde(rename = "type")]
    pub kind: u8,
    /// Single-point geometry in integer tile coordinates.
    pub geometry: Vec<[i16; 2]>,
    pub tags: Properties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub features: Vec<TileFeature>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_point_features() {
        let features = parse_features(&json!([
            {
                "type": "Feature",
                "id": 7,
                "geometry": {"type": "Point", "coordinates": [-73.98, 40.75]},
                "properties": {"name": "a"}
            },
            {
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [2.35, 48.85]},
                "properties": null
            }
        ]))
        .unwrap();

        assert_eq!(features.len(), 2);
        assert_eq!(features[0].id, Some(json!(7)));
        assert_eq!(features[0].lng(), -73.98);
        assert_eq!(features[0].properties["name"], json!("a"));
        assert!(features[1].properties.is_empty());
    }

    #[test]
    fn parse_feature_collection() {
        let features = parse_features(&json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}}
            ]
        }))
        .unwrap();
        assert_eq!(features.len(), 1);
    }

    #[test]
    fn rejects_non_array() {
        let err = parse_features(&json!({"type": "Feature"})).unwrap_err();
        assert!(matches!(err, ClusterError::NotAFeatureArray));
    }

    #[test]
    fn rejects_wrong_geometry_type_with_index() {
        let err = parse_features(&json!([
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1.0, 2.0]}},
            {"type": "Feature", "geometry": {"type": "LineString", "coordinates": [[1.0, 2.0]]}}
        ]))
        .unwrap_err();
        match err {
            ClusterError::InvalidFeature { index, .. } => assert_eq!(index, 1),
            other => panic!("expected InvalidFeature, got: {other:?}"),
        }
    }

    #[test]
    fn rejects_coordinates_of_wrong_arity() {
        let err = parse_features(&json!([
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1.0]}}
        ]))
        .unwrap_err();
        assert!(matches!(err, ClusterError::InvalidFeature { index: 0, .. }));
    }

    #[test]
    fn serializes_as_geojson() {
        let feature = PointFeature::new(10.0, 20.0).with_property("kind", "cafe");
        let value = serde_json::to_value(&feature).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [10.0, 20.0]},
                "properties": {"kind": "cafe"}
            })
        );
    }

    #[test]
    fn tile_feature_serializes_type_tag() {
        let feature = TileFeature {
            kind: TILE_POINT,
            geometry: vec![[12, -3]],
            tags: Properties::new(),
            id: None,
        };
        let value = serde_json::to_value(&feature).unwrap();
        assert_eq!(value, json!({"type": 1, "geometry": [[12, -3]], "tags": {}}));
    }
}
