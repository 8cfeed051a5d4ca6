//! Region name → numeric region identifier.
//!
//! Read from the properties of a GeoJSON FeatureCollection: the name under
//! `region` or `name`, the id under `region_id` or `id` (number or numeric
//! string). Features without both are ignored.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::types::{FlightPlanError, Result};

/// Identifier used for names missing from the reference.
pub const DEFAULT_FALLBACK_REGION_ID: i32 = 91;

#[derive(Debug, Deserialize)]
struct Collection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default)]
pub struct RegionIdMap {
    ids: HashMap<String, i32>,
}

impl RegionIdMap {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_geojson_str(&text)
    }

    /// The first feature carrying a name wins for that name.
    pub fn from_geojson_str(text: &str) -> Result<Self> {
        let collection: Collection =
            serde_json::from_str(text).map_err(|e| FlightPlanError::GeoJson(e.to_string()))?;

        let mut ids = HashMap::new();
        for props in collection.features.iter().filter_map(|f| f.properties.as_ref()) {
            let name = ["region", "name"]
                .iter()
                .filter_map(|k| props.get(*k).and_then(Value::as_str))
                .map(str::trim)
                .find(|n| !n.is_empty());
            let id = ["region_id", "id"].iter().find_map(|k| props.get(*k).and_then(id_value));
            if let (Some(name), Some(id)) = (name, id) {
                ids.entry(name.to_string()).or_insert(id);
            }
        }
        Ok(RegionIdMap { ids })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<i32> {
        self.ids.get(name.trim()).copied()
    }

    /// Mapped id, or `fallback` for an unknown name.
    pub fn map_id(&self, name: &str, fallback: i32) -> i32 {
        self.get(name).unwrap_or(fallback)
    }

    /// Reverse lookup; the name owning `id`, if any.
    pub fn name_of(&self, id: i32) -> Option<&str> {
        self.ids
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(k, _)| k.as_str())
    }
}

fn id_value(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
