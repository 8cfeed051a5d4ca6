//! Immutable region gazetteer built from a GeoJSON FeatureCollection.
//!
//! Regions live in an arena addressed by `RegionIdx`. A flat list of
//! per-polygon bounding boxes is the containment prefilter. Polygons that fail
//! validation are dropped at load time and listed in `skipped()`; the rest of
//! the feature, and of the collection, still loads.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use geo::{Centroid, Contains, MultiPolygon, Rect};

use crate::geometry::{rect_distance, to_point, union_rect, RegionPolygon};
use crate::types::{FlightPlanError, GeoPoint, Result, UNNAMED_REGION};

/// Property keys tried, in order, for a feature's region name.
const NAME_KEYS: [&str; 5] = ["name", "region", "NAME", "federal_district", "subject"];

/// Index of a region in the gazetteer arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionIdx(pub usize);

/// Point-to-region lookup: cheap candidate prefilter, then exact test.
pub trait RegionIndex {
    /// Regions whose bounding boxes contain `point`, in gazetteer order.
    fn candidates(&self, point: GeoPoint) -> Vec<RegionIdx>;
    /// True polygon containment.
    fn contains(&self, region: RegionIdx, point: GeoPoint) -> bool;
}

/// A named polygon set.
#[derive(Debug, Clone)]
pub struct Region {
    pub name: String,
    pub polygons: Vec<RegionPolygon>,
    pub bbox: Rect<f64>,
    /// Area-weighted centroid over all polygons.
    pub centroid: GeoPoint,
}

/// A polygon dropped during loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedGeometry {
    pub feature: usize,
    pub region: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct Gazetteer {
    regions: Vec<Region>,
    index: Vec<(Rect<f64>, RegionIdx)>,
    by_name: HashMap<String, RegionIdx>,
    bbox: Option<Rect<f64>>,
    skipped: Vec<SkippedGeometry>,
}

// ---------------------------------------------------------------------------
// GeoJSON shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Option<GeometryJson>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct GeometryJson {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Value,
}

type RawRing = Vec<Vec<f64>>;

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl Gazetteer {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_geojson_str(&text)
    }

    pub fn from_geojson_str(text: &str) -> Result<Self> {
        let collection: FeatureCollection =
            serde_json::from_str(text).map_err(|e| FlightPlanError::GeoJson(e.to_string()))?;

        let mut gazetteer = Gazetteer::default();
        let mut grouped: Vec<(String, Vec<RegionPolygon>)> = Vec::new();
        let mut slot: HashMap<String, usize> = HashMap::new();

        for (feature_no, feature) in collection.features.into_iter().enumerate() {
            let name = feature_name(feature.properties.as_ref());
            let Some(geometry) = feature.geometry else {
                gazetteer.skip(feature_no, &name, "feature has no geometry");
                continue;
            };

            let polygons = match polygon_rings(&geometry) {
                Ok(p) => p,
                Err(reason) => {
                    gazetteer.skip(feature_no, &name, &reason);
                    continue;
                }
            };

            let mut valid = Vec::new();
            for rings in polygons {
                match build_polygon(rings) {
                    Ok(poly) => valid.push(poly),
                    Err(reason) => gazetteer.skip(feature_no, &name, &reason),
                }
            }
            if valid.is_empty() {
                continue;
            }

            match slot.get(&name) {
                Some(&i) => grouped[i].1.extend(valid),
                None => {
                    slot.insert(name.clone(), grouped.len());
                    grouped.push((name, valid));
                }
            }
        }

        for (name, polygons) in grouped {
            gazetteer.add_region(name, polygons);
        }
        Ok(gazetteer)
    }

    fn skip(&mut self, feature: usize, region: &str, reason: &str) {
        self.skipped.push(SkippedGeometry {
            feature,
            region: region.to_string(),
            reason: reason.to_string(),
        });
    }

    fn add_region(&mut self, name: String, polygons: Vec<RegionPolygon>) {
        let idx = RegionIdx(self.regions.len());

        let mut bbox = polygons[0].bbox();
        for poly in &polygons {
            bbox = union_rect(bbox, poly.bbox());
            self.index.push((poly.bbox(), idx));
        }
        let shape = MultiPolygon::new(polygons.iter().map(|p| p.polygon().clone()).collect());
        let centroid = shape
            .centroid()
            .map(|c| GeoPoint::new(c.y(), c.x()))
            .unwrap_or_else(|| {
                let c = bbox.center();
                GeoPoint::new(c.y, c.x)
            });

        self.bbox = Some(match self.bbox {
            Some(all) => union_rect(all, bbox),
            None => bbox,
        });
        self.by_name.insert(name.clone(), idx);
        self.regions.push(Region {
            name,
            polygons,
            bbox,
            centroid,
        });
    }
}

fn feature_name(properties: Option<&Map<String, Value>>) -> String {
    properties
        .and_then(|props| {
            NAME_KEYS
                .iter()
                .filter_map(|key| props.get(*key).and_then(Value::as_str))
                .map(str::trim)
                .find(|name| !name.is_empty())
        })
        .unwrap_or(UNNAMED_REGION)
        .to_string()
}

/// Rings of every polygon in a Polygon or MultiPolygon geometry.
fn polygon_rings(geometry: &GeometryJson) -> std::result::Result<Vec<Vec<RawRing>>, String> {
    match geometry.kind.as_str() {
        "Polygon" => serde_json::from_value::<Vec<RawRing>>(geometry.coordinates.clone())
            .map(|rings| vec![rings])
            .map_err(|e| format!("bad Polygon coordinates: {e}")),
        "MultiPolygon" => serde_json::from_value::<Vec<Vec<RawRing>>>(geometry.coordinates.clone())
            .map_err(|e| format!("bad MultiPolygon coordinates: {e}")),
        other => Err(format!("unsupported geometry type {other}")),
    }
}

fn build_polygon(rings: Vec<RawRing>) -> std::result::Result<RegionPolygon, String> {
    let mut rings = rings.into_iter().map(|ring| {
        ring.into_iter()
            .map(|pos| match pos.as_slice() {
                [lon, lat, ..] => Ok([*lon, *lat]),
                _ => Err("position with fewer than two values".to_string()),
            })
            .collect::<std::result::Result<Vec<[f64; 2]>, String>>()
    });
    let exterior = rings.next().ok_or("polygon without rings")??;
    let holes = rings.collect::<std::result::Result<Vec<_>, String>>()?;
    RegionPolygon::from_rings(exterior, holes).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

impl Gazetteer {
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, idx: RegionIdx) -> &Region {
        &self.regions[idx.0]
    }

    pub fn name(&self, idx: RegionIdx) -> &str {
        &self.regions[idx.0].name
    }

    pub fn find(&self, name: &str) -> Option<RegionIdx> {
        self.by_name.get(name).copied()
    }

    /// Union of all region boxes; `None` when empty.
    pub fn bbox(&self) -> Option<Rect<f64>> {
        self.bbox
    }

    pub fn skipped(&self) -> &[SkippedGeometry] {
        &self.skipped
    }

    /// Closest region by polygon distance, if closer than `max_distance`.
    ///
    /// Polygons whose box is already farther than the best hit are not
    /// measured. Ties keep the earlier region.
    pub fn nearest(&self, point: GeoPoint, max_distance: Option<f64>) -> Option<(RegionIdx, f64)> {
        let mut best: Option<(RegionIdx, f64)> = None;
        for region_no in 0..self.regions.len() {
            let idx = RegionIdx(region_no);
            for poly in &self.regions[region_no].polygons {
                let bound = best.map_or(f64::INFINITY, |(_, d)| d);
                if rect_distance(&poly.bbox(), point) >= bound {
                    continue;
                }
                let d = poly.distance(point);
                if d < bound {
                    best = Some((idx, d));
                }
            }
        }
        match (best, max_distance) {
            (Some((_, d)), Some(max)) if d >= max => None,
            _ => best,
        }
    }
}

impl RegionIndex for Gazetteer {
    fn candidates(&self, point: GeoPoint) -> Vec<RegionIdx> {
        let mut out: Vec<RegionIdx> = Vec::new();
        for (bbox, idx) in &self.index {
            if bbox.contains(&to_point(point)) && !out.contains(idx) {
                out.push(*idx);
            }
        }
        out
    }

    fn contains(&self, region: RegionIdx, point: GeoPoint) -> bool {
        self.regions[region.0]
            .polygons
            .iter()
            .any(|poly| poly.contains(point))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use geo::coord;

    const FIXTURE: &str = include_str!("../testdata/regions.geo.json");

    #[test]
    fn test_fixture_loads() {
        let gaz = Gazetteer::from_geojson_str(FIXTURE).unwrap();
        assert!(gaz.find("Москва").is_some());
        assert!(gaz.find("Тверская область").is_some());
        // The bowtie feature is skipped, not fatal.
        assert!(gaz.find("Сломанная область").is_none());
        assert!(gaz
            .skipped()
            .iter()
            .any(|s| s.region == "Сломанная область" && s.reason.starts_with("invalid polygon")));
    }

    #[test]
    fn test_multipolygon_region() {
        let gaz = Gazetteer::from_geojson_str(FIXTURE).unwrap();
        let idx = gaz.find("Сахалинская область").unwrap();
        assert_eq!(gaz.region(idx).polygons.len(), 2);
        assert!(gaz.contains(idx, GeoPoint::new(50.0, 142.5)));
        assert!(gaz.contains(idx, GeoPoint::new(44.5, 148.0)));
    }

    #[test]
    fn test_region_bbox_and_centroid() {
        let gaz = Gazetteer::from_geojson_str(FIXTURE).unwrap();
        let moscow = gaz.region(gaz.find("Москва").unwrap());
        assert_eq!(
            moscow.bbox,
            Rect::new(coord! { x: 37.3, y: 55.4 }, coord! { x: 37.9, y: 55.95 })
        );
        assert!((moscow.centroid.lat - 55.675).abs() < 1e-9);
        assert!((moscow.centroid.lon - 37.6).abs() < 1e-9);
    }

    #[test]
    fn test_candidates_then_contains() {
        let gaz = Gazetteer::from_geojson_str(FIXTURE).unwrap();
        // Moscow city sits inside the oblast's box but in the oblast's hole.
        let point = GeoPoint::new(55.7, 37.6);
        let candidates = gaz.candidates(point);
        let moscow = gaz.find("Москва").unwrap();
        let oblast = gaz.find("Московская область").unwrap();
        assert!(candidates.contains(&moscow));
        assert!(candidates.contains(&oblast));
        assert!(gaz.contains(moscow, point));
        assert!(!gaz.contains(oblast, point));
    }

    #[test]
    fn test_nearest() {
        let gaz = Gazetteer::from_geojson_str(FIXTURE).unwrap();
        let tver = gaz.find("Тверская область").unwrap();
        // 0.2 degrees west of Tver's western edge at lon 31.
        let (idx, d) = gaz.nearest(GeoPoint::new(57.0, 30.8), None).unwrap();
        assert_eq!(idx, tver);
        assert!((d - 0.2).abs() < 1e-9);
        assert!(gaz.nearest(GeoPoint::new(57.0, 30.8), Some(0.1)).is_none());
    }

    #[test]
    fn test_name_keys_and_merge() {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"NAME":"Остров"},
             "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
            {"type":"Feature","properties":{"NAME":"Остров"},
             "geometry":{"type":"Polygon","coordinates":[[[5,5],[6,5],[6,6],[5,6],[5,5]]]}},
            {"type":"Feature","properties":null,
             "geometry":{"type":"Polygon","coordinates":[[[9,9],[10,9],[10,10],[9,10],[9,9]]]}},
            {"type":"Feature","properties":{"name":"Точка"},
             "geometry":{"type":"Point","coordinates":[1,1]}}
        ]}"#;
        let gaz = Gazetteer::from_geojson_str(text).unwrap();
        assert_eq!(gaz.len(), 2);
        let island = gaz.find("Остров").unwrap();
        assert_eq!(gaz.region(island).polygons.len(), 2);
        assert!(gaz.find(UNNAMED_REGION).is_some());
        assert_eq!(gaz.skipped().len(), 1);
        assert_eq!(
            gaz.bbox(),
            Some(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 }))
        );
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(matches!(
            Gazetteer::from_geojson_str("{not json"),
            Err(FlightPlanError::GeoJson(_))
        ));
    }
}
