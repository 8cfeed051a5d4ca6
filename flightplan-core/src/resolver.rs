//! Coordinate → region name, with a fallback cascade.
//!
//! Strategies run in a fixed order and the first answer wins:
//!
//! 1. exact polygon containment
//! 2. border zones (curated anchors and strips along land borders)
//! 3. nearest polygon within 0.5°
//! 4. coarse heuristic boxes, city pockets first
//! 5. nearest polygon within 1.0°
//! 6. nearest polygon at any distance
//!
//! Only an empty gazetteer yields the not-found sentinel.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::gazetteer::{Gazetteer, RegionIndex};
use crate::types::{GeoPoint, REGION_NOT_FOUND};

/// Which cascade step produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Method {
    Exact,
    BorderZone,
    NearbyTight,
    Heuristic,
    NearbyWide,
    Nearest,
    NotFound,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Exact => "exact",
            Method::BorderZone => "border_zone",
            Method::NearbyTight => "nearby_tight",
            Method::Heuristic => "heuristic",
            Method::NearbyWide => "nearby_wide",
            Method::Nearest => "nearest",
            Method::NotFound => "not_found",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution<'a> {
    pub region: &'a str,
    pub method: Method,
}

// ---------------------------------------------------------------------------
// Curated tables
// ---------------------------------------------------------------------------

pub const TIGHT_RADIUS: f64 = 0.5;
pub const WIDE_RADIUS: f64 = 1.0;
const BORDER_TOLERANCE: f64 = 2.0;

/// (lat, lon) anchors along land borders.
const BORDER_ANCHORS: &[(f64, f64, &str)] = &[
    (57.0, 27.0, "Псковская область"),
    (57.5, 27.5, "Псковская область"),
    (59.0, 27.5, "Ленинградская область"),
    (69.0, 28.0, "Республика Карелия"),
    (69.5, 30.0, "Мурманская область"),
    (49.0, 36.0, "Белгородская область"),
    (47.0, 39.0, "Ростовская область"),
    (48.0, 46.0, "Астраханская область"),
    (51.0, 54.0, "Оренбургская область"),
    (45.0, 131.0, "Приморский край"),
    (53.0, 123.0, "Амурская область"),
];

/// Open lat/lon strips along borders: (min_lat, max_lat, min_lon, max_lon).
const BORDER_STRIPS: &[(f64, f64, f64, f64, &str)] = &[
    (56.0, 58.0, 26.0, 28.0, "Псковская область"),
    (59.0, 60.0, 27.0, 29.0, "Ленинградская область"),
    (68.0, 70.0, 28.0, 32.0, "Республика Карелия"),
    (69.0, 70.0, 29.0, 33.0, "Мурманская область"),
    (48.0, 50.0, 45.0, 48.0, "Астраханская область"),
    (44.0, 46.0, 131.0, 134.0, "Приморский край"),
];

/// Cities misattributed by the boxes around them; open lat/lon ranges.
const CITY_POCKETS: &[(f64, f64, f64, f64, &str)] = &[
    (55.5, 56.0, 37.0, 38.0, "Москва"),
    (59.8, 60.0, 29.8, 30.5, "Санкт-Петербург"),
];

/// Coarse lat/lon boxes, most specific first. Inclusive edges.
const HEURISTIC_BOXES: &[(f64, f64, f64, f64, &str)] = &[
    (57.0, 58.0, 28.0, 30.0, "Псковская область"),
    (56.0, 59.0, 27.0, 31.0, "Псковская область"),
    (56.0, 61.0, 27.0, 32.0, "Ленинградская область"),
    (54.0, 57.0, 35.0, 40.0, "Московская область"),
    (42.0, 50.0, 130.0, 140.0, "Приморский край"),
    (50.0, 60.0, 120.0, 140.0, "Республика Саха (Якутия)"),
    (43.0, 45.0, 39.0, 42.0, "Краснодарский край"),
    (68.0, 70.0, 85.0, 90.0, "Красноярский край"),
];

fn in_open_range(point: GeoPoint, (min_lat, max_lat, min_lon, max_lon): (f64, f64, f64, f64)) -> bool {
    min_lat < point.lat && point.lat < max_lat && min_lon < point.lon && point.lon < max_lon
}

fn in_closed_range(point: GeoPoint, (min_lat, max_lat, min_lon, max_lon): (f64, f64, f64, f64)) -> bool {
    (min_lat..=max_lat).contains(&point.lat) && (min_lon..=max_lon).contains(&point.lon)
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

type Strategy = for<'a> fn(&'a RegionResolver, GeoPoint) -> Option<&'a str>;

const CASCADE: [(Method, Strategy); 6] = [
    (Method::Exact, RegionResolver::exact),
    (Method::BorderZone, RegionResolver::border_zone),
    (Method::NearbyTight, RegionResolver::nearby_tight),
    (Method::Heuristic, RegionResolver::heuristic),
    (Method::NearbyWide, RegionResolver::nearby_wide),
    (Method::Nearest, RegionResolver::nearest),
];

/// Read-only resolver over a shared gazetteer.
#[derive(Debug, Clone)]
pub struct RegionResolver {
    gazetteer: Arc<Gazetteer>,
}

impl RegionResolver {
    pub fn new(gazetteer: Arc<Gazetteer>) -> Self {
        RegionResolver { gazetteer }
    }

    pub fn gazetteer(&self) -> &Gazetteer {
        &self.gazetteer
    }

    /// Region name for a decimal-degree point.
    pub fn resolve(&self, lat: f64, lon: f64) -> &str {
        self.resolve_point(GeoPoint::new(lat, lon)).region
    }

    /// Region name plus the cascade step that found it.
    pub fn resolve_point(&self, point: GeoPoint) -> Resolution<'_> {
        CASCADE
            .iter()
            .find_map(|(method, strategy)| {
                strategy(self, point).map(|region| Resolution {
                    region,
                    method: *method,
                })
            })
            .unwrap_or(Resolution {
                region: REGION_NOT_FOUND,
                method: Method::NotFound,
            })
    }

    fn exact(&self, point: GeoPoint) -> Option<&str> {
        let gaz = &*self.gazetteer;
        gaz.candidates(point)
            .into_iter()
            .find(|&idx| gaz.contains(idx, point))
            .map(|idx| gaz.name(idx))
    }

    fn border_zone(&self, point: GeoPoint) -> Option<&str> {
        BORDER_ANCHORS
            .iter()
            .find(|(lat, lon, _)| {
                (point.lat - lat).abs() < BORDER_TOLERANCE && (point.lon - lon).abs() < BORDER_TOLERANCE
            })
            .map(|(_, _, name)| *name)
            .or_else(|| {
                BORDER_STRIPS
                    .iter()
                    .find(|(a, b, c, d, _)| in_open_range(point, (*a, *b, *c, *d)))
                    .map(|s| s.4)
            })
    }

    fn nearby_tight(&self, point: GeoPoint) -> Option<&str> {
        self.within(point, Some(TIGHT_RADIUS))
    }

    fn heuristic(&self, point: GeoPoint) -> Option<&str> {
        CITY_POCKETS
            .iter()
            .find(|(a, b, c, d, _)| in_open_range(point, (*a, *b, *c, *d)))
            .map(|p| p.4)
            .or_else(|| {
                HEURISTIC_BOXES
                    .iter()
                    .find(|(a, b, c, d, _)| in_closed_range(point, (*a, *b, *c, *d)))
                    .map(|h| h.4)
            })
    }

    fn nearby_wide(&self, point: GeoPoint) -> Option<&str> {
        self.within(point, Some(WIDE_RADIUS))
    }

    fn nearest(&self, point: GeoPoint) -> Option<&str> {
        self.within(point, None)
    }

    fn within(&self, point: GeoPoint, radius: Option<f64>) -> Option<&str> {
        self.gazetteer
            .nearest(point, radius)
            .map(|(idx, _)| self.gazetteer.name(idx))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
