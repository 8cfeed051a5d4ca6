//! Region polygons in degree space, backed by `geo`.
//!
//! GeoJSON rings arrive as `[lon, lat]` positions, so `x` is longitude and
//! `y` latitude throughout. Distances are Euclidean in degrees, matching how
//! the region cascade thresholds are expressed.

use geo::{coord, Area, BoundingRect, Contains, Distance, Euclidean, LineString, Point, Polygon, Rect, Validation};
use thiserror::Error;

use crate::types::GeoPoint;

/// Reasons a polygon is rejected at construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("polygon encloses zero area")]
    ZeroArea,
    #[error("invalid polygon: {0}")]
    Invalid(String),
}

pub fn to_point(point: GeoPoint) -> Point<f64> {
    Point::new(point.lon, point.lat)
}

/// Smallest box covering both.
pub fn union_rect(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    Rect::new(
        coord! { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
        coord! { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
    )
}

/// Lower bound on the distance from `point` to anything inside `rect`.
pub fn rect_distance(rect: &Rect<f64>, point: GeoPoint) -> f64 {
    Euclidean.distance(&to_point(point), &rect.to_polygon())
}

// ---------------------------------------------------------------------------
// Region polygon
// ---------------------------------------------------------------------------

/// A validated polygon with its bounding box cached for prefiltering.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionPolygon {
    polygon: Polygon<f64>,
    bbox: Rect<f64>,
}

impl RegionPolygon {
    /// Build from `[lon, lat]` rings. Open rings are closed.
    pub fn from_rings(exterior: Vec<[f64; 2]>, holes: Vec<Vec<[f64; 2]>>) -> Result<Self, GeometryError> {
        let polygon = Polygon::new(
            LineString::from(exterior),
            holes.into_iter().map(LineString::from).collect(),
        );
        Self::new(polygon)
    }

    pub fn new(polygon: Polygon<f64>) -> Result<Self, GeometryError> {
        if polygon.unsigned_area() == 0.0 {
            return Err(GeometryError::ZeroArea);
        }
        polygon
            .check_validation()
            .map_err(|e| GeometryError::Invalid(e.to_string()))?;
        let bbox = polygon.bounding_rect().ok_or(GeometryError::ZeroArea)?;
        Ok(RegionPolygon { polygon, bbox })
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    pub fn bbox(&self) -> Rect<f64> {
        self.bbox
    }

    /// Strictly inside the exterior and outside every hole.
    pub fn contains(&self, point: GeoPoint) -> bool {
        let point = to_point(point);
        // Interiors lie strictly inside their box.
        self.bbox.contains(&point) && self.polygon.contains(&point)
    }

    /// Distance in degrees from `point` to the polygon; 0 when inside.
    pub fn distance(&self, point: GeoPoint) -> f64 {
        Euclidean.distance(&to_point(point), &self.polygon)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn square(min: f64, max: f64) -> Vec<[f64; 2]> {
        vec![[min, min], [max, min], [max, max], [min, max], [min, min]]
    }

    #[test]
    fn test_contains_square() {
        let poly = RegionPolygon::from_rings(square(0.0, 10.0), vec![]).unwrap();
        assert!(poly.contains(GeoPoint::new(5.0, 5.0)));
        assert!(!poly.contains(GeoPoint::new(11.0, 5.0)));
        assert!(!poly.contains(GeoPoint::new(5.0, -0.5)));
        // Boundary is not interior.
        assert!(!poly.contains(GeoPoint::new(5.0, 10.0)));
    }

    #[test]
    fn test_hole_excluded() {
        let poly = RegionPolygon::from_rings(square(0.0, 10.0), vec![square(4.0, 6.0)]).unwrap();
        assert!(!poly.contains(GeoPoint::new(5.0, 5.0)));
        assert!(poly.contains(GeoPoint::new(2.0, 2.0)));
        // Distance from the hole centre to the hole edge.
        assert!((poly.distance(GeoPoint::new(5.0, 5.0)) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_distance_outside() {
        let poly = RegionPolygon::from_rings(square(0.0, 10.0), vec![]).unwrap();
        assert_eq!(poly.distance(GeoPoint::new(5.0, 5.0)), 0.0);
        // lat 5, lon 13: three degrees east of the right edge.
        assert!((poly.distance(GeoPoint::new(5.0, 13.0)) - 3.0).abs() < 1e-9);
        // Corner distance.
        let d = poly.distance(GeoPoint::new(13.0, 14.0));
        assert!((d - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_open_ring_is_closed() {
        let open = vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let poly = RegionPolygon::from_rings(open, vec![]).unwrap();
        let exterior = poly.polygon().exterior();
        assert!(exterior.is_closed());
        assert_eq!(exterior.0.len(), 5);
    }

    #[test]
    fn test_rejects_bowtie() {
        let bowtie = vec![[0.0, 0.0], [4.0, 4.0], [4.0, 0.0], [0.0, 2.0], [0.0, 0.0]];
        assert!(matches!(
            RegionPolygon::from_rings(bowtie, vec![]),
            Err(GeometryError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_degenerate() {
        let line = vec![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [0.0, 0.0]];
        assert_eq!(
            RegionPolygon::from_rings(line, vec![]),
            Err(GeometryError::ZeroArea)
        );

        let two = vec![[0.0, 0.0], [1.0, 1.0], [0.0, 0.0]];
        assert_eq!(
            RegionPolygon::from_rings(two, vec![]),
            Err(GeometryError::ZeroArea)
        );

        let nan = vec![[0.0, 0.0], [f64::NAN, 1.0], [1.0, 0.0], [0.0, 0.0]];
        assert!(RegionPolygon::from_rings(nan, vec![]).is_err());
    }

    #[test]
    fn test_concave_ring_is_valid() {
        // U shape: the notch between the arms is outside.
        let u = vec![
            [0.0, 0.0],
            [3.0, 0.0],
            [3.0, 3.0],
            [2.0, 3.0],
            [2.0, 1.0],
            [1.0, 1.0],
            [1.0, 3.0],
            [0.0, 3.0],
        ];
        let poly = RegionPolygon::from_rings(u, vec![]).unwrap();
        assert!(poly.contains(GeoPoint::new(2.0, 0.5)));
        assert!(!poly.contains(GeoPoint::new(2.0, 1.5)));
    }

    #[test]
    fn test_rect_helpers() {
        let a = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 });
        let b = Rect::new(coord! { x: 5.0, y: -3.0 }, coord! { x: 12.0, y: 4.0 });
        assert_eq!(
            union_rect(a, b),
            Rect::new(coord! { x: 0.0, y: -3.0 }, coord! { x: 12.0, y: 10.0 })
        );
        assert_eq!(rect_distance(&a, GeoPoint::new(5.0, 5.0)), 0.0);
        assert!((rect_distance(&a, GeoPoint::new(5.0, 12.0)) - 2.0).abs() < 1e-9);
    }
}
