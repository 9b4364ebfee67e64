//! Coordinate reference systems and area computation.
//!
//! All spatial work happens in Web Mercator (EPSG:3857), the CRS the
//! region boundary layers are published in. Inputs in WGS84 longitude /
//! latitude are reprojected on load; nothing is compared across CRSs.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use geo::{Area, Centroid, Coord, Geometry, MapCoords, Point};
use serde::{Deserialize, Serialize};

/// WGS84 semi-major axis used by the spherical Mercator projection.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Latitude beyond which Web Mercator is undefined (in degrees).
pub const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_779_806_59;

/// Coordinate reference system of an input layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Crs {
    /// Geographic longitude / latitude (EPSG:4326).
    #[default]
    Wgs84,
    /// Spherical Web Mercator (EPSG:3857), the working CRS.
    WebMercator,
}

impl Crs {
    /// The working CRS every stage computes in.
    pub const WORKING: Self = Self::WebMercator;

    /// EPSG code of this CRS.
    #[must_use]
    pub const fn epsg(self) -> u32 {
        match self {
            Self::Wgs84 => 4326,
            Self::WebMercator => 3857,
        }
    }

    /// OGC URN naming this CRS, as used by the legacy `GeoJSON` `crs` member.
    #[must_use]
    pub fn urn(self) -> String {
        format!("urn:ogc:def:crs:EPSG::{}", self.epsg())
    }

    /// Reprojects a geometry from this CRS into the working CRS.
    #[must_use]
    pub fn to_working(self, geometry: &Geometry<f64>) -> Geometry<f64> {
        match self {
            Self::Wgs84 => geometry.map_coords(lon_lat_to_web_mercator),
            Self::WebMercator => geometry.clone(),
        }
    }
}

/// Projects a WGS84 coordinate (x = longitude, y = latitude) to Web Mercator.
#[must_use]
pub fn lon_lat_to_web_mercator(coord: Coord<f64>) -> Coord<f64> {
    let lat = coord
        .y
        .clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE)
        .to_radians();
    Coord {
        x: EARTH_RADIUS_M * coord.x.to_radians(),
        y: EARTH_RADIUS_M * (FRAC_PI_4 + lat / 2.0).tan().ln(),
    }
}

/// Projects a longitude / latitude pair to a working-CRS point.
#[must_use]
pub fn project_point(longitude: f64, latitude: f64) -> Point<f64> {
    Point::from(lon_lat_to_web_mercator(Coord {
        x: longitude,
        y: latitude,
    }))
}

/// Latitude in degrees of a Web Mercator northing.
#[must_use]
pub fn web_mercator_latitude(y: f64) -> f64 {
    2.0f64
        .mul_add((y / EARTH_RADIUS_M).exp().atan(), -FRAC_PI_2)
        .to_degrees()
}

/// True area of a working-CRS geometry in square metres.
///
/// Mercator inflates areas by `1 / cos²(lat)`; the factor is removed at the
/// geometry's centroid latitude, which is exact enough for installation-sized
/// polygons. Points and lines have zero area.
#[must_use]
pub fn area_sqm(geometry: &Geometry<f64>) -> f64 {
    let planar = geometry.unsigned_area();
    if planar <= 0.0 || !planar.is_finite() {
        return 0.0;
    }

    let Some(centroid) = geometry.centroid() else {
        return 0.0;
    };

    let scale = web_mercator_latitude(centroid.y()).to_radians().cos();
    planar * scale * scale
}

#[cfg(test)]
mod tests {
    use geo::{LineString, Rect};

    use super::*;

    #[test]
    fn origin_projects_to_origin() {
        let p = project_point(0.0, 0.0);
        assert!(p.x().abs() < 1e-9);
        assert!(p.y().abs() < 1e-9);
    }

    #[test]
    fn antimeridian_is_half_the_world() {
        let p = project_point(180.0, 0.0);
        assert!((p.x() - 20_037_508.342_789_244).abs() < 1e-6);
    }

    #[test]
    fn latitude_round_trips() {
        let p = project_point(-0.1, 51.5);
        assert!((web_mercator_latitude(p.y()) - 51.5).abs() < 1e-9);
        assert!(p.x() < 0.0);
    }

    #[test]
    fn area_at_equator_is_planar_area() {
        let square: Geometry<f64> = Rect::new((0.0, 0.0), (10.0, 10.0)).to_polygon().into();
        assert!((area_sqm(&square) - 100.0).abs() < 1e-6);
    }

    #[test]
    fn area_removes_mercator_inflation() {
        let origin = project_point(0.0, 60.0);
        let square: Geometry<f64> = Rect::new(
            (origin.x(), origin.y()),
            (origin.x() + 100.0, origin.y() + 100.0),
        )
        .to_polygon()
        .into();
        // cos²(60°) = 0.25
        assert!((area_sqm(&square) - 2_500.0).abs() < 1.0);
    }

    #[test]
    fn lines_and_points_have_no_area() {
        let line: Geometry<f64> = LineString::from(vec![(0.0, 0.0), (5.0, 5.0)]).into();
        assert!(area_sqm(&line).abs() < f64::EPSILON);
        assert!(area_sqm(&Geometry::Point(Point::new(1.0, 1.0))).abs() < f64::EPSILON);
    }

    #[test]
    fn working_crs_is_identity_for_mercator_input() {
        let p = Geometry::Point(Point::new(12.0, 34.0));
        assert_eq!(Crs::WebMercator.to_working(&p), p);
        assert_eq!(Crs::WORKING.epsg(), 3857);
    }
}
