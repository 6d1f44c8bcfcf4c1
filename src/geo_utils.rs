//! # Geographic Utilities
//!
//! Core geographic computation utilities shared by every pipeline stage.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two fixes |
//! | [`polyline_length`] | Total great-circle length of a fix sequence |
//! | [`travel_seconds`] | Elapsed time implied by distance over reported speed |
//! | [`compute_bounds`] | Bounding box of a fix sequence |
//! | [`LocalProjection`] | Lon/lat to planar meters around a reference point |
//! | [`project_onto_leg`] | Orthogonal projection of a point onto a segment |
//! | [`point_to_line_string`] | Planar distance from a point to a polyline |
//! | [`line_string_gap`] | Planar distance between two polylines |
//!
//! ## Coordinate Systems
//!
//! Fixes and road network inputs are WGS84 lon/lat in degrees. Everything
//! downstream of map matching (matched points, gap fills, routes, turn
//! geometry) is expressed in planar meters of the network's
//! [`LocalProjection`], so that thresholds like "50 m apart" are plain
//! Euclidean comparisons.

use geo::{
    Closest, ClosestPoint, Coord, Distance, Euclidean, Haversine, Length, Line, LineString, Point,
};

use crate::{Bounds, GpsFix};

/// WGS84 equatorial radius, used for every distance and for the local
/// projection, in meters.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Radius `geo::Haversine` works with.
const HAVERSINE_RADIUS_M: f64 = 6_371_008.8;

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two fixes using the Haversine
/// formula on a sphere of radius [`EARTH_RADIUS_M`].
///
/// # Example
///
/// ```rust
/// use episode_router::{GpsFix, geo_utils};
///
/// let a = GpsFix::new(1, "d", "1/1/2023 10:00", 1.0, 1.0, 0.0);
/// let b = GpsFix::new(2, "d", "1/1/2023 10:00", 2.0, 2.0, 0.0);
///
/// let distance = geo_utils::haversine_distance(&a, &b);
/// assert!((distance - 157_400.0).abs() < 500.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsFix, p2: &GpsFix) -> f64 {
    haversine_coord_distance(
        Coord { x: p1.longitude, y: p1.latitude },
        Coord { x: p2.longitude, y: p2.latitude },
    )
}

/// Great-circle distance between two lon/lat coordinates.
#[inline]
pub fn haversine_coord_distance(a: Coord, b: Coord) -> f64 {
    Haversine::distance(Point::from(a), Point::from(b)) * (EARTH_RADIUS_M / HAVERSINE_RADIUS_M)
}

/// Great-circle length of a fix sequence in meters, following the fixes in
/// order. Fewer than two fixes have no length.
pub fn polyline_length<'a>(points: impl IntoIterator<Item = &'a GpsFix>) -> f64 {
    let mut points = points.into_iter();
    let Some(mut previous) = points.next() else {
        return 0.0;
    };
    let mut total = 0.0;
    for point in points {
        total += haversine_distance(previous, point);
        previous = point;
    }
    total
}

/// Seconds needed to cover the distance between two fixes at `speed_kmh`.
///
/// Returns 0.0 for a stationary (zero speed) fix, since no time can be
/// derived from it.
#[inline]
pub fn travel_seconds(from: &GpsFix, to: &GpsFix, speed_kmh: f64) -> f64 {
    let speed_ms = speed_kmh / 3.6;
    if speed_ms <= 0.0 {
        return 0.0;
    }
    haversine_distance(from, to) / speed_ms
}

// =============================================================================
// Bounding Box Functions
// =============================================================================

/// Compute the bounding box of a fix sequence.
///
/// For empty input, returns a bounds with MIN/MAX values that will fail any
/// containment check.
pub fn compute_bounds(points: &[GpsFix]) -> Bounds {
    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lng = f64::MAX;
    let mut max_lng = f64::MIN;

    for p in points {
        min_lat = min_lat.min(p.latitude);
        max_lat = max_lat.max(p.latitude);
        min_lng = min_lng.min(p.longitude);
        max_lng = max_lng.max(p.longitude);
    }

    Bounds { min_lat, max_lat, min_lng, max_lng }
}

/// Bounding box of a fix sequence grown by `padding_deg` on every side,
/// the area a road network must cover to match the fixes. `None` without
/// fixes.
pub fn padded_bounds(points: &[GpsFix], padding_deg: f64) -> Option<Bounds> {
    Bounds::from_fixes(points).map(|b| b.padded(padding_deg))
}

// =============================================================================
// Local Planar Projection
// =============================================================================

/// Equirectangular projection around a reference coordinate.
///
/// Accurate to well under a meter over the few kilometres a single device's
/// trip covers, which is all the matcher needs.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocalProjection {
    pub origin_lng: f64,
    pub origin_lat: f64,
    cos_lat: f64,
}

impl LocalProjection {
    pub fn new(origin_lng: f64, origin_lat: f64) -> Self {
        Self {
            origin_lng,
            origin_lat,
            cos_lat: origin_lat.to_radians().cos(),
        }
    }

    /// Projection centred on the mean of the given lon/lat coordinates.
    pub fn centered_on(coords: &[Coord]) -> Self {
        if coords.is_empty() {
            return Self::new(0.0, 0.0);
        }
        let n = coords.len() as f64;
        let lng = coords.iter().map(|c| c.x).sum::<f64>() / n;
        let lat = coords.iter().map(|c| c.y).sum::<f64>() / n;
        Self::new(lng, lat)
    }

    /// Lon/lat degrees to planar meters.
    pub fn project(&self, lng: f64, lat: f64) -> Coord {
        Coord {
            x: EARTH_RADIUS_M * (lng - self.origin_lng).to_radians() * self.cos_lat,
            y: EARTH_RADIUS_M * (lat - self.origin_lat).to_radians(),
        }
    }

    /// Planar meters back to lon/lat degrees.
    pub fn unproject(&self, c: Coord) -> Coord {
        Coord {
            x: self.origin_lng + (c.x / (EARTH_RADIUS_M * self.cos_lat)).to_degrees(),
            y: self.origin_lat + (c.y / EARTH_RADIUS_M).to_degrees(),
        }
    }

    pub fn project_fix(&self, fix: &GpsFix) -> Coord {
        self.project(fix.longitude, fix.latitude)
    }
}

// =============================================================================
// Planar Geometry
// =============================================================================

#[inline]
pub fn planar_distance(a: Coord, b: Coord) -> f64 {
    Euclidean::distance(a, b)
}

/// Orthogonal projection of `p` onto the segment, clamped to its endpoints.
pub fn project_onto_leg(leg: &Line, p: Coord) -> Coord {
    match leg.closest_point(&Point::from(p)) {
        Closest::Intersection(q) | Closest::SinglePoint(q) => q.0,
        Closest::Indeterminate => leg.start,
    }
}

#[inline]
pub fn point_to_leg(leg: &Line, p: Coord) -> f64 {
    Euclidean::distance(p, leg)
}

/// Zero when `p` lies on the line.
pub fn point_to_line_string(line: &LineString, p: Coord) -> f64 {
    Euclidean::distance(&Point::from(p), line)
}

/// Shortest planar distance between two polylines; zero when they touch.
pub fn line_string_gap(a: &LineString, b: &LineString) -> f64 {
    Euclidean::distance(a, b)
}

/// Planar length of a polyline in meters.
pub fn planar_length(line: &LineString) -> f64 {
    line.length::<Euclidean>()
}

// =============================================================================
// Unit Tests
// =============================================================================
