use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Vertex in spherical-equatorial degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl Point {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl From<[f64; 2]> for Point {
    fn from(p: [f64; 2]) -> Self {
        Self { lat: p[0], lon: p[1] }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeofenceError {
    #[error("geofence needs at least 3 distinct points, got {0}")]
    TooFewPoints(usize),
    #[error("geofence point {index} out of range (lat={lat}, lon={lon})")]
    InvalidCoordinate { index: usize, lat: f64, lon: f64 },
    #[error("geofence polygon has no area")]
    Degenerate,
    #[error("geofence edges {0} and {1} intersect")]
    SelfIntersecting(usize, usize),
    #[error("geofence encircles a pole")]
    EnclosesPole,
}

/// Longitude difference folded into [-180, 180).
fn wrap_lon(d: f64) -> f64 {
    (d + 180.0).rem_euclid(360.0) - 180.0
}

/// Simple polygon stored as a closed ring (first vertex repeated at the end).
///
/// Edges run straight in (lon, lat), which is close to the great-circle edge
/// for fences a few kilometres across. Longitudes are unwrapped along the
/// ring, so a fence may cross the antimeridian; stored vertices can then lie
/// beyond +-180.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    ring: Vec<Point>,
    west: f64,
}

impl Polygon {
    pub fn new(points: &[Point]) -> Result<Self, GeofenceError> {
        for (index, p) in points.iter().enumerate() {
            if !p.lat.is_finite() || !p.lon.is_finite() || p.lat.abs() > 90.0 || p.lon.abs() > 180.0 {
                return Err(GeofenceError::InvalidCoordinate { index, lat: p.lat, lon: p.lon });
            }
        }

        let mut open: Vec<Point> = Vec::with_capacity(points.len());
        for p in points {
            if open.last() != Some(p) {
                open.push(*p);
            }
        }
        // closing vertex is optional on input
        while open.len() > 1 && open.first() == open.last() {
            open.pop();
        }
        if open.len() < 3 {
            return Err(GeofenceError::TooFewPoints(open.len()));
        }

        for i in 1..open.len() {
            open[i].lon = open[i - 1].lon + wrap_lon(open[i].lon - open[i - 1].lon);
        }
        let last = open[open.len() - 1];
        if (last.lon + wrap_lon(open[0].lon - last.lon) - open[0].lon).abs() > 1e-9 {
            return Err(GeofenceError::EnclosesPole);
        }

        let n = open.len();
        for i in 0..n {
            for j in (i + 1)..n {
                // adjacent edges share a vertex by construction
                if j == i + 1 || (i == 0 && j == n - 1) {
                    continue;
                }
                let (a1, a2) = (open[i], open[(i + 1) % n]);
                let (b1, b2) = (open[j], open[(j + 1) % n]);
                if segments_intersect(a1, a2, b1, b2) {
                    return Err(GeofenceError::SelfIntersecting(i, j));
                }
            }
        }

        if signed_area(&open).abs() < 1e-12 {
            return Err(GeofenceError::Degenerate);
        }

        let west = open.iter().map(|p| p.lon).fold(f64::INFINITY, f64::min);
        let mut ring = open;
        ring.push(ring[0]);
        Ok(Self { ring, west })
    }

    /// Vertices without the closing repeat.
    pub fn vertices(&self) -> &[Point] {
        &self.ring[..self.ring.len() - 1]
    }

    /// Ray casting along constant latitude, longitude as x. The query
    /// longitude is shifted by whole turns into the ring's span first.
    ///
    /// Points exactly on an edge follow the half-open crossing rule: edges
    /// on the lower/left side of the interior count as inside, upper/right
    /// edges as outside. Callers needing a margin must shrink the polygon.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        let lon = self.west + (lon - self.west).rem_euclid(360.0);
        let mut inside = false;
        for edge in self.ring.windows(2) {
            let (a, b) = (edge[0], edge[1]);
            if (a.lat > lat) != (b.lat > lat) {
                let cross_lon = (b.lon - a.lon) * (lat - a.lat) / (b.lat - a.lat) + a.lon;
                if lon < cross_lon {
                    inside = !inside;
                }
            }
        }
        inside
    }
}

fn signed_area(open: &[Point]) -> f64 {
    let n = open.len();
    let mut acc = 0.0;
    for i in 0..n {
        let a = open[i];
        let b = open[(i + 1) % n];
        acc += a.lon * b.lat - b.lon * a.lat;
    }
    acc / 2.0
}

fn orient(a: Point, b: Point, c: Point) -> f64 {
    (b.lon - a.lon) * (c.lat - a.lat) - (b.lat - a.lat) * (c.lon - a.lon)
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p.lon >= a.lon.min(b.lon) && p.lon <= a.lon.max(b.lon) && p.lat >= a.lat.min(b.lat) && p.lat <= a.lat.max(b.lat)
}

fn segments_intersect(a1: Point, a2: Point, b1: Point, b2: Point) -> bool {
    let d1 = orient(b1, b2, a1);
    let d2 = orient(b1, b2, a2);
    let d3 = orient(a1, a2, b1);
    let d4 = orient(a1, a2, b2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0)) && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0)) {
        return true;
    }
    (d1 == 0.0 && on_segment(b1, b2, a1))
        || (d2 == 0.0 && on_segment(b1, b2, a2))
        || (d3 == 0.0 && on_segment(a1, a2, b1))
        || (d4 == 0.0 && on_segment(a1, a2, b2))
}

/// Active geofence shared between the configuration path and the waypoint
/// controller. Without a valid polygon every point is allowed.
#[derive(Debug, Default)]
pub struct GeofenceGuard {
    active: RwLock<Option<Arc<Polygon>>>,
}

impl GeofenceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the polygon. On error the previous polygon stays in effect.
    pub fn configure(&self, points: &[Point]) -> Result<(), GeofenceError> {
        match Polygon::new(points) {
            Ok(poly) => {
                info!("geofence: configured with {} vertices", poly.vertices().len());
                *self.active.write() = Some(Arc::new(poly));
                Ok(())
            }
            Err(e) => {
                warn!("geofence: rejected ({}); keeping previous (valid={})", e, self.is_valid());
                Err(e)
            }
        }
    }

    pub fn clear(&self) {
        *self.active.write() = None;
        info!("geofence: cleared");
    }

    pub fn is_valid(&self) -> bool {
        self.active.read().is_some()
    }

    pub fn polygon(&self) -> Option<Arc<Polygon>> {
        self.active.read().clone()
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        match self.polygon() {
            Some(poly) => poly.contains(lat, lon),
            None => true,
        }
    }
}
