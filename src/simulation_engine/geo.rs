// geo.rs
//
// Plain geographic helpers used by the vehicle simulator. Positions follow the
// GeoJSON convention of (longitude, latitude) in WGS84 degrees.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A (longitude, latitude) pair. Serializes as a two-element JSON array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position(pub f64, pub f64);

impl Position {
    pub fn new(lng: f64, lat: f64) -> Self {
        Position(lng, lat)
    }

    pub fn lng(&self) -> f64 {
        self.0
    }

    pub fn lat(&self) -> f64 {
        self.1
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "[{:.6}, {:.6}]", self.0, self.1)
    }
}

/// Great-circle distance between two positions, in kilometres.
pub fn haversine_distance_km(a: Position, b: Position) -> f64 {
    let d_lat = (b.lat() - a.lat()).to_radians();
    let d_lng = (b.lng() - a.lng()).to_radians();
    let lat1 = a.lat().to_radians();
    let lat2 = b.lat().to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Per-axis linear interpolation from `from` towards `to`.
///
/// Only accurate for short segments (consecutive points of a road polyline);
/// it does not follow the great circle. `ratio` is clamped to `[0, 1]`.
pub fn interpolate(from: Position, to: Position, ratio: f64) -> Position {
    let ratio = ratio.clamp(0.0, 1.0);
    if ratio >= 1.0 {
        return to;
    }
    Position(
        from.lng() + (to.lng() - from.lng()) * ratio,
        from.lat() + (to.lat() - from.lat()) * ratio,
    )
}

/// Rectangle that random trip destinations are drawn from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Bounds {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Uniformly distributed point inside the rectangle.
    pub fn random_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Position {
        Position(
            rng.random_range(self.min_lon..=self.max_lon),
            rng.random_range(self.min_lat..=self.max_lat),
        )
    }

    pub fn contains(&self, p: Position) -> bool {
        (self.min_lon..=self.max_lon).contains(&p.lng())
            && (self.min_lat..=self.max_lat).contains(&p.lat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn distance_to_self_is_zero() {
        let p = Position::new(-122.45, 37.75);
        assert_eq!(haversine_distance_km(p, p), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = Position::new(-122.45, 37.75);
        let b = Position::new(-122.40, 37.78);
        let ab = haversine_distance_km(a, b);
        let ba = haversine_distance_km(b, a);
        assert!((ab - ba).abs() < 1e-12);
    }

    #[test]
    fn distance_matches_known_value() {
        // 0.05 degrees of longitude at 37.75N is roughly 4.4 km.
        let a = Position::new(-122.45, 37.75);
        let b = Position::new(-122.40, 37.75);
        let d = haversine_distance_km(a, b);
        assert!((d - 4.395).abs() < 0.01, "got {d}");
    }

    #[test]
    fn interpolate_endpoints() {
        let a = Position::new(-122.45, 37.75);
        let b = Position::new(-122.40, 37.80);
        assert_eq!(interpolate(a, b, 0.0), a);
        assert_eq!(interpolate(a, b, 1.0), b);
    }

    #[test]
    fn interpolate_midpoint_and_clamping() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(2.0, 4.0);
        assert_eq!(interpolate(a, b, 0.5), Position::new(1.0, 2.0));
        assert_eq!(interpolate(a, b, 1.5), b);
        assert_eq!(interpolate(a, b, -0.5), a);
    }

    #[test]
    fn random_points_stay_in_bounds() {
        let bounds = Bounds::new(-122.5, 37.7, -122.4, 37.8);
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..1000 {
            assert!(bounds.contains(bounds.random_point(&mut rng)));
        }
    }
}
