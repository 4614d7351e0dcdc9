// route_provider.rs
//
// The directions lookup is an external service. Vehicles only see it through
// the `RouteProvider` trait; implementations may block on network I/O, so
// the fleet always calls them from the blocking thread pool.

use crate::error::RouteError;
use crate::simulation_engine::geo::{interpolate, Position};

/// A resolved trip: endpoints snapped to the road network plus the polyline
/// between them.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteResult {
    pub waypoints: Vec<Position>,
    pub route: Vec<Position>,
}

impl RouteResult {
    /// Checks the provider contract: at least one waypoint and one route point.
    pub fn validate(self) -> Result<Self, RouteError> {
        if self.waypoints.is_empty() {
            return Err(RouteError::NoWaypoints);
        }
        if self.route.is_empty() {
            return Err(RouteError::EmptyRoute);
        }
        Ok(self)
    }
}

pub trait RouteProvider: Send + Sync {
    /// Resolves a route through `waypoints` (at least two). Retrying is up to
    /// the caller.
    fn fetch_route(&self, waypoints: &[Position]) -> Result<RouteResult, RouteError>;
}

/// Drives straight from the first waypoint to the last, split into
/// `segments` equal steps. Used when no directions service is available.
#[derive(Debug, Clone)]
pub struct StraightLineRouteProvider {
    segments: usize,
}

impl StraightLineRouteProvider {
    pub fn new(segments: usize) -> Self {
        Self {
            segments: segments.max(1),
        }
    }
}

impl Default for StraightLineRouteProvider {
    fn default() -> Self {
        Self::new(20)
    }
}

impl RouteProvider for StraightLineRouteProvider {
    fn fetch_route(&self, waypoints: &[Position]) -> Result<RouteResult, RouteError> {
        let (start, end) = match waypoints {
            [start, .., end] => (*start, *end),
            _ => return Err(RouteError::TooFewWaypoints(waypoints.len())),
        };

        let route = (0..=self.segments)
            .map(|i| interpolate(start, end, i as f64 / self.segments as f64))
            .collect();

        Ok(RouteResult {
            waypoints: vec![start, end],
            route,
        })
    }
}
