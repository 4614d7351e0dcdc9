// vehicles.rs
//
// One vehicle's kinematic state machine. A vehicle either has no usable
// route (and asks the route provider for one on its next tick) or is driving
// along its route polyline at constant speed between ticks.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::communication::messages::VehicleEvent;
use crate::config::KinematicsConfig;
use crate::error::RouteError;
use crate::simulation_engine::geo::{haversine_distance_km, interpolate, Bounds, Position};
use crate::simulation_engine::route_provider::RouteProvider;

/// Where a vehicle is in its route lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleState {
    /// Freshly created, route exhausted, or the last route request failed.
    NoRoute,
    EnRoute,
}

/// Snapshot of a vehicle's kinematic state.
#[derive(Debug, Clone, PartialEq)]
pub struct Vehicle {
    pub id: String,
    pub location: Position,
    /// km/h
    pub speed: f64,
    pub waypoints: Vec<Position>,
    pub route: Vec<Position>,
    pub route_index: usize,
}

pub struct VehicleSimulator {
    vehicle: Vehicle,
    state: VehicleState,
    kinematics: KinematicsConfig,
    rng: SmallRng,
}

impl VehicleSimulator {
    /// Creates a vehicle with no route and a random speed.
    pub fn new(id: impl Into<String>, location: Position, kinematics: KinematicsConfig) -> Self {
        Self::with_rng(id, location, kinematics, SmallRng::from_os_rng())
    }

    /// Same as [`VehicleSimulator::new`] with a caller-supplied RNG, for
    /// reproducible runs.
    pub fn with_rng(
        id: impl Into<String>,
        location: Position,
        kinematics: KinematicsConfig,
        mut rng: SmallRng,
    ) -> Self {
        let speed = random_speed(&kinematics, &mut rng);
        Self {
            vehicle: Vehicle {
                id: id.into(),
                location,
                speed,
                waypoints: Vec::new(),
                route: Vec::new(),
                route_index: 0,
            },
            state: VehicleState::NoRoute,
            kinematics,
            rng,
        }
    }

    pub fn id(&self) -> &str {
        &self.vehicle.id
    }

    pub fn state(&self) -> VehicleState {
        self.state
    }

    pub fn vehicle(&self) -> &Vehicle {
        &self.vehicle
    }

    pub fn set_speed(&mut self, speed_kmh: f64) {
        self.vehicle.speed = speed_kmh;
    }

    /// Advances the vehicle by `dt_seconds`.
    ///
    /// Returns the events of this tick, in order: a `VehicleRouteChanged` when
    /// a new route was obtained, then the `VehicleLocationUpdated`. If the
    /// vehicle needed a route and the provider failed, nothing changes and no
    /// event is returned; the next tick tries again.
    pub fn tick(
        &mut self,
        dt_seconds: f64,
        provider: &dyn RouteProvider,
        bounds: &Bounds,
    ) -> Vec<VehicleEvent> {
        let mut events = Vec::with_capacity(2);

        match self.state {
            VehicleState::NoRoute => match self.request_new_route(provider, bounds) {
                Ok(route_changed) => events.push(route_changed),
                Err(e) => {
                    log::warn!(
                        "Vehicle {} could not get a new route, retrying next tick: {}",
                        self.vehicle.id,
                        e
                    );
                    return events;
                }
            },
            VehicleState::EnRoute => self.advance(dt_seconds),
        }

        if self.rng.random_bool(self.kinematics.speed_change_probability.clamp(0.0, 1.0)) {
            self.vehicle.speed = random_speed(&self.kinematics, &mut self.rng);
        }

        events.push(VehicleEvent::location_updated(
            &self.vehicle.id,
            self.vehicle.location,
        ));
        events
    }

    /// Asks `provider` for a trip from the current location to a random point
    /// in `bounds` and switches the vehicle onto it.
    ///
    /// The vehicle is only touched once the provider has answered with a
    /// usable route, so a failure leaves it exactly as it was.
    pub fn request_new_route(
        &mut self,
        provider: &dyn RouteProvider,
        bounds: &Bounds,
    ) -> Result<VehicleEvent, RouteError> {
        let destination = bounds.random_point(&mut self.rng);
        let result = provider
            .fetch_route(&[self.vehicle.location, destination])?
            .validate()?;

        self.vehicle.location = result.waypoints[0];
        self.vehicle.waypoints = result.waypoints;
        self.vehicle.route = result.route;
        self.vehicle.route_index = 0;
        // A single-point route means we are already there.
        self.state = if self.vehicle.route.len() > 1 {
            VehicleState::EnRoute
        } else {
            VehicleState::NoRoute
        };

        log::debug!(
            "Vehicle {} got a new route with {} points",
            self.vehicle.id,
            self.vehicle.route.len()
        );

        Ok(VehicleEvent::route_changed(
            &self.vehicle.id,
            self.vehicle.waypoints.clone(),
            self.vehicle.route.clone(),
        ))
    }

    fn advance(&mut self, dt_seconds: f64) {
        let vehicle = &mut self.vehicle;
        let next = vehicle.route[vehicle.route_index + 1];

        let distance_km = haversine_distance_km(vehicle.location, next);
        let eta_seconds = distance_km / vehicle.speed * 3600.0;

        if eta_seconds <= dt_seconds {
            vehicle.location = next;
            vehicle.route_index += 1;
            if vehicle.route_index == vehicle.route.len() - 1 {
                self.state = VehicleState::NoRoute;
            }
        } else {
            vehicle.location = interpolate(vehicle.location, next, dt_seconds / eta_seconds);
        }
    }
}

fn random_speed(kinematics: &KinematicsConfig, rng: &mut SmallRng) -> f64 {
    if kinematics.max_speed_kmh <= kinematics.min_speed_kmh {
        return kinematics.min_speed_kmh;
    }
    rng.random_range(kinematics.min_speed_kmh..=kinematics.max_speed_kmh)
}
