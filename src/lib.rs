//! Fleet motion simulation and vehicle event distribution.
//!
//! The simulator moves vehicles along routes on a fixed tick and emits
//! [`VehicleEvent`]s; the [`EventRelay`] publishes them on a broker topic and,
//! on the gateway side, fans every inbound payload out to the live sockets in
//! a [`GatewayRegistry`].

pub mod communication;
pub mod config;
pub mod error;
pub mod gateway;
pub mod global_variables;
pub mod simulation_engine;

pub use communication::messages::{LocationUpdate, VehicleEvent};
pub use communication::relay::EventRelay;
pub use communication::transport::{AmqpTransport, InMemoryTransport, Subscription, Transport};
pub use config::{Config, FleetConfig, KinematicsConfig};
pub use gateway::registry::{ConnectionId, EventSink, GatewayRegistry};
pub use simulation_engine::geo::{Bounds, Position};
pub use simulation_engine::route_provider::{RouteProvider, RouteResult, StraightLineRouteProvider};
pub use simulation_engine::simulation::FleetSimulator;
pub use simulation_engine::vehicles::{Vehicle, VehicleSimulator, VehicleState};
