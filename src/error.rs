//! Error types shared across the simulator, relay and gateway.
//!
//! None of these are fatal to the tick loop or the fan-out loop; the loops
//! log them and move on. Only startup code propagates them to `main`.

use thiserror::Error;

/// The directions lookup failed or returned something unusable.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("a route request needs at least two waypoints, got {0}")]
    TooFewWaypoints(usize),

    #[error("route provider returned an empty route")]
    EmptyRoute,

    #[error("route provider returned no waypoints")]
    NoWaypoints,

    #[error("route provider failed: {0}")]
    Upstream(String),
}

/// Broker-side failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("amqp error: {0}")]
    Amqp(#[from] amiquip::Error),

    #[error("transport is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed vehicle event: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("timestamp {0} ms is outside the representable range")]
    InvalidTimestamp(i64),

    #[error("failed to encode vehicle event: {0}")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("publish task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Writing to one live connection failed.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink is closed")]
    Closed,

    #[error("sink is not keeping up")]
    Full,
}

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("vehicle {id} could not get an initial route: {source}")]
    RouteFetch {
        id: String,
        #[source]
        source: RouteError,
    },

    #[error("vehicle {0} is already registered")]
    DuplicateVehicle(String),

    #[error("vehicle task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },
}
