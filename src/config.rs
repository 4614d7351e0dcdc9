// config.rs
//
// Environment-style configuration. Every option falls back to the defaults
// in `global_variables`, so a bare `Config::default()` matches a local
// development setup (RabbitMQ on localhost, San Francisco bounds).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::global_variables::{
    AMQP_URL, DEFAULT_BOUNDS, DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_LOCATION_UPDATE_FREQUENCY_MS,
    DEFAULT_PORT, DEFAULT_VEHICLE_ADD_FREQUENCY_MS, DEFAULT_VEHICLE_COUNT, MAX_SPEED_KMH,
    MIN_SPEED_KMH, SPEED_CHANGE_PROBABILITY, TOPIC_VEHICLE_EVENTS,
};
use crate::simulation_engine::geo::Bounds;

/// Speed model applied to every vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicsConfig {
    pub min_speed_kmh: f64,
    pub max_speed_kmh: f64,
    /// Chance per tick that a vehicle picks a new speed.
    pub speed_change_probability: f64,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            min_speed_kmh: MIN_SPEED_KMH,
            max_speed_kmh: MAX_SPEED_KMH,
            speed_change_probability: SPEED_CHANGE_PROBABILITY,
        }
    }
}

/// Everything the fleet simulator needs to run.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub update_interval_ms: u64,
    pub bounds: Bounds,
    pub kinematics: KinematicsConfig,
    pub event_channel_capacity: usize,
}

impl FleetConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// Simulated seconds that pass in one tick.
    pub fn tick_seconds(&self) -> f64 {
        self.update_interval_ms as f64 / 1000.0
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        let (min_lon, min_lat, max_lon, max_lat) = DEFAULT_BOUNDS;
        Self {
            update_interval_ms: DEFAULT_LOCATION_UPDATE_FREQUENCY_MS,
            bounds: Bounds::new(min_lon, min_lat, max_lon, max_lat),
            kinematics: KinematicsConfig::default(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Process-wide configuration shared by the three binaries.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub amqp_url: String,
    pub topic: String,
    pub vehicle_count: usize,
    pub vehicle_add_frequency_ms: u64,
    pub fleet: FleetConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            amqp_url: AMQP_URL.to_string(),
            topic: TOPIC_VEHICLE_EVENTS.to_string(),
            vehicle_count: DEFAULT_VEHICLE_COUNT,
            vehicle_add_frequency_ms: DEFAULT_VEHICLE_ADD_FREQUENCY_MS,
            fleet: FleetConfig::default(),
        }
    }
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; unset keys keep their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(port) = parse_var(&lookup, "PORT")? {
            config.port = port;
        }
        if let Some(url) = lookup("AMQP_URL") {
            config.amqp_url = url;
        }
        if let Some(topic) = lookup("VEHICLE_EVENTS_TOPIC") {
            config.topic = topic;
        }
        if let Some(count) = parse_var(&lookup, "VEHICLE_COUNT")? {
            config.vehicle_count = count;
        }
        if let Some(ms) = parse_var(&lookup, "VEHICLE_ADD_FREQUENCY_MS")? {
            config.vehicle_add_frequency_ms = ms;
        }
        if let Some(ms) = parse_var::<_, u64>(&lookup, "LOCATION_UPDATE_FREQUENCY_MS")? {
            if ms == 0 {
                return Err(ConfigError::Invalid {
                    var: "LOCATION_UPDATE_FREQUENCY_MS",
                    value: ms.to_string(),
                });
            }
            config.fleet.update_interval_ms = ms;
        }
        if let Some(capacity) = parse_var::<_, usize>(&lookup, "EVENT_CHANNEL_CAPACITY")? {
            config.fleet.event_channel_capacity = capacity.max(1);
        }
        if let Some(raw) = lookup("FLEET_BOUNDS") {
            config.fleet.bounds = parse_bounds(&raw).ok_or(ConfigError::Invalid {
                var: "FLEET_BOUNDS",
                value: raw,
            })?;
        }

        Ok(config)
    }

    pub fn vehicle_add_frequency(&self) -> Duration {
        Duration::from_millis(self.vehicle_add_frequency_ms)
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

// "min_lon,min_lat,max_lon,max_lat"
fn parse_bounds(raw: &str) -> Option<Bounds> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    match parts.as_slice() {
        &[min_lon, min_lat, max_lon, max_lat] if min_lon <= max_lon && min_lat <= max_lat => {
            Some(Bounds::new(min_lon, min_lat, max_lon, max_lat))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.topic, "vehicle-events");
        assert_eq!(config.vehicle_count, 10);
        assert_eq!(config.vehicle_add_frequency_ms, 2000);
        assert_eq!(config.fleet.update_interval_ms, 1000);
        assert_eq!(config.fleet.tick_seconds(), 1.0);
    }

    #[test]
    fn overrides_are_applied() {
        let config = Config::from_lookup(lookup_from(&[
            ("PORT", "9000"),
            ("VEHICLE_EVENTS_TOPIC", "fleet"),
            ("VEHICLE_COUNT", "3"),
            ("LOCATION_UPDATE_FREQUENCY_MS", "250"),
            ("FLEET_BOUNDS", "-1.0, 50.0, 1.0, 52.0"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.topic, "fleet");
        assert_eq!(config.vehicle_count, 3);
        assert_eq!(config.fleet.update_interval_ms, 250);
        assert_eq!(config.fleet.bounds, Bounds::new(-1.0, 50.0, 1.0, 52.0));
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = Config::from_lookup(lookup_from(&[("PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));

        let err = Config::from_lookup(lookup_from(&[("FLEET_BOUNDS", "1,2,3")])).unwrap_err();
        assert!(err.to_string().contains("FLEET_BOUNDS"));

        let err =
            Config::from_lookup(lookup_from(&[("LOCATION_UPDATE_FREQUENCY_MS", "0")])).unwrap_err();
        assert!(err.to_string().contains("LOCATION_UPDATE_FREQUENCY_MS"));
    }
}
