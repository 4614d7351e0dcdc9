use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fleet_events::error::{FleetError, RouteError};
use fleet_events::{
    FleetConfig, FleetSimulator, KinematicsConfig, Position, RouteProvider, RouteResult,
    VehicleEvent,
};
use tokio::sync::mpsc;

fn steady_config(update_interval_ms: u64) -> FleetConfig {
    FleetConfig {
        update_interval_ms,
        kinematics: KinematicsConfig {
            speed_change_probability: 0.0,
            ..KinematicsConfig::default()
        },
        ..FleetConfig::default()
    }
}

/// Routes 0.05 degrees east of wherever the vehicle is: ~4.4 km, far more
/// than a vehicle covers in the ticks these tests run.
struct EastboundRoutes;

impl RouteProvider for EastboundRoutes {
    fn fetch_route(&self, waypoints: &[Position]) -> Result<RouteResult, RouteError> {
        let start = waypoints[0];
        let end = Position::new(start.lng() + 0.05, start.lat());
        Ok(RouteResult {
            waypoints: vec![start, end],
            route: vec![start, end],
        })
    }
}

struct Unavailable;

impl RouteProvider for Unavailable {
    fn fetch_route(&self, _waypoints: &[Position]) -> Result<RouteResult, RouteError> {
        Err(RouteError::Upstream("503 from directions service".into()))
    }
}

/// First call: a route that is already finished. Second call: a long route.
/// Every call after that fails.
struct ScriptedRoutes {
    calls: AtomicUsize,
}

impl RouteProvider for ScriptedRoutes {
    fn fetch_route(&self, waypoints: &[Position]) -> Result<RouteResult, RouteError> {
        let start = waypoints[0];
        match self.calls.fetch_add(1, Ordering::SeqCst) {
            0 => Ok(RouteResult {
                waypoints: vec![start],
                route: vec![start],
            }),
            1 => EastboundRoutes.fetch_route(waypoints),
            _ => Err(RouteError::Upstream("quota exceeded".into())),
        }
    }
}

/// Answers the first request at once with a route that is already finished.
/// Every later request takes 200 ms and returns a long eastbound route.
struct SlowAfterFirst {
    calls: AtomicUsize,
}

impl RouteProvider for SlowAfterFirst {
    fn fetch_route(&self, waypoints: &[Position]) -> Result<RouteResult, RouteError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            let start = waypoints[0];
            return Ok(RouteResult {
                waypoints: vec![start],
                route: vec![start],
            });
        }
        std::thread::sleep(Duration::from_millis(200));
        EastboundRoutes.fetch_route(waypoints)
    }
}

fn drain(events: &mut mpsc::Receiver<VehicleEvent>) -> Vec<VehicleEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

#[tokio::test]
async fn failed_initial_route_does_not_register_the_vehicle() {
    let (fleet, mut events) = FleetSimulator::new(steady_config(1000), Arc::new(Unavailable));

    let err = fleet.add_vehicle("v1").await.unwrap_err();

    assert!(matches!(err, FleetError::RouteFetch { ref id, .. } if id == "v1"));
    assert_eq!(fleet.vehicle_count(), 0);
    assert!(fleet.vehicle("v1").await.is_none());
    assert!(drain(&mut events).is_empty());
    assert_eq!(fleet.tick_once().await, 0);
}

#[tokio::test]
async fn two_vehicles_emit_one_location_update_each_per_tick() {
    let (fleet, mut events) = FleetSimulator::new(steady_config(1000), Arc::new(EastboundRoutes));
    fleet.add_vehicle("v1").await.unwrap();
    fleet.add_vehicle("v2").await.unwrap();
    let initial = drain(&mut events);
    assert_eq!(initial.len(), 2);
    assert!(initial
        .iter()
        .all(|e| matches!(e, VehicleEvent::VehicleRouteChanged { .. })));

    let forwarded = fleet.tick_once().await;
    let tick_events = drain(&mut events);

    assert_eq!(forwarded, 2);
    assert_eq!(tick_events.len(), 2);
    assert!(tick_events.iter().all(VehicleEvent::is_location_update));
    let mut ids: Vec<_> = tick_events.iter().map(|e| e.vehicle_id().to_string()).collect();
    ids.sort();
    assert_eq!(ids, vec!["v1", "v2"]);
}

#[tokio::test]
async fn vehicles_move_east_along_their_route() {
    let (fleet, mut events) = FleetSimulator::new(steady_config(1000), Arc::new(EastboundRoutes));
    fleet.add_vehicle("v1").await.unwrap();
    let start = fleet.vehicle("v1").await.unwrap().location;

    for _ in 0..5 {
        fleet.tick_once().await;
    }
    drain(&mut events);

    let vehicle = fleet.vehicle("v1").await.unwrap();
    assert!(vehicle.location.lng() > start.lng());
    assert_eq!(vehicle.location.lat(), start.lat());
    assert_eq!(vehicle.route_index, 0);
}

#[tokio::test]
async fn one_vehicles_route_failure_does_not_stop_the_others() {
    let provider = Arc::new(ScriptedRoutes {
        calls: AtomicUsize::new(0),
    });
    let (fleet, mut events) = FleetSimulator::new(steady_config(1000), provider.clone());
    // "arrived" gets the single-point route, "driving" the long one.
    fleet.add_vehicle("arrived").await.unwrap();
    fleet.add_vehicle("driving").await.unwrap();
    drain(&mut events);

    let forwarded = fleet.tick_once().await;
    let tick_events = drain(&mut events);

    assert_eq!(forwarded, 1);
    assert_eq!(tick_events.len(), 1);
    assert_eq!(tick_events[0].vehicle_id(), "driving");
    assert!(tick_events[0].is_location_update());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

    // The failed vehicle keeps retrying on later ticks.
    fleet.tick_once().await;
    assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    assert_eq!(fleet.vehicle_count(), 2);
}

#[tokio::test]
async fn running_fleet_orders_route_before_locations_and_stops_cleanly() {
    let (fleet, mut events) = FleetSimulator::new(steady_config(10), Arc::new(EastboundRoutes));
    fleet.start();
    fleet.add_vehicle("v1").await.unwrap();
    fleet.add_vehicle("v2").await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    fleet.stop();
    assert!(!fleet.is_running());
    tokio::time::sleep(Duration::from_millis(50)).await;
    let emitted = drain(&mut events);

    for id in ["v1", "v2"] {
        let own: Vec<_> = emitted.iter().filter(|e| e.vehicle_id() == id).collect();
        assert!(own.len() > 1, "{id} emitted {} events", own.len());
        assert!(matches!(own[0], VehicleEvent::VehicleRouteChanged { .. }));
        assert!(own[1..].iter().all(|e| e.is_location_update()));
        assert!(own.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn stopping_during_a_route_fetch_keeps_the_route_and_its_event_together() {
    let provider = Arc::new(SlowAfterFirst {
        calls: AtomicUsize::new(0),
    });
    let (fleet, mut events) = FleetSimulator::new(steady_config(50), provider.clone());
    fleet.add_vehicle("v1").await.unwrap();

    // The first tick fires at 50 ms and is still waiting on the provider
    // when the fleet is stopped.
    fleet.start();
    tokio::time::sleep(Duration::from_millis(120)).await;
    fleet.stop();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

    fleet.tick_once().await;
    let emitted = drain(&mut events);
    let current = fleet.vehicle("v1").await.unwrap();

    let last_route = emitted
        .iter()
        .rposition(|e| matches!(e, VehicleEvent::VehicleRouteChanged { .. }))
        .expect("no route change emitted");
    match &emitted[last_route] {
        VehicleEvent::VehicleRouteChanged { route, .. } => assert_eq!(route, &current.route),
        other => panic!("unexpected event {other:?}"),
    }
    let after = &emitted[last_route + 1..];
    assert_eq!(after.len(), 2);
    assert!(after.iter().all(VehicleEvent::is_location_update));
    assert_eq!(emitted.len(), 4);
}
