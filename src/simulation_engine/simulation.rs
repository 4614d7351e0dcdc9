// simulation.rs
//
// The fleet: a set of vehicle simulators driven by one recurring tick. Events
// leave through an explicit mpsc channel handed out by `FleetSimulator::new`;
// whoever owns the receiver (normally the event relay) decides what to do
// with them.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, Mutex as VehicleLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::communication::messages::VehicleEvent;
use crate::config::FleetConfig;
use crate::error::FleetError;
use crate::simulation_engine::route_provider::RouteProvider;
use crate::simulation_engine::vehicles::{Vehicle, VehicleSimulator};

/// A vehicle plus the events it has produced but the fleet has not yet
/// forwarded. Both only change under the vehicle's lock, so a state change
/// and the events describing it are never separated.
struct VehicleSlot {
    simulator: VehicleSimulator,
    outbox: VecDeque<VehicleEvent>,
}

impl VehicleSlot {
    fn new(simulator: VehicleSimulator) -> Self {
        Self {
            simulator,
            outbox: VecDeque::new(),
        }
    }

    /// Forwards queued events in order. An event leaves the outbox only once
    /// the channel has taken it, so a cancelled flush loses nothing.
    async fn flush(
        &mut self,
        events: &mpsc::Sender<VehicleEvent>,
    ) -> Result<usize, SendError<VehicleEvent>> {
        let mut sent = 0;
        while let Some(event) = self.outbox.front() {
            events.send(event.clone()).await?;
            self.outbox.pop_front();
            sent += 1;
        }
        Ok(sent)
    }
}

type VehicleHandle = Arc<VehicleLock<VehicleSlot>>;

/// State shared between the public handle and the tick task.
struct Fleet {
    config: FleetConfig,
    provider: Arc<dyn RouteProvider>,
    vehicles: Mutex<HashMap<String, VehicleHandle>>,
    events: mpsc::Sender<VehicleEvent>,
}

pub struct FleetSimulator {
    fleet: Arc<Fleet>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl FleetSimulator {
    /// Builds an empty fleet. The returned receiver yields every event the
    /// fleet emits, in emission order.
    ///
    /// A zero `update_interval_ms` is raised to 1 ms.
    pub fn new(
        mut config: FleetConfig,
        provider: Arc<dyn RouteProvider>,
    ) -> (Self, mpsc::Receiver<VehicleEvent>) {
        if config.update_interval_ms == 0 {
            log::warn!("Fleet update interval of 0 ms raised to 1 ms");
            config.update_interval_ms = 1;
        }
        let (events, receiver) = mpsc::channel(config.event_channel_capacity.max(1));
        let fleet = Fleet {
            config,
            provider,
            vehicles: Mutex::new(HashMap::new()),
            events,
        };
        let simulator = FleetSimulator {
            fleet: Arc::new(fleet),
            ticker: Mutex::new(None),
        };
        (simulator, receiver)
    }

    pub fn config(&self) -> &FleetConfig {
        &self.fleet.config
    }

    /// Places a new vehicle at a random point in the bounds and fetches its
    /// first route before registering it.
    ///
    /// If the route provider fails the error is returned and the fleet is
    /// left unchanged. On success the vehicle's `VehicleRouteChanged` is
    /// emitted before it can be ticked.
    pub async fn add_vehicle(&self, id: &str) -> Result<(), FleetError> {
        if self.fleet.vehicles.lock().contains_key(id) {
            return Err(FleetError::DuplicateVehicle(id.to_string()));
        }

        let provider = Arc::clone(&self.fleet.provider);
        let bounds = self.fleet.config.bounds;
        let kinematics = self.fleet.config.kinematics;
        let vehicle_id = id.to_string();
        let (simulator, route) = tokio::task::spawn_blocking(move || {
            let start = bounds.random_point(&mut rand::rng());
            let mut simulator = VehicleSimulator::new(vehicle_id, start, kinematics);
            let route = simulator.request_new_route(provider.as_ref(), &bounds);
            (simulator, route)
        })
        .await?;

        let route_changed = route.map_err(|source| FleetError::RouteFetch {
            id: id.to_string(),
            source,
        })?;

        let mut slot = VehicleSlot::new(simulator);
        slot.outbox.push_back(route_changed);

        // Hold the vehicle's own lock until its first event is out, so the tick
        // loop cannot report a location ahead of the route.
        let handle: VehicleHandle = Arc::new(VehicleLock::new(slot));
        let mut guard = Arc::clone(&handle).lock_owned().await;
        {
            let mut vehicles = self.fleet.vehicles.lock();
            if vehicles.contains_key(id) {
                return Err(FleetError::DuplicateVehicle(id.to_string()));
            }
            vehicles.insert(id.to_string(), handle);
        }
        log::info!("Vehicle {} added to the fleet", id);

        if guard.flush(&self.fleet.events).await.is_err() {
            log::warn!("Event receiver dropped; route for vehicle {} not forwarded", id);
        }
        Ok(())
    }

    /// Removes a vehicle. Returns `false` if it was not registered.
    pub fn remove_vehicle(&self, id: &str) -> bool {
        let removed = self.fleet.vehicles.lock().remove(id).is_some();
        if removed {
            log::info!("Vehicle {} removed from the fleet", id);
        }
        removed
    }

    pub fn vehicle_count(&self) -> usize {
        self.fleet.vehicles.lock().len()
    }

    pub fn vehicle_ids(&self) -> Vec<String> {
        self.fleet.vehicles.lock().keys().cloned().collect()
    }

    /// Copy of a vehicle's current state.
    pub async fn vehicle(&self, id: &str) -> Option<Vehicle> {
        let handle = self.fleet.vehicles.lock().get(id).cloned()?;
        let slot = handle.lock().await;
        Some(slot.simulator.vehicle().clone())
    }

    /// Starts the recurring tick. Calling it while already running does
    /// nothing. Must be called from inside a Tokio runtime.
    pub fn start(&self) {
        let mut ticker = self.ticker.lock();
        if ticker.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let fleet = Arc::clone(&self.fleet);
        *ticker = Some(tokio::spawn(async move { fleet.run().await }));
        log::info!(
            "Fleet simulation started (tick every {} ms)",
            self.fleet.config.update_interval_ms
        );
    }

    /// Stops the recurring tick. Vehicle work already handed to the blocking
    /// pool runs to completion under the vehicle's lock; the events it
    /// produces stay queued on the vehicle and go out, in order, on the next
    /// tick.
    pub fn stop(&self) {
        if let Some(task) = self.ticker.lock().take() {
            task.abort();
            log::info!("Fleet simulation stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Runs a single tick over every registered vehicle and returns how many
    /// events were forwarded.
    pub async fn tick_once(&self) -> usize {
        self.fleet.tick().await
    }
}

impl Drop for FleetSimulator {
    fn drop(&mut self) {
        if let Some(task) = self.ticker.get_mut().take() {
            task.abort();
        }
    }
}

impl Fleet {
    async fn run(self: Arc<Self>) {
        let period = self.config.update_interval();
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            self.tick().await;
            if self.events.is_closed() {
                log::info!("Event receiver dropped, stopping the fleet tick");
                break;
            }
        }
    }

    /// One tick: every vehicle advances on its own blocking task, then each
    /// vehicle's outbox is forwarded in iteration order once all of them are
    /// done. Events left over from an interrupted tick go out first.
    async fn tick(&self) -> usize {
        // Snapshot the handles so add/remove never races with the iteration.
        let vehicles: Vec<(String, VehicleHandle)> = self
            .vehicles
            .lock()
            .iter()
            .map(|(id, handle)| (id.clone(), Arc::clone(handle)))
            .collect();

        let dt_seconds = self.config.tick_seconds();
        let tasks: Vec<_> = vehicles
            .into_iter()
            .map(|(id, handle)| {
                let provider = Arc::clone(&self.provider);
                let bounds = self.config.bounds;
                let worker = Arc::clone(&handle);
                let task = tokio::task::spawn_blocking(move || {
                    let mut slot = worker.blocking_lock();
                    let events = slot.simulator.tick(dt_seconds, provider.as_ref(), &bounds);
                    slot.outbox.extend(events);
                });
                (id, handle, task)
            })
            .collect();

        let mut forwarded = 0;
        for (id, handle, task) in tasks {
            if let Err(e) = task.await {
                log::error!("Tick for vehicle {} failed: {}", id, e);
                continue;
            }
            match handle.lock().await.flush(&self.events).await {
                Ok(sent) => forwarded += sent,
                Err(_) => {
                    log::warn!("Event receiver dropped mid-tick");
                    return forwarded;
                }
            }
        }
        log::debug!("Tick forwarded {} events", forwarded);
        forwarded
    }
}
