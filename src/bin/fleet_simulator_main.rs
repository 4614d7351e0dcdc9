// fleet_simulator_main.rs
use fleet_events::{
    AmqpTransport, Config, EventRelay, FleetSimulator, StraightLineRouteProvider,
};
use std::error::Error;
use std::sync::Arc;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let config = Config::from_env()?;
    println!("Starting fleet simulator...");

    let url = config.amqp_url.clone();
    let transport = tokio::task::spawn_blocking(move || AmqpTransport::connect(&url)).await??;
    let relay = EventRelay::new(Arc::new(transport), config.topic.clone());

    // No directions service is wired in; vehicles drive straight lines.
    let provider = Arc::new(StraightLineRouteProvider::default());
    let (fleet, events) = FleetSimulator::new(config.fleet.clone(), provider);
    let dispatcher = tokio::spawn(async move { relay.dispatch(events).await });

    fleet.start();

    for i in 1..=config.vehicle_count {
        let id = format!("v{i}");
        if let Err(e) = fleet.add_vehicle(&id).await {
            log::error!("Could not add vehicle {}: {}", id, e);
        }
        if i < config.vehicle_count {
            sleep(config.vehicle_add_frequency()).await;
        }
    }
    log::info!("{} vehicles on the road", fleet.vehicle_count());

    tokio::signal::ctrl_c().await?;
    println!("Shutting down fleet simulator...");
    fleet.stop();
    drop(fleet);

    let stats = dispatcher.await?;
    println!(
        "Published {} events ({} dropped)",
        stats.published, stats.dropped
    );
    Ok(())
}
