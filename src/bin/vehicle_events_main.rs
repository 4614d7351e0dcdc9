// vehicle_events_main.rs
use fleet_events::gateway::server::ingress_router;
use fleet_events::{AmqpTransport, Config, EventRelay};
use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let config = Config::from_env()?;

    let url = config.amqp_url.clone();
    let transport = tokio::task::spawn_blocking(move || AmqpTransport::connect(&url)).await??;
    let relay = EventRelay::new(Arc::new(transport), config.topic.clone());

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    println!("vehicle-events: listening on port {}", config.port);
    axum::serve(listener, ingress_router(relay)).await?;
    Ok(())
}
