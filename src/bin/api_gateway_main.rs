// api_gateway_main.rs
use fleet_events::gateway::server::gateway_router;
use fleet_events::global_variables::RESUBSCRIBE_DELAY_MS;
use fleet_events::{AmqpTransport, Config, EventRelay, GatewayRegistry};
use std::error::Error;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let config = Config::from_env()?;

    let url = config.amqp_url.clone();
    let transport = tokio::task::spawn_blocking(move || AmqpTransport::connect(&url)).await??;
    let relay = EventRelay::new(Arc::new(transport), config.topic.clone());
    println!("api-gateway: relaying events from {}", relay.topic());

    let registry = Arc::new(GatewayRegistry::new());
    let fanout = {
        let registry = Arc::clone(&registry);
        let retry_delay = Duration::from_millis(RESUBSCRIBE_DELAY_MS);
        tokio::spawn(async move { relay.serve_fanout(registry, retry_delay).await })
    };

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    println!("api-gateway: listening on port {}", config.port);

    // `serve_fanout` only returns by panicking.
    tokio::select! {
        served = axum::serve(listener, gateway_router(registry)).into_future() => served?,
        ended = fanout => {
            ended?;
            return Err("api-gateway: event fan-out stopped".into());
        }
    }
    Ok(())
}
