// server.rs
//
// HTTP surfaces of the pipeline:
//   - ingress: producers POST vehicle events, which are published on the relay;
//   - egress: clients open a WebSocket and receive every fanned-out payload.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::communication::messages::{LocationUpdate, VehicleEvent};
use crate::communication::relay::EventRelay;
use crate::gateway::registry::GatewayRegistry;
use crate::global_variables::{SOCKET_BUFFER, SOCKET_WRITE_TIMEOUT_MS};

/// `{ "message": ... }` body used by every ingress response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

type Reply = (StatusCode, Json<MessageBody>);

fn reply(status: StatusCode, message: impl Into<String>) -> Reply {
    (
        status,
        Json(MessageBody {
            message: message.into(),
        }),
    )
}

fn rejected(rejection: JsonRejection) -> Reply {
    log::debug!("Rejected ingress body: {}", rejection.body_text());
    reply(rejection.status(), rejection.body_text())
}

/// Routes for producers posting vehicle events.
pub fn ingress_router(relay: EventRelay) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/vehicles/{id}/event", post(post_vehicle_event))
        .route("/api/location-update", post(post_location_update))
        .with_state(relay)
}

/// Routes for live clients.
pub fn gateway_router(registry: Arc<GatewayRegistry>) -> Router {
    Router::new()
        .route("/ws", get(upgrade_socket))
        .with_state(registry)
}

async fn root() -> Reply {
    reply(StatusCode::OK, "vehicle-events is running")
}

async fn post_vehicle_event(
    State(relay): State<EventRelay>,
    Path(id): Path<String>,
    body: Result<Json<VehicleEvent>, JsonRejection>,
) -> Reply {
    let event = match body {
        Ok(Json(event)) => event,
        Err(rejection) => return rejected(rejection),
    };
    if event.vehicle_id() != id {
        return reply(
            StatusCode::BAD_REQUEST,
            format!(
                "Vehicle id {} in path does not match {} in body",
                id,
                event.vehicle_id()
            ),
        );
    }

    match relay.publish_event(event).await {
        Ok(()) => reply(
            StatusCode::OK,
            "Vehicle event received and published successfully",
        ),
        Err(e) => {
            log::error!("Error publishing event for vehicle {}: {}", id, e);
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error processing vehicle event",
            )
        }
    }
}

async fn post_location_update(
    State(relay): State<EventRelay>,
    body: Result<Json<LocationUpdate>, JsonRejection>,
) -> Reply {
    let update = match body {
        Ok(Json(update)) => update,
        Err(rejection) => return rejected(rejection),
    };
    let vehicle_id = update.vehicle_id.clone();
    let event = match VehicleEvent::try_from(update) {
        Ok(event) => event,
        Err(e) => return reply(StatusCode::BAD_REQUEST, e.to_string()),
    };
    match relay.publish_event(event).await {
        Ok(()) => reply(
            StatusCode::OK,
            "Location update received and published successfully",
        ),
        Err(e) => {
            log::error!("Error publishing location of vehicle {}: {}", vehicle_id, e);
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error processing location update",
            )
        }
    }
}

async fn upgrade_socket(
    State(registry): State<Arc<GatewayRegistry>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, registry))
}

/// Registers the socket as a sink and pumps payloads to it until either side
/// goes away. A client that stops reading fills its queue and is evicted by
/// the registry, or times out here.
async fn serve_socket(socket: WebSocket, registry: Arc<GatewayRegistry>) {
    let (sender, mut payloads) = mpsc::channel::<Vec<u8>>(SOCKET_BUFFER);
    let write_timeout = Duration::from_millis(SOCKET_WRITE_TIMEOUT_MS);
    let id = registry.register(Arc::new(sender));
    let (mut outgoing, mut incoming) = socket.split();

    loop {
        tokio::select! {
            payload = payloads.recv() => {
                // `None` means the registry evicted us.
                let Some(payload) = payload else { break };
                let message = match String::from_utf8(payload) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => Message::Binary(e.into_bytes().into()),
                };
                match timeout(write_timeout, outgoing.send(message)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => break,
                    Err(_) => {
                        log::warn!("Socket {} write timed out", id);
                        break;
                    }
                }
            }
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    registry.unregister(id);
}
