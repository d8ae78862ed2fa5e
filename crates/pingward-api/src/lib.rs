//! pingward-api — inbound HTTP API.
//!
//! Thin axum layer over the [`Watchdog`] context. Every response uses the
//! `{success, data?, error?}` envelope.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Service banner |
//! | GET | `/clients` | List clients with liveness phase |
//! | PUT | `/clients` | Replace the client set |
//! | GET | `/clients/{id}` | Single client status |
//! | GET | `/refreshMap` | Refresh the registry from upstream now |
//! | GET | `/receive?clientId=` | Heartbeat |
//! | GET | `/tgclientoff/{processId}?clientId=` | Report the active process |
//! | GET | `/requestcall?clientId=&chatId=&type=` | Forward a call request |

pub mod handlers;

use axum::Router;
use axum::routing::get;
use pingward_health::Watchdog;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub watchdog: Watchdog,
    pub service_name: String,
}

/// Build the complete API router.
pub fn build_router(watchdog: Watchdog, service_name: &str) -> Router {
    let state = ApiState {
        watchdog,
        service_name: service_name.to_string(),
    };

    Router::new()
        .route("/", get(handlers::banner))
        .route("/clients", get(handlers::list_clients).put(handlers::replace_clients))
        .route("/clients/{id}", get(handlers::get_client))
        .route("/refreshMap", get(handlers::refresh_map))
        .route("/receive", get(handlers::receive))
        .route("/tgclientoff/{process_id}", get(handlers::client_active))
        .route("/requestcall", get(handlers::request_call))
        .with_state(state)
}
