//! Axum ingress for the WebSub hub
//!
//! A single `POST /` endpoint speaks the WebSub publisher and subscriber
//! protocol (`hub.mode` = `publish` | `subscribe` | `unsubscribe`), in
//! form-encoded or JSON shape. Validation failures surface as a 400 whose
//! body lists `error:` and `warning:` lines; nothing is persisted unless
//! every part of a request is acceptable.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use websub::Hub;

mod router_handlers;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct HubState {
    pub(crate) hub: Arc<Hub>,
}

impl std::fmt::Debug for HubState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubState").finish_non_exhaustive()
    }
}

/// Builds the ingress router
pub fn create_hub_router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/", post(router_handlers::post_root))
        .route("/healthz", get(router_handlers::get_healthz))
        .with_state(HubState { hub })
}
