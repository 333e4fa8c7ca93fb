pub mod api;
pub mod pages;
pub mod views;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::feed::ChangeFeed;
use crate::models::Config;
use crate::push::{HttpPush, PushDelivery, PushRegistry};
use crate::store::{Backend, Store};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<Config>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) feed: Arc<dyn ChangeFeed>,
    pub(crate) push: PushRegistry,
    pub(crate) delivery: Arc<dyn PushDelivery>,
    pub(crate) vapid_public_key: Option<String>,
}

impl AppState {
    pub(crate) fn new(config: Config, backend: Backend, delivery: Arc<dyn PushDelivery>) -> Self {
        let vapid_public_key = config.push.vapid_keys().map(|keys| keys.public_key);
        Self {
            vapid_public_key,
            config: Arc::new(config),
            store: backend.store,
            feed: backend.feed,
            push: PushRegistry::new(),
            delivery,
        }
    }
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(pages::index_handler))
        .route("/events/{id}", get(pages::event_handler))
        .route("/api/events", post(api::create_event))
        .route("/api/events/{id}", get(api::get_event))
        .route("/api/events/{id}/participants", post(api::submit))
        .route("/api/events/{id}/slots/{key}", get(api::slot_detail))
        .route("/api/events/{id}/changes", get(api::changes))
        .route("/api/events/{id}/push", post(api::register_push))
        .route("/api/push/public-key", get(api::push_public_key))
        .nest_service("/static", ServeDir::new("public"))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: Config, backend: Backend) -> Result<()> {
    let addr = config.server.addr.clone();
    let delivery: Arc<dyn PushDelivery> = Arc::new(HttpPush::new(&config.push)?);
    let state = AppState::new(config, backend, delivery);
    let app = router(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
