use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use tracing::warn;

use super::views::{render_event_page, render_index_page, render_not_found};
use super::AppState;
use crate::models::EventId;
use crate::store::StoreError;
use crate::sync::load_snapshot;

pub(crate) async fn index_handler(State(state): State<AppState>) -> Html<String> {
    Html(render_index_page(&state.config.push.app_name))
}

pub(crate) async fn event_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Html<String>) {
    match load_snapshot(state.store.as_ref(), &EventId(id.clone())).await {
        Ok(snapshot) => (StatusCode::OK, Html(render_event_page(&snapshot))),
        Err(StoreError::NotFound) => (StatusCode::NOT_FOUND, Html(render_not_found(&id))),
        Err(e) => {
            warn!("Failed to load event {}: {}", id, e);
            (StatusCode::BAD_GATEWAY, Html(render_not_found(&id)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Config, StoreConfig};
    use crate::push::{PushDelivery, PushError, PushPayload, PushSubscription};
    use crate::store::connect;
    use crate::store::memory::tests::sample_event;
    use crate::web::router;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct NoPush;

    #[async_trait]
    impl PushDelivery for NoPush {
        async fn deliver(&self, _: &PushSubscription, _: &PushPayload) -> Result<(), PushError> {
            Ok(())
        }
    }

    async fn get(app: &axum::Router, uri: &str) -> (StatusCode, String) {
        let resp = app
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_event_page_and_missing_event() {
        let backend = connect(&StoreConfig::default()).unwrap();
        backend.store.create_event(&sample_event()).await.unwrap();
        let app = router(AppState::new(Config::default(), backend, Arc::new(NoPush)));

        let (status, html) = get(&app, "/events/evt-1").await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("Team sync"));

        let (status, html) = get(&app, "/events/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(html.contains("Event not found"));

        let (status, html) = get(&app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("ScheduleTime"));
    }
}
