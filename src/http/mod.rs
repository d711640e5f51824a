use std::collections::HashMap;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::aggregator::PageView;
use crate::app::AppContext;
use crate::state::NotificationList;
use crate::transport::TransportStatus;

const DEFAULT_NOTIFICATION_LIMIT: usize = 50;

pub fn create_router(ctx: AppContext) -> Router {
    let api = Router::new()
        .route("/windows", get(get_windows))
        .route("/notifications", get(get_notifications))
        .route("/notifications/read-all", post(mark_all_read))
        .route("/notifications/:id/read", post(mark_read))
        .route("/transport", get(get_transport));

    Router::new()
        .route("/healthz", get(get_healthz))
        .route("/metrics", get(get_metrics))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn get_healthz(State(ctx): State<AppContext>) -> StatusCode {
    if ctx.state.is_ready(ctx.max_staleness()).await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn get_metrics(State(ctx): State<AppContext>) -> Response {
    match ctx.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = ?err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn get_windows(State(ctx): State<AppContext>) -> Json<PageView> {
    Json(ctx.state.get_view().await)
}

async fn get_notifications(
    State(ctx): State<AppContext>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<NotificationList> {
    let limit: usize = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_NOTIFICATION_LIMIT);
    Json(ctx.state.list_notifications(limit).await)
}

async fn mark_read(State(ctx): State<AppContext>, Path(id): Path<i64>) -> StatusCode {
    if ctx.state.mark_notification_read(id).await {
        StatusCode::NO_CONTENT
    } else {
        debug!(id, "mark-read for unknown notification");
        StatusCode::NOT_FOUND
    }
}

async fn mark_all_read(State(ctx): State<AppContext>) -> StatusCode {
    ctx.state.mark_all_notifications_read().await;
    StatusCode::NO_CONTENT
}

async fn get_transport(State(ctx): State<AppContext>) -> Json<TransportStatus> {
    Json(ctx.state.get_transport().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use chrono::Utc;
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::metrics::AppMetrics;
    use crate::notifications::{NotificationRecord, Severity};
    use crate::state::SharedState;

    fn context() -> AppContext {
        AppContext::new(
            AppConfig::default(),
            AppMetrics::new().expect("metrics"),
            SharedState::default(),
        )
    }

    async fn call(ctx: &AppContext, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = create_router(ctx.clone())
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn healthz_reflects_snapshot_freshness() {
        let ctx = context();
        let (status, _) = call(&ctx, "GET", "/healthz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        ctx.state.update_view(PageView::default(), Utc::now()).await;
        let (status, _) = call(&ctx, "GET", "/healthz").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn notifications_can_be_listed_and_marked_read() {
        let ctx = context();
        let record = NotificationRecord::new(Severity::Warning, "High CPU", "CPU 90% > 85%", Some(90.0), Utc::now());
        let id = record.id;
        ctx.state.push_notifications(vec![record]).await;

        let (status, body) = call(&ctx, "GET", "/api/v1/notifications?limit=10").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["unread"], 1);
        assert_eq!(body["notifications"][0]["type"], "warning");

        let (status, _) = call(&ctx, "POST", &format!("/api/v1/notifications/{id}/read")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&ctx, "POST", "/api/v1/notifications/1/read").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(ctx.state.unread_count().await, 0);

        ctx.state
            .push_notifications(vec![NotificationRecord::new(Severity::Info, "x", "", None, Utc::now())])
            .await;
        let (status, _) = call(&ctx, "POST", "/api/v1/notifications/read-all").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(ctx.state.unread_count().await, 0);
    }

    #[tokio::test]
    async fn transport_and_windows_are_served() {
        let ctx = context();
        let (status, body) = call(&ctx, "GET", "/api/v1/transport").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["push"], "disconnected");
        assert_eq!(body["exhausted"], false);

        let (status, body) = call(&ctx, "GET", "/api/v1/windows").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["metrics"].as_object().expect("metrics").is_empty());
    }

    #[tokio::test]
    async fn metrics_endpoint_exposes_registry() {
        let ctx = context();
        ctx.metrics.inc_poll_failure();
        let response = create_router(ctx)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let text = String::from_utf8(bytes.to_vec()).expect("utf8");
        assert!(text.contains("ecotrack_poll_failures_total 1"));
    }
}
