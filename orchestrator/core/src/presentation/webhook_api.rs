// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::application::webhook::WebhookIngestor;
use axum::{
    body::to_bytes,
    extract::{Request, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{any, get},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Largest push payload accepted
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

pub const EVENT_HEADER: &str = "X-GitHub-Event";

pub fn app(ingestor: Arc<WebhookIngestor>) -> Router {
    Router::new()
        .route("/hook", any(receive_hook))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(ingestor)
}

async fn health() -> &'static str {
    "ok"
}

async fn receive_hook(State(ingestor): State<Arc<WebhookIngestor>>, request: Request) -> impl IntoResponse {
    if let Err(rejection) = ingestor.check_method(request.method()) {
        return reject(rejection);
    }

    let event_header = request
        .headers()
        .get(EVENT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let body = match to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            return reject(crate::domain::webhook::WebhookRejection::UnreadableBody(e.to_string()));
        }
    };

    match ingestor.admit(event_header.as_deref(), &body) {
        Ok(event) => {
            metrics::counter!("echo_webhook_requests_total", "outcome" => "accepted").increment(1);
            debug!(repository = %event.repository.full_name, "Webhook accepted");
            StatusCode::OK
        }
        Err(rejection) => reject(rejection),
    }
}

fn reject(rejection: crate::domain::webhook::WebhookRejection) -> StatusCode {
    metrics::counter!("echo_webhook_requests_total", "outcome" => rejection.reason()).increment(1);
    warn!(error = %rejection, status = rejection.status_code().as_u16(), "Webhook rejected");
    rejection.status_code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::webhook::{AllowedRefs, PushEvent};
    use axum::body::Body;
    use axum::http::Method;
    use std::collections::HashMap;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn router(capacity: usize) -> (Router, mpsc::Receiver<PushEvent>) {
        let refs = AllowedRefs::new(HashMap::from([("*".to_string(), vec!["refs/heads/main".to_string()])]));
        let (ingestor, rx) = WebhookIngestor::new(refs, capacity);
        (app(Arc::new(ingestor)), rx)
    }

    fn push(event: &str, git_ref: &str) -> axum::http::Request<Body> {
        let payload = serde_json::json!({
            "ref": git_ref,
            "repository": {"clone_url": "https://git.example/org/app.git", "full_name": "org/app"}
        });
        axum::http::Request::builder()
            .method(Method::POST)
            .uri("/hook")
            .header(EVENT_HEADER, event)
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_push_is_accepted_and_queued() {
        let (app, mut rx) = router(4);

        let response = app.oneshot(push("push", "refs/heads/main")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(rx.recv().await.unwrap().repository.full_name, "org/app");
    }

    #[tokio::test]
    async fn test_get_is_rejected() {
        let (app, _rx) = router(4);
        let request = axum::http::Request::builder().uri("/hook").body(Body::empty()).unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_rejection_statuses() {
        let (app, mut rx) = router(4);

        let response = app.clone().oneshot(push("push", "refs/heads/feature-x")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app.clone().oneshot(push("issues", "refs/heads/main")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let garbage = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/hook")
            .header(EVENT_HEADER, "push")
            .body(Body::from("not json"))
            .unwrap();
        let response = app.oneshot(garbage).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_returns_service_unavailable() {
        let (app, _rx) = router(1);

        let first = app.clone().oneshot(push("push", "refs/heads/main")).await.unwrap();
        let second = app.oneshot(push("push", "refs/heads/main")).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _rx) = router(1);
        let request = axum::http::Request::builder().uri("/health").body(Body::empty()).unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
