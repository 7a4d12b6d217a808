//! Router assembly and middleware.

use crate::error::ApiError;
use crate::handlers;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use unempower::config::ApiConfig;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

async fn request_id(mut req: Request, next: Next) -> Response {
    let name = HeaderName::from_static(REQUEST_ID_HEADER);
    let id = req
        .headers()
        .get(&name)
        .cloned()
        .or_else(|| HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()).ok());
    if let Some(id) = &id {
        req.headers_mut().insert(name.clone(), id.clone());
    }
    let mut resp = next.run(req).await;
    if let Some(id) = id {
        resp.headers_mut().insert(name, id);
    }
    resp
}

async fn require_admin(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(token) = &state.admin_token {
        let presented = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(token.as_ref()) {
            return Err(ApiError::Unauthorized("admin token required".into()));
        }
    }
    Ok(next.run(req).await)
}

fn cors(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o.trim()).ok())
        .collect();
    if parsed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}

pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let audit = Router::new()
        .route("/fairness", get(handlers::fairness_audit))
        .route("/offer/history", get(handlers::offer_history))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/offer", post(handlers::offer))
        .route("/ai/offer", post(handlers::offer))
        .route("/ai/debug/eip712-hash", get(handlers::debug_eip712_hash))
        .route("/stats/worker", get(handlers::worker_stats))
        .route("/forecast/worker", get(handlers::worker_forecast))
        .route("/fraud/worker", get(handlers::worker_fraud))
        .route("/workproof/integrity", get(handlers::workproof_integrity))
        .route("/alerts/worker", get(handlers::worker_alerts))
        .route("/events/latest", get(handlers::latest_events))
        .nest("/audit", audit)
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(cors(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id))
        .with_state(state)
}
