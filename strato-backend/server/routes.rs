use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use hyper::StatusCode;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::auth::handlers;

use super::AppState;
use super::ws::shell_ws;

pub fn build_router(state: AppState) -> Router {
    let session_routes = Router::new()
        .route("/shell", get(shell_ws))
        .route("/logout", post(handlers::logout))
        .route("/auth/status", get(handlers::auth_status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::require_session,
        ));

    Router::new()
        .route(
            "/health",
            get(|| async { Json(json!({ "status": "ok" })) }),
        )
        .route("/login", post(handlers::login))
        .route("/signup", post(handlers::signup))
        .route(
            "/signup/check-username/{username}",
            get(handlers::signup_check_username),
        )
        .route("/auth/mqtt-check", post(handlers::mqtt_check))
        .route("/auth/key-check", post(handlers::key_check))
        .route("/auth/key-status", get(handlers::key_status))
        .merge(session_routes)
        .fallback(not_found)
        .with_state(state)
        .layer(CorsLayer::permissive())
}

async fn not_found(req: axum::extract::Request) -> impl IntoResponse {
    tracing::warn!("unhandled path: {}", req.uri());
    (StatusCode::NOT_FOUND, "Not Found")
}
