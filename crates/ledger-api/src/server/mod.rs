use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use contracts::{
    ApiError, CheckoutRequest, CheckoutResponse, DecorationUpdateRequest,
    DecorationUpdateResponse, EnvReport, ErrorCode, LeaderboardResponse, WebhookAck,
};
use ledger_core::{LedgerError, SIGNATURE_HEADER};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::{LeaderboardService, NotificationOutcome, ServiceError};

include!("error.rs");
include!("state.rs");
include!("routes/webhook.rs");
include!("routes/checkout.rs");
include!("routes/leaderboard.rs");
include!("routes/decoration.rs");
include!("routes/env.rs");
include!("util.rs");

pub async fn serve(addr: SocketAddr, service: Arc<LeaderboardService>) -> Result<(), ServerError> {
    let app = router(service);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "leaderboard server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn router(service: Arc<LeaderboardService>) -> Router {
    let state = AppState::new(service);
    Router::new()
        .route("/api/v1/webhook", post(receive_webhook))
        .route("/api/v1/checkout", post(create_checkout))
        .route("/api/v1/leaderboard", get(get_leaderboard))
        .route("/api/v1/entries/decoration", post(update_decoration))
        .route("/api/v1/env-check", get(env_check))
        // Paths the existing browser client and payment dashboard already call.
        .route("/api/stripe-webhook", post(receive_webhook))
        .route("/api/create-checkout", post(create_checkout))
        .route("/api/leaderboard", get(get_leaderboard))
        .route("/api/update-logo", post(update_decoration))
        .route("/api/env-check", get(env_check))
        .layer(middleware::from_fn(cors_middleware))
        .with_state(state)
}

async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
