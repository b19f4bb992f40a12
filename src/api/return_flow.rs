//! Checkout and payment-return endpoints
//!
//! `GET /payments/{order_id}/checkout` sends the customer to the hosted
//! payment page; the return path receives them back from it.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{info, warn, Instrument};

use crate::config::{CHECKOUT_PATH, HEALTH_PATH};
use crate::domain::OrderState;
use crate::error::ReturnFlowError;
use crate::middleware::logging::{request_id_from_headers, request_logging_middleware, UuidRequestId};
use crate::request_span;
use crate::services::{CallbackDisposition, RequestContext, ReturnFlowService};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReturnFlowService>,
    /// Absolute return URL handed to the gateway.
    pub return_base: String,
    /// Flips to `true` on shutdown; in-flight polls stop early.
    pub shutdown: watch::Receiver<bool>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmationResponse {
    pub order_id: String,
    pub status: OrderState,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub fn router(state: AppState, return_path: &str) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
        .layer(axum::middleware::from_fn(request_logging_middleware))
        .layer(PropagateRequestIdLayer::x_request_id());

    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(CHECKOUT_PATH, get(checkout))
        .route(return_path, get(payment_return))
        .layer(middleware)
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

fn error_response(err: &ReturnFlowError, order_id: Option<String>) -> Response {
    let status_code =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorResponse {
        error: ErrorDetail {
            code: err.error_code(),
            message: err.user_message(),
            order_id,
            retry_after: if err.is_retryable() { Some(10) } else { None },
        },
    };
    (status_code, Json(body)).into_response()
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// GET /payments/{order_id}/checkout
async fn checkout(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let ctx = RequestContext::with_cancel(request_id_from_headers(&headers), state.shutdown.clone());
    let span = request_span!("payment_checkout", request_id = ctx.request_id, order_id = order_id);

    async {
        match state.service.checkout(&order_id, &state.return_base, &ctx).await {
            Ok(redirect) => {
                info!("Checkout redirect issued");
                found(&redirect.url)
            }
            Err(err) => {
                warn!(error = %err, "Checkout failed");
                error_response(&err, Some(order_id.clone()))
            }
        }
    }
    .instrument(span)
    .await
}

/// GET {return_path}
async fn payment_return(
    State(state): State<AppState>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Response {
    let ctx = RequestContext::with_cancel(request_id_from_headers(&headers), state.shutdown.clone());
    let span = request_span!("payment_callback", request_id = ctx.request_id);

    async {
        match state.service.handle_callback(&query, &ctx).await {
            Ok(CallbackDisposition::NotACallback) => StatusCode::NO_CONTENT.into_response(),
            Ok(CallbackDisposition::Processed(outcome)) => {
                info!(
                    order_id = %outcome.order_id,
                    state = %outcome.state,
                    applied = outcome.applied,
                    "Callback processed"
                );
                match outcome.redirect_url.as_deref() {
                    Some(url) => found(url),
                    None => Json(ConfirmationResponse {
                        order_id: outcome.order_id,
                        status: outcome.state,
                        message: outcome.message,
                    })
                    .into_response(),
                }
            }
            Err(err) => {
                warn!(error = %err, "Callback rejected");
                error_response(&err, None)
            }
        }
    }
    .instrument(span)
    .await
}
