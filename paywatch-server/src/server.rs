//! Axum server setup and router configuration.

use crate::shutdown::shutdown_signal;
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use kanau::processor::Processor;
use paywatch_core::entities::payment::{CountUnresolvedPayments, PaymentId, PingDatabase};
use paywatch_core::entities::{NewPayment, PaymentStore, StoreError};
use paywatch_core::processors::Dispatch;
use paywatch_sdk::objects::{CreatePaymentRequest, CreatePaymentResponse, PaymentStatusResponse};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use url::Url;

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoints
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        // Payment endpoints
        .route("/payments", post(create_payment))
        .route("/payments/{payment_id}", get(payment_status))
        // Add state to all routes
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Simple health check - returns OK if the server is running.
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Ready check response.
#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    database: &'static str,
    stream: &'static str,
    unresolved: Option<u64>,
    in_flight: usize,
}

/// Ready check - verifies the database answers.
async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    let database_ok = state.db.process(PingDatabase).await.is_ok();
    let unresolved = if database_ok {
        state.db.process(CountUnresolvedPayments).await.ok()
    } else {
        None
    };

    let response = ReadyResponse {
        status: if database_ok { "ready" } else { "not_ready" },
        database: if database_ok { "connected" } else { "disconnected" },
        stream: if state.stream_enabled { "enabled" } else { "disabled" },
        unresolved,
        in_flight: state.dispatcher.in_flight().len(),
    };
    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

/// Errors returned by the payment routes.
#[derive(Debug)]
enum PaymentApiError {
    Store(StoreError),
    InvalidPostbackUrl(String),
    NotFound,
}

impl From<StoreError> for PaymentApiError {
    fn from(e: StoreError) -> Self {
        PaymentApiError::Store(e)
    }
}

impl IntoResponse for PaymentApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            PaymentApiError::Store(StoreError::Database(e)) => {
                tracing::error!(error = %e, "Payment API database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
            PaymentApiError::Store(e @ (StoreError::InvalidAddress(_) | StoreError::InvalidAmount(_))) => {
                (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response()
            }
            PaymentApiError::Store(e @ StoreError::DuplicateAddress(_)) => {
                (StatusCode::CONFLICT, e.to_string()).into_response()
            }
            PaymentApiError::InvalidPostbackUrl(url) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("invalid postback URL: {url}"),
            )
                .into_response(),
            PaymentApiError::NotFound => {
                (StatusCode::NOT_FOUND, "payment not found").into_response()
            }
        }
    }
}

fn validate_postback_url(url: Option<String>) -> Result<Option<String>, PaymentApiError> {
    let Some(raw) = url else {
        return Ok(None);
    };
    match Url::parse(&raw) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(Some(parsed.into())),
        _ => Err(PaymentApiError::InvalidPostbackUrl(raw)),
    }
}

/// `POST /payments` - start watching a deposit address for a payment.
///
/// The new payment is handed to the workers right away; the scheduler
/// picks it up on its next cycle if that fails.
async fn create_payment(
    State(state): State<AppState>,
    Json(body): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, PaymentApiError> {
    let new_payment = NewPayment {
        amount: body.amount,
        address: body.address.to_ascii_lowercase(),
        postback_url: validate_postback_url(body.postback_url)?,
        data: body.data,
    };
    let payment = state.store.create(new_payment).await?;
    tracing::info!(
        payment_id = %payment.id,
        address = %payment.address,
        amount = %payment.amount,
        "Payment created"
    );

    if state.dispatcher.dispatch(payment.id) == Dispatch::QueueClosed {
        tracing::warn!(payment_id = %payment.id, "Work queue closed, payment left to the scheduler");
    }

    Ok((
        StatusCode::CREATED,
        Json(CreatePaymentResponse::from(&payment)),
    ))
}

/// `GET /payments/{payment_id}` - current state of a payment.
async fn payment_status(
    State(state): State<AppState>,
    Path(payment_id): Path<PaymentId>,
) -> Result<Json<PaymentStatusResponse>, PaymentApiError> {
    let payment = state
        .store
        .get(payment_id)
        .await?
        .ok_or(PaymentApiError::NotFound)?;
    Ok(Json(PaymentStatusResponse::from(&payment)))
}

/// Run the server with graceful shutdown support.
pub async fn run_server(router: Router, addr: SocketAddr) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}
