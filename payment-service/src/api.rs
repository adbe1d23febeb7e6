use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;

use shared::{ApiResponse, PaymentStatus, ServiceError};

use crate::models::Payment;
use crate::processor::{PaymentProcessor, PaymentRequest};

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<PaymentProcessor>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/payments", post(process_payment).get(list_payments))
        .route("/payments/:payment_id", get(payment_by_id))
        .route("/payments/:payment_id/refund", post(refund_payment))
        .route("/payments/order/:order_id", get(payment_by_order))
        .route("/payments/status/:status", get(payments_by_status))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

async fn process_payment(
    State(state): State<AppState>,
    Json(request): Json<PaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Payment>>), ServiceError> {
    let payment = state.processor.process_payment(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success_with_message("Payment processed", payment)),
    ))
}

async fn payment_by_id(
    State(state): State<AppState>,
    Path(payment_id): Path<i64>,
) -> Result<Json<ApiResponse<Payment>>, ServiceError> {
    let payment = state.processor.payment_by_id(payment_id).await?;
    Ok(Json(ApiResponse::success(payment)))
}

async fn payment_by_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> Result<Json<ApiResponse<Payment>>, ServiceError> {
    let payment = state.processor.payment_by_order(order_id).await?;
    Ok(Json(ApiResponse::success(payment)))
}

async fn list_payments(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Payment>>>, ServiceError> {
    let payments = state.processor.all_payments().await?;
    Ok(Json(ApiResponse::success(payments)))
}

async fn payments_by_status(
    State(state): State<AppState>,
    Path(status): Path<PaymentStatus>,
) -> Result<Json<ApiResponse<Vec<Payment>>>, ServiceError> {
    let payments = state.processor.payments_by_status(status).await?;
    Ok(Json(ApiResponse::success(payments)))
}

async fn refund_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<i64>,
) -> Result<Json<ApiResponse<Payment>>, ServiceError> {
    let payment = state.processor.refund_payment(payment_id).await?;
    Ok(Json(ApiResponse::success_with_message(
        "Payment refunded successfully",
        payment,
    )))
}

async fn health_check() -> &'static str {
    "OK"
}
