use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, patch, post};
use axum::Router;
use serde::Deserialize;

use shared::{ApiResponse, OrderStatus, ServiceError};

use crate::models::Order;
use crate::service::{OrderOrchestrator, PlaceOrder};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<OrderOrchestrator>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:order_id", get(get_order).delete(cancel_order))
        .route("/orders/:order_id/status", patch(update_order_status))
        .route("/orders/user/:user_id", get(orders_by_user))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<PlaceOrder>,
) -> Result<(StatusCode, Json<ApiResponse<Order>>), ServiceError> {
    let order = state.orchestrator.place_order(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success_with_message(
            "Order created successfully",
            order,
        )),
    ))
}

async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state.orchestrator.get_order(order_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

async fn list_orders(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Order>>>, ServiceError> {
    let orders = state.orchestrator.all_orders().await?;
    Ok(Json(ApiResponse::success(orders)))
}

async fn orders_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<Order>>>, ServiceError> {
    let orders = state.orchestrator.orders_by_user(user_id).await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    status: OrderStatus,
}

async fn update_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state
        .orchestrator
        .update_order_status(order_id, query.status)
        .await?;
    Ok(Json(ApiResponse::success_with_message(
        "Order status updated successfully",
        order,
    )))
}

async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state.orchestrator.cancel_order(order_id).await?;
    Ok(Json(ApiResponse::success_with_message(
        "Order cancelled successfully",
        order,
    )))
}

async fn health_check() -> &'static str {
    "OK"
}
