//! HTTP handlers for purchase endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use shared::Purchase;

use crate::error::AppResult;
use crate::services::{
    CreatePurchaseInput, CreateReturnInput, DeletePurchaseInput, UpdatePurchaseInput,
};
use crate::AppState;

/// List live purchases
pub async fn list_purchases(State(state): State<AppState>) -> AppResult<Json<Vec<Purchase>>> {
    let purchases = state.purchase_service().list_purchases().await?;
    Ok(Json(purchases))
}

/// Get a purchase with its items
pub async fn get_purchase(
    State(state): State<AppState>,
    Path(purchase_id): Path<Uuid>,
) -> AppResult<Json<Purchase>> {
    let purchase = state.purchase_service().get_purchase(purchase_id).await?;
    Ok(Json(purchase))
}

/// Create a purchase
pub async fn create_purchase(
    State(state): State<AppState>,
    Json(input): Json<CreatePurchaseInput>,
) -> AppResult<(StatusCode, Json<Purchase>)> {
    let purchase = state.purchase_service().create_purchase(input).await?;
    Ok((StatusCode::CREATED, Json(purchase)))
}

/// Replace a purchase's header, items and status
pub async fn update_purchase(
    State(state): State<AppState>,
    Path(purchase_id): Path<Uuid>,
    Json(input): Json<UpdatePurchaseInput>,
) -> AppResult<Json<Purchase>> {
    let purchase = state
        .purchase_service()
        .update_purchase(purchase_id, input)
        .await?;
    Ok(Json(purchase))
}

/// Delete a purchase
pub async fn delete_purchase(
    State(state): State<AppState>,
    Path(purchase_id): Path<Uuid>,
    Query(input): Query<DeletePurchaseInput>,
) -> AppResult<StatusCode> {
    state
        .purchase_service()
        .delete_purchase(purchase_id, input)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Record a return against a purchase
pub async fn create_return(
    State(state): State<AppState>,
    Path(purchase_id): Path<Uuid>,
    Json(input): Json<CreateReturnInput>,
) -> AppResult<(StatusCode, Json<Purchase>)> {
    let record = state
        .purchase_service()
        .create_return(purchase_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}
