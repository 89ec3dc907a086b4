//! HTTP handlers for inventory endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use shared::{ProductVariant, StockAudit, StockMovement};

use crate::error::AppResult;
use crate::services::{AdjustStockInput, CreateVariantInput};
use crate::AppState;

#[derive(Serialize)]
pub struct StockLevel {
    pub product_variant_id: Uuid,
    pub on_hand_quantity: i32,
}

/// List product variants with their cached stock
pub async fn list_variants(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<ProductVariant>>> {
    let variants = state.stock_ledger().list_variants().await?;
    Ok(Json(variants))
}

/// Register a product variant
pub async fn create_variant(
    State(state): State<AppState>,
    Json(input): Json<CreateVariantInput>,
) -> AppResult<(StatusCode, Json<ProductVariant>)> {
    let variant = state.stock_ledger().create_variant(input).await?;
    Ok((StatusCode::CREATED, Json(variant)))
}

/// Get current stock for a variant
pub async fn get_variant_stock(
    State(state): State<AppState>,
    Path(variant_id): Path<Uuid>,
) -> AppResult<Json<StockLevel>> {
    let on_hand_quantity = state.stock_ledger().current_stock(variant_id).await?;
    Ok(Json(StockLevel {
        product_variant_id: variant_id,
        on_hand_quantity,
    }))
}

/// Get ledger movements for a variant
pub async fn get_variant_movements(
    State(state): State<AppState>,
    Path(variant_id): Path<Uuid>,
) -> AppResult<Json<Vec<StockMovement>>> {
    let movements = state
        .stock_ledger()
        .movements_for_variant(variant_id)
        .await?;
    Ok(Json(movements))
}

/// Record a manual stock adjustment
pub async fn adjust_stock(
    State(state): State<AppState>,
    Json(input): Json<AdjustStockInput>,
) -> AppResult<(StatusCode, Json<StockMovement>)> {
    let movement = state.stock_ledger().adjust_stock(input).await?;
    Ok((StatusCode::CREATED, Json(movement)))
}

/// Compare every variant's counter against its ledger
pub async fn audit_all(State(state): State<AppState>) -> AppResult<Json<Vec<StockAudit>>> {
    let audits = state.stock_ledger().audit_all().await?;
    Ok(Json(audits))
}

pub async fn audit_variant(
    State(state): State<AppState>,
    Path(variant_id): Path<Uuid>,
) -> AppResult<Json<StockAudit>> {
    let audit = state.stock_ledger().audit_variant(variant_id).await?;
    Ok(Json(audit))
}
