//! Common types used across the reconciliation engine

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Key identifying one mutation intent, so a retried request is applied once
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Wrap a caller-supplied token
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Key for an edit of `purchase_id` made against `revision`
    pub fn for_edit(purchase_id: Uuid, revision: i64) -> Self {
        Self(format!("purchase:{}:edit:{}", purchase_id, revision))
    }

    /// Key for deleting `purchase_id` at `revision`
    pub fn for_delete(purchase_id: Uuid, revision: i64) -> Self {
        Self(format!("purchase:{}:delete:{}", purchase_id, revision))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
