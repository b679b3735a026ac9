//! Payment-method registry.
//!
//! Method configs are a tagged union with a fixed field set per kind, not a
//! free-form JSON blob: unknown kinds fail at the enum tag and unknown fields
//! fail inside the variant. The registry only answers whether a method
//! exists and is active; actual gateway integration is out of scope.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodDetails {
    BankTransfer(BankTransfer),
    MobilePayment(MobilePayment),
    Cash,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BankTransfer {
    pub bank: String,
    pub account_holder: String,
    pub account_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MobilePayment {
    pub provider: String,
    pub phone: String,
}

#[derive(Debug, sqlx::FromRow)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub display_name: String,
    pub details: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl PaymentMethod {
    pub fn details(&self) -> Result<PaymentMethodDetails, AppError> {
        serde_json::from_str(&self.details)
            .map_err(|e| AppError::Validation(format!("Corrupt payment method config: {e}")))
    }
}

pub async fn register(
    pool: &SqlitePool,
    display_name: &str,
    details: &PaymentMethodDetails,
) -> Result<PaymentMethod, AppError> {
    if display_name.trim().is_empty() {
        return Err(AppError::Validation(
            "Payment method name must not be empty".into(),
        ));
    }

    let id = Uuid::new_v4();
    let serialized = serde_json::to_string(details)
        .map_err(|e| AppError::Validation(format!("Unserializable payment method: {e}")))?;

    sqlx::query(
        "INSERT INTO payment_methods (id, display_name, details, active, created_at)
         VALUES (?, ?, ?, 1, ?)",
    )
    .bind(id)
    .bind(display_name)
    .bind(&serialized)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    get(pool, id).await
}

pub async fn set_active(pool: &SqlitePool, id: Uuid, active: bool) -> Result<(), AppError> {
    let result = sqlx::query("UPDATE payment_methods SET active = ? WHERE id = ?")
        .bind(active)
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("payment method"));
    }

    Ok(())
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<PaymentMethod, AppError> {
    sqlx::query_as(
        "SELECT id, display_name, details, active, created_at FROM payment_methods WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("payment method"))
}

/// Validation hook used by the reservation path.
pub async fn is_active(conn: &mut SqliteConnection, id: Uuid) -> Result<bool, AppError> {
    let active: Option<bool> =
        sqlx::query_scalar("SELECT active FROM payment_methods WHERE id = ?")
            .bind(id)
            .fetch_optional(conn)
            .await?;

    Ok(active.unwrap_or(false))
}
