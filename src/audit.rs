//! Append-only trail of state-changing critical actions.
//!
//! `record` runs on the caller's connection so it joins the enclosing
//! transaction: if the audit write fails, the payment confirmation or draw it
//! belongs to fails with it. Operators rely on these rows for dispute
//! resolution, so they are never written best-effort.
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteConnection, SqlitePool};

use crate::error::AppError;

pub const PAYMENT_CONFIRMED: &str = "payment_confirmed";
pub const PAYMENT_REJECTED: &str = "payment_rejected";
pub const DRAW_PERFORMED: &str = "draw_performed";
pub const DRAW_FAILED: &str = "draw_failed";

#[derive(Debug, sqlx::FromRow, serde::Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub action: String,
    pub entity: String,
    pub entity_id: String,
    pub actor_id: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

pub async fn record(
    conn: &mut SqliteConnection,
    action: &str,
    entity: &str,
    entity_id: &str,
    actor_id: &str,
    details: serde_json::Value,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO audit_log (action, entity, entity_id, actor_id, details, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(action)
    .bind(entity)
    .bind(entity_id)
    .bind(actor_id)
    .bind(details.to_string())
    .bind(Utc::now())
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn entries_for(
    pool: &SqlitePool,
    entity: &str,
    entity_id: &str,
) -> Result<Vec<AuditEntry>, AppError> {
    let entries = sqlx::query_as(
        "SELECT id, action, entity, entity_id, actor_id, details, created_at
         FROM audit_log
         WHERE entity = ? AND entity_id = ?
         ORDER BY id",
    )
    .bind(entity)
    .bind(entity_id)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}
