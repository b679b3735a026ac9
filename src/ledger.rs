//! # Purchase ledger
//!
//! Owns the payment lifecycle (PENDING -> CONFIRMED/REJECTED) and the
//! participant directory. Purchases are created atomically with their
//! tickets and are never destroyed by business logic; rejection and expiry
//! only flip state and hand the tickets back to the pool.
//!
//! Confirmation and rejection are idempotent commands keyed by the purchase
//! id: each claims the row with a conditional update on `payment_state`, so
//! a double click or a racing sweeper resolves to exactly one winner and one
//! `AlreadyProcessed` loser.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteConnection, Sqlite, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    audit,
    catalog::Raffle,
    database,
    error::AppError,
    external::ReceiptStorage,
    inventory,
};

pub const EXPIRED_REASON: &str = "expired";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Pending,
    Confirmed,
    Rejected,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantInfo {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub id_document: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Participant {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub id_document: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Purchase {
    pub id: Uuid,
    pub raffle_id: Uuid,
    pub participant_id: Uuid,
    pub ticket_count: i64,
    pub unit_price_cents: i64,
    pub total_cents: i64,
    pub payment_method_id: Uuid,
    pub payment_state: PaymentState,
    pub reference: String,
    pub receipt_url: Option<String>,
    pub rejection_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Phone is the dedup key: the first record for a phone wins, and later
/// purchases reuse it. A supplied id-document or email is only added when
/// the stored one is missing, never silently overwritten.
pub async fn find_or_create_participant(
    conn: &mut SqliteConnection,
    info: &ParticipantInfo,
) -> Result<Participant, AppError> {
    if info.name.trim().is_empty() {
        return Err(AppError::Validation(
            "Participant name must not be empty".into(),
        ));
    }
    if info.phone.trim().is_empty() {
        return Err(AppError::Validation(
            "Participant phone must not be empty".into(),
        ));
    }

    let phone = info.phone.trim();

    let existing: Option<Participant> = sqlx::query_as(
        "SELECT id, name, phone, id_document, email, created_at
         FROM participants WHERE phone = ?",
    )
    .bind(phone)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(participant) = existing {
        let fill_document = participant.id_document.is_none() && info.id_document.is_some();
        let fill_email = participant.email.is_none() && info.email.is_some();

        if fill_document || fill_email {
            sqlx::query(
                "UPDATE participants
                 SET id_document = COALESCE(id_document, ?),
                     email = COALESCE(email, ?)
                 WHERE id = ?",
            )
            .bind(&info.id_document)
            .bind(&info.email)
            .bind(participant.id)
            .execute(&mut *conn)
            .await?;
        }

        return Ok(Participant {
            id_document: participant.id_document.or_else(|| info.id_document.clone()),
            email: participant.email.or_else(|| info.email.clone()),
            ..participant
        });
    }

    let participant = Participant {
        id: Uuid::new_v4(),
        name: info.name.trim().to_string(),
        phone: phone.to_string(),
        id_document: info.id_document.clone(),
        email: info.email.clone(),
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO participants (id, name, phone, id_document, email, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(participant.id)
    .bind(&participant.name)
    .bind(&participant.phone)
    .bind(&participant.id_document)
    .bind(&participant.email)
    .bind(participant.created_at)
    .execute(conn)
    .await?;

    Ok(participant)
}

/// Creates the PENDING purchase record inside the reservation transaction,
/// snapshotting the unit price so later catalog edits cannot change what the
/// buyer owes.
pub async fn create_purchase(
    conn: &mut SqliteConnection,
    raffle: &Raffle,
    participant_id: Uuid,
    ticket_count: i64,
    payment_method_id: Uuid,
    reference: Option<&str>,
    receipt_url: Option<&str>,
    expires_at: DateTime<Utc>,
) -> Result<Purchase, AppError> {
    let now = Utc::now();
    let purchase = Purchase {
        id: Uuid::new_v4(),
        raffle_id: raffle.id,
        participant_id,
        ticket_count,
        unit_price_cents: raffle.price_cents,
        total_cents: raffle.price_cents * ticket_count,
        payment_method_id,
        payment_state: PaymentState::Pending,
        reference: reference
            .map(str::to_string)
            .unwrap_or_else(generate_reference),
        receipt_url: receipt_url.map(str::to_string),
        rejection_reason: None,
        expires_at,
        created_at: now,
    };

    sqlx::query(
        "INSERT INTO purchases
         (id, raffle_id, participant_id, ticket_count, unit_price_cents, total_cents,
          payment_method_id, payment_state, reference, receipt_url, rejection_reason,
          expires_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)",
    )
    .bind(purchase.id)
    .bind(purchase.raffle_id)
    .bind(purchase.participant_id)
    .bind(purchase.ticket_count)
    .bind(purchase.unit_price_cents)
    .bind(purchase.total_cents)
    .bind(purchase.payment_method_id)
    .bind(purchase.payment_state)
    .bind(&purchase.reference)
    .bind(&purchase.receipt_url)
    .bind(purchase.expires_at)
    .bind(purchase.created_at)
    .execute(conn)
    .await?;

    Ok(purchase)
}

fn generate_reference() -> String {
    let raw = Uuid::new_v4().simple().to_string();

    format!("RF-{}", raw[..8].to_uppercase())
}

pub async fn get_purchase<'e, E>(executor: E, purchase_id: Uuid) -> Result<Purchase, AppError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(
        "SELECT id, raffle_id, participant_id, ticket_count, unit_price_cents, total_cents,
                payment_method_id, payment_state, reference, receipt_url, rejection_reason,
                expires_at, created_at
         FROM purchases WHERE id = ?",
    )
    .bind(purchase_id)
    .fetch_optional(executor)
    .await?
    .ok_or(AppError::NotFound("purchase"))
}

pub async fn get_participant<'e, E>(
    executor: E,
    participant_id: Uuid,
) -> Result<Participant, AppError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(
        "SELECT id, name, phone, id_document, email, created_at
         FROM participants WHERE id = ?",
    )
    .bind(participant_id)
    .fetch_optional(executor)
    .await?
    .ok_or(AppError::NotFound("participant"))
}

/// Buyer reports the transfer: validates the receipt URL with the upload
/// collaborator, stores it, and moves the purchase's tickets RESERVED ->
/// PENDING_PAYMENT. Only PENDING purchases accept a receipt.
pub async fn submit_receipt(
    pool: &SqlitePool,
    receipts: &dyn ReceiptStorage,
    purchase_id: Uuid,
    url: &str,
    reference: Option<&str>,
) -> Result<Purchase, AppError> {
    if !receipts.resolve(url) {
        return Err(AppError::Validation(
            "Receipt URL does not resolve to an uploaded file".into(),
        ));
    }

    let mut tx = database::begin_write(pool).await?;

    let purchase = get_purchase(&mut *tx, purchase_id).await?;
    if purchase.payment_state != PaymentState::Pending {
        return Err(AppError::AlreadyProcessed);
    }

    sqlx::query(
        "UPDATE purchases SET receipt_url = ?, reference = COALESCE(?, reference)
         WHERE id = ? AND payment_state = ?",
    )
    .bind(url)
    .bind(reference)
    .bind(purchase_id)
    .bind(PaymentState::Pending)
    .execute(&mut *tx)
    .await?;

    let flipped = inventory::mark_pending_payment(&mut tx, purchase_id).await?;
    if flipped != 0 && flipped != purchase.ticket_count as u64 {
        return Err(AppError::State(
            "Purchase tickets were not in a reserved state".into(),
        ));
    }

    tx.commit().await?;

    get_purchase(pool, purchase_id).await
}

/// Admin approval. Claims the purchase with a conditional update, flips all
/// of its tickets to PAID (counted), and writes the audit entry — one
/// transaction, so a failed audit write rolls the confirmation back.
pub async fn confirm_payment(
    pool: &SqlitePool,
    purchase_id: Uuid,
    admin_id: &str,
) -> Result<Purchase, AppError> {
    let mut tx = database::begin_write(pool).await?;

    let purchase = get_purchase(&mut *tx, purchase_id).await?;

    let claimed = sqlx::query(
        "UPDATE purchases SET payment_state = ? WHERE id = ? AND payment_state = ?",
    )
    .bind(PaymentState::Confirmed)
    .bind(purchase_id)
    .bind(PaymentState::Pending)
    .execute(&mut *tx)
    .await?;

    if claimed.rows_affected() != 1 {
        return Err(AppError::AlreadyProcessed);
    }

    inventory::mark_paid(&mut tx, purchase_id, purchase.ticket_count).await?;

    audit::record(
        &mut tx,
        audit::PAYMENT_CONFIRMED,
        "purchase",
        &purchase_id.to_string(),
        admin_id,
        serde_json::json!({
            "raffle_id": purchase.raffle_id,
            "participant_id": purchase.participant_id,
            "ticket_count": purchase.ticket_count,
            "total_cents": purchase.total_cents,
            "reference": purchase.reference,
        }),
    )
    .await?;

    tx.commit().await?;

    info!("Confirmed payment for purchase {purchase_id}");

    get_purchase(pool, purchase_id).await
}

/// Admin rejection (or an explicit buyer abandon): releases the tickets back
/// to AVAILABLE and records the reason.
pub async fn reject_payment(
    pool: &SqlitePool,
    purchase_id: Uuid,
    admin_id: &str,
    reason: &str,
) -> Result<Purchase, AppError> {
    // Surfaces NotFound before AlreadyProcessed for unknown ids.
    get_purchase(pool, purchase_id).await?;

    match try_reject(pool, purchase_id, admin_id, reason).await? {
        Some(purchase) => Ok(purchase),
        None => Err(AppError::AlreadyProcessed),
    }
}

/// Claims and rejects a PENDING purchase; `None` means another actor got
/// there first. Shared by the admin path and the expiry sweeper.
async fn try_reject(
    pool: &SqlitePool,
    purchase_id: Uuid,
    actor_id: &str,
    reason: &str,
) -> Result<Option<Purchase>, AppError> {
    let mut tx = database::begin_write(pool).await?;

    let claimed = sqlx::query(
        "UPDATE purchases SET payment_state = ?, rejection_reason = ?
         WHERE id = ? AND payment_state = ?",
    )
    .bind(PaymentState::Rejected)
    .bind(reason)
    .bind(purchase_id)
    .bind(PaymentState::Pending)
    .execute(&mut *tx)
    .await?;

    if claimed.rows_affected() != 1 {
        return Ok(None);
    }

    let released = inventory::release(&mut tx, purchase_id).await?;

    audit::record(
        &mut tx,
        audit::PAYMENT_REJECTED,
        "purchase",
        &purchase_id.to_string(),
        actor_id,
        serde_json::json!({
            "reason": reason,
            "tickets_released": released,
        }),
    )
    .await?;

    tx.commit().await?;

    Ok(Some(get_purchase(pool, purchase_id).await?))
}

/// Rejects every PENDING purchase whose window has lapsed, releasing its
/// tickets. Each purchase is claimed individually with the same conditional
/// update as a manual rejection, so concurrent sweeps (or a racing admin
/// confirmation) resolve cleanly: CONFIRMED purchases are never touched.
pub async fn sweep_expired(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64, AppError> {
    let expired: Vec<Uuid> = sqlx::query_scalar(
        "SELECT id FROM purchases WHERE payment_state = ? AND expires_at < ?",
    )
    .bind(PaymentState::Pending)
    .bind(now)
    .fetch_all(pool)
    .await?;

    let mut swept = 0;

    for purchase_id in expired {
        match try_reject(pool, purchase_id, "system", EXPIRED_REASON).await {
            Ok(Some(_)) => swept += 1,
            Ok(None) => {}
            Err(e) => {
                warn!("Failed to expire purchase {purchase_id}: {e}");
            }
        }
    }

    Ok(swept)
}
