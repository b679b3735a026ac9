//! # Ticket inventory
//!
//! Canonical state of every numbered ticket in a raffle. This is the unit of
//! contention: many buyers race for the same finite pool, so the module
//! exposes only guarded state transitions, never raw field writes.
//!
//! ## State machine
//!
//! AVAILABLE -> RESERVED -> PENDING_PAYMENT -> PAID -> WINNER (terminal),
//! with RESERVED/PENDING_PAYMENT -> EXPIRED|REJECTED -> AVAILABLE as the
//! failure/retry path. Any other edge is a `State` error.
//!
//! ## Conditional updates
//!
//! Every mutation is `UPDATE ... SET state = X WHERE state = Y AND ...`
//! followed by a rows-affected check against the number of rows the caller
//! asked for. A short count means another transaction won part of the race;
//! the caller's transaction is then aborted, never partially applied. This
//! single pattern is what keeps reservation, random allocation, payment
//! confirmation and expiry sweeping safe under contention without long-held
//! locks.
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqliteConnection, QueryBuilder, Sqlite};
use uuid::Uuid;

use crate::{error::AppError, rng::DrawRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketState {
    Available,
    Reserved,
    PendingPayment,
    Paid,
    Rejected,
    Expired,
    Winner,
}

impl TicketState {
    /// The full legal edge set. Kept in one place so illegal transitions are
    /// a lookup, not scattered ad-hoc checks.
    pub fn can_transition(self, to: TicketState) -> bool {
        use TicketState::*;

        matches!(
            (self, to),
            (Available, Reserved)
                | (Reserved, PendingPayment)
                | (Reserved, Paid)
                | (PendingPayment, Paid)
                | (Paid, Winner)
                | (Reserved, Expired)
                | (Reserved, Rejected)
                | (PendingPayment, Expired)
                | (PendingPayment, Rejected)
                | (Expired, Available)
                | (Rejected, Available)
        )
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Ticket {
    pub raffle_id: Uuid,
    pub numero: i64,
    pub state: TicketState,
    pub purchase_id: Option<Uuid>,
    pub participant_id: Option<Uuid>,
    pub reservation_expires_at: Option<DateTime<Utc>>,
}

/// Atomically flips the listed tickets AVAILABLE -> RESERVED. All-or-nothing:
/// if any ticket is not currently AVAILABLE the whole set is rejected with
/// `Conflict` and the caller must roll back.
pub async fn reserve(
    conn: &mut SqliteConnection,
    raffle_id: Uuid,
    numbers: &[i64],
    expires_at: DateTime<Utc>,
) -> Result<(), AppError> {
    let flipped = flip_to_reserved(conn, raffle_id, numbers, expires_at).await?;

    if flipped != numbers.len() as u64 {
        return Err(AppError::Conflict(
            "One or more of those tickets were just taken".into(),
        ));
    }

    Ok(())
}

/// Quantity-based allocation: reads the currently-AVAILABLE numbers, shuffles
/// a request-scoped copy, takes `quantity`, then performs the same atomic
/// flip as `reserve`. The read and the flip are two deliberate steps; a short
/// flip count means a racing buyer won some of the same numbers, and the
/// whole operation is rejected.
pub async fn reserve_random(
    conn: &mut SqliteConnection,
    raffle_id: Uuid,
    quantity: usize,
    expires_at: DateTime<Utc>,
    rng: &mut DrawRng,
) -> Result<Vec<i64>, AppError> {
    let mut available = available_numbers(conn, raffle_id).await?;

    if available.len() < quantity {
        return Err(AppError::InsufficientInventory {
            requested: quantity,
            available: available.len(),
        });
    }

    rng.shuffle(&mut available);
    available.truncate(quantity);

    let flipped = flip_to_reserved(conn, raffle_id, &available, expires_at).await?;

    if flipped != quantity as u64 {
        return Err(AppError::Conflict(
            "Lost a race for randomly selected tickets".into(),
        ));
    }

    available.sort_unstable();

    Ok(available)
}

async fn flip_to_reserved(
    conn: &mut SqliteConnection,
    raffle_id: Uuid,
    numbers: &[i64],
    expires_at: DateTime<Utc>,
) -> Result<u64, AppError> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE tickets SET state = ");
    builder.push_bind(TicketState::Reserved);
    builder.push(", reservation_expires_at = ");
    builder.push_bind(expires_at);
    builder.push(" WHERE raffle_id = ");
    builder.push_bind(raffle_id);
    builder.push(" AND state = ");
    builder.push_bind(TicketState::Available);
    builder.push(" AND numero IN (");

    let mut separated = builder.separated(", ");
    for numero in numbers {
        separated.push_bind(*numero);
    }
    builder.push(")");

    let result = builder.build().execute(conn).await?;

    #[cfg(feature = "verbose")]
    tracing::info!(
        "Reserve flip touched {} of {} tickets in raffle {raffle_id}",
        result.rows_affected(),
        numbers.len()
    );

    Ok(result.rows_affected())
}

/// Stamps the owning purchase and participant on freshly reserved tickets.
/// Counted like every other flip: the tickets must still be RESERVED and
/// unowned.
pub async fn attach_purchase(
    conn: &mut SqliteConnection,
    raffle_id: Uuid,
    numbers: &[i64],
    purchase_id: Uuid,
    participant_id: Uuid,
) -> Result<(), AppError> {
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("UPDATE tickets SET purchase_id = ");
    builder.push_bind(purchase_id);
    builder.push(", participant_id = ");
    builder.push_bind(participant_id);
    builder.push(" WHERE raffle_id = ");
    builder.push_bind(raffle_id);
    builder.push(" AND state = ");
    builder.push_bind(TicketState::Reserved);
    builder.push(" AND purchase_id IS NULL AND numero IN (");

    let mut separated = builder.separated(", ");
    for numero in numbers {
        separated.push_bind(*numero);
    }
    builder.push(")");

    let result = builder.build().execute(conn).await?;

    if result.rows_affected() != numbers.len() as u64 {
        return Err(AppError::Conflict(
            "Reserved tickets changed before the purchase was attached".into(),
        ));
    }

    Ok(())
}

/// RESERVED -> PENDING_PAYMENT for every ticket of a purchase, once the buyer
/// has submitted a receipt. Returns the flip count; a purchase's tickets move
/// together, so the caller sees either all of them or zero (resubmission).
pub async fn mark_pending_payment(
    conn: &mut SqliteConnection,
    purchase_id: Uuid,
) -> Result<u64, AppError> {
    let result =
        sqlx::query("UPDATE tickets SET state = ? WHERE purchase_id = ? AND state = ?")
            .bind(TicketState::PendingPayment)
            .bind(purchase_id)
            .bind(TicketState::Reserved)
            .execute(conn)
            .await?;

    Ok(result.rows_affected())
}

/// RESERVED/PENDING_PAYMENT -> PAID. Restricted to the purchase ledger; a
/// short count means the tickets were not in the expected prior state.
pub async fn mark_paid(
    conn: &mut SqliteConnection,
    purchase_id: Uuid,
    expected: i64,
) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE tickets SET state = ?, reservation_expires_at = NULL
         WHERE purchase_id = ? AND state IN (?, ?)",
    )
    .bind(TicketState::Paid)
    .bind(purchase_id)
    .bind(TicketState::Reserved)
    .bind(TicketState::PendingPayment)
    .execute(conn)
    .await?;

    if result.rows_affected() != expected as u64 {
        return Err(AppError::State(format!(
            "Expected {expected} payable tickets, found {}",
            result.rows_affected()
        )));
    }

    Ok(())
}

/// Returns a purchase's tickets to the pool on expiry or rejection.
/// Idempotent: tickets that already went back (or were never held) are left
/// alone, and releasing twice is a no-op.
pub async fn release(conn: &mut SqliteConnection, purchase_id: Uuid) -> Result<u64, AppError> {
    let result = sqlx::query(
        "UPDATE tickets
         SET state = ?, purchase_id = NULL, participant_id = NULL,
             reservation_expires_at = NULL
         WHERE purchase_id = ? AND state IN (?, ?)",
    )
    .bind(TicketState::Available)
    .bind(purchase_id)
    .bind(TicketState::Reserved)
    .bind(TicketState::PendingPayment)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// PAID -> WINNER for a single ticket. Only the drawing engine calls this.
pub async fn mark_winner(
    conn: &mut SqliteConnection,
    raffle_id: Uuid,
    numero: i64,
) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE tickets SET state = ? WHERE raffle_id = ? AND numero = ? AND state = ?",
    )
    .bind(TicketState::Winner)
    .bind(raffle_id)
    .bind(numero)
    .bind(TicketState::Paid)
    .execute(conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(AppError::State(format!(
            "Ticket {numero} is not in PAID state"
        )));
    }

    Ok(())
}

pub async fn available_numbers(
    conn: &mut SqliteConnection,
    raffle_id: Uuid,
) -> Result<Vec<i64>, AppError> {
    let numbers = sqlx::query_scalar(
        "SELECT numero FROM tickets WHERE raffle_id = ? AND state = ? ORDER BY numero",
    )
    .bind(raffle_id)
    .bind(TicketState::Available)
    .fetch_all(conn)
    .await?;

    Ok(numbers)
}

pub async fn count_available<'e, E>(executor: E, raffle_id: Uuid) -> Result<i64, AppError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM tickets WHERE raffle_id = ? AND state = ?",
    )
    .bind(raffle_id)
    .bind(TicketState::Available)
    .fetch_one(executor)
    .await?;

    Ok(count)
}

/// Tickets a participant currently holds in any non-released state, used for
/// the per-person limit.
pub async fn count_held_by(
    conn: &mut SqliteConnection,
    raffle_id: Uuid,
    participant_id: Uuid,
) -> Result<i64, AppError> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM tickets
         WHERE raffle_id = ? AND participant_id = ? AND state IN (?, ?, ?, ?)",
    )
    .bind(raffle_id)
    .bind(participant_id)
    .bind(TicketState::Reserved)
    .bind(TicketState::PendingPayment)
    .bind(TicketState::Paid)
    .bind(TicketState::Winner)
    .fetch_one(conn)
    .await?;

    Ok(count)
}

pub async fn tickets_for_purchase<'e, E>(
    executor: E,
    purchase_id: Uuid,
) -> Result<Vec<Ticket>, AppError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let tickets = sqlx::query_as(
        "SELECT raffle_id, numero, state, purchase_id, participant_id, reservation_expires_at
         FROM tickets WHERE purchase_id = ? ORDER BY numero",
    )
    .bind(purchase_id)
    .fetch_all(executor)
    .await?;

    Ok(tickets)
}

/// The PAID pool the drawing engine selects from, in stable numero order so
/// a seed always sees the same snapshot ordering.
pub async fn paid_tickets(
    conn: &mut SqliteConnection,
    raffle_id: Uuid,
) -> Result<Vec<Ticket>, AppError> {
    let tickets = sqlx::query_as(
        "SELECT raffle_id, numero, state, purchase_id, participant_id, reservation_expires_at
         FROM tickets WHERE raffle_id = ? AND state = ? ORDER BY numero",
    )
    .bind(raffle_id)
    .bind(TicketState::Paid)
    .fetch_all(conn)
    .await?;

    Ok(tickets)
}
