//! # Raffle catalog
//!
//! Owns raffle definitions and their prizes. Everything else consults this
//! module before touching inventory or purchases.
//!
//! Lifecycle is one-directional except ACTIVE<->PAUSED; DRAWN and CANCELLED
//! are terminal. Activation is the moment the numbered ticket set comes into
//! existence: `0..total_tickets` rows are created in the same transaction
//! that flips the status, and the set's cardinality never changes afterwards.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::{database, error::AppError, inventory::TicketState};

pub const MAX_TOTAL_TICKETS: i64 = 10_000;

/// Ticket rows are inserted in batches during activation; 3 binds per row
/// keeps each batch well under SQLite's bind limit.
const ACTIVATION_BATCH: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RaffleStatus {
    Draft,
    Active,
    Paused,
    Drawn,
    Cancelled,
}

impl RaffleStatus {
    pub fn can_transition(self, to: RaffleStatus) -> bool {
        use RaffleStatus::*;

        matches!(
            (self, to),
            (Draft, Active)
                | (Active, Paused)
                | (Paused, Active)
                | (Active, Drawn)
                | (Draft, Cancelled)
                | (Active, Cancelled)
                | (Paused, Cancelled)
        )
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Raffle {
    pub id: Uuid,
    pub name: String,
    pub price_cents: i64,
    pub total_tickets: i64,
    pub limit_per_person: i64,
    pub reservation_window_minutes: i64,
    pub draw_date: DateTime<Utc>,
    pub status: RaffleStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Prize {
    pub id: Uuid,
    pub raffle_id: Uuid,
    pub name: String,
    pub display_order: i64,
    pub winning_ticket: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct NewRaffle {
    pub name: String,
    pub price_cents: i64,
    pub total_tickets: i64,
    pub limit_per_person: i64,
    pub reservation_window_minutes: i64,
    pub draw_date: DateTime<Utc>,
}

pub async fn create_raffle(pool: &SqlitePool, new: NewRaffle) -> Result<Raffle, AppError> {
    if new.name.trim().is_empty() {
        return Err(AppError::Validation("Raffle name must not be empty".into()));
    }
    if new.price_cents <= 0 {
        return Err(AppError::Validation("Ticket price must be positive".into()));
    }
    if new.total_tickets < 1 || new.total_tickets > MAX_TOTAL_TICKETS {
        return Err(AppError::Validation(format!(
            "Total tickets must be between 1 and {MAX_TOTAL_TICKETS}"
        )));
    }
    if new.limit_per_person < 1 {
        return Err(AppError::Validation(
            "Per-person limit must be at least 1".into(),
        ));
    }
    if new.reservation_window_minutes < 1 {
        return Err(AppError::Validation(
            "Reservation window must be at least 1 minute".into(),
        ));
    }

    let id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO raffles
         (id, name, price_cents, total_tickets, limit_per_person,
          reservation_window_minutes, draw_date, status, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(new.name.trim())
    .bind(new.price_cents)
    .bind(new.total_tickets)
    .bind(new.limit_per_person)
    .bind(new.reservation_window_minutes)
    .bind(new.draw_date)
    .bind(RaffleStatus::Draft)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    get(pool, id).await
}

pub async fn get<'e, E>(executor: E, raffle_id: Uuid) -> Result<Raffle, AppError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(
        "SELECT id, name, price_cents, total_tickets, limit_per_person,
                reservation_window_minutes, draw_date, status, created_at
         FROM raffles WHERE id = ?",
    )
    .bind(raffle_id)
    .fetch_optional(executor)
    .await?
    .ok_or(AppError::NotFound("raffle"))
}

/// Prizes can only be attached while the raffle is still a draft; the prize
/// list is what the drawing engine iterates, in display order.
pub async fn add_prize(pool: &SqlitePool, raffle_id: Uuid, name: &str) -> Result<Prize, AppError> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("Prize name must not be empty".into()));
    }

    let raffle = get(pool, raffle_id).await?;
    if raffle.status != RaffleStatus::Draft {
        return Err(AppError::State(
            "Prizes can only be added to a draft raffle".into(),
        ));
    }

    let id = Uuid::new_v4();
    let next_order: i64 =
        sqlx::query_scalar("SELECT COUNT(*) + 1 FROM prizes WHERE raffle_id = ?")
            .bind(raffle_id)
            .fetch_one(pool)
            .await?;

    sqlx::query(
        "INSERT INTO prizes (id, raffle_id, name, display_order, winning_ticket)
         VALUES (?, ?, ?, ?, NULL)",
    )
    .bind(id)
    .bind(raffle_id)
    .bind(name.trim())
    .bind(next_order)
    .execute(pool)
    .await
    .map_err(|e| match e.as_database_error() {
        // prizes_by_order: a racing add_prize claimed the same slot.
        Some(db) if db.is_unique_violation() => {
            AppError::Conflict("Prize position was just taken".into())
        }
        _ => e.into(),
    })?;

    Ok(Prize {
        id,
        raffle_id,
        name: name.trim().to_string(),
        display_order: next_order,
        winning_ticket: None,
    })
}

pub async fn prizes<'e, E>(executor: E, raffle_id: Uuid) -> Result<Vec<Prize>, AppError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let prizes = sqlx::query_as(
        "SELECT id, raffle_id, name, display_order, winning_ticket
         FROM prizes WHERE raffle_id = ? ORDER BY display_order",
    )
    .bind(raffle_id)
    .fetch_all(executor)
    .await?;

    Ok(prizes)
}

/// DRAFT -> ACTIVE, creating the full numbered ticket set in the same
/// transaction. Activating anything but a draft is a `State` error, so the
/// ticket set can never be created twice.
pub async fn activate(pool: &SqlitePool, raffle_id: Uuid) -> Result<Raffle, AppError> {
    let raffle = get(pool, raffle_id).await?;
    if raffle.status != RaffleStatus::Draft {
        return Err(AppError::State(format!(
            "Cannot activate a raffle in status {:?}",
            raffle.status
        )));
    }

    let mut tx = database::begin_write(pool).await?;

    let claimed = sqlx::query("UPDATE raffles SET status = ? WHERE id = ? AND status = ?")
        .bind(RaffleStatus::Active)
        .bind(raffle_id)
        .bind(RaffleStatus::Draft)
        .execute(&mut *tx)
        .await?;

    if claimed.rows_affected() != 1 {
        return Err(AppError::Conflict(
            "Raffle was activated concurrently".into(),
        ));
    }

    let numbers: Vec<i64> = (0..raffle.total_tickets).collect();
    for chunk in numbers.chunks(ACTIVATION_BATCH) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO tickets (raffle_id, numero, state) ");

        builder.push_values(chunk, |mut row, numero| {
            row.push_bind(raffle_id)
                .push_bind(numero)
                .push_bind(TicketState::Available);
        });

        builder.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;

    info!(
        "Activated raffle {raffle_id} with {} tickets",
        raffle.total_tickets
    );

    get(pool, raffle_id).await
}

pub async fn set_status(
    pool: &SqlitePool,
    raffle_id: Uuid,
    to: RaffleStatus,
) -> Result<Raffle, AppError> {
    let raffle = get(pool, raffle_id).await?;

    if !raffle.status.can_transition(to) {
        return Err(AppError::State(format!(
            "Illegal raffle transition {:?} -> {to:?}",
            raffle.status
        )));
    }

    let result = sqlx::query("UPDATE raffles SET status = ? WHERE id = ? AND status = ?")
        .bind(to)
        .bind(raffle_id)
        .bind(raffle.status)
        .execute(pool)
        .await?;

    if result.rows_affected() != 1 {
        return Err(AppError::Conflict(
            "Raffle status changed concurrently".into(),
        ));
    }

    get(pool, raffle_id).await
}
