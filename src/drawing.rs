//! # Drawing engine
//!
//! Selects winning tickets exactly once per raffle, from the PAID pool only.
//!
//! RANDOM mode walks the prize list in display order, drawing one ticket per
//! prize without replacement from the eligible pool using the seeded
//! generator in [`crate::rng`]; recording the seed makes the result
//! reproducible after the fact. MANUAL mode takes one pre-validated number
//! per prize instead. Both modes write the draw row, the winner rows, the
//! ticket and prize updates, the raffle status flip and the audit entry in a
//! single transaction, bounded by a timeout so a very large pool can never
//! wedge the operator's request: on timeout everything rolls back and a
//! failed-attempt audit entry is written instead.
//!
//! Exactly-once is enforced by the UNIQUE index on `draws.raffle_id`, not by
//! an application check, which closes the race between two simultaneous draw
//! requests.
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    audit,
    catalog::{self, RaffleStatus},
    database,
    error::AppError,
    inventory::{self, Ticket},
    rng::{generate_seed, DrawRng},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DrawMethod {
    Random,
    Manual,
}

#[derive(Debug, Deserialize)]
pub struct DrawRequest {
    pub method: DrawMethod,
    pub seed: Option<String>,
    pub winning_ticket_numbers: Option<Vec<i64>>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Draw {
    pub id: Uuid,
    pub raffle_id: Uuid,
    pub method: DrawMethod,
    pub seed: Option<String>,
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct DrawWinner {
    pub prize_id: Uuid,
    pub prize_name: String,
    pub position: i64,
    pub numero: i64,
    pub participant_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct DrawResult {
    pub draw: Draw,
    pub winners: Vec<DrawWinner>,
}

/// Runs the draw under the configured timeout. The transaction lives inside
/// the timed future, so hitting the deadline drops and rolls it back; the
/// failed attempt is then recorded in the audit trail, distinct from any
/// successful draw.
pub async fn draw(
    pool: &SqlitePool,
    raffle_id: Uuid,
    request: DrawRequest,
    actor_id: &str,
    timeout: Duration,
) -> Result<DrawResult, AppError> {
    match tokio::time::timeout(timeout, perform_draw(pool, raffle_id, request, actor_id)).await {
        Ok(result) => result,
        Err(_) => {
            record_failed_attempt(pool, raffle_id, actor_id).await;

            Err(AppError::DrawTimeout)
        }
    }
}

async fn perform_draw(
    pool: &SqlitePool,
    raffle_id: Uuid,
    request: DrawRequest,
    actor_id: &str,
) -> Result<DrawResult, AppError> {
    let mut tx = database::begin_write(pool).await?;

    let raffle = catalog::get(&mut *tx, raffle_id).await?;
    match raffle.status {
        RaffleStatus::Active => {}
        RaffleStatus::Drawn => {
            return Err(AppError::State("Raffle was already drawn".into()));
        }
        status => {
            return Err(AppError::State(format!(
                "Cannot draw a raffle in status {status:?}"
            )));
        }
    }

    let now = Utc::now();
    if now < raffle.draw_date {
        return Err(AppError::State(format!(
            "Draw date {} has not been reached",
            raffle.draw_date
        )));
    }

    let prizes = catalog::prizes(&mut *tx, raffle_id).await?;
    if prizes.is_empty() {
        return Err(AppError::Validation("Raffle has no prizes to draw".into()));
    }

    let paid = inventory::paid_tickets(&mut tx, raffle_id).await?;
    if paid.is_empty() {
        return Err(AppError::State(
            "Raffle has no paid tickets to draw from".into(),
        ));
    }

    let (seed, winning_numbers) = match request.method {
        DrawMethod::Random => {
            if paid.len() < prizes.len() {
                return Err(AppError::State(format!(
                    "Raffle has {} paid tickets but {} prizes",
                    paid.len(),
                    prizes.len()
                )));
            }

            let seed = request.seed.clone().unwrap_or_else(generate_seed);
            let pool_numbers: Vec<i64> = paid.iter().map(|t| t.numero).collect();
            let winners = select_without_replacement(&seed, pool_numbers, prizes.len());

            (Some(seed), winners)
        }
        DrawMethod::Manual => {
            let numbers = request
                .winning_ticket_numbers
                .clone()
                .ok_or_else(|| {
                    AppError::InvalidManualSelection(
                        "winning_ticket_numbers is required for a manual draw".into(),
                    )
                })?;

            validate_manual_selection(&numbers, prizes.len(), &paid)?;

            (None, numbers)
        }
    };

    let draw = Draw {
        id: Uuid::new_v4(),
        raffle_id,
        method: request.method,
        seed,
        performed_by: actor_id.to_string(),
        performed_at: now,
    };

    // The UNIQUE index on raffle_id is the real once-only guard; a racing
    // draw that slipped past the status check dies here.
    sqlx::query(
        "INSERT INTO draws (id, raffle_id, method, seed, performed_by, performed_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(draw.id)
    .bind(draw.raffle_id)
    .bind(draw.method)
    .bind(&draw.seed)
    .bind(&draw.performed_by)
    .bind(draw.performed_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| match e.as_database_error() {
        Some(db) if db.is_unique_violation() => {
            AppError::State("Raffle was already drawn".into())
        }
        _ => e.into(),
    })?;

    let by_numero = |numero: i64| paid.iter().find(|t| t.numero == numero);

    let mut winners = Vec::with_capacity(prizes.len());

    for (prize, numero) in prizes.iter().zip(winning_numbers.iter().copied()) {
        inventory::mark_winner(&mut tx, raffle_id, numero).await?;

        sqlx::query("UPDATE prizes SET winning_ticket = ? WHERE id = ?")
            .bind(numero)
            .bind(prize.id)
            .execute(&mut *tx)
            .await?;

        let participant_id = by_numero(numero).and_then(|t| t.participant_id);

        sqlx::query(
            "INSERT INTO draw_winners (draw_id, prize_id, position, numero, participant_id)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(draw.id)
        .bind(prize.id)
        .bind(prize.display_order)
        .bind(numero)
        .bind(participant_id)
        .execute(&mut *tx)
        .await?;

        winners.push(DrawWinner {
            prize_id: prize.id,
            prize_name: prize.name.clone(),
            position: prize.display_order,
            numero,
            participant_id,
        });
    }

    let flipped = sqlx::query("UPDATE raffles SET status = ? WHERE id = ? AND status = ?")
        .bind(RaffleStatus::Drawn)
        .bind(raffle_id)
        .bind(RaffleStatus::Active)
        .execute(&mut *tx)
        .await?;

    if flipped.rows_affected() != 1 {
        return Err(AppError::Conflict(
            "Raffle status changed during the draw".into(),
        ));
    }

    audit::record(
        &mut tx,
        audit::DRAW_PERFORMED,
        "raffle",
        &raffle_id.to_string(),
        actor_id,
        serde_json::json!({
            "method": draw.method,
            "seed": draw.seed,
            "paid_pool_size": paid.len(),
            "winners": winners
                .iter()
                .map(|w| serde_json::json!({
                    "position": w.position,
                    "numero": w.numero,
                    "participant_id": w.participant_id,
                }))
                .collect::<Vec<_>>(),
        }),
    )
    .await?;

    tx.commit().await?;

    info!(
        "Drew raffle {raffle_id}: {} winners via {:?}",
        winners.len(),
        draw.method
    );

    Ok(DrawResult { draw, winners })
}

/// One ticket per prize, without replacement: a ticket that already won an
/// earlier prize is excluded from subsequent picks. Pure so determinism is
/// testable without a database.
pub fn select_without_replacement(seed: &str, mut pool: Vec<i64>, count: usize) -> Vec<i64> {
    let mut rng = DrawRng::from_seed(seed);
    let mut winners = Vec::with_capacity(count);

    for _ in 0..count {
        let index = rng.next_index(pool.len());
        winners.push(pool.swap_remove(index));
    }

    winners
}

fn validate_manual_selection(
    numbers: &[i64],
    prize_count: usize,
    paid: &[Ticket],
) -> Result<(), AppError> {
    if numbers.len() != prize_count {
        return Err(AppError::InvalidManualSelection(format!(
            "Expected {prize_count} winning numbers, got {}",
            numbers.len()
        )));
    }

    let mut seen = numbers.to_vec();
    seen.sort_unstable();
    if seen.windows(2).any(|pair| pair[0] == pair[1]) {
        return Err(AppError::InvalidManualSelection(
            "Winning numbers must not repeat".into(),
        ));
    }

    for &numero in numbers {
        if !paid.iter().any(|t| t.numero == numero) {
            return Err(AppError::InvalidManualSelection(format!(
                "Ticket {numero} is not a paid ticket"
            )));
        }
    }

    Ok(())
}

async fn record_failed_attempt(pool: &SqlitePool, raffle_id: Uuid, actor_id: &str) {
    let result = async {
        let mut conn = pool.acquire().await?;

        audit::record(
            &mut conn,
            audit::DRAW_FAILED,
            "raffle",
            &raffle_id.to_string(),
            actor_id,
            serde_json::json!({ "reason": "timeout" }),
        )
        .await
    }
    .await;

    if let Err(e) = result {
        warn!("Failed to record timed-out draw for raffle {raffle_id}: {e}");
    }
}

pub async fn get_draw(pool: &SqlitePool, raffle_id: Uuid) -> Result<DrawResult, AppError> {
    let draw: Draw = sqlx::query_as(
        "SELECT id, raffle_id, method, seed, performed_by, performed_at
         FROM draws WHERE raffle_id = ?",
    )
    .bind(raffle_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("draw"))?;

    let winners = sqlx::query_as(
        "SELECT dw.prize_id, p.name AS prize_name, dw.position, dw.numero, dw.participant_id
         FROM draw_winners dw
         JOIN prizes p ON p.id = dw.prize_id
         WHERE dw.draw_id = ?
         ORDER BY dw.position",
    )
    .bind(draw.id)
    .fetch_all(pool)
    .await?;

    Ok(DrawResult { draw, winners })
}
