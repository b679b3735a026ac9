//! # SQLite
//!
//! Relational store for the raffle core.
//!
//! ## Requirements
//!
//! - Ticket rows are the hot shared resource; every mutation goes through a
//!   conditional update (`SET state = X WHERE state = Y AND ...`) whose
//!   rows-affected count is verified by the caller
//! - Uniqueness the business rules lean on lives in the schema, not the
//!   application: one ticket per (raffle, numero), one participant per phone,
//!   one draw per raffle
//!
//! ## Layout
//!
//! - `raffles` / `prizes`: catalog definitions
//! - `tickets`: per-raffle numbered inventory, keyed (raffle_id, numero)
//! - `participants`: buyer directory, deduplicated by phone
//! - `purchases`: payment lifecycle records with an expiry timestamp
//! - `draws` / `draw_winners`: one immutable draw per raffle
//! - `payment_methods`: tagged-union method configs with an active flag
//! - `audit_log`: append-only record of critical actions
use std::{str::FromStr, time::Duration};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS raffles (
    id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    price_cents INTEGER NOT NULL,
    total_tickets INTEGER NOT NULL,
    limit_per_person INTEGER NOT NULL,
    reservation_window_minutes INTEGER NOT NULL,
    draw_date TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS prizes (
    id BLOB PRIMARY KEY,
    raffle_id BLOB NOT NULL REFERENCES raffles(id),
    name TEXT NOT NULL,
    display_order INTEGER NOT NULL,
    winning_ticket INTEGER
);

CREATE TABLE IF NOT EXISTS tickets (
    raffle_id BLOB NOT NULL REFERENCES raffles(id),
    numero INTEGER NOT NULL,
    state TEXT NOT NULL,
    purchase_id BLOB,
    participant_id BLOB,
    reservation_expires_at TEXT,
    PRIMARY KEY (raffle_id, numero)
);

CREATE UNIQUE INDEX IF NOT EXISTS prizes_by_order ON prizes(raffle_id, display_order);

CREATE INDEX IF NOT EXISTS tickets_by_state ON tickets(raffle_id, state);
CREATE INDEX IF NOT EXISTS tickets_by_purchase ON tickets(purchase_id);

CREATE TABLE IF NOT EXISTS participants (
    id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    phone TEXT NOT NULL UNIQUE,
    id_document TEXT,
    email TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS purchases (
    id BLOB PRIMARY KEY,
    raffle_id BLOB NOT NULL REFERENCES raffles(id),
    participant_id BLOB NOT NULL REFERENCES participants(id),
    ticket_count INTEGER NOT NULL,
    unit_price_cents INTEGER NOT NULL,
    total_cents INTEGER NOT NULL,
    payment_method_id BLOB NOT NULL REFERENCES payment_methods(id),
    payment_state TEXT NOT NULL,
    reference TEXT NOT NULL,
    receipt_url TEXT,
    rejection_reason TEXT,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS purchases_pending ON purchases(payment_state, expires_at);

CREATE TABLE IF NOT EXISTS draws (
    id BLOB PRIMARY KEY,
    raffle_id BLOB NOT NULL UNIQUE REFERENCES raffles(id),
    method TEXT NOT NULL,
    seed TEXT,
    performed_by TEXT NOT NULL,
    performed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS draw_winners (
    draw_id BLOB NOT NULL REFERENCES draws(id),
    prize_id BLOB NOT NULL REFERENCES prizes(id),
    position INTEGER NOT NULL,
    numero INTEGER NOT NULL,
    participant_id BLOB,
    PRIMARY KEY (draw_id, position)
);

CREATE TABLE IF NOT EXISTS payment_methods (
    id BLOB PRIMARY KEY,
    display_name TEXT NOT NULL,
    details TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action TEXT NOT NULL,
    entity TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    actor_id TEXT NOT NULL,
    details TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

pub async fn init_db(database_url: &str) -> SqlitePool {
    let options = SqliteConnectOptions::from_str(database_url)
        .expect("Invalid DATABASE_URL")
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .expect("Failed to open database");

    apply_schema(&pool).await.expect("Failed to apply schema");

    pool
}

pub async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;

    Ok(())
}

/// Starts a write transaction with the writer lock taken up front. SQLite
/// upgrades a deferred transaction from reader to writer at the first write,
/// and an upgrade that loses the race fails immediately with BUSY instead of
/// waiting on the busy timeout; beginning IMMEDIATE makes concurrent writers
/// queue on the timeout and keeps reads inside the transaction stable.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
    pool.begin_with("BEGIN IMMEDIATE").await
}
