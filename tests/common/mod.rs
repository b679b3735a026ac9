#![allow(dead_code)]

use std::str::FromStr;

use chrono::{Duration, Utc};
use rifa::{
    catalog::{self, NewRaffle, Raffle},
    database,
    ledger::ParticipantInfo,
    payment::{self, BankTransfer, PaymentMethodDetails},
    reservation::ReservationRequest,
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use uuid::Uuid;

/// Single-connection in-memory database. One connection keeps the in-memory
/// store alive for the whole test and serializes transactions the same way
/// a busy pool would under contention.
pub async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();

    database::apply_schema(&pool).await.unwrap();

    pool
}

/// File-backed pool shaped like production (`database::init_db`): five
/// connections contending for SQLite's single writer, so races between
/// transactions are real rather than serialized by a lone connection.
pub async fn contended_pool() -> SqlitePool {
    let path = std::env::temp_dir().join(format!("rifa-test-{}.db", Uuid::new_v4().simple()));

    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .unwrap();

    database::apply_schema(&pool).await.unwrap();

    pool
}

pub struct Fixture {
    pub raffle: Raffle,
    pub payment_method_id: Uuid,
}

pub struct RaffleOptions {
    pub total_tickets: i64,
    pub limit_per_person: i64,
    pub prizes: usize,
    pub draw_date_in_past: bool,
}

impl Default for RaffleOptions {
    fn default() -> Self {
        Self {
            total_tickets: 100,
            limit_per_person: 100,
            prizes: 3,
            draw_date_in_past: true,
        }
    }
}

/// Active raffle with prizes and a registered bank-transfer payment method.
pub async fn fixture(pool: &SqlitePool, options: RaffleOptions) -> Fixture {
    let draw_date = if options.draw_date_in_past {
        Utc::now() - Duration::days(1)
    } else {
        Utc::now() + Duration::days(7)
    };

    let raffle = catalog::create_raffle(
        pool,
        NewRaffle {
            name: "Rifa de prueba".into(),
            price_cents: 500,
            total_tickets: options.total_tickets,
            limit_per_person: options.limit_per_person,
            reservation_window_minutes: 30,
            draw_date,
        },
    )
    .await
    .unwrap();

    for n in 1..=options.prizes {
        catalog::add_prize(pool, raffle.id, &format!("Premio {n}"))
            .await
            .unwrap();
    }

    let raffle = catalog::activate(pool, raffle.id).await.unwrap();

    let method = payment::register(
        pool,
        "Transferencia Banco Azul",
        &PaymentMethodDetails::BankTransfer(BankTransfer {
            bank: "Banco Azul".into(),
            account_holder: "Rifas SA".into(),
            account_number: "0102-3344-5566".into(),
        }),
    )
    .await
    .unwrap();

    Fixture {
        raffle,
        payment_method_id: method.id,
    }
}

pub fn participant(name: &str, phone: &str) -> ParticipantInfo {
    ParticipantInfo {
        name: name.into(),
        phone: phone.into(),
        email: None,
        id_document: None,
    }
}

pub fn explicit_request(
    fixture: &Fixture,
    phone: &str,
    numbers: Vec<i64>,
) -> ReservationRequest {
    ReservationRequest {
        raffle_id: fixture.raffle.id,
        participant: participant("Maria Perez", phone),
        ticket_numbers: Some(numbers),
        quantity: None,
        payment_method_id: fixture.payment_method_id,
        reference: None,
        receipt_image_url: None,
    }
}

pub fn quantity_request(fixture: &Fixture, phone: &str, quantity: i64) -> ReservationRequest {
    ReservationRequest {
        raffle_id: fixture.raffle.id,
        participant: participant("Maria Perez", phone),
        ticket_numbers: None,
        quantity: Some(quantity),
        payment_method_id: fixture.payment_method_id,
        reference: None,
        receipt_image_url: None,
    }
}

pub async fn ticket_state(pool: &SqlitePool, raffle_id: Uuid, numero: i64) -> String {
    sqlx::query_scalar("SELECT state FROM tickets WHERE raffle_id = ? AND numero = ?")
        .bind(raffle_id)
        .bind(numero)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn states_of_purchase(pool: &SqlitePool, purchase_id: Uuid) -> Vec<String> {
    sqlx::query_scalar("SELECT state FROM tickets WHERE purchase_id = ? ORDER BY numero")
        .bind(purchase_id)
        .fetch_all(pool)
        .await
        .unwrap()
}

/// Backdates a purchase's expiry so the sweeper sees it as lapsed.
pub async fn backdate_expiry(pool: &SqlitePool, purchase_id: Uuid, minutes: i64) {
    sqlx::query("UPDATE purchases SET expires_at = ? WHERE id = ?")
        .bind(Utc::now() - Duration::minutes(minutes))
        .bind(purchase_id)
        .execute(pool)
        .await
        .unwrap();
}
