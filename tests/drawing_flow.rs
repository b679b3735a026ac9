mod common;

use std::time::Duration;

use common::{explicit_request, fixture, memory_pool, quantity_request, Fixture, RaffleOptions};
use rifa::{
    audit,
    catalog::{self, RaffleStatus},
    drawing::{self, DrawMethod, DrawRequest},
    error::AppError,
    external::UrlShapeReceipts,
    ledger,
    reservation,
};
use sqlx::SqlitePool;

const DRAW_TIMEOUT: Duration = Duration::from_secs(30);

fn random_request(seed: &str) -> DrawRequest {
    DrawRequest {
        method: DrawMethod::Random,
        seed: Some(seed.into()),
        winning_ticket_numbers: None,
    }
}

fn manual_request(numbers: Vec<i64>) -> DrawRequest {
    DrawRequest {
        method: DrawMethod::Manual,
        seed: None,
        winning_ticket_numbers: Some(numbers),
    }
}

/// Buys and confirms the given numbers so they join the PAID pool.
async fn pay_for(pool: &SqlitePool, fx: &Fixture, phone: &str, numbers: Vec<i64>) {
    let outcome = reservation::reserve(pool, &UrlShapeReceipts, explicit_request(fx, phone, numbers))
        .await
        .unwrap();

    ledger::confirm_payment(pool, outcome.purchase.id, "admin-1")
        .await
        .unwrap();
}

#[tokio::test]
async fn end_to_end_sale_confirmation_and_draw() {
    let pool = memory_pool().await;
    let fx = fixture(&pool, RaffleOptions::default()).await;

    let outcome = reservation::reserve(&pool, &UrlShapeReceipts, quantity_request(&fx, "0412-100", 5))
        .await
        .unwrap();
    ledger::confirm_payment(&pool, outcome.purchase.id, "admin-1")
        .await
        .unwrap();

    let result = drawing::draw(
        &pool,
        fx.raffle.id,
        random_request("feria-2024"),
        "admin-1",
        DRAW_TIMEOUT,
    )
    .await
    .unwrap();

    // Three prizes, three distinct winners out of the five paid tickets.
    assert_eq!(result.winners.len(), 3);

    let mut numeros: Vec<i64> = result.winners.iter().map(|w| w.numero).collect();
    numeros.sort_unstable();
    numeros.dedup();
    assert_eq!(numeros.len(), 3);

    for winner in &result.winners {
        assert!(outcome.ticket_numbers.contains(&winner.numero));
        assert_eq!(winner.participant_id, Some(outcome.participant.id));
        assert_eq!(
            common::ticket_state(&pool, fx.raffle.id, winner.numero).await,
            "WINNER"
        );
    }

    let raffle = catalog::get(&pool, fx.raffle.id).await.unwrap();
    assert_eq!(raffle.status, RaffleStatus::Drawn);

    for prize in catalog::prizes(&pool, fx.raffle.id).await.unwrap() {
        let winner = result
            .winners
            .iter()
            .find(|w| w.prize_id == prize.id)
            .unwrap();
        assert_eq!(prize.winning_ticket, Some(winner.numero));
    }

    let entries = audit::entries_for(&pool, "raffle", &fx.raffle.id.to_string())
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, audit::DRAW_PERFORMED);
}

#[tokio::test]
async fn same_seed_and_pool_give_identical_winners() {
    let mut winner_sets = Vec::new();

    for _ in 0..2 {
        let pool = memory_pool().await;
        let fx = fixture(&pool, RaffleOptions::default()).await;

        pay_for(&pool, &fx, "0412-200", (10..30).collect()).await;

        let result = drawing::draw(
            &pool,
            fx.raffle.id,
            random_request("seed-replay"),
            "admin-1",
            DRAW_TIMEOUT,
        )
        .await
        .unwrap();

        assert_eq!(result.draw.seed.as_deref(), Some("seed-replay"));

        winner_sets.push(
            result
                .winners
                .iter()
                .map(|w| w.numero)
                .collect::<Vec<i64>>(),
        );
    }

    assert_eq!(winner_sets[0], winner_sets[1]);
}

#[tokio::test]
async fn a_raffle_is_drawn_at_most_once() {
    let pool = memory_pool().await;
    let fx = fixture(&pool, RaffleOptions::default()).await;

    pay_for(&pool, &fx, "0412-300", vec![1, 2, 3, 4]).await;

    drawing::draw(&pool, fx.raffle.id, random_request("first"), "admin-1", DRAW_TIMEOUT)
        .await
        .unwrap();

    let err = drawing::draw(&pool, fx.raffle.id, random_request("second"), "admin-1", DRAW_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::State(_)));

    let draws: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM draws WHERE raffle_id = ?")
        .bind(fx.raffle.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(draws, 1);
}

#[tokio::test]
async fn concurrent_draw_requests_resolve_to_one_draw() {
    let pool = memory_pool().await;
    let fx = fixture(&pool, RaffleOptions::default()).await;

    pay_for(&pool, &fx, "0412-400", vec![5, 6, 7, 8]).await;

    let mut tasks = Vec::new();
    for seed in ["race-a", "race-b"] {
        let pool = pool.clone();
        let raffle_id = fx.raffle.id;

        tasks.push(tokio::spawn(async move {
            drawing::draw(&pool, raffle_id, random_request(seed), "admin-1", DRAW_TIMEOUT).await
        }));
    }

    let mut wins = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => wins += 1,
            Err(AppError::State(_)) | Err(AppError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(wins, 1);

    let draws: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM draws WHERE raffle_id = ?")
        .bind(fx.raffle.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(draws, 1);
}

#[tokio::test]
async fn manual_draw_assigns_prizes_in_order() {
    let pool = memory_pool().await;
    let fx = fixture(&pool, RaffleOptions::default()).await;

    pay_for(&pool, &fx, "0412-500", vec![40, 41, 42, 43]).await;

    let result = drawing::draw(
        &pool,
        fx.raffle.id,
        manual_request(vec![42, 40, 43]),
        "admin-1",
        DRAW_TIMEOUT,
    )
    .await
    .unwrap();

    assert_eq!(result.draw.method, DrawMethod::Manual);
    assert_eq!(result.draw.seed, None);

    let numeros: Vec<i64> = result.winners.iter().map(|w| w.numero).collect();
    assert_eq!(numeros, vec![42, 40, 43]);

    let positions: Vec<i64> = result.winners.iter().map(|w| w.position).collect();
    assert_eq!(positions, vec![1, 2, 3]);

    let read_back = drawing::get_draw(&pool, fx.raffle.id).await.unwrap();
    let read_numeros: Vec<i64> = read_back.winners.iter().map(|w| w.numero).collect();
    assert_eq!(read_numeros, numeros);
}

#[tokio::test]
async fn invalid_manual_selections_write_nothing() {
    let pool = memory_pool().await;
    let fx = fixture(&pool, RaffleOptions::default()).await;

    pay_for(&pool, &fx, "0412-600", vec![10, 11, 12]).await;

    // 99 was never paid for.
    for numbers in [vec![10, 11, 99], vec![10, 10, 11], vec![10, 11]] {
        let err = drawing::draw(
            &pool,
            fx.raffle.id,
            manual_request(numbers),
            "admin-1",
            DRAW_TIMEOUT,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::InvalidManualSelection(_)), "got {err:?}");
    }

    let draws: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM draws WHERE raffle_id = ?")
        .bind(fx.raffle.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(draws, 0);

    let raffle = catalog::get(&pool, fx.raffle.id).await.unwrap();
    assert_eq!(raffle.status, RaffleStatus::Active);
}

#[tokio::test]
async fn draw_preconditions_are_enforced() {
    let pool = memory_pool().await;

    // Draw date not reached.
    let future = fixture(
        &pool,
        RaffleOptions {
            draw_date_in_past: false,
            ..RaffleOptions::default()
        },
    )
    .await;
    pay_for(&pool, &future, "0412-700", vec![1]).await;

    let err = drawing::draw(&pool, future.raffle.id, random_request("x"), "admin-1", DRAW_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::State(_)));

    // No paid tickets yet.
    let unpaid = fixture(&pool, RaffleOptions::default()).await;
    reservation::reserve(
        &pool,
        &UrlShapeReceipts,
        quantity_request(&unpaid, "0412-701", 2),
    )
    .await
    .unwrap();

    let err = drawing::draw(&pool, unpaid.raffle.id, random_request("x"), "admin-1", DRAW_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::State(_)));

    // Fewer paid tickets than prizes.
    let thin = fixture(&pool, RaffleOptions::default()).await;
    pay_for(&pool, &thin, "0412-702", vec![1, 2]).await;

    let err = drawing::draw(&pool, thin.raffle.id, random_request("x"), "admin-1", DRAW_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::State(_)));
}

#[tokio::test]
async fn a_timed_out_draw_rolls_back_and_is_audited() {
    let pool = memory_pool().await;
    let fx = fixture(&pool, RaffleOptions::default()).await;

    pay_for(&pool, &fx, "0412-900", vec![1, 2, 3]).await;

    // A zero deadline elapses before the draw's first query can answer.
    let err = drawing::draw(
        &pool,
        fx.raffle.id,
        random_request("never-lands"),
        "admin-1",
        Duration::ZERO,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::DrawTimeout));

    let draws: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM draws WHERE raffle_id = ?")
        .bind(fx.raffle.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(draws, 0);

    let raffle = catalog::get(&pool, fx.raffle.id).await.unwrap();
    assert_eq!(raffle.status, RaffleStatus::Active);

    let entries = audit::entries_for(&pool, "raffle", &fx.raffle.id.to_string())
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, audit::DRAW_FAILED);

    // The raffle is untouched, so a draw with a real deadline still works.
    drawing::draw(&pool, fx.raffle.id, random_request("retry"), "admin-1", DRAW_TIMEOUT)
        .await
        .unwrap();
}

#[tokio::test]
async fn generated_seeds_are_persisted_for_replay() {
    let pool = memory_pool().await;
    let fx = fixture(&pool, RaffleOptions::default()).await;

    pay_for(&pool, &fx, "0412-800", (50..60).collect()).await;

    let result = drawing::draw(
        &pool,
        fx.raffle.id,
        DrawRequest {
            method: DrawMethod::Random,
            seed: None,
            winning_ticket_numbers: None,
        },
        "admin-1",
        DRAW_TIMEOUT,
    )
    .await
    .unwrap();

    let seed = result.draw.seed.clone().expect("seed must be persisted");

    // Replaying the recorded seed over the same pre-draw pool reproduces the
    // winner list.
    let replay = drawing::select_without_replacement(&seed, (50..60).collect(), 3);
    let numeros: Vec<i64> = result.winners.iter().map(|w| w.numero).collect();
    assert_eq!(numeros, replay);

    let read_back = drawing::get_draw(&pool, fx.raffle.id).await.unwrap();
    assert_eq!(read_back.draw.seed.as_deref(), Some(seed.as_str()));
}
