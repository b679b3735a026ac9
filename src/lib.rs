//! Raffle-ticket sales backend.
//!
//! Public buyers compete for a finite pool of uniquely numbered tickets per
//! raffle; operators verify payments and run one auditable draw per raffle.
//!
//! # Flow
//!
//! - A buyer posts a purchase request (explicit numbers or a quantity); the
//!   reservation service allocates tickets atomically and opens a PENDING
//!   purchase with an expiry window
//! - The buyer submits a receipt reference; an operator confirms or rejects
//!   the payment, which moves the tickets to PAID or back to AVAILABLE
//! - A background sweeper reclaims tickets from purchases whose window
//!   lapsed without confirmation
//! - Once the draw date arrives, an operator runs the drawing engine, which
//!   selects winners from the PAID pool (seeded random or validated manual),
//!   exactly once per raffle
//!
//! # Concurrency
//!
//! Ticket rows are the only hot shared resource. Every mutation is a
//! conditional update inside a transaction whose rows-affected count is
//! checked against the rows requested; a short count aborts the transaction.
//! No long-held locks, no ordering promises between concurrent buyers beyond
//! "exactly one wins any contested ticket".
use std::{sync::Arc, time::Duration};

use axum::{
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use signal::{
    ctrl_c,
    unix::{signal, SignalKind},
};
use tokio::{net::TcpListener, signal, time::interval};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

pub mod audit;
pub mod catalog;
pub mod config;
pub mod database;
pub mod drawing;
pub mod error;
pub mod external;
pub mod inventory;
pub mod ledger;
pub mod payment;
pub mod reservation;
pub mod rng;
pub mod routes;
pub mod state;

use routes::{
    activate_raffle_handler, add_prize_handler, cancel_raffle_handler, confirm_payment_handler,
    create_purchase_handler, create_raffle_handler, draw_handler, get_draw_handler,
    get_purchase_handler, get_raffle_handler, pause_raffle_handler,
    register_payment_method_handler, reject_payment_handler, resume_raffle_handler,
    set_payment_method_active_handler, submit_receipt_handler,
};
use state::State;

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = State::new().await;

    info!("Starting server...");

    spawn_expiry_sweeper(state.clone());

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let app = Router::new()
        .route("/raffles", post(create_raffle_handler))
        .route("/raffles/:id", get(get_raffle_handler))
        .route("/raffles/:id/prizes", post(add_prize_handler))
        .route("/raffles/:id/activate", post(activate_raffle_handler))
        .route("/raffles/:id/pause", post(pause_raffle_handler))
        .route("/raffles/:id/resume", post(resume_raffle_handler))
        .route("/raffles/:id/cancel", post(cancel_raffle_handler))
        .route("/raffles/:id/draw", post(draw_handler).get(get_draw_handler))
        .route("/purchases", post(create_purchase_handler))
        .route("/purchases/:id", get(get_purchase_handler))
        .route("/purchases/:id/receipt", post(submit_receipt_handler))
        .route("/purchases/:id/confirm", post(confirm_payment_handler))
        .route("/purchases/:id/reject", post(reject_payment_handler))
        .route("/payment-methods", post(register_payment_method_handler))
        .route(
            "/payment-methods/:id/active",
            post(set_payment_method_active_handler),
        )
        .layer(cors)
        .with_state(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await.unwrap();
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    println!("Server shutting down...");
}

/// Periodically reclaims tickets from PENDING purchases whose reservation
/// window lapsed. Each purchase is claimed with a conditional update, so the
/// sweeper is safe to run alongside admin actions and other sweeps.
fn spawn_expiry_sweeper(state: Arc<State>) {
    let period = Duration::from_secs(state.config.sweep_interval_secs);

    tokio::spawn(async move {
        let mut ticker = interval(period);

        loop {
            ticker.tick().await;

            match ledger::sweep_expired(&state.pool, Utc::now()).await {
                Ok(0) => {}
                Ok(swept) => info!("Expiry sweep released {swept} purchases"),
                Err(e) => warn!("Expiry sweep failed: {e}"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
