//! HTTP surface. Handlers stay thin: decode the payload, call the owning
//! module, fire post-commit notifications, encode the result.
use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    catalog::{self, NewRaffle, Prize, Raffle, RaffleStatus},
    drawing::{self, DrawMethod, DrawRequest, DrawResult},
    error::AppError,
    inventory::{self, Ticket},
    ledger::{self, Purchase},
    payment::{self, PaymentMethodDetails},
    reservation::{self, ReservationRequest},
    state::State as AppState,
};

#[derive(Serialize)]
pub struct RaffleView {
    #[serde(flatten)]
    pub raffle: Raffle,
    pub prizes: Vec<Prize>,
    pub available_tickets: i64,
}

pub async fn create_raffle_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewRaffle>,
) -> Result<impl IntoResponse, AppError> {
    let raffle = catalog::create_raffle(&state.pool, payload).await?;

    Ok((StatusCode::CREATED, Json(raffle)))
}

pub async fn get_raffle_handler(
    State(state): State<Arc<AppState>>,
    Path(raffle_id): Path<Uuid>,
) -> Result<Json<RaffleView>, AppError> {
    let raffle = catalog::get(&state.pool, raffle_id).await?;
    let prizes = catalog::prizes(&state.pool, raffle_id).await?;
    let available_tickets = inventory::count_available(&state.pool, raffle_id).await?;

    Ok(Json(RaffleView {
        raffle,
        prizes,
        available_tickets,
    }))
}

#[derive(Deserialize)]
pub struct NewPrize {
    pub name: String,
}

pub async fn add_prize_handler(
    State(state): State<Arc<AppState>>,
    Path(raffle_id): Path<Uuid>,
    Json(payload): Json<NewPrize>,
) -> Result<impl IntoResponse, AppError> {
    let prize = catalog::add_prize(&state.pool, raffle_id, &payload.name).await?;

    Ok((StatusCode::CREATED, Json(prize)))
}

pub async fn activate_raffle_handler(
    State(state): State<Arc<AppState>>,
    Path(raffle_id): Path<Uuid>,
) -> Result<Json<Raffle>, AppError> {
    Ok(Json(catalog::activate(&state.pool, raffle_id).await?))
}

pub async fn pause_raffle_handler(
    State(state): State<Arc<AppState>>,
    Path(raffle_id): Path<Uuid>,
) -> Result<Json<Raffle>, AppError> {
    Ok(Json(
        catalog::set_status(&state.pool, raffle_id, RaffleStatus::Paused).await?,
    ))
}

pub async fn resume_raffle_handler(
    State(state): State<Arc<AppState>>,
    Path(raffle_id): Path<Uuid>,
) -> Result<Json<Raffle>, AppError> {
    Ok(Json(
        catalog::set_status(&state.pool, raffle_id, RaffleStatus::Active).await?,
    ))
}

pub async fn cancel_raffle_handler(
    State(state): State<Arc<AppState>>,
    Path(raffle_id): Path<Uuid>,
) -> Result<Json<Raffle>, AppError> {
    Ok(Json(
        catalog::set_status(&state.pool, raffle_id, RaffleStatus::Cancelled).await?,
    ))
}

pub async fn create_purchase_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ReservationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = reservation::reserve(&state.pool, state.receipts.as_ref(), payload).await?;

    Ok((StatusCode::CREATED, Json(outcome)))
}

#[derive(Serialize)]
pub struct PurchaseView {
    #[serde(flatten)]
    pub purchase: Purchase,
    pub tickets: Vec<Ticket>,
}

pub async fn get_purchase_handler(
    State(state): State<Arc<AppState>>,
    Path(purchase_id): Path<Uuid>,
) -> Result<Json<PurchaseView>, AppError> {
    let purchase = ledger::get_purchase(&state.pool, purchase_id).await?;
    let tickets = inventory::tickets_for_purchase(&state.pool, purchase_id).await?;

    Ok(Json(PurchaseView { purchase, tickets }))
}

#[derive(Deserialize)]
pub struct ReceiptPayload {
    pub url: String,
    pub reference: Option<String>,
}

pub async fn submit_receipt_handler(
    State(state): State<Arc<AppState>>,
    Path(purchase_id): Path<Uuid>,
    Json(payload): Json<ReceiptPayload>,
) -> Result<Json<Purchase>, AppError> {
    let purchase = ledger::submit_receipt(
        &state.pool,
        state.receipts.as_ref(),
        purchase_id,
        &payload.url,
        payload.reference.as_deref(),
    )
    .await?;

    Ok(Json(purchase))
}

#[derive(Deserialize)]
pub struct AdminAction {
    pub admin_id: String,
}

pub async fn confirm_payment_handler(
    State(state): State<Arc<AppState>>,
    Path(purchase_id): Path<Uuid>,
    Json(payload): Json<AdminAction>,
) -> Result<Json<Purchase>, AppError> {
    let purchase = ledger::confirm_payment(&state.pool, purchase_id, &payload.admin_id).await?;

    state.notifier.notify(
        purchase.participant_id,
        "payment_confirmed",
        serde_json::json!({
            "reference": purchase.reference,
            "total_cents": purchase.total_cents,
        }),
    );

    Ok(Json(purchase))
}

#[derive(Deserialize)]
pub struct RejectAction {
    pub admin_id: String,
    pub reason: String,
}

pub async fn reject_payment_handler(
    State(state): State<Arc<AppState>>,
    Path(purchase_id): Path<Uuid>,
    Json(payload): Json<RejectAction>,
) -> Result<Json<Purchase>, AppError> {
    let purchase = ledger::reject_payment(
        &state.pool,
        purchase_id,
        &payload.admin_id,
        &payload.reason,
    )
    .await?;

    state.notifier.notify(
        purchase.participant_id,
        "payment_rejected",
        serde_json::json!({
            "reference": purchase.reference,
            "reason": payload.reason,
        }),
    );

    Ok(Json(purchase))
}

#[derive(Deserialize)]
pub struct DrawPayload {
    pub admin_id: String,
    pub method: DrawMethod,
    pub seed: Option<String>,
    pub winning_ticket_numbers: Option<Vec<i64>>,
}

pub async fn draw_handler(
    State(state): State<Arc<AppState>>,
    Path(raffle_id): Path<Uuid>,
    Json(payload): Json<DrawPayload>,
) -> Result<impl IntoResponse, AppError> {
    let request = DrawRequest {
        method: payload.method,
        seed: payload.seed,
        winning_ticket_numbers: payload.winning_ticket_numbers,
    };

    let result = drawing::draw(
        &state.pool,
        raffle_id,
        request,
        &payload.admin_id,
        Duration::from_secs(state.config.draw_timeout_secs),
    )
    .await?;

    for winner in &result.winners {
        if let Some(participant_id) = winner.participant_id {
            state.notifier.notify(
                participant_id,
                "winner",
                serde_json::json!({
                    "prize": winner.prize_name,
                    "numero": winner.numero,
                }),
            );
        }
    }

    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn get_draw_handler(
    State(state): State<Arc<AppState>>,
    Path(raffle_id): Path<Uuid>,
) -> Result<Json<DrawResult>, AppError> {
    Ok(Json(drawing::get_draw(&state.pool, raffle_id).await?))
}

#[derive(Deserialize)]
pub struct NewPaymentMethod {
    pub display_name: String,
    pub details: PaymentMethodDetails,
}

#[derive(Serialize)]
pub struct PaymentMethodView {
    pub id: Uuid,
    pub display_name: String,
    pub details: PaymentMethodDetails,
    pub active: bool,
}

pub async fn register_payment_method_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewPaymentMethod>,
) -> Result<impl IntoResponse, AppError> {
    let method = payment::register(&state.pool, &payload.display_name, &payload.details).await?;

    let view = PaymentMethodView {
        id: method.id,
        display_name: method.display_name.clone(),
        details: method.details()?,
        active: method.active,
    };

    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Deserialize)]
pub struct SetActive {
    pub active: bool,
}

pub async fn set_payment_method_active_handler(
    State(state): State<Arc<AppState>>,
    Path(method_id): Path<Uuid>,
    Json(payload): Json<SetActive>,
) -> Result<StatusCode, AppError> {
    payment::set_active(&state.pool, method_id, payload.active).await?;

    Ok(StatusCode::NO_CONTENT)
}
