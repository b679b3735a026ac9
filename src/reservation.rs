//! # Reservation service
//!
//! Public entry point for "buy these specific tickets" or "buy N tickets".
//! Validates the request against the catalog, then performs the whole
//! allocation — ticket flip, participant upsert, purchase insert, ownership
//! stamp — in one transaction. Any counted update coming up short aborts the
//! transaction, so two buyers racing for overlapping numbers get exactly one
//! full success and one distinct `Conflict`, never a partial result.
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::{
    catalog::{self, RaffleStatus},
    database,
    error::AppError,
    external::ReceiptStorage,
    inventory,
    ledger::{self, Participant, ParticipantInfo, Purchase},
    payment,
    rng::{generate_seed, DrawRng},
};

#[derive(Debug, Deserialize)]
pub struct ReservationRequest {
    pub raffle_id: Uuid,
    pub participant: ParticipantInfo,
    pub ticket_numbers: Option<Vec<i64>>,
    pub quantity: Option<i64>,
    pub payment_method_id: Uuid,
    pub reference: Option<String>,
    pub receipt_image_url: Option<String>,
}

#[derive(Debug)]
enum TicketSelection {
    Numbers(Vec<i64>),
    Quantity(i64),
}

impl TicketSelection {
    fn requested(&self) -> i64 {
        match self {
            TicketSelection::Numbers(numbers) => numbers.len() as i64,
            TicketSelection::Quantity(quantity) => *quantity,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReservationOutcome {
    pub purchase: Purchase,
    pub participant: Participant,
    pub ticket_numbers: Vec<i64>,
}

pub async fn reserve(
    pool: &SqlitePool,
    receipts: &dyn ReceiptStorage,
    request: ReservationRequest,
) -> Result<ReservationOutcome, AppError> {
    let raffle = catalog::get(pool, request.raffle_id).await?;
    if raffle.status != RaffleStatus::Active {
        return Err(AppError::RaffleNotActive);
    }

    let selection = validate_selection(&request, raffle.total_tickets)?;

    let mut tx = database::begin_write(pool).await?;

    let participant = ledger::find_or_create_participant(&mut tx, &request.participant).await?;

    // The IMMEDIATE transaction holds the writer lock from here on, so the
    // held-count read cannot be invalidated by a racing purchase from the
    // same participant before this one commits.
    let held = inventory::count_held_by(&mut tx, raffle.id, participant.id).await?;
    if held + selection.requested() > raffle.limit_per_person {
        return Err(AppError::PerPersonLimitExceeded {
            limit: raffle.limit_per_person,
        });
    }

    if let TicketSelection::Quantity(quantity) = selection {
        let available = inventory::count_available(&mut *tx, raffle.id).await?;
        if quantity > available {
            return Err(AppError::InsufficientInventory {
                requested: quantity as usize,
                available: available as usize,
            });
        }
    }

    if !payment::is_active(&mut tx, request.payment_method_id).await? {
        return Err(AppError::InvalidPaymentMethod);
    }

    if let Some(url) = request.receipt_image_url.as_deref() {
        if !receipts.resolve(url) {
            return Err(AppError::Validation(
                "Receipt URL does not resolve to an uploaded file".into(),
            ));
        }
    }

    let expires_at = Utc::now() + Duration::minutes(raffle.reservation_window_minutes);

    let ticket_numbers = match selection {
        TicketSelection::Numbers(numbers) => {
            inventory::reserve(&mut tx, raffle.id, &numbers, expires_at).await?;
            numbers
        }
        TicketSelection::Quantity(quantity) => {
            // Request-scoped generator: the shuffled copy of the available
            // set is built, consumed and discarded within this reservation.
            let mut rng = DrawRng::from_seed(&generate_seed());

            inventory::reserve_random(&mut tx, raffle.id, quantity as usize, expires_at, &mut rng)
                .await?
        }
    };

    let purchase = ledger::create_purchase(
        &mut tx,
        &raffle,
        participant.id,
        ticket_numbers.len() as i64,
        request.payment_method_id,
        request.reference.as_deref(),
        request.receipt_image_url.as_deref(),
        expires_at,
    )
    .await?;

    inventory::attach_purchase(&mut tx, raffle.id, &ticket_numbers, purchase.id, participant.id)
        .await?;

    tx.commit().await?;

    info!(
        "Reserved {} tickets in raffle {} for purchase {}",
        ticket_numbers.len(),
        raffle.id,
        purchase.id
    );

    Ok(ReservationOutcome {
        purchase,
        participant,
        ticket_numbers,
    })
}

fn validate_selection(
    request: &ReservationRequest,
    total_tickets: i64,
) -> Result<TicketSelection, AppError> {
    match (&request.ticket_numbers, request.quantity) {
        (Some(_), Some(_)) | (None, None) => Err(AppError::Validation(
            "Provide exactly one of ticket_numbers or quantity".into(),
        )),
        (Some(numbers), None) => {
            if numbers.is_empty() {
                return Err(AppError::Validation(
                    "ticket_numbers must not be empty".into(),
                ));
            }

            let mut seen = numbers.clone();
            seen.sort_unstable();
            if seen.windows(2).any(|pair| pair[0] == pair[1]) {
                return Err(AppError::Validation(
                    "ticket_numbers must not contain duplicates".into(),
                ));
            }

            if let Some(&out) = numbers.iter().find(|&&n| n < 0 || n >= total_tickets) {
                return Err(AppError::OutOfRange(out));
            }

            Ok(TicketSelection::Numbers(seen))
        }
        (None, Some(quantity)) => {
            if quantity < 1 {
                return Err(AppError::Validation("quantity must be at least 1".into()));
            }

            Ok(TicketSelection::Quantity(quantity))
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{validate_selection, ReservationRequest, TicketSelection};
    use crate::{error::AppError, ledger::ParticipantInfo};

    fn request(numbers: Option<Vec<i64>>, quantity: Option<i64>) -> ReservationRequest {
        ReservationRequest {
            raffle_id: Uuid::new_v4(),
            participant: ParticipantInfo {
                name: "Maria Perez".into(),
                phone: "04141234567".into(),
                email: None,
                id_document: None,
            },
            ticket_numbers: numbers,
            quantity,
            payment_method_id: Uuid::new_v4(),
            reference: None,
            receipt_image_url: None,
        }
    }

    #[test]
    fn exactly_one_selection_mode() {
        assert!(matches!(
            validate_selection(&request(None, None), 100),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            validate_selection(&request(Some(vec![1]), Some(1)), 100),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn explicit_numbers_are_sorted_and_checked() {
        let selection = validate_selection(&request(Some(vec![7, 3, 99]), None), 100).unwrap();

        match selection {
            TicketSelection::Numbers(numbers) => assert_eq!(numbers, vec![3, 7, 99]),
            TicketSelection::Quantity(_) => panic!("expected explicit numbers"),
        }
    }

    #[test]
    fn duplicates_are_rejected() {
        assert!(matches!(
            validate_selection(&request(Some(vec![5, 5]), None), 100),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn out_of_range_reports_the_offending_number() {
        assert!(matches!(
            validate_selection(&request(Some(vec![0, 100]), None), 100),
            Err(AppError::OutOfRange(100))
        ));
        assert!(matches!(
            validate_selection(&request(Some(vec![-1]), None), 100),
            Err(AppError::OutOfRange(-1))
        ));
    }

    #[test]
    fn quantity_must_be_positive() {
        assert!(matches!(
            validate_selection(&request(None, Some(0)), 100),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            validate_selection(&request(None, Some(3)), 100),
            Ok(TicketSelection::Quantity(3))
        ));
    }
}
