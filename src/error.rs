use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failure taxonomy for the core.
///
/// Every variant maps to a stable machine-readable code so calling UIs can
/// present specific guidance ("those numbers were just taken" vs. "this
/// raffle is closed") instead of a generic failure page.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Raffle is not open for sales")]
    RaffleNotActive,

    #[error("Ticket number {0} is out of range")]
    OutOfRange(i64),

    #[error("Requested {requested} tickets but only {available} are available")]
    InsufficientInventory { requested: usize, available: usize },

    #[error("Per-person limit of {limit} tickets exceeded")]
    PerPersonLimitExceeded { limit: i64 },

    #[error("Payment method is unknown or inactive")]
    InvalidPaymentMethod,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    State(String),

    #[error("Action was already processed")]
    AlreadyProcessed,

    #[error("Invalid manual selection: {0}")]
    InvalidManualSelection(String),

    #[error("Draw timed out and was rolled back")]
    DrawTimeout,

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended variants
/// such as BUSY_SNAPSHOT; the primary code lives in the low byte.
fn busy_or_locked(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<u32>().ok())
        .is_some_and(|c| matches!(c & 0xff, 5 | 6))
}

/// A writer that exhausts the busy timeout lost a race for the database
/// lock, which callers should see as a retryable conflict, not a failure of
/// the storage layer.
impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e.as_database_error() {
            Some(db) if busy_or_locked(db.code().as_deref()) => {
                AppError::Conflict("Lost a race for the database lock, retry".into())
            }
            _ => AppError::Database(e),
        }
    }
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::RaffleNotActive => "RAFFLE_NOT_ACTIVE",
            AppError::OutOfRange(_) => "OUT_OF_RANGE",
            AppError::InsufficientInventory { .. } => "INSUFFICIENT_INVENTORY",
            AppError::PerPersonLimitExceeded { .. } => "PER_PERSON_LIMIT",
            AppError::InvalidPaymentMethod => "INVALID_PAYMENT_METHOD",
            AppError::Conflict(_) => "CONFLICT",
            AppError::State(_) => "STATE",
            AppError::AlreadyProcessed => "ALREADY_PROCESSED",
            AppError::InvalidManualSelection(_) => "INVALID_MANUAL_SELECTION",
            AppError::DrawTimeout => "DRAW_TIMEOUT",
            AppError::Database(_) => "DATABASE",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::OutOfRange(_)
            | AppError::InvalidPaymentMethod
            | AppError::InvalidManualSelection(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RaffleNotActive
            | AppError::InsufficientInventory { .. }
            | AppError::PerPersonLimitExceeded { .. }
            | AppError::Conflict(_)
            | AppError::State(_)
            | AppError::AlreadyProcessed => StatusCode::CONFLICT,
            AppError::DrawTimeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!("{self}");
        }

        let body = json!({
            "code": self.code(),
            "message": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::{busy_or_locked, AppError};

    #[test]
    fn busy_and_locked_codes_are_recognized() {
        // 517 = BUSY_SNAPSHOT, 262 = LOCKED_SHAREDCACHE.
        for code in ["5", "6", "517", "262"] {
            assert!(busy_or_locked(Some(code)), "{code}");
        }

        // 1555 = CONSTRAINT_PRIMARYKEY, 2067 = CONSTRAINT_UNIQUE.
        for code in ["1", "19", "1555", "2067"] {
            assert!(!busy_or_locked(Some(code)), "{code}");
        }

        assert!(!busy_or_locked(None));
    }

    #[test]
    fn codes_are_distinct() {
        let errors = [
            AppError::Validation("x".into()),
            AppError::NotFound("raffle"),
            AppError::RaffleNotActive,
            AppError::OutOfRange(101),
            AppError::InsufficientInventory {
                requested: 5,
                available: 2,
            },
            AppError::PerPersonLimitExceeded { limit: 10 },
            AppError::InvalidPaymentMethod,
            AppError::Conflict("x".into()),
            AppError::State("x".into()),
            AppError::AlreadyProcessed,
            AppError::InvalidManualSelection("x".into()),
            AppError::DrawTimeout,
        ];

        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();

        assert_eq!(codes.len(), errors.len());
    }
}
