use actix_web::http::StatusCode;
use thiserror::Error;

/// Failures talking to the expense ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success reply, carrying the ledger's own message when it sent one.
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Unexpected ledger response: {0}")]
    Decode(String),
}

/// Failures turning a bill photo into structured data.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Missing server configuration")]
    NotConfigured,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{message}")]
    Vision { status: u16, message: String },

    #[error("Unexpected vision response: {0}")]
    Decode(String),

    #[error("Could not parse bill data from image")]
    NoJsonObject,

    #[error("Bill data has an unexpected shape: {0}")]
    InvalidBill(String),
}

impl ExtractionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ExtractionError::NotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
            ExtractionError::NoJsonObject | ExtractionError::InvalidBill(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ExtractionError::Http(_)
            | ExtractionError::Vision { .. }
            | ExtractionError::Decode(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum AllocationError {
    #[error("Owed shares add up to {owed} but the bill total is {cost}")]
    ShareSum { owed: String, cost: String },
}

/// Errors that abort a whole split request before or while posting.
#[derive(Debug, Error)]
pub enum PostingError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No group configured for this split")]
    MissingGroup,

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl PostingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PostingError::InvalidRequest(_) | PostingError::MissingGroup => StatusCode::BAD_REQUEST,
            PostingError::Allocation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PostingError::Ledger(_) => StatusCode::BAD_GATEWAY,
        }
    }
}
