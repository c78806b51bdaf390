use crate::api::{ForecastIndex, OutcomeId, PredictionId, SettlementCursor, Status};
use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MarketError>;

#[derive(Error, Debug)]
pub enum MarketError {
    #[error("Token ledger is already initialized")]
    AlreadyInitialized,
    #[error("Token ledger is not initialized")]
    NotInitialized,
    #[error("Prediction {0} already exists")]
    DuplicateId(PredictionId),
    #[error("Prediction {0} doesn't exist")]
    UnknownPrediction(PredictionId),
    #[error("Operation not valid while prediction {prediction} is {status}")]
    InvalidState {
        prediction: PredictionId,
        status: Status,
    },
    #[error("Access denied: {0}")]
    Unauthorized(String),
    #[error("Outcome {outcome} is outside of 1..={outcomes_count}")]
    InvalidOutcome {
        outcome: OutcomeId,
        outcomes_count: OutcomeId,
    },
    #[error("Deposit of {amount} doesn't exceed the fee of {fee}")]
    InsufficientAmount { amount: u64, fee: u64 },
    #[error("Prediction {0} can't be resolved before its end time")]
    DeadlineNotReached(PredictionId),
    #[error("No forecast {index} on outcome {outcome} of prediction {prediction}")]
    NotFound {
        prediction: PredictionId,
        outcome: OutcomeId,
        index: ForecastIndex,
    },
    #[error("No collaborator registered as \"{0}\"")]
    UnknownCollaborator(String),
    #[error("Invalid routing data: {0:#}")]
    InvalidRoutingData(anyhow::Error),
    #[error("Paying {amount} would exceed the prize pool of prediction {prediction}")]
    Insolvent { prediction: PredictionId, amount: u64 },
    #[error("Oracle failed: {0:#}")]
    Oracle(anyhow::Error),
    #[error("Outcome calculator failed: {0:#}")]
    Calculator(anyhow::Error),
    #[error("Transfer failed: {0:#}")]
    Transfer(anyhow::Error),
    #[error("Deposit isn't in custody: {0:#}")]
    UnfundedDeposit(anyhow::Error),
    /// A batch stopped after settling some forecasts. `cursor` counts those
    /// and points at the forecast that failed.
    #[error(
        "Settled {} forecasts before index {}: {source}",
        .cursor.settled,
        .cursor.next_index
    )]
    Interrupted {
        cursor: SettlementCursor,
        source: Box<MarketError>,
    },
    #[error("Storage failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl MarketError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownPrediction(_) | Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::AlreadyInitialized
            | Self::NotInitialized
            | Self::DuplicateId(_)
            | Self::InvalidState { .. }
            | Self::DeadlineNotReached(_)
            | Self::Insolvent { .. } => StatusCode::CONFLICT,
            Self::InvalidOutcome { .. }
            | Self::InsufficientAmount { .. }
            | Self::UnknownCollaborator(_)
            | Self::InvalidRoutingData(_)
            | Self::UnfundedDeposit(_) => StatusCode::BAD_REQUEST,
            Self::Oracle(_) | Self::Calculator(_) | Self::Transfer(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Interrupted { source, .. } => source.status_code(),
        }
    }
}

pub fn map_market_err(e: MarketError) -> (StatusCode, String) {
    log::debug!("Error: {}", e);
    (e.status_code(), e.to_string())
}
