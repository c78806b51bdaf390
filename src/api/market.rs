use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Amount = u64;
pub type Account = secp256k1::PublicKey;
pub type OutcomeId = u8;
pub type ForecastIndex = u64;

/// Opaque caller-assigned market identifier. Travels as hex on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PredictionId(Vec<u8>);

impl PredictionId {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub id: PredictionId,
    pub end_time: DateTime<Utc>,
    pub fee: Amount,
    pub outcomes_count: OutcomeId,
    pub total_tokens: Amount,
    pub status: Status,
    pub winning_outcome: Option<OutcomeId>,
    pub oracle: String,
    pub calculator: String,
    pub paid_out: Amount,
}
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewPrediction {
    pub id: PredictionId,
    pub end_time: DateTime<Utc>,
    pub fee: Amount,
    pub outcomes_count: OutcomeId,
    pub total_tokens: Amount,
    pub oracle: String,
    pub calculator: String,
}
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Forecast {
    pub forecaster: Account,
    pub net_amount: Amount,
    pub settled: bool,
}
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Status {
    Open,
    Resolved,
    Locked,
    Cancelled,
}
/// Where a payout or refund batch stopped. Re-invoke with `next_index`
/// until `exhausted` is set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SettlementCursor {
    pub settled: u32,
    pub transferred: Amount,
    pub next_index: ForecastIndex,
    pub exhausted: bool,
}
