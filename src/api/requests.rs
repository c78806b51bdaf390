use secp256k1::ecdsa::Signature;
use serde::{Deserialize, Serialize};

use super::*;

// Requests
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AccessRequest {
    pub user: Account,
    pub challenge: String,
    pub sig: Signature,
}
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PostRequest<T> {
    pub access: AccessRequest,
    pub data: T,
}
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoginRequest {
    pub user: Account,
    pub challenge: String,
    pub sig: Signature,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct InitializeRequest {
    pub ledger: String,
}
/// Sent by the operator's ledger bridge after `amount` from `from` is in
/// custody.
/// `routing` is the hex of the [`RoutingData`] the depositor attached.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DepositNotification {
    pub ledger: String,
    pub from: Account,
    pub amount: Amount,
    pub routing: String,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PredictionRequest {
    pub prediction: PredictionId,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChangeStatusRequest {
    pub prediction: PredictionId,
    pub status: Status,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ReportOutcomeRequest {
    pub oracle: String,
    pub prediction: PredictionId,
    pub outcome: OutcomeId,
}
/// Used by both payout and refund. A `limit` of 0 means the batch cap.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SettleRequest {
    pub prediction: PredictionId,
    pub outcome: OutcomeId,
    pub start_index: ForecastIndex,
    #[serde(default)]
    pub limit: u32,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ForecastRequest {
    pub prediction: PredictionId,
    pub outcome: OutcomeId,
    pub index: ForecastIndex,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OutcomeRequest {
    pub prediction: PredictionId,
    pub outcome: OutcomeId,
}
/// Test server only: funds from `from` arrive in the in-memory ledger.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TestReceiveRequest {
    pub from: Account,
    pub amount: Amount,
}
