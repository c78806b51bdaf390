use serde::{Deserialize, Serialize};

use super::*;

#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct OutcomeOverviewResponse {
    pub outcome: OutcomeId,
    pub forecasts: u64,
    pub stake: Amount,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct PredictionOverviewResponse {
    pub prediction: Prediction,
    pub outcomes: Vec<OutcomeOverviewResponse>,
}
