use crate::api::*;
use crate::collaborators::{Calculator, Collaborators, Ledger};
use crate::db::DB;
use crate::error::{MarketError, Result};
use chrono::{Duration, Utc};
use log::{debug, error, trace};
use secp256k1::ecdsa::Signature;
use secp256k1::hashes::sha256::Hash;
use secp256k1::rand::distributions::Alphanumeric;
use secp256k1::rand::Rng;
use secp256k1::{rand, Message};
use std::sync::Arc;

const LEDGER_SETTING: &str = "token_ledger";

pub const DEFAULT_BATCH_CAP: u32 = 50;

/// How a traversal prices each unsettled forecast.
enum Settlement {
    Payout {
        calculator: Calculator,
        total_stake: Amount,
    },
    Refund,
}
impl Settlement {
    fn amount(&self, forecast: &Forecast, pool: Amount) -> Result<Amount> {
        match self {
            Self::Payout {
                calculator,
                total_stake,
            } => calculator
                .compute_share(forecast.net_amount, *total_stake, pool)
                .map_err(MarketError::Calculator),
            Self::Refund => Ok(forecast.net_amount),
        }
    }
}

/// The market state machine. Owns the prediction registry and forecast
/// ledger (through `db`) and drives the external collaborators.
///
/// All writes an operation depends on happen before it calls out to a token
/// ledger or oracle, and every guarded write is re-checked by the store, so
/// a collaborator calling back into the market can't double-settle.
pub struct Foresight {
    db: Arc<Box<dyn DB + Send + Sync>>,
    collaborators: Collaborators,
    operator: Account,
    batch_cap: u32,
    test: bool,
}

impl Foresight {
    pub fn new(
        db: Box<dyn DB + Send + Sync>,
        collaborators: Collaborators,
        operator: Account,
        batch_cap: u32,
        test: bool,
    ) -> Self {
        Self {
            db: Arc::new(db),
            collaborators,
            operator,
            batch_cap: batch_cap.max(1),
            test,
        }
    }
    pub async fn initialize(&self, ledger: &str) -> Result<()> {
        self.collaborators.ledger(ledger)?;
        if !self.db.init_setting(LEDGER_SETTING, ledger).await? {
            return Err(MarketError::AlreadyInitialized);
        }
        debug!("Bound token ledger {}", ledger);
        Ok(())
    }
    async fn bound_ledger(&self) -> Result<(String, Ledger)> {
        let name = self
            .db
            .get_setting(LEDGER_SETTING)
            .await?
            .ok_or(MarketError::NotInitialized)?;
        let ledger = self.collaborators.ledger(&name)?;
        Ok((name, ledger))
    }
    pub async fn add_prediction(&self, prediction: NewPrediction) -> Result<()> {
        if prediction.outcomes_count == 0 {
            return Err(MarketError::InvalidOutcome {
                outcome: 0,
                outcomes_count: 0,
            });
        }
        self.collaborators.oracle(&prediction.oracle)?;
        self.collaborators.calculator(&prediction.calculator)?;
        let id = prediction.id.clone();
        let added = self
            .db
            .add_prediction(&Prediction {
                id: prediction.id,
                end_time: prediction.end_time,
                fee: prediction.fee,
                outcomes_count: prediction.outcomes_count,
                total_tokens: prediction.total_tokens,
                status: Status::Open,
                winning_outcome: None,
                oracle: prediction.oracle,
                calculator: prediction.calculator,
                paid_out: 0,
            })
            .await?;
        if !added {
            return Err(MarketError::DuplicateId(id));
        }
        debug!("Added prediction {}", id);
        Ok(())
    }
    async fn prediction(&self, prediction: &PredictionId) -> Result<Prediction> {
        self.db
            .get_prediction(prediction)
            .await?
            .ok_or_else(|| MarketError::UnknownPrediction(prediction.clone()))
    }
    fn check_outcome(prediction: &Prediction, outcome: OutcomeId) -> Result<()> {
        if outcome == 0 || outcome > prediction.outcomes_count {
            return Err(MarketError::InvalidOutcome {
                outcome,
                outcomes_count: prediction.outcomes_count,
            });
        }
        Ok(())
    }
    fn invalid_state(prediction: &Prediction) -> MarketError {
        MarketError::InvalidState {
            prediction: prediction.id.clone(),
            status: prediction.status,
        }
    }
    /// Entry point for deposit notifications. Only the bound ledger may
    /// notify, and only for funds it holds and no forecast was credited for.
    pub async fn on_token_transfer(
        &self,
        ledger: &str,
        from: Account,
        amount: Amount,
        routing: &[u8],
    ) -> Result<ForecastIndex> {
        let (bound, custodian) = self.bound_ledger().await?;
        if bound != ledger {
            debug!("Rejected deposit notification from ledger {}", ledger);
            return Err(MarketError::Unauthorized(format!(
                "{} is not the bound token ledger",
                ledger
            )));
        }
        let routing = RoutingData::decode(routing).map_err(MarketError::InvalidRoutingData)?;
        self.check_deposit(&routing.prediction, routing.outcome, amount)
            .await?;
        custodian
            .claim_deposit(&from, amount)
            .await
            .map_err(MarketError::UnfundedDeposit)?;
        match self
            .on_deposit(&routing.prediction, routing.outcome, from, amount)
            .await
        {
            Ok(index) => Ok(index),
            Err(e) => {
                // Claimed but not credited, so the funds go back.
                error!("Returning deposit of {} to {}: {}", amount, from, e);
                custodian
                    .transfer(&from, amount)
                    .await
                    .map_err(MarketError::Transfer)?;
                Err(e)
            }
        }
    }
    async fn check_deposit(
        &self,
        prediction: &PredictionId,
        outcome: OutcomeId,
        amount: Amount,
    ) -> Result<Prediction> {
        let prediction = self.prediction(prediction).await?;
        if prediction.status != Status::Open {
            return Err(Self::invalid_state(&prediction));
        }
        Self::check_outcome(&prediction, outcome)?;
        if amount <= prediction.fee {
            return Err(MarketError::InsufficientAmount {
                amount,
                fee: prediction.fee,
            });
        }
        Ok(prediction)
    }
    pub async fn on_deposit(
        &self,
        prediction: &PredictionId,
        outcome: OutcomeId,
        depositor: Account,
        amount: Amount,
    ) -> Result<ForecastIndex> {
        let prediction = self.check_deposit(prediction, outcome, amount).await?;
        let net_amount = amount - prediction.fee;
        let index = self
            .db
            .append_forecast(&prediction.id, outcome, &depositor, net_amount)
            .await?;
        debug!(
            "Forecast {} of {} on outcome {} of prediction {} by {}",
            index, net_amount, outcome, prediction.id, depositor
        );
        Ok(index)
    }
    /// Operator escape hatch: sets any status without consulting the
    /// transition table and touches nothing else.
    pub async fn change_prediction_status(
        &self,
        caller: &Account,
        prediction: &PredictionId,
        status: Status,
    ) -> Result<()> {
        if *caller != self.operator {
            debug!("{} tried to override the status of {}", caller, prediction);
            return Err(MarketError::Unauthorized(
                "Changing the status is operator only".to_string(),
            ));
        }
        if !self.db.set_prediction_status(prediction, status).await? {
            return Err(MarketError::UnknownPrediction(prediction.clone()));
        }
        debug!("Operator set prediction {} to {}", prediction, status);
        Ok(())
    }
    pub async fn cancel(&self, prediction: &PredictionId) -> Result<()> {
        let current = self.prediction(prediction).await?;
        if !self
            .db
            .transition_prediction_status(prediction, Status::Open, Status::Cancelled)
            .await?
        {
            return Err(Self::invalid_state(&current));
        }
        debug!("Cancelled prediction {}", prediction);
        Ok(())
    }
    pub async fn resolve(&self, prediction: &PredictionId) -> Result<()> {
        let current = self.prediction(prediction).await?;
        if current.status != Status::Open {
            return Err(Self::invalid_state(&current));
        }
        if Utc::now() < current.end_time {
            return Err(MarketError::DeadlineNotReached(prediction.clone()));
        }
        let oracle = self.collaborators.oracle(&current.oracle)?;
        let outcome = oracle
            .get_outcome(prediction)
            .await
            .map_err(MarketError::Oracle)?;
        Self::check_outcome(&current, outcome)?;
        // The oracle may have called back in, so the transition only applies
        // if the prediction is still Open.
        if !self.db.resolve_prediction(prediction, outcome).await? {
            let changed = self.prediction(prediction).await?;
            debug!(
                "Prediction {} changed to {} while asking the oracle",
                prediction, changed.status
            );
            return Err(Self::invalid_state(&changed));
        }
        debug!("Resolved prediction {} to outcome {}", prediction, outcome);
        Ok(())
    }
    pub async fn payout(
        &self,
        prediction: &PredictionId,
        outcome: OutcomeId,
        start_index: ForecastIndex,
        limit: u32,
    ) -> Result<SettlementCursor> {
        let current = self.prediction(prediction).await?;
        if current.status != Status::Resolved || current.winning_outcome != Some(outcome) {
            return Err(Self::invalid_state(&current));
        }
        let (_, ledger) = self.bound_ledger().await?;
        let settlement = Settlement::Payout {
            calculator: self.collaborators.calculator(&current.calculator)?,
            total_stake: self.db.get_outcome_stake(prediction, outcome).await?,
        };
        self.settle(&current, outcome, start_index, limit, &ledger, settlement)
            .await
    }
    pub async fn refund(
        &self,
        prediction: &PredictionId,
        outcome: OutcomeId,
        start_index: ForecastIndex,
        limit: u32,
    ) -> Result<SettlementCursor> {
        let current = self.prediction(prediction).await?;
        if current.status != Status::Cancelled {
            return Err(Self::invalid_state(&current));
        }
        Self::check_outcome(&current, outcome)?;
        let (_, ledger) = self.bound_ledger().await?;
        self.settle(
            &current,
            outcome,
            start_index,
            limit,
            &ledger,
            Settlement::Refund,
        )
        .await
    }
    async fn settle(
        &self,
        prediction: &Prediction,
        outcome: OutcomeId,
        start_index: ForecastIndex,
        limit: u32,
        ledger: &Ledger,
        settlement: Settlement,
    ) -> Result<SettlementCursor> {
        let id = &prediction.id;
        let limit = if limit == 0 {
            self.batch_cap
        } else {
            limit.min(self.batch_cap)
        };
        let batch = self
            .db
            .get_forecasts(id, outcome, start_index, limit)
            .await?;
        let mut cursor = SettlementCursor {
            next_index: start_index,
            ..Default::default()
        };
        for (index, forecast) in batch {
            if forecast.settled {
                trace!("Forecast {} on {} already settled", index, id);
                cursor.next_index = index + 1;
                continue;
            }
            match self
                .settle_forecast(prediction, outcome, index, &forecast, ledger, &settlement)
                .await
            {
                Ok(Some(amount)) => {
                    cursor.settled += 1;
                    cursor.transferred += amount;
                }
                Ok(None) => {}
                Err(e) if cursor.settled > 0 => {
                    // Earlier forecasts of this batch stay paid.
                    cursor.next_index = index;
                    error!(
                        "Settlement of outcome {} of {} stopped at forecast {} after {} forecasts",
                        outcome, id, index, cursor.settled
                    );
                    return Err(MarketError::Interrupted {
                        cursor,
                        source: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
            cursor.next_index = index + 1;
        }
        cursor.exhausted = cursor.next_index >= self.db.get_forecast_count(id, outcome).await?;
        debug!(
            "Settled {} forecasts on outcome {} of {}, next index {}",
            cursor.settled, outcome, id, cursor.next_index
        );
        Ok(cursor)
    }
    /// Settles one forecast. Returns the amount moved, or None if another
    /// call settled it first.
    async fn settle_forecast(
        &self,
        prediction: &Prediction,
        outcome: OutcomeId,
        index: ForecastIndex,
        forecast: &Forecast,
        ledger: &Ledger,
        settlement: &Settlement,
    ) -> Result<Option<Amount>> {
        let id = &prediction.id;
        let amount = settlement.amount(forecast, prediction.total_tokens)?;
        if !self
            .db
            .set_forecast_settled(id, outcome, index, true)
            .await?
        {
            return Ok(None);
        }
        let is_payout = matches!(settlement, Settlement::Payout { .. });
        if is_payout && !self.db.add_paid_out(id, amount).await? {
            self.db
                .set_forecast_settled(id, outcome, index, false)
                .await?;
            error!(
                "Paying {} for forecast {} would make prediction {} insolvent",
                amount, index, id
            );
            return Err(MarketError::Insolvent {
                prediction: id.clone(),
                amount,
            });
        }
        if amount > 0 {
            if let Err(e) = ledger.transfer(&forecast.forecaster, amount).await {
                error!(
                    "Transfer of {} for forecast {} on {} failed: {:#}",
                    amount, index, id, e
                );
                if is_payout {
                    self.db.sub_paid_out(id, amount).await?;
                }
                self.db
                    .set_forecast_settled(id, outcome, index, false)
                    .await?;
                return Err(MarketError::Transfer(e));
            }
        }
        trace!(
            "Settled forecast {} on outcome {} of {} with {}",
            index,
            outcome,
            id,
            amount
        );
        Ok(Some(amount))
    }
    pub async fn report_outcome(
        &self,
        caller: &Account,
        oracle: &str,
        prediction: &PredictionId,
        outcome: OutcomeId,
    ) -> Result<()> {
        if *caller != self.operator {
            return Err(MarketError::Unauthorized(
                "Reporting outcomes is operator only".to_string(),
            ));
        }
        let current = self.prediction(prediction).await?;
        Self::check_outcome(&current, outcome)?;
        self.collaborators
            .oracle(oracle)?
            .report_outcome(prediction, outcome)
            .await
            .map_err(MarketError::Oracle)
    }
    pub async fn get_forecast(
        &self,
        prediction: &PredictionId,
        outcome: OutcomeId,
        index: ForecastIndex,
    ) -> Result<Forecast> {
        self.db
            .get_forecast(prediction, outcome, index)
            .await?
            .ok_or_else(|| MarketError::NotFound {
                prediction: prediction.clone(),
                outcome,
                index,
            })
    }
    pub async fn get_forecast_count(
        &self,
        prediction: &PredictionId,
        outcome: OutcomeId,
    ) -> Result<u64> {
        self.prediction(prediction).await?;
        Ok(self.db.get_forecast_count(prediction, outcome).await?)
    }
    pub async fn get_outcome_stake(
        &self,
        prediction: &PredictionId,
        outcome: OutcomeId,
    ) -> Result<Amount> {
        self.prediction(prediction).await?;
        Ok(self.db.get_outcome_stake(prediction, outcome).await?)
    }
    pub async fn get_prediction(&self, prediction: &PredictionId) -> Result<Prediction> {
        self.prediction(prediction).await
    }
    pub async fn get_predictions(&self) -> Result<Vec<Prediction>> {
        Ok(self.db.get_predictions().await?)
    }
    pub async fn get_prediction_overview(
        &self,
        prediction: &PredictionId,
    ) -> Result<PredictionOverviewResponse> {
        let prediction = self.prediction(prediction).await?;
        let mut outcomes = Vec::with_capacity(prediction.outcomes_count.into());
        for outcome in 1..=prediction.outcomes_count {
            outcomes.push(OutcomeOverviewResponse {
                outcome,
                forecasts: self.db.get_forecast_count(&prediction.id, outcome).await?,
                stake: self.db.get_outcome_stake(&prediction.id, outcome).await?,
            });
        }
        Ok(PredictionOverviewResponse {
            prediction,
            outcomes,
        })
    }
    pub async fn create_login_challenge(&self, user: Account) -> Result<String> {
        let challenge: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(30)
            .map(char::from)
            .collect();
        trace!("Generated login challenge {}", challenge);
        self.db
            .update_login_challenge(user, challenge.clone())
            .await?;
        Ok(challenge)
    }
    pub async fn try_login(&self, user: Account, sig: Signature, challenge: String) -> Result<()> {
        if self.db.get_login_challenge(user).await?.as_ref() != Some(&challenge) {
            return Err(MarketError::Unauthorized(format!(
                "No login challenge \"{}\" for {}",
                challenge, user
            )));
        }
        sig.verify(
            &Message::from_hashed_data::<Hash>(challenge.as_bytes()),
            &user,
        )
        .map_err(|e| MarketError::Unauthorized(format!("Invalid signature: {}", e)))?;
        self.db.update_access_token(user, sig).await?;
        Ok(())
    }
    pub async fn check_access(&self, access: AccessRequest) -> Result<Account> {
        if self.test {
            return Ok(access.user);
        }
        let (db_sig, last_access) = self
            .db
            .get_last_access(access.user)
            .await?
            .ok_or_else(|| MarketError::Unauthorized(format!("{} never logged in", access.user)))?;
        if access.sig != db_sig {
            debug!(
                "User {} tried to access with invalid access token",
                access.user
            );
            return Err(MarketError::Unauthorized(format!(
                "Access token for user {} is invalid",
                access.user
            )));
        }
        if last_access < Utc::now() - Duration::days(7) {
            debug!(
                "User {} tried to access after more than 7 days",
                access.user
            );
            return Err(MarketError::Unauthorized(
                "Last access was more than 7 days ago".to_string(),
            ));
        }
        Ok(access.user)
    }
    pub async fn check_operator(&self, access: AccessRequest) -> Result<Account> {
        let user = self.check_access(access).await?;
        if user != self.operator {
            return Err(MarketError::Unauthorized(
                "Operator only API".to_string(),
            ));
        }
        Ok(user)
    }
}
