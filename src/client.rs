use anyhow::{bail, Result};
use reqwest::{Response, StatusCode};
use serde::Serialize;

use crate::api::*;

#[derive(Debug, Clone)]
pub struct Client {
    url: String,
    client: reqwest::Client,
}
impl Client {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::new();
        Self { url, client }
    }
    async fn post(
        &self,
        path: &'static str,
        request: impl Serialize,
        expected_code: StatusCode,
    ) -> Result<Response> {
        let response = self
            .client
            .post(self.url.clone() + path)
            .json(&request)
            .send()
            .await?;
        bail_if_err(response, expected_code).await
    }
    async fn get(&self, path: &'static str, expected_code: StatusCode) -> Result<Response> {
        let response = self.client.get(self.url.clone() + path).send().await?;
        bail_if_err(response, expected_code).await
    }
    pub async fn create_login_challenge(&self, user: Account) -> Result<String> {
        let response = self
            .post("/get_login_challenge", user, StatusCode::OK)
            .await?;
        Ok(response.text().await?)
    }
    pub async fn try_login(&self, request: LoginRequest) -> Result<()> {
        self.post("/try_login", request, StatusCode::OK).await?;
        Ok(())
    }
    pub async fn check_login(&self, access: AccessRequest) -> Result<()> {
        self.post("/check_login", access, StatusCode::OK).await?;
        Ok(())
    }
    pub async fn initialize(&self, ledger: String, access: AccessRequest) -> Result<()> {
        self.post(
            "/initialize",
            PostRequest {
                data: InitializeRequest { ledger },
                access,
            },
            StatusCode::OK,
        )
        .await?;
        Ok(())
    }
    pub async fn add_prediction(
        &self,
        prediction: NewPrediction,
        access: AccessRequest,
    ) -> Result<()> {
        self.post(
            "/add_prediction",
            PostRequest {
                data: prediction,
                access,
            },
            StatusCode::CREATED,
        )
        .await?;
        Ok(())
    }
    pub async fn on_token_transfer(
        &self,
        notification: DepositNotification,
        access: AccessRequest,
    ) -> Result<ForecastIndex> {
        let response = self
            .post(
                "/on_token_transfer",
                PostRequest {
                    data: notification,
                    access,
                },
                StatusCode::CREATED,
            )
            .await?;
        Ok(response.json::<ForecastIndex>().await?)
    }
    pub async fn change_prediction_status(
        &self,
        request: ChangeStatusRequest,
        access: AccessRequest,
    ) -> Result<()> {
        self.post(
            "/change_prediction_status",
            PostRequest {
                data: request,
                access,
            },
            StatusCode::OK,
        )
        .await?;
        Ok(())
    }
    pub async fn cancel(&self, prediction: PredictionId, access: AccessRequest) -> Result<()> {
        self.post(
            "/cancel",
            PostRequest {
                data: PredictionRequest { prediction },
                access,
            },
            StatusCode::OK,
        )
        .await?;
        Ok(())
    }
    pub async fn resolve(&self, prediction: PredictionId) -> Result<()> {
        self.post("/resolve", PredictionRequest { prediction }, StatusCode::OK)
            .await?;
        Ok(())
    }
    pub async fn report_outcome(
        &self,
        request: ReportOutcomeRequest,
        access: AccessRequest,
    ) -> Result<()> {
        self.post(
            "/report_outcome",
            PostRequest {
                data: request,
                access,
            },
            StatusCode::OK,
        )
        .await?;
        Ok(())
    }
    pub async fn payout(&self, request: SettleRequest) -> Result<SettlementCursor> {
        let response = self.post("/payout", request, StatusCode::OK).await?;
        Ok(response.json::<SettlementCursor>().await?)
    }
    pub async fn refund(&self, request: SettleRequest) -> Result<SettlementCursor> {
        let response = self.post("/refund", request, StatusCode::OK).await?;
        Ok(response.json::<SettlementCursor>().await?)
    }
    pub async fn get_forecast(&self, request: ForecastRequest) -> Result<Forecast> {
        let response = self.post("/get_forecast", request, StatusCode::OK).await?;
        Ok(response.json::<Forecast>().await?)
    }
    pub async fn get_forecast_count(&self, request: OutcomeRequest) -> Result<u64> {
        let response = self
            .post("/get_forecast_count", request, StatusCode::OK)
            .await?;
        Ok(response.json::<u64>().await?)
    }
    pub async fn get_outcome_stake(&self, request: OutcomeRequest) -> Result<Amount> {
        let response = self
            .post("/get_outcome_stake", request, StatusCode::OK)
            .await?;
        Ok(response.json::<Amount>().await?)
    }
    pub async fn get_prediction(
        &self,
        prediction: PredictionId,
    ) -> Result<PredictionOverviewResponse> {
        let response = self
            .post(
                "/get_prediction",
                PredictionRequest { prediction },
                StatusCode::OK,
            )
            .await?;
        Ok(response.json::<PredictionOverviewResponse>().await?)
    }
    pub async fn get_predictions(&self) -> Result<Vec<Prediction>> {
        let response = self.get("/get_predictions", StatusCode::OK).await?;
        Ok(response.json::<Vec<Prediction>>().await?)
    }
    /// Only served in test mode.
    pub async fn test_fund(&self, amount: Amount) -> Result<()> {
        self.post("/test/fund", amount, StatusCode::OK).await?;
        Ok(())
    }
    /// Only served in test mode.
    pub async fn test_receive(&self, from: Account, amount: Amount) -> Result<()> {
        self.post(
            "/test/receive",
            TestReceiveRequest { from, amount },
            StatusCode::OK,
        )
        .await?;
        Ok(())
    }
    /// Only served in test mode.
    pub async fn test_balance(&self, account: Account) -> Result<Amount> {
        let response = self.post("/test/balance", account, StatusCode::OK).await?;
        Ok(response.json::<Amount>().await?)
    }
}

async fn bail_if_err(response: Response, expected_code: StatusCode) -> Result<Response> {
    if response.status() != expected_code {
        bail!("{}: {}", response.status(), response.text().await?)
    } else {
        Ok(response)
    }
}
