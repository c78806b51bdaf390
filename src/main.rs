use crate::api::*;
use crate::calculator::ProportionalCalculator;
use crate::collaborators::Collaborators;
use crate::db::SQLite;
use crate::error::{map_market_err, MarketError};
use crate::foresight::Foresight;
use crate::oracle::{HttpOracle, ManualOracle};
use crate::settings::Settings;
use crate::token_ledger::TestTokenLedger;
use anyhow::{anyhow, Result};
use axum::extract::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use axum_macros::debug_handler;
use clap::Parser;
use env_logger::{Builder, WriteStyle};
use log::{debug, error, trace, LevelFilter};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

mod api;
mod calculator;
mod client;
mod collaborators;
mod db;
mod error;
mod foresight;
mod oracle;
mod settings;
mod token_ledger;

#[debug_handler]
async fn get_login_challenge(
    State(state): State<Arc<RwLock<Foresight>>>,
    Json(user): Json<Account>,
) -> Result<String, (StatusCode, String)> {
    let backend = state.write().await;
    trace!("Getting login challenge for {}", user);
    let challenge = backend
        .create_login_challenge(user)
        .await
        .map_err(map_market_err)?;
    debug!("Login challenge for user {}: {}", user, challenge);
    Ok(challenge)
}
async fn try_login(
    State(state): State<Arc<RwLock<Foresight>>>,
    Json(request): Json<LoginRequest>,
) -> Result<(), (StatusCode, String)> {
    let backend = state.write().await;
    backend
        .try_login(request.user, request.sig, request.challenge)
        .await
        .map_err(map_market_err)?;
    debug!("User {} successfully logged in", request.user);
    Ok(())
}
async fn check_login(
    State(state): State<Arc<RwLock<Foresight>>>,
    Json(request): Json<AccessRequest>,
) -> Result<(), (StatusCode, String)> {
    let backend = state.read().await;
    backend.check_access(request).await.map_err(map_market_err)?;
    Ok(())
}
#[debug_handler]
async fn initialize(
    State(state): State<Arc<RwLock<Foresight>>>,
    Json(request): Json<PostRequest<InitializeRequest>>,
) -> Result<(), (StatusCode, String)> {
    let backend = state.write().await;
    backend
        .check_operator(request.access)
        .await
        .map_err(map_market_err)?;
    backend
        .initialize(&request.data.ledger)
        .await
        .map_err(map_market_err)?;
    Ok(())
}
async fn add_prediction(
    State(state): State<Arc<RwLock<Foresight>>>,
    Json(request): Json<PostRequest<NewPrediction>>,
) -> Result<StatusCode, (StatusCode, String)> {
    let backend = state.write().await;
    backend
        .check_operator(request.access)
        .await
        .map_err(map_market_err)?;
    backend
        .add_prediction(request.data)
        .await
        .map_err(map_market_err)?;
    Ok(StatusCode::CREATED)
}
async fn on_token_transfer(
    State(state): State<Arc<RwLock<Foresight>>>,
    Json(request): Json<PostRequest<DepositNotification>>,
) -> Result<(StatusCode, Json<ForecastIndex>), (StatusCode, String)> {
    let backend = state.write().await;
    backend
        .check_operator(request.access)
        .await
        .map_err(map_market_err)?;
    let request = request.data;
    let routing = hex::decode(&request.routing)
        .map_err(|e| map_market_err(MarketError::InvalidRoutingData(e.into())))?;
    let index = backend
        .on_token_transfer(&request.ledger, request.from, request.amount, &routing)
        .await
        .map_err(map_market_err)?;
    Ok((StatusCode::CREATED, Json(index)))
}
async fn change_prediction_status(
    State(state): State<Arc<RwLock<Foresight>>>,
    Json(request): Json<PostRequest<ChangeStatusRequest>>,
) -> Result<(), (StatusCode, String)> {
    let backend = state.write().await;
    let caller = backend
        .check_access(request.access)
        .await
        .map_err(map_market_err)?;
    backend
        .change_prediction_status(&caller, &request.data.prediction, request.data.status)
        .await
        .map_err(map_market_err)?;
    Ok(())
}
async fn cancel(
    State(state): State<Arc<RwLock<Foresight>>>,
    Json(request): Json<PostRequest<PredictionRequest>>,
) -> Result<(), (StatusCode, String)> {
    let backend = state.write().await;
    backend
        .check_operator(request.access)
        .await
        .map_err(map_market_err)?;
    backend
        .cancel(&request.data.prediction)
        .await
        .map_err(map_market_err)?;
    Ok(())
}
async fn resolve(
    State(state): State<Arc<RwLock<Foresight>>>,
    Json(request): Json<PredictionRequest>,
) -> Result<(), (StatusCode, String)> {
    let backend = state.write().await;
    backend
        .resolve(&request.prediction)
        .await
        .map_err(map_market_err)?;
    Ok(())
}
async fn report_outcome(
    State(state): State<Arc<RwLock<Foresight>>>,
    Json(request): Json<PostRequest<ReportOutcomeRequest>>,
) -> Result<(), (StatusCode, String)> {
    let backend = state.write().await;
    let caller = backend
        .check_access(request.access)
        .await
        .map_err(map_market_err)?;
    let request = request.data;
    backend
        .report_outcome(&caller, &request.oracle, &request.prediction, request.outcome)
        .await
        .map_err(map_market_err)?;
    Ok(())
}
#[debug_handler]
async fn payout(
    State(state): State<Arc<RwLock<Foresight>>>,
    Json(request): Json<SettleRequest>,
) -> Result<Json<SettlementCursor>, (StatusCode, String)> {
    let backend = state.write().await;
    let cursor = backend
        .payout(
            &request.prediction,
            request.outcome,
            request.start_index,
            request.limit,
        )
        .await
        .map_err(map_market_err)?;
    Ok(Json(cursor))
}
async fn refund(
    State(state): State<Arc<RwLock<Foresight>>>,
    Json(request): Json<SettleRequest>,
) -> Result<Json<SettlementCursor>, (StatusCode, String)> {
    let backend = state.write().await;
    let cursor = backend
        .refund(
            &request.prediction,
            request.outcome,
            request.start_index,
            request.limit,
        )
        .await
        .map_err(map_market_err)?;
    Ok(Json(cursor))
}
async fn get_forecast(
    State(state): State<Arc<RwLock<Foresight>>>,
    Json(request): Json<ForecastRequest>,
) -> Result<Json<Forecast>, (StatusCode, String)> {
    let backend = state.read().await;
    let forecast = backend
        .get_forecast(&request.prediction, request.outcome, request.index)
        .await
        .map_err(map_market_err)?;
    Ok(Json(forecast))
}
async fn get_forecast_count(
    State(state): State<Arc<RwLock<Foresight>>>,
    Json(request): Json<OutcomeRequest>,
) -> Result<Json<u64>, (StatusCode, String)> {
    let backend = state.read().await;
    let count = backend
        .get_forecast_count(&request.prediction, request.outcome)
        .await
        .map_err(map_market_err)?;
    Ok(Json(count))
}
async fn get_outcome_stake(
    State(state): State<Arc<RwLock<Foresight>>>,
    Json(request): Json<OutcomeRequest>,
) -> Result<Json<Amount>, (StatusCode, String)> {
    let backend = state.read().await;
    let stake = backend
        .get_outcome_stake(&request.prediction, request.outcome)
        .await
        .map_err(map_market_err)?;
    Ok(Json(stake))
}
async fn get_prediction(
    State(state): State<Arc<RwLock<Foresight>>>,
    Json(request): Json<PredictionRequest>,
) -> Result<Json<PredictionOverviewResponse>, (StatusCode, String)> {
    let backend = state.read().await;
    let overview = backend
        .get_prediction_overview(&request.prediction)
        .await
        .map_err(map_market_err)?;
    Ok(Json(overview))
}
async fn get_predictions(
    State(state): State<Arc<RwLock<Foresight>>>,
) -> Result<Json<Vec<Prediction>>, (StatusCode, String)> {
    let backend = state.read().await;
    let predictions = backend.get_predictions().await.map_err(map_market_err)?;
    Ok(Json(predictions))
}
async fn test_fund(
    State(ledger): State<TestTokenLedger>,
    Json(amount): Json<Amount>,
) -> Result<(), (StatusCode, String)> {
    ledger.deposit(amount).map_err(map_any_err_and_code)?;
    debug!("Test ledger took {} into custody", amount);
    Ok(())
}
async fn test_receive(
    State(ledger): State<TestTokenLedger>,
    Json(request): Json<TestReceiveRequest>,
) -> Result<(), (StatusCode, String)> {
    ledger
        .receive(request.from, request.amount)
        .map_err(map_any_err_and_code)?;
    debug!(
        "Test ledger received {} from {}",
        request.amount, request.from
    );
    Ok(())
}
async fn test_balance(
    State(ledger): State<TestTokenLedger>,
    Json(account): Json<Account>,
) -> Json<Amount> {
    Json(ledger.balance(&account))
}

#[derive(Parser)]
struct Args {
    /// Settings file, without extension
    #[arg(short, long, default_value = "foresight")]
    config: String,
    #[arg(short, long)]
    port: Option<u16>,
    #[arg(short, long)]
    test: bool,
    #[arg(short, long)]
    db: Option<String>,
    #[arg(short, long)]
    operator: Option<Account>,
    #[arg(short, long)]
    batch_cap: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    Builder::default()
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .write_style(WriteStyle::Always)
        .init();
    let cli = Args::parse();
    let mut settings = Settings::load(&cli.config)?;
    settings.port = cli.port.unwrap_or(settings.port);
    settings.test |= cli.test;
    settings.db = cli.db.or(settings.db);
    settings.operator = cli.operator.or(settings.operator);
    settings.batch_cap = cli.batch_cap.unwrap_or(settings.batch_cap);
    let (_port, handle) = run_server(settings).await?;
    handle.await?;
    Ok(())
}

async fn run_server(settings: Settings) -> Result<(u16, JoinHandle<()>)> {
    let operator = settings
        .operator
        .ok_or(anyhow!("No operator configured"))?;
    let ledger = TestTokenLedger::default();
    let mut collaborators = Collaborators::default()
        .with_ledger("test", Arc::new(ledger.clone()))
        .with_oracle("manual", Arc::new(ManualOracle::default()))
        .with_calculator("proportional", Arc::new(ProportionalCalculator));
    if let Some(url) = settings.oracle_url {
        debug!("Using oracle at {}", url);
        collaborators = collaborators.with_oracle("http", Arc::new(HttpOracle::new(url)));
    }
    let state = Arc::new(RwLock::new(Foresight::new(
        Box::new(SQLite::new(settings.db).await?),
        collaborators,
        operator,
        settings.batch_cap,
        settings.test,
    )));
    let mut app = Router::new()
        .route("/get_login_challenge", post(get_login_challenge))
        .route("/try_login", post(try_login))
        .route("/check_login", post(check_login))
        .route("/initialize", post(initialize))
        .route("/add_prediction", post(add_prediction))
        .route("/on_token_transfer", post(on_token_transfer))
        .route("/change_prediction_status", post(change_prediction_status))
        .route("/cancel", post(cancel))
        .route("/resolve", post(resolve))
        .route("/report_outcome", post(report_outcome))
        .route("/payout", post(payout))
        .route("/refund", post(refund))
        .route("/get_forecast", post(get_forecast))
        .route("/get_forecast_count", post(get_forecast_count))
        .route("/get_outcome_stake", post(get_outcome_stake))
        .route("/get_prediction", post(get_prediction))
        .route("/get_predictions", get(get_predictions))
        .with_state(state);
    if settings.test {
        app = app.merge(
            Router::new()
                .route("/test/fund", post(test_fund))
                .route("/test/receive", post(test_receive))
                .route("/test/balance", post(test_balance))
                .with_state(ledger),
        );
    }

    let addr: SocketAddr = ("127.0.0.1:".to_string() + settings.port.to_string().as_str()).parse()?;
    let server = axum::Server::try_bind(&addr)?.serve(app.into_make_service());
    let port = server.local_addr().port();
    debug!("Listening on {}", server.local_addr());
    let handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Server stopped: {}", e);
        }
    });
    Ok((port, handle))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::Client;
    use chrono::{Duration, Utc};
    use secp256k1::{ecdsa::Signature, generate_keypair, rand};
    use std::str::FromStr;

    fn get_test_access() -> AccessRequest {
        AccessRequest {
            user: Account::from_str("023d51452445aa81ecc3cfcb82dbfe937707db5c89f9f9d21d64835158df405d8c").unwrap(),
            sig: Signature::from_str("30440220208cef162c7081dafc61004daec32f5a3dadb4c6a1b4c0a479056a4962288d47022069022bc92673f73e9843cea14fa0cc46efa1b1e150339b603444c63035de21ee").unwrap(),
            challenge: "iT1HqC3oaoGjbSZEjAwpGZiCbzjtyz".to_string()
        }
    }

    async fn start() -> (Client, AccessRequest) {
        let access = get_test_access();
        let (port, _) = run_server(Settings {
            port: 0,
            operator: Some(access.user),
            test: true,
            ..Default::default()
        })
        .await
        .unwrap();
        let client = Client::new("http://127.0.0.1:".to_string() + port.to_string().as_str());
        client
            .initialize("test".into(), access.clone())
            .await
            .unwrap();
        client.check_login(access.clone()).await.unwrap();
        (client, access)
    }

    fn new_prediction(name: &str) -> NewPrediction {
        NewPrediction {
            id: PredictionId::from(name),
            end_time: Utc::now() - Duration::minutes(1),
            fee: 12,
            outcomes_count: 2,
            total_tokens: 1000,
            oracle: "manual".into(),
            calculator: "proportional".into(),
        }
    }

    fn notification(
        prediction: &str,
        outcome: OutcomeId,
        from: Account,
        amount: Amount,
    ) -> DepositNotification {
        let routing = RoutingData {
            prediction: PredictionId::from(prediction),
            outcome,
        };
        DepositNotification {
            ledger: "test".into(),
            from,
            amount,
            routing: hex::encode(routing.encode()),
        }
    }

    async fn deposit(
        client: &Client,
        access: &AccessRequest,
        prediction: &str,
        outcome: OutcomeId,
        from: Account,
        amount: Amount,
    ) -> Result<ForecastIndex> {
        client.test_receive(from, amount).await?;
        client
            .on_token_transfer(
                notification(prediction, outcome, from, amount),
                access.clone(),
            )
            .await
    }

    #[tokio::test]
    async fn resolve_and_pay_out() {
        let (client, access) = start().await;
        let id = PredictionId::from("M");
        client
            .get_prediction(id.clone())
            .await
            .unwrap_err();
        client
            .add_prediction(new_prediction("M"), access.clone())
            .await
            .unwrap();

        let (_, u1) = generate_keypair(&mut rand::thread_rng());
        let (_, u2) = generate_keypair(&mut rand::thread_rng());
        assert_eq!(deposit(&client, &access, "M", 1, u1, 112).await.unwrap(), 0);
        assert_eq!(deposit(&client, &access, "M", 2, u2, 62).await.unwrap(), 0);
        deposit(&client, &access, "M", 1, u1, 12).await.unwrap_err();
        let forecast = client
            .get_forecast(ForecastRequest {
                prediction: id.clone(),
                outcome: 1,
                index: 0,
            })
            .await
            .unwrap();
        assert_eq!(forecast.net_amount, 100);
        assert_eq!(
            client
                .get_outcome_stake(OutcomeRequest {
                    prediction: id.clone(),
                    outcome: 2,
                })
                .await
                .unwrap(),
            50
        );

        client.resolve(id.clone()).await.unwrap_err();
        client
            .report_outcome(
                ReportOutcomeRequest {
                    oracle: "manual".into(),
                    prediction: id.clone(),
                    outcome: 1,
                },
                access.clone(),
            )
            .await
            .unwrap();
        client.resolve(id.clone()).await.unwrap();

        let mut settle = SettleRequest {
            prediction: id.clone(),
            outcome: 2,
            start_index: 0,
            limit: 0,
        };
        client.payout(settle.clone()).await.unwrap_err();
        client.test_fund(1000).await.unwrap();
        settle.outcome = 1;
        let cursor = client.payout(settle.clone()).await.unwrap();
        assert_eq!(cursor.settled, 1);
        assert!(cursor.exhausted);
        assert_eq!(client.test_balance(u1).await.unwrap(), 1000);
        assert_eq!(client.test_balance(u2).await.unwrap(), 0);
        assert_eq!(client.payout(settle).await.unwrap().settled, 0);

        let overview = client.get_prediction(id).await.unwrap();
        assert_eq!(overview.prediction.status, Status::Resolved);
        assert_eq!(overview.prediction.paid_out, 1000);
        assert_eq!(overview.outcomes[0].forecasts, 1);
        assert_eq!(client.get_predictions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn forged_deposits_are_rejected() {
        let (client, access) = start().await;
        let id = PredictionId::from("M");
        client
            .add_prediction(new_prediction("M"), access.clone())
            .await
            .unwrap();
        let (_, u1) = generate_keypair(&mut rand::thread_rng());
        let count = OutcomeRequest {
            prediction: id.clone(),
            outcome: 1,
        };

        client
            .on_token_transfer(notification("M", 1, u1, 1_000_012), access.clone())
            .await
            .unwrap_err();
        assert_eq!(client.get_forecast_count(count.clone()).await.unwrap(), 0);

        client.test_receive(u1, 112).await.unwrap();
        let mut other = access.clone();
        other.user = u1;
        client
            .on_token_transfer(notification("M", 1, u1, 112), other)
            .await
            .unwrap_err();
        assert_eq!(client.get_forecast_count(count.clone()).await.unwrap(), 0);

        client
            .on_token_transfer(notification("M", 1, u1, 112), access.clone())
            .await
            .unwrap();
        client
            .on_token_transfer(notification("M", 1, u1, 112), access)
            .await
            .unwrap_err();
        assert_eq!(client.get_forecast_count(count).await.unwrap(), 1);
        assert_eq!(
            client
                .get_outcome_stake(OutcomeRequest {
                    prediction: id,
                    outcome: 1,
                })
                .await
                .unwrap(),
            100
        );
    }

    #[tokio::test]
    async fn cancel_and_refund() {
        let (client, access) = start().await;
        let id = PredictionId::from("M");
        client
            .add_prediction(new_prediction("M"), access.clone())
            .await
            .unwrap();
        let (_, u1) = generate_keypair(&mut rand::thread_rng());
        deposit(&client, &access, "M", 1, u1, 112).await.unwrap();

        let mut other = access.clone();
        other.user = u1;
        client.cancel(id.clone(), other).await.unwrap_err();
        client
            .change_prediction_status(
                ChangeStatusRequest {
                    prediction: id.clone(),
                    status: Status::Locked,
                },
                access.clone(),
            )
            .await
            .unwrap();
        deposit(&client, &access, "M", 1, u1, 112).await.unwrap_err();
        client
            .change_prediction_status(
                ChangeStatusRequest {
                    prediction: id.clone(),
                    status: Status::Open,
                },
                access.clone(),
            )
            .await
            .unwrap();
        client.cancel(id.clone(), access).await.unwrap();

        let settle = SettleRequest {
            prediction: id.clone(),
            outcome: 1,
            start_index: 0,
            limit: 0,
        };
        let cursor = client.refund(settle.clone()).await.unwrap();
        assert_eq!(cursor.transferred, 100);
        assert_eq!(client.test_balance(u1).await.unwrap(), 100);
        assert_eq!(client.refund(settle).await.unwrap().settled, 0);
        assert_eq!(
            client
                .get_forecast_count(OutcomeRequest {
                    prediction: id,
                    outcome: 1,
                })
                .await
                .unwrap(),
            1
        );
    }
}
