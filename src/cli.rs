#![allow(dead_code)]
use std::str::FromStr;

use anyhow::Result;
use api::*;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use secp256k1::{
    ecdsa::Signature, generate_keypair, hashes::sha256::Hash, rand, Message, SecretKey,
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};

use crate::client::Client;

mod api;
mod client;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long)]
    url: String,
}
#[derive(Subcommand)]
enum Commands {
    GenerateKeys,
    Login,
    Initialize {
        #[arg(short, long, default_value = "test")]
        ledger: String,
    },
    AddPrediction {
        /// Prediction id as text
        #[arg(short, long)]
        prediction: String,
        #[arg(short, long)]
        end_time: DateTime<Utc>,
        #[arg(short, long)]
        fee: Amount,
        #[arg(short = 'n', long)]
        outcomes: OutcomeId,
        #[arg(short, long)]
        total_tokens: Amount,
        #[arg(long, default_value = "manual")]
        oracle: String,
        #[arg(long, default_value = "proportional")]
        calculator: String,
    },
    /// Notifies the server of a deposit the way the operator's ledger bridge would
    Deposit {
        #[arg(short, long)]
        prediction: String,
        #[arg(short, long)]
        outcome: OutcomeId,
        #[arg(short, long)]
        amount: Amount,
        #[arg(short, long, default_value = "test")]
        ledger: String,
        /// Depositor, defaults to the own key
        #[arg(long)]
        from: Option<Account>,
    },
    ChangeStatus {
        #[arg(short, long)]
        prediction: String,
        #[arg(short, long)]
        status: Status,
    },
    Cancel {
        #[arg(short, long)]
        prediction: String,
    },
    ReportOutcome {
        #[arg(short, long)]
        prediction: String,
        #[arg(short, long)]
        outcome: OutcomeId,
        #[arg(long, default_value = "manual")]
        oracle: String,
    },
    Resolve {
        #[arg(short, long)]
        prediction: String,
    },
    Payout {
        #[arg(short, long)]
        prediction: String,
        #[arg(short, long)]
        outcome: OutcomeId,
        #[arg(short, long, default_value_t = 0)]
        start: ForecastIndex,
        #[arg(short, long, default_value_t = 0)]
        limit: u32,
    },
    Refund {
        #[arg(short, long)]
        prediction: String,
        #[arg(short, long)]
        outcome: OutcomeId,
        #[arg(short, long, default_value_t = 0)]
        start: ForecastIndex,
        #[arg(short, long, default_value_t = 0)]
        limit: u32,
    },
    GetForecast {
        #[arg(short, long)]
        prediction: String,
        #[arg(short, long)]
        outcome: OutcomeId,
        #[arg(short, long)]
        index: ForecastIndex,
    },
    GetPrediction {
        #[arg(short, long)]
        prediction: String,
    },
    GetPredictions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Args::parse();
    let client = Client::new(cli.url);

    match cli.command {
        Commands::GenerateKeys => {
            let keys = generate_keypair(&mut rand::thread_rng());
            println!("Pubkey: {}", keys.1);
            let mut private = File::create("ecdsa.key").await?;
            let mut public = File::create("ecdsa.pub").await?;
            private
                .write_all(format!("{}", keys.0.display_secret()).as_bytes())
                .await?;
            public.write_all(keys.1.to_string().as_bytes()).await?;
        }
        Commands::Login => {
            let secret_key = read_secret().await?;
            let user = Account::from_secret_key_global(&secret_key);
            let challenge = client.create_login_challenge(user).await?;
            let message = Message::from_hashed_data::<Hash>(challenge.as_bytes());
            let signature = secret_key.sign_ecdsa(message);
            let mut file = File::create("access_token").await?;
            file.write_all(signature.to_string().as_bytes()).await?;
            let mut file = File::create("challenge").await?;
            file.write_all(challenge.as_bytes()).await?;
            println!("Signed Challenge \"{}\"", challenge);
            let request = LoginRequest {
                user,
                challenge,
                sig: signature,
            };
            client.try_login(request).await?;
            client.check_login(get_access().await?).await?;
            println!("Logged in as {}", user);
        }
        Commands::Initialize { ledger } => {
            client.initialize(ledger.clone(), get_access().await?).await?;
            println!("Bound token ledger {}", ledger);
        }
        Commands::AddPrediction {
            prediction,
            end_time,
            fee,
            outcomes,
            total_tokens,
            oracle,
            calculator,
        } => {
            let request = NewPrediction {
                id: PredictionId::from(prediction.as_str()),
                end_time,
                fee,
                outcomes_count: outcomes,
                total_tokens,
                oracle,
                calculator,
            };
            let id = request.id.clone();
            client.add_prediction(request, get_access().await?).await?;
            println!("Created prediction {}", id);
        }
        Commands::Deposit {
            prediction,
            outcome,
            amount,
            ledger,
            from,
        } => {
            let routing = RoutingData {
                prediction: PredictionId::from(prediction.as_str()),
                outcome,
            };
            let from = match from {
                Some(from) => from,
                None => read_public().await?,
            };
            let notification = DepositNotification {
                ledger,
                from,
                amount,
                routing: hex::encode(routing.encode()),
            };
            let index = client
                .on_token_transfer(notification, get_access().await?)
                .await?;
            println!("Recorded forecast {}", index);
        }
        Commands::ChangeStatus { prediction, status } => {
            let request = ChangeStatusRequest {
                prediction: PredictionId::from(prediction.as_str()),
                status,
            };
            client
                .change_prediction_status(request, get_access().await?)
                .await?;
        }
        Commands::Cancel { prediction } => {
            client
                .cancel(PredictionId::from(prediction.as_str()), get_access().await?)
                .await?;
        }
        Commands::ReportOutcome {
            prediction,
            outcome,
            oracle,
        } => {
            let request = ReportOutcomeRequest {
                oracle,
                prediction: PredictionId::from(prediction.as_str()),
                outcome,
            };
            client.report_outcome(request, get_access().await?).await?;
        }
        Commands::Resolve { prediction } => {
            client
                .resolve(PredictionId::from(prediction.as_str()))
                .await?;
        }
        Commands::Payout {
            prediction,
            outcome,
            start,
            limit,
        } => {
            let cursor = client
                .payout(SettleRequest {
                    prediction: PredictionId::from(prediction.as_str()),
                    outcome,
                    start_index: start,
                    limit,
                })
                .await?;
            println!("{:#?}", cursor);
        }
        Commands::Refund {
            prediction,
            outcome,
            start,
            limit,
        } => {
            let cursor = client
                .refund(SettleRequest {
                    prediction: PredictionId::from(prediction.as_str()),
                    outcome,
                    start_index: start,
                    limit,
                })
                .await?;
            println!("{:#?}", cursor);
        }
        Commands::GetForecast {
            prediction,
            outcome,
            index,
        } => {
            let forecast = client
                .get_forecast(ForecastRequest {
                    prediction: PredictionId::from(prediction.as_str()),
                    outcome,
                    index,
                })
                .await?;
            println!("{:#?}", forecast);
        }
        Commands::GetPrediction { prediction } => {
            let response = client
                .get_prediction(PredictionId::from(prediction.as_str()))
                .await?;
            println!("{:#?}", response);
        }
        Commands::GetPredictions => {
            let response = client.get_predictions().await?;
            println!("{:#?}", response);
        }
    }
    Ok(())
}
async fn get_access() -> Result<AccessRequest> {
    let user = read_public().await?;
    let sig = read_token().await?;
    let challenge = read_challenge().await?;
    Ok(AccessRequest {
        user,
        sig,
        challenge,
    })
}
async fn read_secret() -> Result<SecretKey> {
    let mut file = File::open("ecdsa.key").await?;
    let mut contents = vec![];
    file.read_to_end(&mut contents).await?;
    Ok(SecretKey::from_str(String::from_utf8(contents)?.as_str())?)
}
async fn read_public() -> Result<Account> {
    let mut file = File::open("ecdsa.pub").await?;
    let mut contents = vec![];
    file.read_to_end(&mut contents).await?;
    Ok(Account::from_str(String::from_utf8(contents)?.as_str())?)
}
async fn read_token() -> Result<Signature> {
    let mut file = File::open("access_token").await?;
    let mut contents = vec![];
    file.read_to_end(&mut contents).await?;
    Ok(Signature::from_str(String::from_utf8(contents)?.as_str())?)
}
async fn read_challenge() -> Result<String> {
    let mut file = File::open("challenge").await?;
    let mut contents = vec![];
    file.read_to_end(&mut contents).await?;
    Ok(String::from_utf8(contents)?)
}
