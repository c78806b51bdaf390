use crate::api::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use secp256k1::ecdsa::Signature;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{query, Executor, Row, SqlitePool};
use std::str::FromStr;

/// Authoritative store for predictions and their forecast ledgers.
///
/// Every method that guards a transition is a single conditional statement
/// and reports through its `bool` whether the condition held, so callers can
/// detect a competing (possibly re-entrant) writer without holding a lock.
#[async_trait]
pub trait DB {
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;
    /// Returns false if the key was already set.
    async fn init_setting(&self, key: &str, value: &str) -> Result<bool>;

    /// Returns false if the id is already registered.
    async fn add_prediction(&self, prediction: &Prediction) -> Result<bool>;
    async fn get_prediction(&self, prediction: &PredictionId) -> Result<Option<Prediction>>;
    async fn get_predictions(&self) -> Result<Vec<Prediction>>;
    async fn set_prediction_status(&self, prediction: &PredictionId, status: Status)
        -> Result<bool>;
    async fn transition_prediction_status(
        &self,
        prediction: &PredictionId,
        from: Status,
        to: Status,
    ) -> Result<bool>;
    /// Open -> Resolved together with the winning outcome.
    async fn resolve_prediction(&self, prediction: &PredictionId, outcome: OutcomeId)
        -> Result<bool>;
    /// Adds to the paid out total unless that would exceed `total_tokens`.
    async fn add_paid_out(&self, prediction: &PredictionId, amount: Amount) -> Result<bool>;
    async fn sub_paid_out(&self, prediction: &PredictionId, amount: Amount) -> Result<()>;

    async fn append_forecast(
        &self,
        prediction: &PredictionId,
        outcome: OutcomeId,
        forecaster: &Account,
        net_amount: Amount,
    ) -> Result<ForecastIndex>;
    async fn get_forecast(
        &self,
        prediction: &PredictionId,
        outcome: OutcomeId,
        index: ForecastIndex,
    ) -> Result<Option<Forecast>>;
    async fn get_forecasts(
        &self,
        prediction: &PredictionId,
        outcome: OutcomeId,
        start: ForecastIndex,
        limit: u32,
    ) -> Result<Vec<(ForecastIndex, Forecast)>>;
    async fn get_forecast_count(&self, prediction: &PredictionId, outcome: OutcomeId)
        -> Result<u64>;
    async fn get_outcome_stake(&self, prediction: &PredictionId, outcome: OutcomeId)
        -> Result<Amount>;
    /// Flips `settled` to the given value. Returns false if it already had it.
    async fn set_forecast_settled(
        &self,
        prediction: &PredictionId,
        outcome: OutcomeId,
        index: ForecastIndex,
        settled: bool,
    ) -> Result<bool>;

    async fn update_login_challenge(&self, user: Account, challenge: String) -> Result<()>;
    async fn get_login_challenge(&self, user: Account) -> Result<Option<String>>;
    async fn update_access_token(&self, user: Account, sig: Signature) -> Result<()>;
    async fn get_last_access(&self, user: Account) -> Result<Option<(Signature, DateTime<Utc>)>>;
}
pub struct SQLite {
    connection: SqlitePool,
}
impl SQLite {
    pub async fn new(db_conn: Option<String>) -> Result<Self> {
        let url = db_conn.unwrap_or("sqlite::memory:".to_string());
        // An in-memory database lives and dies with its connection, so the
        // pool keeps exactly one open forever.
        let connection = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(url.as_str())
            .await
            .with_context(|| format!("couldn't open database {}", url))?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS predictions (\
                id BLOB PRIMARY KEY,\
                end_time INTEGER NOT NULL,\
                fee INTEGER NOT NULL,\
                outcomes_count INTEGER NOT NULL,\
                total_tokens INTEGER NOT NULL,\
                status TEXT NOT NULL,\
                winning_outcome INTEGER,\
                oracle TEXT NOT NULL,\
                calculator TEXT NOT NULL,\
                paid_out INTEGER NOT NULL DEFAULT 0\
                )",
            )
            .await?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS forecasts (\
                prediction BLOB NOT NULL,\
                outcome INTEGER NOT NULL,\
                idx INTEGER NOT NULL,\
                forecaster TEXT NOT NULL,\
                net_amount INTEGER NOT NULL,\
                settled BOOLEAN NOT NULL,\
                PRIMARY KEY (prediction, outcome, idx)\
                )",
            )
            .await?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS settings (\
                key TEXT PRIMARY KEY,\
                value TEXT NOT NULL\
                )",
            )
            .await?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS users (\
                pubkey TEXT PRIMARY KEY,\
                login_challenge TEXT,\
                access_token TEXT,\
                last_access INTEGER\
                )",
            )
            .await?;
        Ok(Self { connection })
    }
}
fn to_sql(amount: Amount) -> Result<i64> {
    i64::try_from(amount).with_context(|| format!("amount {} doesn't fit into the db", amount))
}
fn from_sql(amount: i64) -> Result<Amount> {
    Amount::try_from(amount).with_context(|| format!("negative amount {} in db", amount))
}
fn outcome_from_sql(outcome: i64) -> Result<OutcomeId> {
    OutcomeId::try_from(outcome).with_context(|| format!("invalid outcome {} in db", outcome))
}
fn time_to_sql(time: &DateTime<Utc>) -> Result<i64> {
    time.timestamp_nanos_opt()
        .with_context(|| format!("time {} doesn't fit into the db", time))
}
fn prediction_from_row(row: &SqliteRow) -> Result<Prediction> {
    let winning_outcome: Option<i64> = row.try_get("winning_outcome")?;
    Ok(Prediction {
        id: PredictionId::new(row.try_get("id")?),
        end_time: Utc.timestamp_nanos(row.try_get("end_time")?),
        fee: from_sql(row.try_get("fee")?)?,
        outcomes_count: outcome_from_sql(row.try_get("outcomes_count")?)?,
        total_tokens: from_sql(row.try_get("total_tokens")?)?,
        status: Status::from_str(row.try_get("status")?)?,
        winning_outcome: winning_outcome.map(outcome_from_sql).transpose()?,
        oracle: row.try_get("oracle")?,
        calculator: row.try_get("calculator")?,
        paid_out: from_sql(row.try_get("paid_out")?)?,
    })
}
fn forecast_from_row(row: &SqliteRow) -> Result<Forecast> {
    Ok(Forecast {
        forecaster: Account::from_str(row.try_get("forecaster")?)?,
        net_amount: from_sql(row.try_get("net_amount")?)?,
        settled: row.try_get("settled")?,
    })
}
#[async_trait]
impl DB for SQLite {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row = self
            .connection
            .fetch_optional(query("SELECT value FROM settings WHERE key = ?").bind(key))
            .await
            .with_context(|| format!("couldn't get setting {}", key))?;
        Ok(row.map(|row| row.get("value")))
    }
    async fn init_setting(&self, key: &str, value: &str) -> Result<bool> {
        let inserted = self
            .connection
            .execute(
                query("INSERT OR IGNORE INTO settings (key, value) VALUES (?,?)")
                    .bind(key)
                    .bind(value),
            )
            .await?
            .rows_affected();
        Ok(inserted == 1)
    }
    async fn add_prediction(&self, prediction: &Prediction) -> Result<bool> {
        let inserted = self
            .connection
            .execute(
                query(
                    "INSERT OR IGNORE INTO predictions (\
                id,\
                end_time,\
                fee,\
                outcomes_count,\
                total_tokens,\
                status,\
                winning_outcome,\
                oracle,\
                calculator,\
                paid_out)\
                VALUES (?,?,?,?,?,?,?,?,?,?)",
                )
                .bind(prediction.id.as_bytes())
                .bind(time_to_sql(&prediction.end_time)?)
                .bind(to_sql(prediction.fee)?)
                .bind(i64::from(prediction.outcomes_count))
                .bind(to_sql(prediction.total_tokens)?)
                .bind(prediction.status.to_string())
                .bind(prediction.winning_outcome.map(i64::from))
                .bind(prediction.oracle.as_str())
                .bind(prediction.calculator.as_str())
                .bind(to_sql(prediction.paid_out)?),
            )
            .await
            .with_context(|| format!("couldn't insert prediction {}", prediction.id))?
            .rows_affected();
        Ok(inserted == 1)
    }
    async fn get_prediction(&self, prediction: &PredictionId) -> Result<Option<Prediction>> {
        let row = self
            .connection
            .fetch_optional(
                query("SELECT * FROM predictions WHERE id = ?").bind(prediction.as_bytes()),
            )
            .await
            .with_context(|| format!("couldn't get prediction {}", prediction))?;
        row.as_ref().map(prediction_from_row).transpose()
    }
    async fn get_predictions(&self) -> Result<Vec<Prediction>> {
        let rows = self
            .connection
            .fetch_all(query("SELECT * FROM predictions ORDER BY rowid"))
            .await?;
        rows.iter().map(prediction_from_row).collect()
    }
    async fn set_prediction_status(
        &self,
        prediction: &PredictionId,
        status: Status,
    ) -> Result<bool> {
        let updated = self
            .connection
            .execute(
                query(
                    "UPDATE predictions \
                SET status = ? \
                WHERE id = ?",
                )
                .bind(status.to_string())
                .bind(prediction.as_bytes()),
            )
            .await?
            .rows_affected();
        Ok(updated == 1)
    }
    async fn transition_prediction_status(
        &self,
        prediction: &PredictionId,
        from: Status,
        to: Status,
    ) -> Result<bool> {
        let updated = self
            .connection
            .execute(
                query(
                    "UPDATE predictions \
                SET status = ? \
                WHERE id = ? AND status = ?",
                )
                .bind(to.to_string())
                .bind(prediction.as_bytes())
                .bind(from.to_string()),
            )
            .await?
            .rows_affected();
        Ok(updated == 1)
    }
    async fn resolve_prediction(
        &self,
        prediction: &PredictionId,
        outcome: OutcomeId,
    ) -> Result<bool> {
        let updated = self
            .connection
            .execute(
                query(
                    "UPDATE predictions \
                SET status = ?, winning_outcome = ? \
                WHERE id = ? AND status = ?",
                )
                .bind(Status::Resolved.to_string())
                .bind(i64::from(outcome))
                .bind(prediction.as_bytes())
                .bind(Status::Open.to_string()),
            )
            .await?
            .rows_affected();
        Ok(updated == 1)
    }
    async fn add_paid_out(&self, prediction: &PredictionId, amount: Amount) -> Result<bool> {
        let amount = to_sql(amount)?;
        let updated = self
            .connection
            .execute(
                query(
                    "UPDATE predictions \
                SET paid_out = paid_out + ? \
                WHERE id = ? AND paid_out + ? <= total_tokens",
                )
                .bind(amount)
                .bind(prediction.as_bytes())
                .bind(amount),
            )
            .await?
            .rows_affected();
        Ok(updated == 1)
    }
    async fn sub_paid_out(&self, prediction: &PredictionId, amount: Amount) -> Result<()> {
        self.connection
            .execute(
                query(
                    "UPDATE predictions \
                SET paid_out = paid_out - ? \
                WHERE id = ?",
                )
                .bind(to_sql(amount)?)
                .bind(prediction.as_bytes()),
            )
            .await?;
        Ok(())
    }
    async fn append_forecast(
        &self,
        prediction: &PredictionId,
        outcome: OutcomeId,
        forecaster: &Account,
        net_amount: Amount,
    ) -> Result<ForecastIndex> {
        // Index assignment and insert happen in one statement so the
        // sequence can't get a gap or a duplicate index.
        let row = self
            .connection
            .fetch_one(
                query(
                    "INSERT INTO forecasts (\
                prediction,\
                outcome,\
                idx,\
                forecaster,\
                net_amount,\
                settled) \
                SELECT ?, ?, COALESCE(MAX(idx) + 1, 0), ?, ?, false \
                FROM forecasts WHERE prediction = ? AND outcome = ? \
                RETURNING idx",
                )
                .bind(prediction.as_bytes())
                .bind(i64::from(outcome))
                .bind(forecaster.to_string())
                .bind(to_sql(net_amount)?)
                .bind(prediction.as_bytes())
                .bind(i64::from(outcome)),
            )
            .await
            .with_context(|| {
                format!(
                    "couldn't append forecast on outcome {} of prediction {}",
                    outcome, prediction
                )
            })?;
        let index: i64 = row.try_get("idx")?;
        Ok(ForecastIndex::try_from(index)?)
    }
    async fn get_forecast(
        &self,
        prediction: &PredictionId,
        outcome: OutcomeId,
        index: ForecastIndex,
    ) -> Result<Option<Forecast>> {
        let index = match i64::try_from(index) {
            Ok(index) => index,
            Err(_) => return Ok(None),
        };
        let row = self
            .connection
            .fetch_optional(
                query(
                    "SELECT forecaster, net_amount, settled FROM forecasts \
                WHERE prediction = ? AND outcome = ? AND idx = ?",
                )
                .bind(prediction.as_bytes())
                .bind(i64::from(outcome))
                .bind(index),
            )
            .await?;
        row.as_ref().map(forecast_from_row).transpose()
    }
    async fn get_forecasts(
        &self,
        prediction: &PredictionId,
        outcome: OutcomeId,
        start: ForecastIndex,
        limit: u32,
    ) -> Result<Vec<(ForecastIndex, Forecast)>> {
        let start = match i64::try_from(start) {
            Ok(start) => start,
            Err(_) => return Ok(vec![]),
        };
        let rows = self
            .connection
            .fetch_all(
                query(
                    "SELECT idx, forecaster, net_amount, settled FROM forecasts \
                WHERE prediction = ? AND outcome = ? AND idx >= ? \
                ORDER BY idx \
                LIMIT ?",
                )
                .bind(prediction.as_bytes())
                .bind(i64::from(outcome))
                .bind(start)
                .bind(i64::from(limit)),
            )
            .await?;
        let mut forecasts = Vec::with_capacity(rows.len());
        for row in rows {
            let index: i64 = row.try_get("idx")?;
            forecasts.push((ForecastIndex::try_from(index)?, forecast_from_row(&row)?));
        }
        Ok(forecasts)
    }
    async fn get_forecast_count(
        &self,
        prediction: &PredictionId,
        outcome: OutcomeId,
    ) -> Result<u64> {
        let row = self
            .connection
            .fetch_one(
                query(
                    "SELECT COUNT(*) AS count FROM forecasts \
                WHERE prediction = ? AND outcome = ?",
                )
                .bind(prediction.as_bytes())
                .bind(i64::from(outcome)),
            )
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(u64::try_from(count)?)
    }
    async fn get_outcome_stake(
        &self,
        prediction: &PredictionId,
        outcome: OutcomeId,
    ) -> Result<Amount> {
        let row = self
            .connection
            .fetch_one(
                query(
                    "SELECT COALESCE(SUM(net_amount), 0) AS stake FROM forecasts \
                WHERE prediction = ? AND outcome = ?",
                )
                .bind(prediction.as_bytes())
                .bind(i64::from(outcome)),
            )
            .await?;
        from_sql(row.try_get("stake")?)
    }
    async fn set_forecast_settled(
        &self,
        prediction: &PredictionId,
        outcome: OutcomeId,
        index: ForecastIndex,
        settled: bool,
    ) -> Result<bool> {
        let updated = self
            .connection
            .execute(
                query(
                    "UPDATE forecasts SET settled = ? \
                WHERE prediction = ? AND outcome = ? AND idx = ? AND settled = ?",
                )
                .bind(settled)
                .bind(prediction.as_bytes())
                .bind(i64::from(outcome))
                .bind(i64::try_from(index)?)
                .bind(!settled),
            )
            .await?
            .rows_affected();
        Ok(updated == 1)
    }
    async fn update_login_challenge(&self, user: Account, challenge: String) -> Result<()> {
        let stmt = query(
            "INSERT INTO users (pubkey, login_challenge) VALUES (?,?) \
            ON CONFLICT (pubkey) DO UPDATE SET login_challenge = excluded.login_challenge",
        );
        self.connection
            .execute(stmt.bind(user.to_string()).bind(challenge))
            .await?;
        Ok(())
    }
    async fn get_login_challenge(&self, user: Account) -> Result<Option<String>> {
        let stmt = query(
            "SELECT login_challenge \
            FROM users \
            WHERE pubkey = ?",
        );
        let row = self
            .connection
            .fetch_optional(stmt.bind(user.to_string()))
            .await?;
        match row {
            Some(row) => Ok(row.try_get("login_challenge")?),
            None => Ok(None),
        }
    }
    async fn update_access_token(&self, user: Account, sig: Signature) -> Result<()> {
        let stmt = query(
            "UPDATE users SET \
            access_token = ?, \
            last_access = ? \
            WHERE pubkey = ?",
        );
        self.connection
            .execute(
                stmt.bind(sig.to_string())
                    .bind(Utc::now().timestamp())
                    .bind(user.to_string()),
            )
            .await?;
        Ok(())
    }
    async fn get_last_access(&self, user: Account) -> Result<Option<(Signature, DateTime<Utc>)>> {
        let stmt = query(
            "SELECT access_token, last_access \
            FROM users \
            WHERE pubkey = ? AND access_token IS NOT NULL",
        );
        let row = match self
            .connection
            .fetch_optional(stmt.bind(user.to_string()))
            .await?
        {
            Some(row) => row,
            None => return Ok(None),
        };
        let token: String = row.try_get("access_token")?;
        let last_access = row.try_get("last_access")?;
        Ok(Some((
            Signature::from_str(token.as_str())?,
            Utc.timestamp_opt(last_access, 0)
                .single()
                .context("invalid last access in db")?,
        )))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use secp256k1::{generate_keypair, rand};

    fn prediction(name: &str) -> Prediction {
        Prediction {
            id: PredictionId::from(name),
            end_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            fee: 12,
            outcomes_count: 2,
            total_tokens: 1000,
            status: Status::Open,
            winning_outcome: None,
            oracle: "manual".into(),
            calculator: "proportional".into(),
            paid_out: 0,
        }
    }

    #[tokio::test]
    async fn predictions_are_unique() {
        let db = SQLite::new(None).await.unwrap();
        assert!(db.add_prediction(&prediction("M")).await.unwrap());
        assert!(!db.add_prediction(&prediction("M")).await.unwrap());
        let stored = db
            .get_prediction(&PredictionId::from("M"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, prediction("M"));
        assert!(db
            .get_prediction(&PredictionId::from("N"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn end_time_keeps_fractional_seconds() {
        let db = SQLite::new(None).await.unwrap();
        let mut fractional = prediction("M");
        fractional.end_time = Utc.timestamp_opt(1_700_000_000, 999_999_999).unwrap();
        db.add_prediction(&fractional).await.unwrap();
        let stored = db
            .get_prediction(&PredictionId::from("M"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.end_time, fractional.end_time);
        assert!(stored.end_time > Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    }

    #[tokio::test]
    async fn forecasts_get_consecutive_indices_per_outcome() {
        let db = SQLite::new(None).await.unwrap();
        let id = PredictionId::from("M");
        db.add_prediction(&prediction("M")).await.unwrap();
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        assert_eq!(db.append_forecast(&id, 1, &user, 100).await.unwrap(), 0);
        assert_eq!(db.append_forecast(&id, 2, &user, 50).await.unwrap(), 0);
        assert_eq!(db.append_forecast(&id, 1, &user, 30).await.unwrap(), 1);
        assert_eq!(db.get_forecast_count(&id, 1).await.unwrap(), 2);
        assert_eq!(db.get_outcome_stake(&id, 1).await.unwrap(), 130);
        assert_eq!(db.get_outcome_stake(&id, 3).await.unwrap(), 0);

        let page = db.get_forecasts(&id, 1, 1, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].0, 1);
        assert_eq!(page[0].1.net_amount, 30);
    }

    #[tokio::test]
    async fn settling_is_compare_and_set() {
        let db = SQLite::new(None).await.unwrap();
        let id = PredictionId::from("M");
        db.add_prediction(&prediction("M")).await.unwrap();
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        db.append_forecast(&id, 1, &user, 100).await.unwrap();
        assert!(db.set_forecast_settled(&id, 1, 0, true).await.unwrap());
        assert!(!db.set_forecast_settled(&id, 1, 0, true).await.unwrap());
        assert!(db.get_forecast(&id, 1, 0).await.unwrap().unwrap().settled);
        assert!(!db.set_forecast_settled(&id, 1, 7, true).await.unwrap());
    }

    #[tokio::test]
    async fn paid_out_never_exceeds_total_tokens() {
        let db = SQLite::new(None).await.unwrap();
        let id = PredictionId::from("M");
        db.add_prediction(&prediction("M")).await.unwrap();
        assert!(db.add_paid_out(&id, 600).await.unwrap());
        assert!(!db.add_paid_out(&id, 401).await.unwrap());
        assert!(db.add_paid_out(&id, 400).await.unwrap());
        db.sub_paid_out(&id, 400).await.unwrap();
        let stored = db.get_prediction(&id).await.unwrap().unwrap();
        assert_eq!(stored.paid_out, 600);
    }

    #[tokio::test]
    async fn status_transitions_check_the_current_status() {
        let db = SQLite::new(None).await.unwrap();
        let id = PredictionId::from("M");
        db.add_prediction(&prediction("M")).await.unwrap();
        assert!(db.resolve_prediction(&id, 1).await.unwrap());
        assert!(!db.resolve_prediction(&id, 2).await.unwrap());
        assert!(!db
            .transition_prediction_status(&id, Status::Open, Status::Cancelled)
            .await
            .unwrap());
        assert!(db.set_prediction_status(&id, Status::Locked).await.unwrap());
        let stored = db.get_prediction(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Locked);
        assert_eq!(stored.winning_outcome, Some(1));
    }

    #[tokio::test]
    async fn settings_are_written_once() {
        let db = SQLite::new(None).await.unwrap();
        assert!(db.init_setting("ledger", "a").await.unwrap());
        assert!(!db.init_setting("ledger", "b").await.unwrap());
        assert_eq!(db.get_setting("ledger").await.unwrap(), Some("a".into()));
    }
}
