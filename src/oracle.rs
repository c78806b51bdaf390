use crate::api::{OutcomeId, PredictionId};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Mutex;

/// Source of truth for which outcome of a prediction won.
#[async_trait]
pub trait ResultOracle {
    async fn get_outcome(&self, prediction: &PredictionId) -> Result<OutcomeId>;
    /// Only oracles fed by the operator accept reports.
    async fn report_outcome(&self, prediction: &PredictionId, _outcome: OutcomeId) -> Result<()> {
        bail!("Oracle doesn't accept reports for {}", prediction)
    }
}

/// Oracle fed by the operator through `report_outcome`.
#[derive(Debug, Default)]
pub struct ManualOracle {
    outcomes: Mutex<HashMap<PredictionId, OutcomeId>>,
}
#[async_trait]
impl ResultOracle for ManualOracle {
    async fn get_outcome(&self, prediction: &PredictionId) -> Result<OutcomeId> {
        self.outcomes
            .lock()
            .unwrap()
            .get(prediction)
            .copied()
            .ok_or(anyhow!("No outcome reported for {} yet", prediction))
    }
    async fn report_outcome(&self, prediction: &PredictionId, outcome: OutcomeId) -> Result<()> {
        debug!("Outcome {} reported for {}", outcome, prediction);
        self.outcomes
            .lock()
            .unwrap()
            .insert(prediction.clone(), outcome);
        Ok(())
    }
}

/// Asks a remote service at `{url}/outcome/{prediction}`.
#[derive(Debug, Clone)]
pub struct HttpOracle {
    url: String,
    client: reqwest::Client,
}
impl HttpOracle {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::new();
        Self { url, client }
    }
}
#[async_trait]
impl ResultOracle for HttpOracle {
    async fn get_outcome(&self, prediction: &PredictionId) -> Result<OutcomeId> {
        let response = self
            .client
            .get(format!("{}/outcome/{}", self.url, prediction))
            .send()
            .await
            .with_context(|| format!("oracle at {} unreachable", self.url))?;
        if response.status() != StatusCode::OK {
            bail!("{}: {}", response.status(), response.text().await?)
        }
        Ok(response.json::<OutcomeId>().await?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn manual_oracle_answers_after_report() {
        let oracle = ManualOracle::default();
        let id = PredictionId::from("M");
        oracle.get_outcome(&id).await.unwrap_err();
        oracle.report_outcome(&id, 2).await.unwrap();
        assert_eq!(oracle.get_outcome(&id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn http_oracle_refuses_reports() {
        let oracle = HttpOracle::new("http://127.0.0.1:1".into());
        oracle
            .report_outcome(&PredictionId::from("M"), 1)
            .await
            .unwrap_err();
    }
}
