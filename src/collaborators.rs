use crate::calculator::OutcomeCalculator;
use crate::error::{MarketError, Result};
use crate::oracle::ResultOracle;
use crate::token_ledger::TokenLedger;
use std::collections::HashMap;
use std::sync::Arc;

pub type Ledger = Arc<dyn TokenLedger + Send + Sync>;
pub type Oracle = Arc<dyn ResultOracle + Send + Sync>;
pub type Calculator = Arc<dyn OutcomeCalculator + Send + Sync>;

/// External services a prediction can be bound to, by handle. Predictions
/// persist the handle, so the same names must be registered after a
/// restart.
#[derive(Default, Clone)]
pub struct Collaborators {
    ledgers: HashMap<String, Ledger>,
    oracles: HashMap<String, Oracle>,
    calculators: HashMap<String, Calculator>,
}
impl Collaborators {
    pub fn with_ledger(mut self, name: &str, ledger: Ledger) -> Self {
        self.ledgers.insert(name.to_string(), ledger);
        self
    }
    pub fn with_oracle(mut self, name: &str, oracle: Oracle) -> Self {
        self.oracles.insert(name.to_string(), oracle);
        self
    }
    pub fn with_calculator(mut self, name: &str, calculator: Calculator) -> Self {
        self.calculators.insert(name.to_string(), calculator);
        self
    }
    pub fn ledger(&self, name: &str) -> Result<Ledger> {
        lookup(&self.ledgers, name)
    }
    pub fn oracle(&self, name: &str) -> Result<Oracle> {
        lookup(&self.oracles, name)
    }
    pub fn calculator(&self, name: &str) -> Result<Calculator> {
        lookup(&self.calculators, name)
    }
}
fn lookup<T: ?Sized>(registry: &HashMap<String, Arc<T>>, name: &str) -> Result<Arc<T>> {
    registry
        .get(name)
        .cloned()
        .ok_or(MarketError::UnknownCollaborator(name.to_string()))
}
