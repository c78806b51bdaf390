use crate::api::{Account, Amount};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::trace;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Custodian of the funds wagered on predictions. Deposits reach the
/// market through [`crate::foresight::Foresight::on_token_transfer`] after
/// the funds are already held; the market only ever moves funds out.
#[async_trait]
pub trait TokenLedger {
    async fn transfer(&self, to: &Account, amount: Amount) -> Result<()>;
    /// Consumes `amount` of funds `from` moved into custody that no forecast
    /// has been credited for yet. Fails if those funds never arrived.
    async fn claim_deposit(&self, from: &Account, amount: Amount) -> Result<()>;
}

#[derive(Debug, Default)]
struct Custody {
    held: Amount,
    unclaimed: HashMap<Account, Amount>,
    balances: HashMap<Account, Amount>,
    transfers: Vec<(Account, Amount)>,
    rejecting: bool,
}

/// In-memory ledger used by the test server and unit tests.
#[derive(Debug, Default, Clone)]
pub struct TestTokenLedger {
    custody: Arc<Mutex<Custody>>,
}
impl TestTokenLedger {
    /// Funds custody without attributing them to a depositor, e.g. a prize
    /// pool.
    pub fn deposit(&self, amount: Amount) -> Result<()> {
        let mut custody = self.custody.lock().unwrap();
        custody.held = custody
            .held
            .checked_add(amount)
            .context("custody overflow")?;
        Ok(())
    }
    /// Moves funds into custody as a depositor's transfer would. The market
    /// can claim them once for a forecast.
    pub fn receive(&self, from: Account, amount: Amount) -> Result<()> {
        let mut custody = self.custody.lock().unwrap();
        custody.held = custody
            .held
            .checked_add(amount)
            .context("custody overflow")?;
        let unclaimed = custody.unclaimed.entry(from).or_default();
        *unclaimed = unclaimed
            .checked_add(amount)
            .context("unclaimed deposit overflow")?;
        Ok(())
    }
    pub fn held(&self) -> Amount {
        self.custody.lock().unwrap().held
    }
    pub fn balance(&self, account: &Account) -> Amount {
        let custody = self.custody.lock().unwrap();
        custody.balances.get(account).copied().unwrap_or_default()
    }
    pub fn transfers(&self) -> Vec<(Account, Amount)> {
        self.custody.lock().unwrap().transfers.clone()
    }
    /// While set, every transfer fails without moving funds.
    pub fn reject_transfers(&self, rejecting: bool) {
        self.custody.lock().unwrap().rejecting = rejecting;
    }
}
#[async_trait]
impl TokenLedger for TestTokenLedger {
    async fn transfer(&self, to: &Account, amount: Amount) -> Result<()> {
        let mut custody = self.custody.lock().unwrap();
        if custody.rejecting {
            bail!("Ledger rejected transfer of {} to {}", amount, to);
        }
        if custody.held < amount {
            bail!(
                "Ledger only holds {} but {} was requested",
                custody.held,
                amount
            );
        }
        custody.held -= amount;
        *custody.balances.entry(*to).or_default() += amount;
        custody.transfers.push((*to, amount));
        trace!("Transferred {} to {}", amount, to);
        Ok(())
    }
    async fn claim_deposit(&self, from: &Account, amount: Amount) -> Result<()> {
        let mut custody = self.custody.lock().unwrap();
        let unclaimed = custody.unclaimed.get(from).copied().unwrap_or_default();
        if unclaimed < amount {
            bail!(
                "Only {} from {} arrived unclaimed but {} was reported",
                unclaimed,
                from,
                amount
            );
        }
        custody.unclaimed.insert(*from, unclaimed - amount);
        trace!("Claimed deposit of {} from {}", amount, from);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use secp256k1::{generate_keypair, rand};

    #[tokio::test]
    async fn transfers_come_out_of_custody() {
        let ledger = TestTokenLedger::default();
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        ledger.deposit(100).unwrap();
        ledger.transfer(&user, 60).await.unwrap();
        ledger.transfer(&user, 41).await.unwrap_err();
        assert_eq!(ledger.held(), 40);
        assert_eq!(ledger.balance(&user), 60);
        assert_eq!(ledger.transfers(), vec![(user, 60)]);
    }

    #[tokio::test]
    async fn deposits_are_claimed_once() {
        let ledger = TestTokenLedger::default();
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        let (_, other) = generate_keypair(&mut rand::thread_rng());
        ledger.claim_deposit(&user, 10).await.unwrap_err();
        ledger.receive(user, 100).unwrap();
        ledger.claim_deposit(&other, 10).await.unwrap_err();
        ledger.claim_deposit(&user, 60).await.unwrap();
        ledger.claim_deposit(&user, 60).await.unwrap_err();
        ledger.claim_deposit(&user, 40).await.unwrap();
        assert_eq!(ledger.held(), 100);
    }

    #[tokio::test]
    async fn rejected_transfers_move_nothing() {
        let ledger = TestTokenLedger::default();
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        ledger.deposit(100).unwrap();
        ledger.reject_transfers(true);
        ledger.transfer(&user, 10).await.unwrap_err();
        assert_eq!(ledger.held(), 100);
        assert!(ledger.transfers().is_empty());
    }
}
