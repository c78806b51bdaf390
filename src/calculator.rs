use crate::api::Amount;
use anyhow::{anyhow, bail, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Pure share formula bound to a prediction at creation.
pub trait OutcomeCalculator {
    fn compute_share(&self, stake: Amount, total_winning_stake: Amount, pool: Amount)
        -> Result<Amount>;
}

/// Splits the pool in proportion to stake.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProportionalCalculator;

impl OutcomeCalculator for ProportionalCalculator {
    fn compute_share(
        &self,
        stake: Amount,
        total_winning_stake: Amount,
        pool: Amount,
    ) -> Result<Amount> {
        // Truncated, so the shares of all winners never sum past the pool.
        // The remainder stays in custody.
        if total_winning_stake == 0 {
            bail!("No stake on the winning outcome");
        }
        if stake > total_winning_stake {
            bail!(
                "Stake {} exceeds the total winning stake {}",
                stake,
                total_winning_stake
            );
        }
        let share = Decimal::from(pool)
            .checked_mul(Decimal::from(stake))
            .and_then(|weighted| weighted.checked_div(Decimal::from(total_winning_stake)))
            .ok_or(anyhow!(
                "Share of {} in {} of a {} pool overflows",
                stake,
                total_winning_stake,
                pool
            ))?;
        share
            .trunc()
            .to_u64()
            .ok_or(anyhow!("Share {} doesn't fit into an amount", share))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn splits_pool_by_stake() {
        let calculator = ProportionalCalculator;
        assert_eq!(calculator.compute_share(100, 150, 300).unwrap(), 200);
        assert_eq!(calculator.compute_share(50, 150, 300).unwrap(), 100);
        assert_eq!(calculator.compute_share(150, 150, 300).unwrap(), 300);
    }

    #[test]
    fn truncates_instead_of_rounding() {
        let calculator = ProportionalCalculator;
        // 100 * 1 / 3 = 33.33..
        assert_eq!(
            Decimal::from(calculator.compute_share(1, 3, 100).unwrap()),
            (dec!(100) / dec!(3)).trunc()
        );
        let shares: u64 = (0..3)
            .map(|_| calculator.compute_share(1, 3, 100).unwrap())
            .sum();
        assert_eq!(shares, 99);
    }

    #[test]
    fn rejects_impossible_stakes() {
        let calculator = ProportionalCalculator;
        calculator.compute_share(1, 0, 100).unwrap_err();
        calculator.compute_share(10, 5, 100).unwrap_err();
    }
}
