//! Staking pools: stake the pool's token, earn a cut of trading fees.
//!
//! Reward accounting mirrors the LP-fee scheme on pool pairs: a per-token
//! `rewards_per_share` accumulator scaled by `BASE_LP_FEES_PER_SHARE`, with
//! per-staker checkpoints settled whenever a staker's liquidity changes.

use std::collections::BTreeMap;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sharddex_amm::safe_math::{execute_op_u64, Operator};
use sharddex_amm::BASE_LP_FEES_PER_SHARE;
use sharddex_types::{AccessId, ArithmeticError, StakingError, TokenId};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Staker {
    pub liquidity: u64,
    pub rewards: BTreeMap<TokenId, u64>,
    #[serde(with = "sharddex_amm::serde_big::biguint_map")]
    pub last_rewards_per_share: BTreeMap<TokenId, BigUint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StakingPoolState {
    pub liquidity: u64,
    pub stakers: BTreeMap<AccessId, Staker>,
    #[serde(with = "sharddex_amm::serde_big::biguint_map")]
    pub rewards_per_share: BTreeMap<TokenId, BigUint>,
}

impl StakingPoolState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stake `amount` for `access_id`, settling their reward checkpoint
    /// first.
    pub fn add_liquidity(&mut self, access_id: AccessId, amount: u64) -> Result<(), StakingError> {
        if amount == 0 {
            return Err(StakingError::ZeroAmount);
        }
        self.update_liquidity(access_id, amount, Operator::Add)
    }

    /// Unstake `amount`, rejecting requests beyond the recorded stake.
    pub fn remove_liquidity(
        &mut self,
        access_id: AccessId,
        amount: u64,
    ) -> Result<(), StakingError> {
        if amount == 0 {
            return Err(StakingError::ZeroAmount);
        }
        let staker = self
            .stakers
            .get(&access_id)
            .ok_or(StakingError::UnknownStaker)?;
        if staker.liquidity < amount {
            return Err(StakingError::LiquidityTooLow {
                liquidity: staker.liquidity,
                requested: amount,
            });
        }
        self.update_liquidity(access_id, amount, Operator::Sub)
    }

    fn update_liquidity(
        &mut self,
        access_id: AccessId,
        amount: u64,
        op: Operator,
    ) -> Result<(), StakingError> {
        if !self.stakers.contains_key(&access_id) {
            if op == Operator::Sub {
                return Err(StakingError::UnknownStaker);
            }
            self.stakers.insert(access_id, Staker::default());
        } else {
            let settled = self.recompute_rewards(access_id)?;
            let staker = self
                .stakers
                .get_mut(&access_id)
                .ok_or(StakingError::UnknownStaker)?;
            staker.rewards = settled;
        }

        let checkpoint = self.rewards_per_share.clone();
        let total = execute_op_u64(self.liquidity, amount, op).map_err(StakingError::Arithmetic)?;
        let staker = self
            .stakers
            .get_mut(&access_id)
            .ok_or(StakingError::UnknownStaker)?;
        staker.liquidity =
            execute_op_u64(staker.liquidity, amount, op).map_err(StakingError::Arithmetic)?;
        staker.last_rewards_per_share = checkpoint;
        self.liquidity = total;
        Ok(())
    }

    /// Accrue `amount` of `token` to all stakers via the per-share
    /// accumulator. A pool with no staked liquidity accrues nothing and
    /// reports the amount back to the caller for redirection.
    pub fn add_reward(&mut self, token: TokenId, amount: u64) -> u64 {
        if self.liquidity == 0 {
            return amount;
        }
        let delta = BigUint::from(amount) * &*BASE_LP_FEES_PER_SHARE / BigUint::from(self.liquidity);
        let entry = self
            .rewards_per_share
            .entry(token)
            .or_insert_with(|| BigUint::from(0u64));
        *entry += delta;
        0
    }

    /// Claimable rewards for one staker: settled rewards plus the
    /// accumulator delta since their checkpoint.
    pub fn recompute_rewards(
        &self,
        access_id: AccessId,
    ) -> Result<BTreeMap<TokenId, u64>, StakingError> {
        let staker = self
            .stakers
            .get(&access_id)
            .ok_or(StakingError::UnknownStaker)?;
        let mut result = staker.rewards.clone();
        for (token, current) in &self.rewards_per_share {
            let baseline = staker
                .last_rewards_per_share
                .get(token)
                .cloned()
                .unwrap_or_else(|| BigUint::from(0u64));
            if *current < baseline {
                return Err(StakingError::Arithmetic(ArithmeticError::NegativeResult));
            }
            let accrued =
                (current - baseline) * BigUint::from(staker.liquidity) / &*BASE_LP_FEES_PER_SHARE;
            let accrued = u64::try_from(&accrued)
                .map_err(|_| StakingError::Arithmetic(ArithmeticError::AmountOutOfRange))?;
            let settled = result.entry(*token).or_insert(0);
            *settled =
                settled
                    .checked_add(accrued)
                    .ok_or(StakingError::Arithmetic(ArithmeticError::Overflow {
                        value: *settled,
                        delta: accrued,
                    }))?;
        }
        Ok(result)
    }

    /// Settle and clear a staker's rewards, returning what they are owed.
    pub fn withdraw_rewards(
        &mut self,
        access_id: AccessId,
    ) -> Result<BTreeMap<TokenId, u64>, StakingError> {
        let owed = self.recompute_rewards(access_id)?;
        let checkpoint = self.rewards_per_share.clone();
        let staker = self
            .stakers
            .get_mut(&access_id)
            .ok_or(StakingError::UnknownStaker)?;
        staker.rewards = BTreeMap::new();
        staker.last_rewards_per_share = checkpoint;
        Ok(owed)
    }

    pub fn total_staked(&self) -> u64 {
        self.stakers.values().map(|staker| staker.liquidity).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(tag: &str) -> AccessId {
        AccessId::from_tag(tag)
    }

    #[test]
    fn stake_and_unstake_keep_totals_consistent() {
        let mut pool = StakingPoolState::new();
        pool.add_liquidity(id("a"), 300).unwrap();
        pool.add_liquidity(id("b"), 100).unwrap();
        assert_eq!(pool.liquidity, 400);
        assert_eq!(pool.total_staked(), 400);

        pool.remove_liquidity(id("a"), 50).unwrap();
        assert_eq!(pool.liquidity, 350);
        assert_eq!(pool.total_staked(), 350);
    }

    #[test]
    fn unstake_rejects_overdraw() {
        let mut pool = StakingPoolState::new();
        pool.add_liquidity(id("a"), 10).unwrap();
        assert_eq!(
            pool.remove_liquidity(id("a"), 11).unwrap_err(),
            StakingError::LiquidityTooLow { liquidity: 10, requested: 11 }
        );
        assert_eq!(
            pool.remove_liquidity(id("ghost"), 1).unwrap_err(),
            StakingError::UnknownStaker
        );
    }

    #[test]
    fn rewards_are_stake_weighted() {
        let mut pool = StakingPoolState::new();
        pool.add_liquidity(id("a"), 300).unwrap();
        pool.add_liquidity(id("b"), 100).unwrap();
        let token = TokenId::from_tag("prv");
        assert_eq!(pool.add_reward(token, 100), 0);

        assert_eq!(pool.recompute_rewards(id("a")).unwrap()[&token], 75);
        assert_eq!(pool.recompute_rewards(id("b")).unwrap()[&token], 25);
    }

    #[test]
    fn empty_pool_bounces_rewards() {
        let mut pool = StakingPoolState::new();
        assert_eq!(pool.add_reward(TokenId::from_tag("prv"), 100), 100);
    }

    #[test]
    fn withdraw_clears_and_checkpoints() {
        let mut pool = StakingPoolState::new();
        pool.add_liquidity(id("a"), 100).unwrap();
        let token = TokenId::from_tag("prv");
        pool.add_reward(token, 40);

        let owed = pool.withdraw_rewards(id("a")).unwrap();
        assert_eq!(owed[&token], 40);
        // Nothing further accrued; a second claim yields nothing.
        let again = pool.withdraw_rewards(id("a")).unwrap();
        assert_eq!(again.get(&token).copied().unwrap_or(0), 0);
    }

    #[test]
    fn late_staker_misses_earlier_rewards() {
        let mut pool = StakingPoolState::new();
        let token = TokenId::from_tag("prv");
        pool.add_liquidity(id("a"), 100).unwrap();
        pool.add_reward(token, 40);
        pool.add_liquidity(id("late"), 100).unwrap();

        assert_eq!(pool.recompute_rewards(id("a")).unwrap()[&token], 40);
        let late = pool.recompute_rewards(id("late")).unwrap();
        assert_eq!(late.get(&token).copied().unwrap_or(0), 0);
    }
}
