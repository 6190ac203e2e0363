//! One trading pair's full state: reserves, shares, order book and fee
//! accumulators.

use std::collections::BTreeMap;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sharddex_amm::liquidity::{calculate_share_amount, calculate_virtual_amount};
use sharddex_amm::safe_math::{execute_op_u64, Operator};
use sharddex_amm::reserve::PairReserve;
use sharddex_amm::BASE_LP_FEES_PER_SHARE;
use sharddex_types::{
    AccessId, ArithmeticError, ContributionError, LiquidityError, TokenId,
};

use crate::orderbook::Orderbook;
use crate::request::ContributionData;
use crate::share::{MakingVolume, OrderReward, Share};

/// Aggregate state of one pool pair. The reserve invariants live in
/// [`PairReserve`]; everything else here is bookkeeping keyed by token or
/// provider identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolPairState {
    pub reserve: PairReserve,
    pub shares: BTreeMap<AccessId, Share>,
    pub orderbook: Orderbook,
    #[serde(with = "sharddex_amm::serde_big::biguint_map")]
    pub lp_fees_per_share: BTreeMap<TokenId, BigUint>,
    pub protocol_fees: BTreeMap<TokenId, u64>,
    pub staking_pool_fees: BTreeMap<TokenId, u64>,
    pub making_volume: BTreeMap<TokenId, MakingVolume>,
    pub order_rewards: BTreeMap<AccessId, OrderReward>,
}

impl PoolPairState {
    pub fn new(reserve: PairReserve) -> Self {
        Self {
            reserve,
            shares: BTreeMap::new(),
            orderbook: Orderbook::new(),
            lp_fees_per_share: BTreeMap::new(),
            protocol_fees: BTreeMap::new(),
            staking_pool_fees: BTreeMap::new(),
            making_volume: BTreeMap::new(),
            order_rewards: BTreeMap::new(),
        }
    }

    /// Seed a fresh pool from a matched pair of contributions. Amounts are
    /// re-ordered canonically; virtual reserves are the real amounts under
    /// the requested amplifier.
    pub fn init_from_contributions(
        first: &ContributionData,
        second: &ContributionData,
    ) -> Self {
        let (c0, c1) = if first.token_id <= second.token_id {
            (first, second)
        } else {
            (second, first)
        };
        let (virtual0, virtual1) = calculate_virtual_amount(c0.amount, c1.amount, c0.amplifier);
        Self::new(PairReserve {
            token0_id: c0.token_id,
            token1_id: c1.token_id,
            share_amount: 0,
            token0_real: c0.amount,
            token1_real: c1.amount,
            token0_virtual: virtual0,
            token1_virtual: virtual1,
            amplifier: c0.amplifier,
        })
    }

    /// A pool unfit to absorb further contributions: drained on either side
    /// or without outstanding shares to price against.
    pub fn is_empty(&self) -> bool {
        use num_traits::Zero;
        self.reserve.token0_real == 0
            || self.reserve.token1_real == 0
            || self.reserve.token0_virtual.is_zero()
            || self.reserve.token1_virtual.is_zero()
            || self.reserve.share_amount == 0
    }

    /// Proportionally match two contributions against the current price.
    /// Inputs must already be in canonical token order. Returns
    /// `(actual0, returned0, actual1, returned1)`.
    pub fn compute_actual_contributed_amounts(
        &self,
        amount0: u64,
        amount1: u64,
    ) -> Result<(u64, u64, u64, u64), ContributionError> {
        if self.is_empty() {
            return Err(ContributionError::InvalidPool);
        }
        // Cap the token0 side by what the token1 side affords at pool price,
        // then recompute the token1 side from the accepted token0 amount so
        // both roundings go downward.
        let afford0 = BigUint::from(amount1) * BigUint::from(self.reserve.token0_real)
            / BigUint::from(self.reserve.token1_real);
        let actual0 = afford0.min(BigUint::from(amount0));
        let actual1 = &actual0 * BigUint::from(self.reserve.token1_real)
            / BigUint::from(self.reserve.token0_real);

        let actual0 =
            u64::try_from(&actual0).map_err(|_| ArithmeticError::AmountOutOfRange)?;
        let actual1 =
            u64::try_from(&actual1).map_err(|_| ArithmeticError::AmountOutOfRange)?;
        Ok((actual0, amount0 - actual0, actual1, amount1 - actual1))
    }

    /// Grant shares for `(amount_a of token_a, amount_b of token_b)` and move
    /// reserves, atomically: nothing mutates if the reserve update fails.
    pub fn add_reserve_and_calculate_share(
        &mut self,
        token_a: TokenId,
        token_b: TokenId,
        amount_a: u64,
        amount_b: u64,
    ) -> Result<u64, ContributionError> {
        let (amount0, amount1) = if token_a <= token_b {
            (amount_a, amount_b)
        } else {
            (amount_b, amount_a)
        };
        let share_amount = calculate_share_amount(
            self.reserve.token0_real,
            self.reserve.token1_real,
            amount0,
            amount1,
            self.reserve.share_amount,
        )?;
        self.reserve
            .update_reserve_data(amount0, amount1, share_amount, Operator::Add)?;
        Ok(share_amount)
    }

    /// Credit `share_amount` newly granted shares to `access_id`.
    pub fn add_share(
        &mut self,
        access_id: AccessId,
        share_amount: u64,
        height: u64,
    ) -> Result<(), LiquidityError> {
        self.update_share_value(access_id, share_amount, height, Operator::Add)
    }

    /// Burn `share_amount` shares of `access_id` and pay out the
    /// proportional reserves. Returns `(amount0, amount1, burned_shares)`.
    ///
    /// Rejects withdrawals of zero shares or more than the provider holds.
    pub fn deduct_share(
        &mut self,
        access_id: AccessId,
        share_amount: u64,
        height: u64,
    ) -> Result<(u64, u64, u64), LiquidityError> {
        let recorded = self
            .shares
            .get(&access_id)
            .map(|share| share.amount)
            .ok_or(LiquidityError::UnknownProvider)?;
        if share_amount == 0 || recorded == 0 {
            return Err(LiquidityError::ZeroShareWithdrawal);
        }
        if share_amount > recorded {
            return Err(LiquidityError::Arithmetic(ArithmeticError::Underflow {
                value: recorded,
                delta: share_amount,
            }));
        }

        let total = BigUint::from(self.reserve.share_amount);
        let amount0 = BigUint::from(self.reserve.token0_real) * BigUint::from(share_amount)
            / &total;
        let amount1 = BigUint::from(self.reserve.token1_real) * BigUint::from(share_amount)
            / &total;
        let amount0 = u64::try_from(&amount0)
            .map_err(|_| LiquidityError::Arithmetic(ArithmeticError::AmountOutOfRange))?;
        let amount1 = u64::try_from(&amount1)
            .map_err(|_| LiquidityError::Arithmetic(ArithmeticError::AmountOutOfRange))?;

        self.reserve
            .update_reserve_data(amount0, amount1, share_amount, Operator::Sub)
            .map_err(LiquidityError::Arithmetic)?;
        self.update_share_value(access_id, share_amount, height, Operator::Sub)?;
        Ok((amount0, amount1, share_amount))
    }

    /// Shared add/sub path for a provider's share record. Settles the
    /// provider's accrued fees against the accumulator checkpoint before the
    /// amount changes, so the fee stream is always priced at the share count
    /// it was earned under.
    fn update_share_value(
        &mut self,
        access_id: AccessId,
        share_amount: u64,
        height: u64,
        op: Operator,
    ) -> Result<(), LiquidityError> {
        if !self.shares.contains_key(&access_id) {
            if op == Operator::Sub {
                return Err(LiquidityError::UnknownProvider);
            }
            self.shares.insert(access_id, Share::new());
        } else {
            let settled = self.recompute_lp_rewards(access_id)?;
            let share = self
                .shares
                .get_mut(&access_id)
                .ok_or(LiquidityError::UnknownProvider)?;
            share.trading_fees = settled;
        }

        let checkpoint = self.lp_fees_per_share.clone();
        let total = execute_op_u64(self.reserve.share_amount, share_amount, op)
            .map_err(LiquidityError::Arithmetic)?;
        let share = self
            .shares
            .get_mut(&access_id)
            .ok_or(LiquidityError::UnknownProvider)?;
        share.amount = execute_op_u64(share.amount, share_amount, op)
            .map_err(LiquidityError::Arithmetic)?;
        share.last_lp_fees_per_share = checkpoint;
        share.last_updated_height = height;
        self.reserve.share_amount = total;
        Ok(())
    }

    /// The provider's claimable trading fees per token: already-settled fees
    /// plus the accumulator delta since their checkpoint.
    pub fn recompute_lp_rewards(
        &self,
        access_id: AccessId,
    ) -> Result<BTreeMap<TokenId, u64>, LiquidityError> {
        let share = self
            .shares
            .get(&access_id)
            .ok_or(LiquidityError::UnknownProvider)?;
        let mut result = share.trading_fees.clone();
        for (token, current) in &self.lp_fees_per_share {
            let baseline = share
                .last_lp_fees_per_share
                .get(token)
                .cloned()
                .unwrap_or_else(|| BigUint::from(0u64));
            if *current < baseline {
                return Err(LiquidityError::Arithmetic(ArithmeticError::NegativeResult));
            }
            let accrued =
                (current - baseline) * BigUint::from(share.amount) / &*BASE_LP_FEES_PER_SHARE;
            let accrued = u64::try_from(&accrued)
                .map_err(|_| LiquidityError::Arithmetic(ArithmeticError::AmountOutOfRange))?;
            let settled = result.entry(*token).or_insert(0);
            *settled = settled
                .checked_add(accrued)
                .ok_or(LiquidityError::Arithmetic(ArithmeticError::Overflow {
                    value: *settled,
                    delta: accrued,
                }))?;
        }
        Ok(result)
    }

    /// Sum of all provider share amounts; equals the pool's recorded total
    /// whenever the state is consistent.
    pub fn total_provider_shares(&self) -> u64 {
        self.shares.values().map(|share| share.amount).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharddex_amm::BASE_AMPLIFIER;
    use sharddex_types::TxId;

    fn fixture_pool() -> PoolPairState {
        // The canonical reserve-math fixture: shares 200, reals 100/400,
        // virtuals 200/800 under amplifier 20000.
        let mut pool = PoolPairState::new(PairReserve {
            token0_id: TokenId::from_tag("123"),
            token1_id: TokenId::from_tag("456"),
            share_amount: 200,
            token0_real: 100,
            token1_real: 400,
            token0_virtual: BigUint::from(200u64),
            token1_virtual: BigUint::from(800u64),
            amplifier: 20_000,
        });
        pool.shares.insert(
            AccessId::from_tag("lp-1"),
            Share { amount: 200, ..Share::new() },
        );
        pool
    }

    fn contribution(token: &str, amount: u64, amplifier: u64) -> ContributionData {
        ContributionData {
            pool_pair_id: sharddex_types::PoolPairId::from(""),
            pair_hash: "hash".to_string(),
            receiver: String::new(),
            token_id: TokenId::from_tag(token),
            amount,
            amplifier,
            access_id: AccessId::from_tag("lp-1"),
            tx_id: TxId::from_tag("tx"),
            shard_id: 0,
        }
    }

    #[test]
    fn add_reserve_and_share_matches_reserve_math_fixture() {
        let mut pool = fixture_pool();
        let granted = pool
            .add_reserve_and_calculate_share(
                TokenId::from_tag("123"),
                TokenId::from_tag("456"),
                50,
                200,
            )
            .unwrap();
        assert_eq!(granted, 100);
        assert_eq!(pool.reserve.token0_real, 150);
        assert_eq!(pool.reserve.token1_real, 600);
        assert_eq!(pool.reserve.token0_virtual, BigUint::from(300u64));
        assert_eq!(pool.reserve.token1_virtual, BigUint::from(1_200u64));
    }

    #[test]
    fn add_reserve_accepts_reversed_token_order() {
        let mut pool = fixture_pool();
        let granted = pool
            .add_reserve_and_calculate_share(
                TokenId::from_tag("456"),
                TokenId::from_tag("123"),
                200,
                50,
            )
            .unwrap();
        assert_eq!(granted, 100);
        assert_eq!(pool.reserve.token0_real, 150);
    }

    #[test]
    fn contribution_matching_returns_excess() {
        let pool = fixture_pool();
        // Pool price is 1:4. Offering (50, 400) leaves 200 of token1 unused.
        let (actual0, returned0, actual1, returned1) =
            pool.compute_actual_contributed_amounts(50, 400).unwrap();
        assert_eq!((actual0, returned0), (50, 0));
        assert_eq!((actual1, returned1), (200, 200));
    }

    #[test]
    fn contribution_matching_caps_by_counterpart() {
        let pool = fixture_pool();
        // Token1 side only affords 25 of token0.
        let (actual0, returned0, actual1, returned1) =
            pool.compute_actual_contributed_amounts(50, 100).unwrap();
        assert_eq!((actual0, returned0), (25, 25));
        assert_eq!((actual1, returned1), (100, 0));
    }

    #[test]
    fn empty_pool_rejects_contribution_matching() {
        let pool = PoolPairState::init_from_contributions(
            &contribution("123", 0, BASE_AMPLIFIER),
            &contribution("456", 10, BASE_AMPLIFIER),
        );
        assert_eq!(
            pool.compute_actual_contributed_amounts(1, 1).unwrap_err(),
            ContributionError::InvalidPool
        );
    }

    #[test]
    fn init_orders_contributions_canonically() {
        let pool = PoolPairState::init_from_contributions(
            &contribution("456", 400, 20_000),
            &contribution("123", 100, 20_000),
        );
        assert_eq!(pool.reserve.token0_id, TokenId::from_tag("123"));
        assert_eq!(pool.reserve.token0_real, 100);
        assert_eq!(pool.reserve.token1_real, 400);
        assert_eq!(pool.reserve.token0_virtual, BigUint::from(200u64));
        assert_eq!(pool.reserve.token1_virtual, BigUint::from(800u64));
    }

    #[test]
    fn share_lifecycle_round_trips() {
        let mut pool = fixture_pool();
        let lp = AccessId::from_tag("lp-2");
        pool.add_share(lp, 100, 5).unwrap();
        pool.reserve
            .update_reserve_data(50, 200, 0, Operator::Add)
            .unwrap();
        assert_eq!(pool.reserve.share_amount, 300);
        assert_eq!(pool.total_provider_shares(), 300);

        let (amount0, amount1, burned) = pool.deduct_share(lp, 100, 6).unwrap();
        // floor(150 * 100 / 300), floor(600 * 100 / 300)
        assert_eq!((amount0, amount1, burned), (50, 200, 100));
        assert_eq!(pool.reserve.share_amount, 200);
        assert_eq!(pool.shares[&lp].amount, 0);
        assert_eq!(pool.shares[&lp].last_updated_height, 6);
    }

    #[test]
    fn deduct_rejects_overdraw_and_strangers() {
        let mut pool = fixture_pool();
        assert_eq!(
            pool.deduct_share(AccessId::from_tag("nobody"), 1, 9).unwrap_err(),
            LiquidityError::UnknownProvider
        );
        assert!(matches!(
            pool.deduct_share(AccessId::from_tag("lp-1"), 201, 9).unwrap_err(),
            LiquidityError::Arithmetic(ArithmeticError::Underflow { .. })
        ));
        assert_eq!(
            pool.deduct_share(AccessId::from_tag("lp-1"), 0, 9).unwrap_err(),
            LiquidityError::ZeroShareWithdrawal
        );
    }

    #[test]
    fn lp_rewards_follow_the_accumulator() {
        let mut pool = fixture_pool();
        let lp = AccessId::from_tag("lp-1");
        let token = TokenId::from_tag("123");
        // Accrue 30 units over 200 shares: delta = 30 * BASE / 200.
        sharddex_amm::fees::add_lp_fee(
            token,
            &BigUint::from(30u64),
            pool.reserve.share_amount,
            &mut pool.lp_fees_per_share,
        );
        let rewards = pool.recompute_lp_rewards(lp).unwrap();
        assert_eq!(rewards[&token], 30);

        // Touching the share settles fees and resets the checkpoint.
        pool.add_share(lp, 100, 7).unwrap();
        assert_eq!(pool.shares[&lp].trading_fees[&token], 30);
        let rewards = pool.recompute_lp_rewards(lp).unwrap();
        assert_eq!(rewards[&token], 30);
    }
}
