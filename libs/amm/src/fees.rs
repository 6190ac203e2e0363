//! Multi-tier fee distribution
//!
//! Each trade's fee is split three ways: protocol treasury, staking pools and
//! liquidity makers. The maker bucket is further divided between AMM
//! liquidity providers and resting limit orders pro-rata by making volume.

use std::collections::BTreeMap;

use num_bigint::BigUint;
use num_traits::{Signed, Zero};
use sharddex_types::{AccessId, OrderId, TokenId, TradeDirection};

use crate::reserve::PairChange;
use crate::safe_math::to_u64;
use crate::{BASE_LP_FEES_PER_SHARE, BPS};

/// Split `amount` of `token` into protocol and staking buckets, accumulating
/// into the per-token fee maps, and return the remainder owed to liquidity
/// makers.
///
/// Only tokens listed in `staking_reward_tokens` feed staking pools. A pool
/// with zero outstanding shares has no makers to pay, so the maker bucket is
/// redirected wholesale: to the protocol for ordinary tokens, to the staking
/// pools for staking-reward tokens.
pub fn add_staking_and_protocol_fee(
    token: TokenId,
    amount: &BigUint,
    protocol_fees: &mut BTreeMap<TokenId, u64>,
    staking_pool_fees: &mut BTreeMap<TokenId, u64>,
    protocol_fee_percent: u64,
    staking_pool_reward_percent: u64,
    staking_reward_tokens: &[TokenId],
    pool_share_amount: u64,
) -> BigUint {
    let is_staking_reward_token = staking_reward_tokens.contains(&token);

    let mut protocol_percent = protocol_fee_percent;
    let mut staking_percent = if is_staking_reward_token {
        staking_pool_reward_percent
    } else {
        0
    };

    if pool_share_amount == 0 {
        if is_staking_reward_token {
            staking_percent = 100 - protocol_percent;
        } else {
            protocol_percent = 100;
        }
    }

    let protocol_cut = amount * BigUint::from(protocol_percent) / BigUint::from(100u64);
    if let Ok(value) = to_u64(&protocol_cut) {
        if value != 0 {
            *protocol_fees.entry(token).or_insert(0) += value;
        }
    }

    let staking_cut = amount * BigUint::from(staking_percent) / BigUint::from(100u64);
    if let Ok(value) = to_u64(&staking_cut) {
        if value != 0 {
            *staking_pool_fees.entry(token).or_insert(0) += value;
        }
    }

    amount - protocol_cut - staking_cut
}

/// Accrue `amount` of `token` to the liquidity providers of a pool by bumping
/// the per-share accumulator: `delta = amount * BASE / total_shares`.
///
/// A pool without outstanding shares accrues nothing (the caller is expected
/// to have redirected the bucket already).
pub fn add_lp_fee(
    token: TokenId,
    amount: &BigUint,
    pool_share_amount: u64,
    lp_fees_per_share: &mut BTreeMap<TokenId, BigUint>,
) {
    if pool_share_amount == 0 {
        return;
    }
    let delta = amount * &*BASE_LP_FEES_PER_SHARE / BigUint::from(pool_share_amount);
    let entry = lp_fees_per_share.entry(token).or_insert_with(BigUint::zero);
    *entry += delta;
}

/// Extract making volumes from a trade's recorded deltas.
///
/// The making token is the one the trade bought; volume is how much of it
/// each maker supplied. Returns the trade direction inferred from the delta
/// signs, the AMM's volume, and per-owner order volumes.
pub fn get_making_volumes(
    pair_change: &PairChange,
    order_changes: &BTreeMap<OrderId, PairChange>,
    order_owners: &BTreeMap<OrderId, AccessId>,
) -> (TradeDirection, BigUint, BTreeMap<AccessId, BigUint>) {
    // The sold token's delta is positive somewhere; check the pool first,
    // falling back to order fills when the trade bypassed the curve entirely.
    let sold_token0 = if !pair_change.token0.is_zero() || !pair_change.token1.is_zero() {
        pair_change.token0.is_positive()
    } else {
        order_changes.values().any(|change| change.token0.is_positive())
    };
    let direction = if sold_token0 {
        TradeDirection::Sell0
    } else {
        TradeDirection::Sell1
    };

    let bought_magnitude = |change: &PairChange| -> BigUint {
        let bought = match direction {
            TradeDirection::Sell0 => &change.token1,
            TradeDirection::Sell1 => &change.token0,
        };
        bought.magnitude().clone()
    };

    let amm_volume = bought_magnitude(pair_change);
    let mut order_volumes: BTreeMap<AccessId, BigUint> = BTreeMap::new();
    for (order_id, change) in order_changes {
        let Some(owner) = order_owners.get(order_id) else {
            continue;
        };
        let volume = bought_magnitude(change);
        if !volume.is_zero() {
            *order_volumes.entry(*owner).or_insert_with(BigUint::zero) += volume;
        }
    }

    (direction, amm_volume, order_volumes)
}

/// Split the maker bucket between AMM liquidity and limit orders.
///
/// Orders earn `reward * ratio_bps / BPS`, weighted by each owner's share of
/// the total making volume; whatever is not paid to orders stays with the
/// AMM's liquidity providers. With no order volume the AMM keeps everything.
pub fn split_trading_reward(
    reward: &BigUint,
    order_reward_ratio_bps: u64,
    amm_volume: &BigUint,
    order_volumes: &BTreeMap<AccessId, BigUint>,
) -> (BigUint, BTreeMap<AccessId, u64>) {
    let total_volume: BigUint =
        amm_volume + order_volumes.values().fold(BigUint::zero(), |acc, v| acc + v);
    if total_volume.is_zero() || order_volumes.is_empty() {
        return (reward.clone(), BTreeMap::new());
    }

    let order_bucket = reward * BigUint::from(order_reward_ratio_bps.min(BPS)) / BigUint::from(BPS);

    let mut order_rewards = BTreeMap::new();
    let mut paid = BigUint::zero();
    for (owner, volume) in order_volumes {
        let share = &order_bucket * volume / &total_volume;
        if let Ok(value) = to_u64(&share) {
            if value != 0 {
                order_rewards.insert(*owner, value);
                paid += share;
            }
        }
    }

    (reward - paid, order_rewards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    fn token(tag: &str) -> TokenId {
        TokenId::from_tag(tag)
    }

    #[test]
    fn fee_splits_by_configured_percentages() {
        let mut protocol = BTreeMap::new();
        let mut staking = BTreeMap::new();
        let reward_token = token("prv");
        let remain = add_staking_and_protocol_fee(
            reward_token,
            &BigUint::from(1_000u64),
            &mut protocol,
            &mut staking,
            10,
            20,
            &[reward_token],
            500,
        );
        assert_eq!(protocol[&reward_token], 100);
        assert_eq!(staking[&reward_token], 200);
        assert_eq!(remain, BigUint::from(700u64));
    }

    #[test]
    fn non_reward_token_skips_staking_bucket() {
        let mut protocol = BTreeMap::new();
        let mut staking = BTreeMap::new();
        let remain = add_staking_and_protocol_fee(
            token("usdt"),
            &BigUint::from(1_000u64),
            &mut protocol,
            &mut staking,
            10,
            20,
            &[token("prv")],
            500,
        );
        assert_eq!(protocol[&token("usdt")], 100);
        assert!(staking.is_empty());
        assert_eq!(remain, BigUint::from(900u64));
    }

    #[test]
    fn shareless_pool_redirects_maker_bucket() {
        let mut protocol = BTreeMap::new();
        let mut staking = BTreeMap::new();
        // Ordinary token: everything goes to the protocol.
        let remain = add_staking_and_protocol_fee(
            token("usdt"),
            &BigUint::from(1_000u64),
            &mut protocol,
            &mut staking,
            10,
            20,
            &[token("prv")],
            0,
        );
        assert_eq!(protocol[&token("usdt")], 1_000);
        assert!(remain.is_zero());

        // Staking-reward token: the maker bucket flows to staking instead.
        let remain = add_staking_and_protocol_fee(
            token("prv"),
            &BigUint::from(1_000u64),
            &mut protocol,
            &mut staking,
            10,
            20,
            &[token("prv")],
            0,
        );
        assert_eq!(protocol[&token("prv")], 100);
        assert_eq!(staking[&token("prv")], 900);
        assert!(remain.is_zero());
    }

    #[test]
    fn lp_fee_accumulates_per_share() {
        let mut acc = BTreeMap::new();
        add_lp_fee(token("usdt"), &BigUint::from(30u64), 300, &mut acc);
        assert_eq!(acc[&token("usdt")], BigUint::from(10u64).pow(17));
        add_lp_fee(token("usdt"), &BigUint::from(30u64), 300, &mut acc);
        assert_eq!(acc[&token("usdt")], BigUint::from(2u64) * BigUint::from(10u64).pow(17));
    }

    #[test]
    fn lp_fee_noop_without_shares() {
        let mut acc = BTreeMap::new();
        add_lp_fee(token("usdt"), &BigUint::from(30u64), 0, &mut acc);
        assert!(acc.is_empty());
    }

    #[test]
    fn making_volumes_follow_the_bought_token() {
        let maker = AccessId::from_tag("maker");
        let order_id = OrderId::from("ord-1");
        let pair_change = PairChange {
            token0: BigInt::from(82),
            token1: BigInt::from(-232),
        };
        let mut order_changes = BTreeMap::new();
        order_changes.insert(
            order_id.clone(),
            PairChange { token0: BigInt::from(100), token1: BigInt::from(-200) },
        );
        let mut owners = BTreeMap::new();
        owners.insert(order_id, maker);

        let (direction, amm_volume, order_volumes) =
            get_making_volumes(&pair_change, &order_changes, &owners);
        assert_eq!(direction, TradeDirection::Sell0);
        assert_eq!(amm_volume, BigUint::from(232u64));
        assert_eq!(order_volumes[&maker], BigUint::from(200u64));
    }

    #[test]
    fn reward_split_is_volume_weighted() {
        let maker = AccessId::from_tag("maker");
        let mut order_volumes = BTreeMap::new();
        order_volumes.insert(maker, BigUint::from(200u64));
        let (amm_reward, order_rewards) = split_trading_reward(
            &BigUint::from(900u64),
            2_500, // orders may earn up to 25%
            &BigUint::from(600u64),
            &order_volumes,
        );
        // order bucket 225, weighted by 200/800 volume -> 56
        assert_eq!(order_rewards[&maker], 56);
        assert_eq!(amm_reward, BigUint::from(844u64));
    }

    #[test]
    fn reward_split_without_orders_keeps_everything() {
        let (amm_reward, order_rewards) = split_trading_reward(
            &BigUint::from(900u64),
            2_500,
            &BigUint::from(600u64),
            &BTreeMap::new(),
        );
        assert_eq!(amm_reward, BigUint::from(900u64));
        assert!(order_rewards.is_empty());
    }
}
