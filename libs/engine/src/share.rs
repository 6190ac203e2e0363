//! Per-provider bookkeeping records attached to a pool pair.

use std::collections::BTreeMap;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sharddex_types::{AccessId, TokenId};

/// A liquidity provider's claim on one pool.
///
/// `trading_fees` holds fees already settled into concrete amounts;
/// `last_lp_fees_per_share` is the accumulator checkpoint from the last time
/// the record was touched. The claimable total at any height is
/// `trading_fees + amount * (accumulator - checkpoint) / BASE`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Share {
    pub amount: u64,
    pub trading_fees: BTreeMap<TokenId, u64>,
    #[serde(with = "sharddex_amm::serde_big::biguint_map")]
    pub last_lp_fees_per_share: BTreeMap<TokenId, BigUint>,
    pub last_updated_height: u64,
}

impl Share {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Rewards earned by a limit-order maker, waiting to be claimed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderReward {
    pub uncollected_rewards: BTreeMap<TokenId, u64>,
}

impl OrderReward {
    pub fn add(&mut self, token: TokenId, amount: u64) {
        *self.uncollected_rewards.entry(token).or_insert(0) += amount;
    }

    pub fn is_empty(&self) -> bool {
        self.uncollected_rewards.is_empty()
    }
}

/// Cumulative making volume contributed by order makers, per bought token.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MakingVolume {
    #[serde(with = "sharddex_amm::serde_big::biguint_map")]
    pub volume: BTreeMap<AccessId, BigUint>,
}

impl MakingVolume {
    pub fn add(&mut self, access_id: AccessId, amount: &BigUint) {
        let entry = self
            .volume
            .entry(access_id)
            .or_insert_with(|| BigUint::from(0u64));
        *entry += amount;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_serde_round_trip() {
        let mut share = Share::new();
        share.amount = 42;
        share.trading_fees.insert(TokenId::from_tag("abc"), 7);
        share
            .last_lp_fees_per_share
            .insert(TokenId::from_tag("abc"), BigUint::from(10u64).pow(20));
        share.last_updated_height = 11;

        let json = serde_json::to_string(&share).unwrap();
        let back: Share = serde_json::from_str(&json).unwrap();
        assert_eq!(back, share);
    }

    #[test]
    fn order_reward_accumulates() {
        let mut reward = OrderReward::default();
        reward.add(TokenId::from_tag("abc"), 5);
        reward.add(TokenId::from_tag("abc"), 6);
        assert_eq!(reward.uncollected_rewards[&TokenId::from_tag("abc")], 11);
    }
}
