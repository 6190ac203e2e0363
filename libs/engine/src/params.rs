//! Versioned protocol configuration
//!
//! Params are replaced wholesale by a governance instruction after
//! validation; nothing else mutates them. A rejected replacement leaves the
//! previous values in effect.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sharddex_types::{ParamsError, PoolPairId, TokenId};

use crate::pool_pair::PoolPairState;
use crate::BPS;

/// Hard cap on any per-pool fee rate.
pub const MAX_FEE_RATE_BPS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// Fee rate applied to pools without an explicit override.
    pub default_fee_rate_bps: u64,
    /// Per-pool fee rate overrides.
    pub fee_rate_bps: BTreeMap<PoolPairId, u64>,
    /// Discount granted when the trading fee is paid in the native coin.
    pub native_discount_percent: u64,
    /// Protocol treasury's percentage of every trading fee.
    pub trading_protocol_fee_percent: u64,
    /// Staking pools' percentage of trading fees paid in staking-reward
    /// tokens.
    pub trading_staking_pool_reward_percent: u64,
    /// Relative weights for splitting staking rewards across staking pools.
    pub staking_pools_share: BTreeMap<TokenId, u64>,
    /// Tokens whose fees feed staking pools at all.
    pub staking_reward_tokens: Vec<TokenId>,
    /// Native amount burned to mint an access NFT.
    pub mint_nft_require_amount: u64,
    /// Cap on simultaneously resting orders per identity.
    pub max_orders_per_nft: usize,
    /// Default share of the maker bucket available to limit orders.
    pub default_order_reward_ratio_bps: u64,
    /// Per-pool overrides of the order reward ratio.
    pub order_reward_ratio_bps: BTreeMap<PoolPairId, u64>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            default_fee_rate_bps: 30,
            fee_rate_bps: BTreeMap::new(),
            native_discount_percent: 25,
            trading_protocol_fee_percent: 10,
            trading_staking_pool_reward_percent: 10,
            staking_pools_share: BTreeMap::new(),
            staking_reward_tokens: vec![TokenId::native()],
            mint_nft_require_amount: 1_000_000_000,
            max_orders_per_nft: 10,
            default_order_reward_ratio_bps: 2_500,
            order_reward_ratio_bps: BTreeMap::new(),
        }
    }
}

impl Params {
    /// Fee rate for one pool, falling back to the default.
    pub fn pool_fee_rate(&self, pool_pair_id: &PoolPairId) -> u64 {
        self.fee_rate_bps
            .get(pool_pair_id)
            .copied()
            .unwrap_or(self.default_fee_rate_bps)
    }

    /// Maker-bucket order ratio for one pool, falling back to the default.
    pub fn order_reward_ratio(&self, pool_pair_id: &PoolPairId) -> u64 {
        self.order_reward_ratio_bps
            .get(pool_pair_id)
            .copied()
            .unwrap_or(self.default_order_reward_ratio_bps)
    }

    /// Validate a replacement candidate against the live state. All checks
    /// must pass before any of it takes effect.
    pub fn validate(
        &self,
        pool_pairs: &BTreeMap<PoolPairId, PoolPairState>,
    ) -> Result<(), ParamsError> {
        if self.default_fee_rate_bps > MAX_FEE_RATE_BPS {
            return Err(ParamsError::FeeRateTooHigh {
                rate: self.default_fee_rate_bps,
                cap: MAX_FEE_RATE_BPS,
            });
        }
        for (pool_pair_id, rate) in &self.fee_rate_bps {
            if *rate > MAX_FEE_RATE_BPS {
                return Err(ParamsError::FeeRateTooHigh { rate: *rate, cap: MAX_FEE_RATE_BPS });
            }
            if !pool_pairs.contains_key(pool_pair_id) {
                return Err(ParamsError::UnknownPoolPair(pool_pair_id.to_string()));
            }
        }

        let percents = [
            ("native discount", self.native_discount_percent),
            ("protocol fee", self.trading_protocol_fee_percent),
            (
                "staking pool reward",
                self.trading_staking_pool_reward_percent,
            ),
        ];
        for (name, value) in percents {
            if value > 100 {
                return Err(ParamsError::PercentOutOfRange { name, value });
            }
        }
        let split =
            self.trading_protocol_fee_percent + self.trading_staking_pool_reward_percent;
        if split > 100 {
            return Err(ParamsError::SplitOverflow { sum: split });
        }

        if self.default_order_reward_ratio_bps > BPS {
            return Err(ParamsError::PercentOutOfRange {
                name: "order reward ratio",
                value: self.default_order_reward_ratio_bps,
            });
        }
        for (pool_pair_id, ratio) in &self.order_reward_ratio_bps {
            if *ratio > BPS {
                return Err(ParamsError::PercentOutOfRange {
                    name: "order reward ratio",
                    value: *ratio,
                });
            }
            if !pool_pairs.contains_key(pool_pair_id) {
                return Err(ParamsError::UnknownPoolPair(pool_pair_id.to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_against_empty_state() {
        Params::default().validate(&BTreeMap::new()).unwrap();
    }

    #[test]
    fn rejects_excessive_fee_rate() {
        let params = Params { default_fee_rate_bps: MAX_FEE_RATE_BPS + 1, ..Params::default() };
        assert_eq!(
            params.validate(&BTreeMap::new()).unwrap_err(),
            ParamsError::FeeRateTooHigh { rate: MAX_FEE_RATE_BPS + 1, cap: MAX_FEE_RATE_BPS }
        );
    }

    #[test]
    fn rejects_split_over_100() {
        let params = Params {
            trading_protocol_fee_percent: 60,
            trading_staking_pool_reward_percent: 50,
            ..Params::default()
        };
        assert_eq!(
            params.validate(&BTreeMap::new()).unwrap_err(),
            ParamsError::SplitOverflow { sum: 110 }
        );
    }

    #[test]
    fn rejects_unknown_pool_reference() {
        let mut params = Params::default();
        params.fee_rate_bps.insert(PoolPairId::from("ghost-pool"), 10);
        assert_eq!(
            params.validate(&BTreeMap::new()).unwrap_err(),
            ParamsError::UnknownPoolPair("ghost-pool".to_string())
        );
    }

    #[test]
    fn per_pool_overrides_fall_back() {
        let mut params = Params::default();
        let pool = PoolPairId::from("pool-a");
        params.fee_rate_bps.insert(pool.clone(), 77);
        assert_eq!(params.pool_fee_rate(&pool), 77);
        assert_eq!(params.pool_fee_rate(&PoolPairId::from("other")), 30);
    }
}
