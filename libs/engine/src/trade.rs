//! Multi-hop trade evaluation
//!
//! [`maybe_accept_trade`] computes the maximal legal trade along a path of
//! pools, interleaving constant-product swaps with fixed-rate order fills at
//! every hop. It runs on working copies of the touched aggregates: a refund
//! simply drops them, so rejection can never leak partial mutations.
//! [`track_fee`] then accrues the trade's fee along the same path.

use std::collections::BTreeMap;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sharddex_amm::reserve::{PairChange, PairReserve};
use sharddex_amm::{add_lp_fee, add_staking_and_protocol_fee, get_making_volumes, split_trading_reward};
use sharddex_types::{
    AccessId, ArithmeticError, OrderId, PoolPairId, SwapError, TokenId, TradeDirection,
};

use crate::orderbook::Orderbook;

/// Everything the processor needs to replay an accepted trade without
/// recomputation: per-hop reserve deltas, per-order balance deltas and the
/// fee amounts earned per hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedTrade {
    pub receiver: String,
    pub trade_path: Vec<PoolPairId>,
    pub token_to_buy: TokenId,
    /// Final output credited to the trader.
    pub amount: u64,
    pub pair_changes: Vec<PairChange>,
    pub order_changes: Vec<BTreeMap<OrderId, PairChange>>,
    pub reward_earned: Vec<BTreeMap<TokenId, u64>>,
}

/// Maker-side fee outcome of one trade, applied to pool state by both
/// producer and processor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeeDistribution {
    pub order_reward_changes: Vec<BTreeMap<AccessId, BTreeMap<TokenId, u64>>>,
    pub making_volume_changes: Vec<BTreeMap<TokenId, BTreeMap<AccessId, BigUint>>>,
}

/// Drive `sell_remain` through one hop: swap in the pool up to each resting
/// order's rate, then fill the order, until the input is exhausted or the
/// hop has nothing left to offer. Returns the hop's total output.
fn match_one_hop(
    mut sell_remain: u64,
    reserve: &mut PairReserve,
    orderbook: &mut Orderbook,
    direction: TradeDirection,
    pair_change: &mut PairChange,
    order_changes: &mut BTreeMap<OrderId, PairChange>,
) -> Result<u64, SwapError> {
    let mut total_buy: u64 = 0;
    loop {
        let order_index = orderbook.next_order_index(direction);
        let order_rate = order_index.map(|index| orderbook.orders()[index].rate());

        let step = reserve.swap_to_reach_order_rate(sell_remain, direction, order_rate.as_ref())?;
        sell_remain = step.sell_remain;
        total_buy = total_buy
            .checked_add(step.buy_amount)
            .ok_or(ArithmeticError::Overflow { value: total_buy, delta: step.buy_amount })?;
        pair_change.accumulate(&step.change);
        if sell_remain == 0 {
            break;
        }

        let Some(index) = order_index else {
            break;
        };
        let order = orderbook.order_at_mut(index);
        let fill = order.match_incoming(sell_remain, direction)?;
        sell_remain = fill.sell_remain;
        total_buy = total_buy
            .checked_add(fill.buy_amount)
            .ok_or(ArithmeticError::Overflow { value: total_buy, delta: fill.buy_amount })?;
        order_changes
            .entry(order.id.clone())
            .or_default()
            .accumulate(&fill.change);
        if sell_remain == 0 {
            break;
        }
    }
    Ok(total_buy)
}

/// Evaluate a trade along `trade_path`. All-or-nothing: any hop failure or a
/// final output below `min_amount` returns an error and leaves the caller to
/// discard the working copies.
#[allow(clippy::too_many_arguments)]
pub fn maybe_accept_trade(
    amount_in: u64,
    fee: u64,
    trade_path: &[PoolPairId],
    receiver: &str,
    reserves: &mut [PairReserve],
    directions: &[TradeDirection],
    orderbooks: &mut [Orderbook],
    token_to_buy: TokenId,
    min_amount: u64,
) -> Result<AcceptedTrade, SwapError> {
    let hops = reserves.len();
    if hops == 0
        || directions.len() != hops
        || orderbooks.len() != hops
        || trade_path.len() != hops
    {
        return Err(SwapError::PathMismatch);
    }
    if amount_in < fee {
        return Err(SwapError::FeeExceedsInput { amount: amount_in, fee });
    }

    let mut accepted = AcceptedTrade {
        receiver: receiver.to_string(),
        trade_path: trade_path.to_vec(),
        token_to_buy,
        amount: 0,
        pair_changes: vec![PairChange::zero(); hops],
        order_changes: vec![BTreeMap::new(); hops],
        reward_earned: vec![BTreeMap::new(); hops],
    };

    let mut sell_remain = amount_in - fee;
    let mut total_buy = 0;
    for hop in 0..hops {
        total_buy = match_one_hop(
            sell_remain,
            &mut reserves[hop],
            &mut orderbooks[hop],
            directions[hop],
            &mut accepted.pair_changes[hop],
            &mut accepted.order_changes[hop],
        )?;
        // The hop's output funds the next hop.
        sell_remain = total_buy;
    }

    if total_buy < min_amount {
        return Err(SwapError::MinAmountNotReached { min: min_amount, actual: total_buy });
    }
    accepted.amount = total_buy;
    Ok(accepted)
}

/// Accrue a trade's fee along its path.
///
/// Fees paid in the native coin are divided across hops by fee-rate weight
/// directly. Fees paid in the sold token are accrued hop by hop in that
/// hop's sell token, with the remainder swapped forward through the hop's
/// pool and orders (those conversion deltas merge into `accepted`).
#[allow(clippy::too_many_arguments)]
pub fn track_fee(
    fee: u64,
    fee_in_native: bool,
    token_to_sell: TokenId,
    reserves: &mut [PairReserve],
    directions: &[TradeDirection],
    orderbooks: &mut [Orderbook],
    lp_fees_per_share: &mut [BTreeMap<TokenId, BigUint>],
    protocol_fees: &mut [BTreeMap<TokenId, u64>],
    staking_pool_fees: &mut [BTreeMap<TokenId, u64>],
    pool_fee_rates: &[u64],
    order_reward_ratios: &[u64],
    protocol_fee_percent: u64,
    staking_pool_reward_percent: u64,
    staking_reward_tokens: &[TokenId],
    accepted: &mut AcceptedTrade,
) -> Result<FeeDistribution, SwapError> {
    let hops = reserves.len();
    if directions.len() != hops
        || orderbooks.len() != hops
        || pool_fee_rates.len() != hops
        || order_reward_ratios.len() != hops
    {
        return Err(SwapError::PathMismatch);
    }

    let mut distribution = FeeDistribution {
        order_reward_changes: vec![BTreeMap::new(); hops],
        making_volume_changes: vec![BTreeMap::new(); hops],
    };

    let native_fee = fee_in_native || token_to_sell == TokenId::native();
    let mut fee_rate_remain: u64 = pool_fee_rates.iter().sum();
    let mut fee_remain = fee;

    for hop in 0..hops {
        if fee_rate_remain == 0 {
            break;
        }
        let reward = sharddex_amm::mul_div_floor_u64(fee_remain, pool_fee_rates[hop], fee_rate_remain)?;
        let reward_token = if native_fee {
            TokenId::native()
        } else {
            match directions[hop] {
                TradeDirection::Sell0 => reserves[hop].token0_id,
                TradeDirection::Sell1 => reserves[hop].token1_id,
            }
        };

        accrue_hop_reward(
            hop,
            reward,
            reward_token,
            &reserves[hop],
            &orderbooks[hop],
            &mut lp_fees_per_share[hop],
            &mut protocol_fees[hop],
            &mut staking_pool_fees[hop],
            order_reward_ratios[hop],
            protocol_fee_percent,
            staking_pool_reward_percent,
            staking_reward_tokens,
            accepted,
            &mut distribution,
        )?;

        fee_rate_remain -= pool_fee_rates[hop];
        fee_remain -= reward;

        // A native-coin fee needs no conversion between hops; a sold-token
        // fee must ride the path so each hop is paid in its own sell token.
        if !native_fee && hop + 1 < hops {
            let mut pair_change = PairChange::zero();
            let mut order_changes = BTreeMap::new();
            let converted = match_one_hop(
                fee_remain,
                &mut reserves[hop],
                &mut orderbooks[hop],
                directions[hop],
                &mut pair_change,
                &mut order_changes,
            )?;
            accepted.pair_changes[hop].accumulate(&pair_change);
            for (order_id, change) in order_changes {
                accepted.order_changes[hop]
                    .entry(order_id)
                    .or_default()
                    .accumulate(&change);
            }
            fee_remain = converted;
        }
    }

    Ok(distribution)
}

/// Split one hop's fee reward into protocol, staking and maker buckets and
/// accrue each. Shared between the producer (computing the outcome) and the
/// processor (replaying `reward_earned`).
#[allow(clippy::too_many_arguments)]
fn accrue_hop_reward(
    hop: usize,
    reward: u64,
    reward_token: TokenId,
    reserve: &PairReserve,
    orderbook: &Orderbook,
    lp_fees_per_share: &mut BTreeMap<TokenId, BigUint>,
    protocol_fees: &mut BTreeMap<TokenId, u64>,
    staking_pool_fees: &mut BTreeMap<TokenId, u64>,
    order_reward_ratio: u64,
    protocol_fee_percent: u64,
    staking_pool_reward_percent: u64,
    staking_reward_tokens: &[TokenId],
    accepted: &mut AcceptedTrade,
    distribution: &mut FeeDistribution,
) -> Result<(), SwapError> {
    let maker_bucket = add_staking_and_protocol_fee(
        reward_token,
        &BigUint::from(reward),
        protocol_fees,
        staking_pool_fees,
        protocol_fee_percent,
        staking_pool_reward_percent,
        staking_reward_tokens,
        reserve.share_amount,
    );

    let owners = orderbook.owners();
    let (direction, amm_volume, order_volumes) = get_making_volumes(
        &accepted.pair_changes[hop],
        &accepted.order_changes[hop],
        &owners,
    );
    let making_token = match direction {
        TradeDirection::Sell0 => reserve.token1_id,
        TradeDirection::Sell1 => reserve.token0_id,
    };

    let (amm_reward, order_rewards) =
        split_trading_reward(&maker_bucket, order_reward_ratio, &amm_volume, &order_volumes);

    for (owner, amount) in &order_rewards {
        *distribution.order_reward_changes[hop]
            .entry(*owner)
            .or_default()
            .entry(reward_token)
            .or_insert(0) += amount;
    }
    if !order_volumes.is_empty() {
        let per_token = distribution.making_volume_changes[hop]
            .entry(making_token)
            .or_default();
        for (owner, volume) in order_volumes {
            let entry = per_token.entry(owner).or_insert_with(|| BigUint::from(0u64));
            *entry += volume;
        }
    }

    add_lp_fee(reward_token, &amm_reward, reserve.share_amount, lp_fees_per_share);
    *accepted.reward_earned[hop].entry(reward_token).or_insert(0) += reward;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::Order;
    use sharddex_types::AccessId;

    fn reserve(real0: u64, real1: u64, shares: u64) -> PairReserve {
        PairReserve {
            token0_id: TokenId::from_tag("123"),
            token1_id: TokenId::from_tag("456"),
            share_amount: shares,
            token0_real: real0,
            token1_real: real1,
            token0_virtual: BigUint::from(real0),
            token1_virtual: BigUint::from(real1),
            amplifier: sharddex_amm::BASE_AMPLIFIER,
        }
    }

    fn path(n: usize) -> Vec<PoolPairId> {
        (0..n).map(|i| PoolPairId::from(format!("pool-{i}").as_str())).collect()
    }

    #[test]
    fn single_hop_pool_only_trade() {
        let mut reserves = vec![reserve(1_000, 4_000, 100)];
        let mut orderbooks = vec![Orderbook::new()];
        let accepted = maybe_accept_trade(
            100,
            0,
            &path(1),
            "trader",
            &mut reserves,
            &[TradeDirection::Sell0],
            &mut orderbooks,
            TokenId::from_tag("456"),
            1,
        )
        .unwrap();
        // floor(100 * 4000 / 1100) = 363
        assert_eq!(accepted.amount, 363);
        assert_eq!(reserves[0].token0_real, 1_100);
        assert_eq!(reserves[0].token1_real, 4_000 - 363);
    }

    #[test]
    fn min_amount_refunds_whole_trade() {
        let mut reserves = vec![reserve(1_000, 4_000, 100)];
        let mut orderbooks = vec![Orderbook::new()];
        let err = maybe_accept_trade(
            100,
            0,
            &path(1),
            "trader",
            &mut reserves,
            &[TradeDirection::Sell0],
            &mut orderbooks,
            TokenId::from_tag("456"),
            1_000_000,
        )
        .unwrap_err();
        assert_eq!(err, SwapError::MinAmountNotReached { min: 1_000_000, actual: 363 });
    }

    #[test]
    fn empty_pool_refunds() {
        let mut reserves = vec![reserve(0, 0, 0)];
        let mut orderbooks = vec![Orderbook::new()];
        let err = maybe_accept_trade(
            100,
            0,
            &path(1),
            "trader",
            &mut reserves,
            &[TradeDirection::Sell0],
            &mut orderbooks,
            TokenId::from_tag("456"),
            0,
        )
        .unwrap_err();
        assert_eq!(err, SwapError::InsufficientLiquidity);
    }

    #[test]
    fn order_fill_beats_pool_when_rate_is_better() {
        // Pool at price 1:1; a maker sells token1 at 2 token1 per token0,
        // which out-prices the pool, so the order fills first.
        let mut reserves = vec![reserve(1_000, 1_000, 100)];
        let mut book = Orderbook::new();
        book.insert_order(Order {
            id: OrderId::from("ord-1"),
            access_id: AccessId::from_tag("maker"),
            direction: TradeDirection::Sell1,
            token0_rate: 1,
            token1_rate: 2,
            token0_balance: 0,
            token1_balance: 40,
        });
        let mut orderbooks = vec![book];
        let accepted = maybe_accept_trade(
            10,
            0,
            &path(1),
            "trader",
            &mut reserves,
            &[TradeDirection::Sell0],
            &mut orderbooks,
            TokenId::from_tag("456"),
            1,
        )
        .unwrap();
        // All 10 sold to the order at rate 2.
        assert_eq!(accepted.amount, 20);
        assert!(accepted.pair_changes[0].is_zero());
        let order = orderbooks[0].order(&OrderId::from("ord-1")).unwrap();
        assert_eq!(order.token0_balance, 10);
        assert_eq!(order.token1_balance, 20);
        assert_eq!(
            accepted.order_changes[0][&OrderId::from("ord-1")],
            PairChange { token0: 10.into(), token1: (-20).into() }
        );
    }

    #[test]
    fn trade_spills_back_into_pool_after_order_empties() {
        let mut reserves = vec![reserve(1_000, 1_000, 100)];
        let mut book = Orderbook::new();
        book.insert_order(Order {
            id: OrderId::from("ord-1"),
            access_id: AccessId::from_tag("maker"),
            direction: TradeDirection::Sell1,
            token0_rate: 1,
            token1_rate: 2,
            token0_balance: 0,
            token1_balance: 40,
        });
        let mut orderbooks = vec![book];
        let accepted = maybe_accept_trade(
            100,
            0,
            &path(1),
            "trader",
            &mut reserves,
            &[TradeDirection::Sell0],
            &mut orderbooks,
            TokenId::from_tag("456"),
            1,
        )
        .unwrap();
        // Order takes ceil(40/2)=20 token0 for its 40 token1; the remaining
        // 80 token0 swap in the pool.
        let order = orderbooks[0].order(&OrderId::from("ord-1")).unwrap();
        assert_eq!(order.token1_balance, 0);
        assert_eq!(order.token0_balance, 20);
        assert!(accepted.amount > 40);
        assert_eq!(reserves[0].token0_real, 1_080);
    }

    #[test]
    fn multi_hop_carries_output_forward() {
        let mut reserves = vec![reserve(1_000, 1_000, 100), reserve(2_000, 2_000, 100)];
        let mut orderbooks = vec![Orderbook::new(), Orderbook::new()];
        let accepted = maybe_accept_trade(
            100,
            0,
            &path(2),
            "trader",
            &mut reserves,
            &[TradeDirection::Sell0, TradeDirection::Sell0],
            &mut orderbooks,
            TokenId::from_tag("456"),
            1,
        )
        .unwrap();
        // hop1: floor(100*1000/1100) = 90; hop2: floor(90*2000/2090) = 86
        assert_eq!(accepted.amount, 86);
        assert_eq!(reserves[1].token0_real, 2_090);
    }

    #[test]
    fn native_fee_accrues_across_hops_by_weight() {
        let mut reserves = vec![reserve(1_000, 1_000, 100), reserve(2_000, 2_000, 100)];
        let mut orderbooks = vec![Orderbook::new(), Orderbook::new()];
        let mut accepted = maybe_accept_trade(
            100,
            0,
            &path(2),
            "trader",
            &mut reserves,
            &[TradeDirection::Sell0, TradeDirection::Sell0],
            &mut orderbooks,
            TokenId::from_tag("456"),
            1,
        )
        .unwrap();

        let mut lp = vec![BTreeMap::new(), BTreeMap::new()];
        let mut protocol = vec![BTreeMap::new(), BTreeMap::new()];
        let mut staking = vec![BTreeMap::new(), BTreeMap::new()];
        track_fee(
            100,
            true,
            TokenId::from_tag("123"),
            &mut reserves,
            &[TradeDirection::Sell0, TradeDirection::Sell0],
            &mut orderbooks,
            &mut lp,
            &mut protocol,
            &mut staking,
            &[30, 30],
            &[2_500, 2_500],
            10,
            10,
            &[TokenId::native()],
            &mut accepted,
        )
        .unwrap();

        // 100 splits 50/50 by equal fee rates, all in the native token.
        assert_eq!(accepted.reward_earned[0][&TokenId::native()], 50);
        assert_eq!(accepted.reward_earned[1][&TokenId::native()], 50);
        // 10% protocol cut and 10% staking cut (native is a reward token).
        assert_eq!(protocol[0][&TokenId::native()], 5);
        assert_eq!(staking[0][&TokenId::native()], 5);
        assert!(lp[0].contains_key(&TokenId::native()));
    }

    #[test]
    fn sold_token_fee_converts_along_the_path() {
        let mut reserves = vec![reserve(1_000, 1_000, 100), reserve(2_000, 2_000, 100)];
        let mut orderbooks = vec![Orderbook::new(), Orderbook::new()];
        let mut accepted = maybe_accept_trade(
            100,
            0,
            &path(2),
            "trader",
            &mut reserves,
            &[TradeDirection::Sell0, TradeDirection::Sell0],
            &mut orderbooks,
            TokenId::from_tag("456"),
            1,
        )
        .unwrap();

        let token0 = TokenId::from_tag("123");
        let mut lp = vec![BTreeMap::new(), BTreeMap::new()];
        let mut protocol = vec![BTreeMap::new(), BTreeMap::new()];
        let mut staking = vec![BTreeMap::new(), BTreeMap::new()];
        let before_real0 = reserves[0].token0_real;
        track_fee(
            100,
            false,
            token0,
            &mut reserves,
            &[TradeDirection::Sell0, TradeDirection::Sell0],
            &mut orderbooks,
            &mut lp,
            &mut protocol,
            &mut staking,
            &[30, 30],
            &[2_500, 2_500],
            10,
            0,
            &[],
            &mut accepted,
        )
        .unwrap();

        // Hop 1 earns 50 of the sold token; the other 50 swap through hop 1
        // into hop 2's sell token.
        assert_eq!(accepted.reward_earned[0][&token0], 50);
        assert!(accepted.reward_earned[1][&token0] > 0);
        assert!(reserves[0].token0_real > before_real0);
        assert_eq!(protocol[0][&token0], 5);
    }
}
