//! State producer: turns pending requests into instructions
//!
//! The producer runs against a private clone of committed state. Business
//! failures never abort production; they turn into refund or reject
//! instructions so the requester always gets an answer. Trades are evaluated
//! on working copies of the touched aggregates and committed only when the
//! whole path succeeds.

use std::collections::BTreeMap;

use num_bigint::BigUint;
use tracing::debug;

use sharddex_amm::liquidity::calculate_share_amount;
use sharddex_amm::reserve::PairReserve;
use sharddex_amm::{mul_div_ceil_u64, BPS};
use sharddex_types::{
    AccessId, OrderId, PoolPairId, ProcessError, SwapError, TokenId, TradeDirection,
};

use crate::instructions::*;
use crate::orderbook::{Order, Orderbook};
use crate::params::Params;
use crate::pool_pair::PoolPairState;
use crate::request::*;
use crate::staking::StakingPoolState;
use crate::trade::{maybe_accept_trade, track_fee, FeeDistribution};

/// Longest pool path a single trade may take.
pub const MAX_TRADE_PATH_LENGTH: usize = 5;

type Pools = BTreeMap<PoolPairId, PoolPairState>;
type Waiting = BTreeMap<String, ContributionData>;
type NftIds = BTreeMap<AccessId, u64>;
type StakingPools = BTreeMap<TokenId, StakingPoolState>;

pub fn add_liquidity(
    requests: &[AddLiquidityRequest],
    pool_pairs: &mut Pools,
    waiting: &mut Waiting,
    nft_ids: &NftIds,
    height: u64,
) -> Result<Vec<Instruction>, ProcessError> {
    let mut instructions = Vec::new();
    for request in requests {
        let contribution = &request.contribution;
        if !nft_ids.contains_key(&contribution.access_id) {
            debug!(access = %contribution.access_id, "refunding contribution from unknown identity");
            instructions.push(refund_contribution(contribution)?);
            continue;
        }

        let Some(paired) = waiting.remove(&contribution.pair_hash) else {
            waiting.insert(contribution.pair_hash.clone(), contribution.clone());
            instructions.push(Instruction::new(
                InstructionKind::AddLiquidity,
                contribution.shard_id,
                InstructionStatus::Waiting,
                &ContributionContent { contribution: contribution.clone() },
            )?);
            continue;
        };

        let compatible = paired.token_id != contribution.token_id
            && paired.amplifier == contribution.amplifier
            && paired.pool_pair_id == contribution.pool_pair_id
            && paired.access_id == contribution.access_id;
        if !compatible {
            debug!(pair_hash = %contribution.pair_hash, "refunding incompatible contribution pair");
            instructions.push(refund_contribution(&paired)?);
            instructions.push(refund_contribution(contribution)?);
            continue;
        }

        if contribution.pool_pair_id.is_empty() {
            instructions.extend(match_new_pool(&paired, contribution, pool_pairs, height)?);
        } else {
            instructions.extend(match_existing_pool(
                &paired,
                contribution,
                pool_pairs,
                height,
            )?);
        }
    }
    Ok(instructions)
}

fn refund_contribution(contribution: &ContributionData) -> Result<Instruction, ProcessError> {
    Instruction::new(
        InstructionKind::AddLiquidity,
        contribution.shard_id,
        InstructionStatus::Refund,
        &ContributionContent { contribution: contribution.clone() },
    )
}

fn match_new_pool(
    paired: &ContributionData,
    contribution: &ContributionData,
    pool_pairs: &mut Pools,
    height: u64,
) -> Result<Vec<Instruction>, ProcessError> {
    let mut pool = PoolPairState::init_from_contributions(paired, contribution);
    let pool_pair_id = PoolPairId::derive(
        &pool.reserve.token0_id,
        &pool.reserve.token1_id,
        &paired.tx_id,
    );
    let share_amount = match calculate_share_amount(0, 0, pool.reserve.token0_real, 0, 0) {
        Ok(amount) => amount,
        Err(err) => {
            debug!(%err, "refunding contribution pair: share seed failed");
            return Ok(vec![refund_contribution(paired)?, refund_contribution(contribution)?]);
        }
    };
    if share_amount == 0 || pool.reserve.token1_real == 0 {
        debug!("refunding degenerate new-pool contribution");
        return Ok(vec![refund_contribution(paired)?, refund_contribution(contribution)?]);
    }
    if pool
        .add_share(contribution.access_id, share_amount, height)
        .is_err()
    {
        return Ok(vec![refund_contribution(paired)?, refund_contribution(contribution)?]);
    }
    pool_pairs.insert(pool_pair_id.clone(), pool);
    Ok(vec![Instruction::new(
        InstructionKind::AddLiquidity,
        contribution.shard_id,
        InstructionStatus::Matched,
        &ContributionMatchedContent {
            contribution: contribution.clone(),
            paired_contribution: paired.clone(),
            pool_pair_id,
            share_amount,
        },
    )?])
}

fn match_existing_pool(
    paired: &ContributionData,
    contribution: &ContributionData,
    pool_pairs: &mut Pools,
    height: u64,
) -> Result<Vec<Instruction>, ProcessError> {
    let refund_both = |a: &ContributionData, b: &ContributionData| {
        Ok::<_, ProcessError>(vec![refund_contribution(a)?, refund_contribution(b)?])
    };

    let Some(pool) = pool_pairs.get_mut(&contribution.pool_pair_id) else {
        debug!(pool = %contribution.pool_pair_id, "refunding contribution to unknown pool");
        return refund_both(paired, contribution);
    };
    let tokens_match = (paired.token_id == pool.reserve.token0_id
        && contribution.token_id == pool.reserve.token1_id)
        || (paired.token_id == pool.reserve.token1_id
            && contribution.token_id == pool.reserve.token0_id);
    if !tokens_match {
        return refund_both(paired, contribution);
    }

    // Canonical ordering for the proportional match.
    let (side0, side1) = if paired.token_id == pool.reserve.token0_id {
        (paired, contribution)
    } else {
        (contribution, paired)
    };
    let (actual0, returned0, actual1, returned1) =
        match pool.compute_actual_contributed_amounts(side0.amount, side1.amount) {
            Ok(amounts) => amounts,
            Err(err) => {
                debug!(%err, "refunding unmatched contribution pair");
                return refund_both(paired, contribution);
            }
        };
    if actual0 == 0 || actual1 == 0 {
        debug!("refunding contribution pair that matched to zero");
        return refund_both(paired, contribution);
    }

    let share_amount = match pool.add_reserve_and_calculate_share(
        pool.reserve.token0_id,
        pool.reserve.token1_id,
        actual0,
        actual1,
    ) {
        Ok(amount) => amount,
        Err(err) => {
            debug!(%err, "refunding contribution pair: reserve update failed");
            return refund_both(paired, contribution);
        }
    };
    if pool
        .add_share(contribution.access_id, share_amount, height)
        .is_err()
    {
        return Err(ProcessError::Divergence(
            "share grant failed after reserves were updated".to_string(),
        ));
    }

    let amounts_for = |side: &ContributionData| {
        if side.token_id == side0.token_id {
            (actual0, returned0, actual1)
        } else {
            (actual1, returned1, actual0)
        }
    };
    let (paired_actual, paired_returned, paired_counterpart) = amounts_for(paired);
    let (own_actual, own_returned, own_counterpart) = amounts_for(contribution);

    Ok(vec![
        Instruction::new(
            InstructionKind::AddLiquidity,
            paired.shard_id,
            InstructionStatus::MatchedReturned,
            &ContributionMatchedReturnedContent {
                contribution: paired.clone(),
                pool_pair_id: contribution.pool_pair_id.clone(),
                actual_amount: paired_actual,
                returned_amount: paired_returned,
                counterpart_actual: paired_counterpart,
                share_amount: 0,
                paired_tx: None,
            },
        )?,
        Instruction::new(
            InstructionKind::AddLiquidity,
            contribution.shard_id,
            InstructionStatus::MatchedReturned,
            &ContributionMatchedReturnedContent {
                contribution: contribution.clone(),
                pool_pair_id: contribution.pool_pair_id.clone(),
                actual_amount: own_actual,
                returned_amount: own_returned,
                counterpart_actual: own_counterpart,
                share_amount,
                paired_tx: Some(paired.tx_id),
            },
        )?,
    ])
}

/// Resolve a trade path into per-hop directions and the final bought token.
fn resolve_path(
    trade_path: &[PoolPairId],
    token_to_sell: TokenId,
    pool_pairs: &Pools,
) -> Result<(Vec<TradeDirection>, TokenId), SwapError> {
    if trade_path.is_empty() || trade_path.len() > MAX_TRADE_PATH_LENGTH {
        return Err(SwapError::PathMismatch);
    }
    let mut directions = Vec::with_capacity(trade_path.len());
    let mut selling = token_to_sell;
    for (index, pool_pair_id) in trade_path.iter().enumerate() {
        if trade_path[..index].contains(pool_pair_id) {
            return Err(SwapError::PathMismatch);
        }
        let pool = pool_pairs
            .get(pool_pair_id)
            .ok_or_else(|| SwapError::UnknownPoolPair(pool_pair_id.to_string()))?;
        if selling == pool.reserve.token0_id {
            directions.push(TradeDirection::Sell0);
            selling = pool.reserve.token1_id;
        } else if selling == pool.reserve.token1_id {
            directions.push(TradeDirection::Sell1);
            selling = pool.reserve.token0_id;
        } else {
            return Err(SwapError::TokenNotInPair(pool_pair_id.to_string()));
        }
    }
    Ok((directions, selling))
}

/// Minimum fee for a trade under the given per-hop rates, with the native
/// discount applied when the fee is paid in the native coin.
fn required_trading_fee(request: &TradeRequest, fee_rates: &[u64], params: &Params) -> u64 {
    let total_rate: u64 = fee_rates.iter().sum();
    let mut required =
        mul_div_ceil_u64(request.sell_amount, total_rate, BPS).unwrap_or(u64::MAX);
    if request.fee_in_native && request.token_to_sell != TokenId::native() {
        required = mul_div_ceil_u64(required, 100 - params.native_discount_percent, 100)
            .unwrap_or(required);
    }
    required
}

pub fn trade(
    requests: &[TradeRequest],
    pool_pairs: &mut Pools,
    params: &Params,
) -> Result<Vec<Instruction>, ProcessError> {
    // Better-paying trades execute first; ties keep intake order. The
    // comparison cross-multiplies to avoid dividing fee by amount.
    let mut order: Vec<usize> = (0..requests.len()).collect();
    order.sort_by(|&a, &b| {
        let left = requests[a].trading_fee as u128 * requests[b].sell_amount.max(1) as u128;
        let right = requests[b].trading_fee as u128 * requests[a].sell_amount.max(1) as u128;
        right.cmp(&left)
    });

    let mut instructions = Vec::new();
    for index in order {
        let request = &requests[index];
        match try_execute_trade(request, pool_pairs, params) {
            Ok(content) => {
                instructions.push(Instruction::new(
                    InstructionKind::Trade,
                    request.shard_id,
                    InstructionStatus::Accepted,
                    &content,
                )?);
            }
            Err(reason) => {
                debug!(tx = %request.tx_id, %reason, "refunding trade");
                instructions.push(Instruction::new(
                    InstructionKind::Trade,
                    request.shard_id,
                    InstructionStatus::Refund,
                    &TradeRefundContent { request: request.clone() },
                )?);
            }
        }
    }
    Ok(instructions)
}

fn try_execute_trade(
    request: &TradeRequest,
    pool_pairs: &mut Pools,
    params: &Params,
) -> Result<TradeAcceptedContent, SwapError> {
    let (directions, token_to_buy) =
        resolve_path(&request.trade_path, request.token_to_sell, pool_pairs)?;

    let fee_rates: Vec<u64> = request
        .trade_path
        .iter()
        .map(|id| params.pool_fee_rate(id))
        .collect();
    let required = required_trading_fee(request, &fee_rates, params);
    if request.trading_fee < required {
        return Err(SwapError::FeeExceedsInput {
            amount: request.trading_fee,
            fee: required,
        });
    }

    // Working copies; committed only when the whole evaluation succeeds.
    let mut reserves: Vec<PairReserve> = Vec::with_capacity(request.trade_path.len());
    let mut orderbooks: Vec<Orderbook> = Vec::with_capacity(request.trade_path.len());
    let mut lp_fees: Vec<BTreeMap<TokenId, BigUint>> = Vec::new();
    let mut protocol_fees: Vec<BTreeMap<TokenId, u64>> = Vec::new();
    let mut staking_fees: Vec<BTreeMap<TokenId, u64>> = Vec::new();
    for pool_pair_id in &request.trade_path {
        let pool = pool_pairs
            .get(pool_pair_id)
            .ok_or_else(|| SwapError::UnknownPoolPair(pool_pair_id.to_string()))?;
        reserves.push(pool.reserve.clone());
        orderbooks.push(pool.orderbook.clone());
        lp_fees.push(pool.lp_fees_per_share.clone());
        protocol_fees.push(pool.protocol_fees.clone());
        staking_fees.push(pool.staking_pool_fees.clone());
    }

    let order_reward_ratios: Vec<u64> = request
        .trade_path
        .iter()
        .map(|id| params.order_reward_ratio(id))
        .collect();

    let mut accepted = maybe_accept_trade(
        request.sell_amount,
        0,
        &request.trade_path,
        &request.receiver,
        &mut reserves,
        &directions,
        &mut orderbooks,
        token_to_buy,
        request.min_acceptable,
    )?;

    let distribution = track_fee(
        request.trading_fee,
        request.fee_in_native,
        request.token_to_sell,
        &mut reserves,
        &directions,
        &mut orderbooks,
        &mut lp_fees,
        &mut protocol_fees,
        &mut staking_fees,
        &fee_rates,
        &order_reward_ratios,
        params.trading_protocol_fee_percent,
        params.trading_staking_pool_reward_percent,
        &params.staking_reward_tokens,
        &mut accepted,
    )?;

    // Commit the working copies.
    for (hop, pool_pair_id) in request.trade_path.iter().enumerate() {
        let pool = pool_pairs
            .get_mut(pool_pair_id)
            .ok_or_else(|| SwapError::UnknownPoolPair(pool_pair_id.to_string()))?;
        pool.reserve = reserves[hop].clone();
        pool.orderbook = orderbooks[hop].clone();
        pool.lp_fees_per_share = lp_fees[hop].clone();
        pool.protocol_fees = protocol_fees[hop].clone();
        pool.staking_pool_fees = staking_fees[hop].clone();
        apply_fee_distribution_to_pool(pool, &distribution, hop);
    }

    Ok(TradeAcceptedContent {
        tx_id: request.tx_id,
        making_volume_changes: encode_making_volumes(&distribution),
        order_reward_changes: distribution.order_reward_changes,
        trade: accepted,
    })
}

pub(crate) fn apply_fee_distribution_to_pool(
    pool: &mut PoolPairState,
    distribution: &FeeDistribution,
    hop: usize,
) {
    for (owner, per_token) in &distribution.order_reward_changes[hop] {
        let reward = pool.order_rewards.entry(*owner).or_default();
        for (token, amount) in per_token {
            reward.add(*token, *amount);
        }
    }
    for (token, volumes) in &distribution.making_volume_changes[hop] {
        let making = pool.making_volume.entry(*token).or_default();
        for (owner, volume) in volumes {
            making.add(*owner, volume);
        }
    }
}

fn encode_making_volumes(
    distribution: &FeeDistribution,
) -> Vec<BTreeMap<TokenId, BTreeMap<AccessId, String>>> {
    distribution
        .making_volume_changes
        .iter()
        .map(|per_token| {
            per_token
                .iter()
                .map(|(token, volumes)| {
                    let encoded = volumes
                        .iter()
                        .map(|(owner, volume)| (*owner, volume.to_string()))
                        .collect();
                    (*token, encoded)
                })
                .collect()
        })
        .collect()
}

pub fn add_order(
    requests: &[AddOrderRequest],
    pool_pairs: &mut Pools,
    nft_ids: &NftIds,
    params: &Params,
) -> Result<Vec<Instruction>, ProcessError> {
    let mut instructions = Vec::new();
    for request in requests {
        match try_place_order(request, pool_pairs, nft_ids, params) {
            Ok(content) => instructions.push(Instruction::new(
                InstructionKind::AddOrder,
                request.shard_id,
                InstructionStatus::Accepted,
                &content,
            )?),
            Err(reason) => {
                debug!(tx = %request.tx_id, reason, "refunding order placement");
                instructions.push(Instruction::new(
                    InstructionKind::AddOrder,
                    request.shard_id,
                    InstructionStatus::Refund,
                    &AddOrderRefundContent { request: request.clone() },
                )?);
            }
        }
    }
    Ok(instructions)
}

fn try_place_order(
    request: &AddOrderRequest,
    pool_pairs: &mut Pools,
    nft_ids: &NftIds,
    params: &Params,
) -> Result<AddOrderAcceptedContent, &'static str> {
    if !nft_ids.contains_key(&request.access_id) {
        return Err("unknown identity");
    }
    if request.sell_amount == 0 || request.min_acceptable == 0 {
        return Err("zero rate");
    }
    let pool = pool_pairs
        .get_mut(&request.pool_pair_id)
        .ok_or("unknown pool pair")?;
    let direction = if request.token_to_sell == pool.reserve.token0_id {
        TradeDirection::Sell0
    } else if request.token_to_sell == pool.reserve.token1_id {
        TradeDirection::Sell1
    } else {
        return Err("token not in pair");
    };
    if pool.orderbook.count_for(&request.access_id) >= params.max_orders_per_nft {
        return Err("order cap reached");
    }
    let order_id = OrderId::derive(&request.tx_id);
    if pool.orderbook.order(&order_id).is_some() {
        return Err("duplicate order id");
    }

    let (token0_rate, token1_rate, token0_balance, token1_balance) = match direction {
        TradeDirection::Sell0 => (request.sell_amount, request.min_acceptable, request.sell_amount, 0),
        TradeDirection::Sell1 => (request.min_acceptable, request.sell_amount, 0, request.sell_amount),
    };
    let order = Order {
        id: order_id,
        access_id: request.access_id,
        direction,
        token0_rate,
        token1_rate,
        token0_balance,
        token1_balance,
    };
    pool.orderbook.insert_order(order.clone());

    Ok(AddOrderAcceptedContent {
        pool_pair_id: request.pool_pair_id.clone(),
        order,
        receiver: request.receiver.clone(),
        tx_id: request.tx_id,
    })
}

pub fn withdraw_order(
    requests: &[WithdrawOrderRequest],
    pool_pairs: &mut Pools,
) -> Result<Vec<Instruction>, ProcessError> {
    let mut instructions = Vec::new();
    for request in requests {
        match try_withdraw_order(request, pool_pairs) {
            Ok(content) => instructions.push(Instruction::new(
                InstructionKind::WithdrawOrder,
                request.shard_id,
                InstructionStatus::Accepted,
                &content,
            )?),
            Err(reason) => {
                debug!(tx = %request.tx_id, reason, "rejecting order withdrawal");
                instructions.push(Instruction::new(
                    InstructionKind::WithdrawOrder,
                    request.shard_id,
                    InstructionStatus::Rejected,
                    &WithdrawOrderRejectedContent { request: request.clone() },
                )?);
            }
        }
    }
    Ok(instructions)
}

fn try_withdraw_order(
    request: &WithdrawOrderRequest,
    pool_pairs: &mut Pools,
) -> Result<WithdrawOrderAcceptedContent, &'static str> {
    let pool = pool_pairs
        .get_mut(&request.pool_pair_id)
        .ok_or("unknown pool pair")?;
    let token0_id = pool.reserve.token0_id;
    let token1_id = pool.reserve.token1_id;
    let order = pool
        .orderbook
        .order_mut(&request.order_id)
        .ok_or("unknown order")?;
    if order.access_id != request.access_id {
        return Err("not the order owner");
    }
    let balance = if request.token_id == token0_id {
        &mut order.token0_balance
    } else if request.token_id == token1_id {
        &mut order.token1_balance
    } else {
        return Err("token not in pair");
    };
    let amount = if request.amount == 0 { *balance } else { request.amount };
    if amount == 0 || amount > *balance {
        return Err("balance too low");
    }
    *balance -= amount;
    if order.is_depleted() {
        pool.orderbook.remove_order(&request.order_id);
    }

    Ok(WithdrawOrderAcceptedContent {
        pool_pair_id: request.pool_pair_id.clone(),
        order_id: request.order_id.clone(),
        token_id: request.token_id,
        amount,
        access_id: request.access_id,
        receiver: request.receiver.clone(),
        tx_id: request.tx_id,
    })
}

pub fn withdraw_liquidity(
    requests: &[WithdrawLiquidityRequest],
    pool_pairs: &mut Pools,
    height: u64,
) -> Result<Vec<Instruction>, ProcessError> {
    let mut instructions = Vec::new();
    for request in requests {
        let outcome = pool_pairs
            .get_mut(&request.pool_pair_id)
            .ok_or("unknown pool pair")
            .and_then(|pool| {
                pool.deduct_share(request.access_id, request.share_amount, height)
                    .map(|amounts| (amounts, pool.reserve.token0_id, pool.reserve.token1_id))
                    .map_err(|_| "withdrawal exceeds recorded share")
            });
        match outcome {
            Ok(((amount0, amount1, share_amount), token0_id, token1_id)) => {
                instructions.push(Instruction::new(
                    InstructionKind::WithdrawLiquidity,
                    request.shard_id,
                    InstructionStatus::Accepted,
                    &WithdrawLiquidityAcceptedContent {
                        pool_pair_id: request.pool_pair_id.clone(),
                        access_id: request.access_id,
                        token0_id,
                        token0_amount: amount0,
                        token1_id,
                        token1_amount: amount1,
                        share_amount,
                        receiver: request.receiver.clone(),
                        tx_id: request.tx_id,
                    },
                )?);
            }
            Err(reason) => {
                debug!(tx = %request.tx_id, reason, "rejecting liquidity withdrawal");
                instructions.push(Instruction::new(
                    InstructionKind::WithdrawLiquidity,
                    request.shard_id,
                    InstructionStatus::Rejected,
                    &WithdrawLiquidityRejectedContent { request: request.clone() },
                )?);
            }
        }
    }
    Ok(instructions)
}

pub fn withdraw_lp_fee(
    requests: &[WithdrawLpFeeRequest],
    pool_pairs: &mut Pools,
) -> Result<Vec<Instruction>, ProcessError> {
    let mut instructions = Vec::new();
    for request in requests {
        match try_withdraw_lp_fee(request, pool_pairs) {
            Ok(amounts) => instructions.push(Instruction::new(
                InstructionKind::WithdrawLpFee,
                request.shard_id,
                InstructionStatus::Accepted,
                &WithdrawLpFeeAcceptedContent {
                    pool_pair_id: request.pool_pair_id.clone(),
                    access_id: request.access_id,
                    amounts,
                    receiver: request.receiver.clone(),
                    tx_id: request.tx_id,
                },
            )?),
            Err(reason) => {
                debug!(tx = %request.tx_id, reason, "rejecting LP fee withdrawal");
                instructions.push(Instruction::new(
                    InstructionKind::WithdrawLpFee,
                    request.shard_id,
                    InstructionStatus::Rejected,
                    &WithdrawLpFeeRejectedContent { request: request.clone() },
                )?);
            }
        }
    }
    Ok(instructions)
}

/// Settle and clear a provider's LP fees and any maker rewards they earned.
pub(crate) fn try_withdraw_lp_fee(
    request: &WithdrawLpFeeRequest,
    pool_pairs: &mut Pools,
) -> Result<BTreeMap<TokenId, u64>, &'static str> {
    let pool = pool_pairs
        .get_mut(&request.pool_pair_id)
        .ok_or("unknown pool pair")?;

    let mut amounts: BTreeMap<TokenId, u64> = BTreeMap::new();
    if pool.shares.contains_key(&request.access_id) {
        let settled = pool
            .recompute_lp_rewards(request.access_id)
            .map_err(|_| "fee settlement overflow")?;
        for (token, amount) in settled {
            if amount > 0 {
                *amounts.entry(token).or_insert(0) += amount;
            }
        }
        let checkpoint = pool.lp_fees_per_share.clone();
        if let Some(share) = pool.shares.get_mut(&request.access_id) {
            share.trading_fees = BTreeMap::new();
            share.last_lp_fees_per_share = checkpoint;
        }
    }
    if let Some(order_reward) = pool.order_rewards.remove(&request.access_id) {
        for (token, amount) in order_reward.uncollected_rewards {
            if amount > 0 {
                *amounts.entry(token).or_insert(0) += amount;
            }
        }
    }
    if amounts.is_empty() {
        return Err("nothing to withdraw");
    }
    Ok(amounts)
}

pub fn withdraw_protocol_fee(
    requests: &[WithdrawProtocolFeeRequest],
    pool_pairs: &mut Pools,
) -> Result<Vec<Instruction>, ProcessError> {
    let mut instructions = Vec::new();
    for request in requests {
        let amounts = pool_pairs
            .get_mut(&request.pool_pair_id)
            .map(|pool| std::mem::take(&mut pool.protocol_fees))
            .filter(|amounts| amounts.values().any(|amount| *amount > 0));
        match amounts {
            Some(amounts) => instructions.push(Instruction::new(
                InstructionKind::WithdrawProtocolFee,
                request.shard_id,
                InstructionStatus::Accepted,
                &WithdrawProtocolFeeAcceptedContent {
                    pool_pair_id: request.pool_pair_id.clone(),
                    amounts,
                    receiver: request.receiver.clone(),
                    tx_id: request.tx_id,
                },
            )?),
            None => {
                debug!(tx = %request.tx_id, "rejecting protocol fee withdrawal");
                instructions.push(Instruction::new(
                    InstructionKind::WithdrawProtocolFee,
                    request.shard_id,
                    InstructionStatus::Rejected,
                    &WithdrawProtocolFeeRejectedContent { request: request.clone() },
                )?);
            }
        }
    }
    Ok(instructions)
}

pub fn staking(
    requests: &[StakingRequest],
    staking_pools: &mut StakingPools,
    nft_ids: &NftIds,
) -> Result<Vec<Instruction>, ProcessError> {
    let mut instructions = Vec::new();
    for request in requests {
        let outcome = if !nft_ids.contains_key(&request.access_id) {
            Err("unknown identity")
        } else {
            staking_pools
                .get_mut(&request.staking_token)
                .ok_or("unknown staking pool")
                .and_then(|pool| {
                    pool.add_liquidity(request.access_id, request.amount)
                        .map_err(|_| "invalid staking amount")
                })
        };
        match outcome {
            Ok(()) => instructions.push(Instruction::new(
                InstructionKind::Staking,
                request.shard_id,
                InstructionStatus::Accepted,
                &StakingAcceptedContent {
                    staking_token: request.staking_token,
                    access_id: request.access_id,
                    amount: request.amount,
                    tx_id: request.tx_id,
                },
            )?),
            Err(reason) => {
                debug!(tx = %request.tx_id, reason, "refunding staking request");
                instructions.push(Instruction::new(
                    InstructionKind::Staking,
                    request.shard_id,
                    InstructionStatus::Refund,
                    &StakingRefundContent { request: request.clone() },
                )?);
            }
        }
    }
    Ok(instructions)
}

pub fn unstaking(
    requests: &[UnstakingRequest],
    staking_pools: &mut StakingPools,
) -> Result<Vec<Instruction>, ProcessError> {
    let mut instructions = Vec::new();
    for request in requests {
        let outcome = staking_pools
            .get_mut(&request.staking_token)
            .ok_or("unknown staking pool")
            .and_then(|pool| {
                pool.remove_liquidity(request.access_id, request.amount)
                    .map_err(|_| "unstaking exceeds recorded liquidity")
            });
        match outcome {
            Ok(()) => instructions.push(Instruction::new(
                InstructionKind::Unstaking,
                request.shard_id,
                InstructionStatus::Accepted,
                &UnstakingAcceptedContent {
                    staking_token: request.staking_token,
                    access_id: request.access_id,
                    amount: request.amount,
                    receiver: request.receiver.clone(),
                    tx_id: request.tx_id,
                },
            )?),
            Err(reason) => {
                debug!(tx = %request.tx_id, reason, "rejecting unstaking request");
                instructions.push(Instruction::new(
                    InstructionKind::Unstaking,
                    request.shard_id,
                    InstructionStatus::Rejected,
                    &UnstakingRejectedContent { request: request.clone() },
                )?);
            }
        }
    }
    Ok(instructions)
}

pub fn withdraw_staking_reward(
    requests: &[WithdrawStakingRewardRequest],
    staking_pools: &mut StakingPools,
) -> Result<Vec<Instruction>, ProcessError> {
    let mut instructions = Vec::new();
    for request in requests {
        let outcome = staking_pools
            .get_mut(&request.staking_token)
            .ok_or("unknown staking pool")
            .and_then(|pool| {
                pool.withdraw_rewards(request.access_id)
                    .map_err(|_| "unknown staker")
            })
            .and_then(|amounts| {
                if amounts.values().any(|amount| *amount > 0) {
                    Ok(amounts)
                } else {
                    Err("nothing to withdraw")
                }
            });
        match outcome {
            Ok(amounts) => instructions.push(Instruction::new(
                InstructionKind::WithdrawStakingReward,
                request.shard_id,
                InstructionStatus::Accepted,
                &WithdrawStakingRewardAcceptedContent {
                    staking_token: request.staking_token,
                    access_id: request.access_id,
                    amounts,
                    receiver: request.receiver.clone(),
                    tx_id: request.tx_id,
                },
            )?),
            Err(reason) => {
                debug!(tx = %request.tx_id, reason, "rejecting staking reward withdrawal");
                instructions.push(Instruction::new(
                    InstructionKind::WithdrawStakingReward,
                    request.shard_id,
                    InstructionStatus::Rejected,
                    &WithdrawStakingRewardRejectedContent { request: request.clone() },
                )?);
            }
        }
    }
    Ok(instructions)
}

/// Sweep the staking fees accrued by trades this block into the staking
/// pools, weighted by the configured pool shares. Pools without staked
/// liquidity are excluded so rewards never accrue to no one.
pub fn distribute_staking_reward(
    pool_pairs: &mut Pools,
    params: &Params,
    staking_pools: &mut StakingPools,
) -> Result<Vec<Instruction>, ProcessError> {
    let mut totals: BTreeMap<TokenId, u64> = BTreeMap::new();
    for pool in pool_pairs.values() {
        for (token, amount) in &pool.staking_pool_fees {
            if *amount > 0 {
                *totals.entry(*token).or_insert(0) += amount;
            }
        }
    }
    if totals.is_empty() {
        return Ok(Vec::new());
    }

    let eligible: Vec<(TokenId, u64)> = params
        .staking_pools_share
        .iter()
        .filter(|(staking_token, weight)| {
            **weight > 0
                && staking_pools
                    .get(*staking_token)
                    .map(|pool| pool.liquidity > 0)
                    .unwrap_or(false)
        })
        .map(|(staking_token, weight)| (*staking_token, *weight))
        .collect();
    let total_weight: u64 = eligible.iter().map(|(_, weight)| weight).sum();
    if total_weight == 0 {
        return Ok(Vec::new());
    }

    let mut rewards: BTreeMap<TokenId, BTreeMap<TokenId, u64>> = BTreeMap::new();
    for (reward_token, total) in &totals {
        let mut remaining = *total;
        for (index, (staking_token, weight)) in eligible.iter().enumerate() {
            let cut = if index == eligible.len() - 1 {
                remaining
            } else {
                sharddex_amm::mul_div_floor_u64(*total, *weight, total_weight)
                    .unwrap_or(0)
                    .min(remaining)
            };
            if cut > 0 {
                rewards
                    .entry(*staking_token)
                    .or_default()
                    .insert(*reward_token, cut);
                remaining -= cut;
            }
        }
    }
    if rewards.is_empty() {
        return Ok(Vec::new());
    }

    // Only sweep the accrued fees once it is certain an instruction ships;
    // otherwise the processor, seeing no instruction, would keep them.
    for pool in pool_pairs.values_mut() {
        pool.staking_pool_fees.clear();
    }
    apply_staking_distribution(&rewards, staking_pools)?;
    Ok(vec![Instruction::new(
        InstructionKind::DistributeStakingReward,
        0,
        InstructionStatus::Accepted,
        &DistributeStakingRewardContent { rewards },
    )?])
}

/// Shared with the processor so both sides apply identical accruals.
pub(crate) fn apply_staking_distribution(
    rewards: &BTreeMap<TokenId, BTreeMap<TokenId, u64>>,
    staking_pools: &mut StakingPools,
) -> Result<(), ProcessError> {
    for (staking_token, per_token) in rewards {
        let pool = staking_pools
            .get_mut(staking_token)
            .ok_or_else(|| ProcessError::UnknownStakingPool(staking_token.to_string()))?;
        for (reward_token, amount) in per_token {
            let bounced = pool.add_reward(*reward_token, *amount);
            if bounced != 0 {
                return Err(ProcessError::Divergence(format!(
                    "staking reward of {bounced} bounced off empty pool {staking_token}"
                )));
            }
        }
    }
    Ok(())
}

pub fn mint_nft(
    requests: &[MintNftRequest],
    nft_ids: &mut NftIds,
    params: &Params,
) -> Result<Vec<Instruction>, ProcessError> {
    let mut instructions = Vec::new();
    for request in requests {
        if request.burn_amount != params.mint_nft_require_amount {
            debug!(tx = %request.tx_id, "refunding NFT mint with wrong burn amount");
            instructions.push(Instruction::new(
                InstructionKind::MintNft,
                request.shard_id,
                InstructionStatus::Refund,
                &MintNftRefundContent { request: request.clone() },
            )?);
            continue;
        }
        let nft_id = AccessId::derive(&request.tx_id);
        nft_ids.insert(nft_id, request.burn_amount);
        instructions.push(Instruction::new(
            InstructionKind::MintNft,
            request.shard_id,
            InstructionStatus::Accepted,
            &MintNftAcceptedContent {
                nft_id,
                burn_amount: request.burn_amount,
                receiver: request.receiver.clone(),
                tx_id: request.tx_id,
            },
        )?);
    }
    Ok(instructions)
}

pub fn modify_params(
    requests: &[ModifyParamsRequest],
    params: &mut Params,
    pool_pairs: &Pools,
    staking_pools: &mut StakingPools,
) -> Result<Vec<Instruction>, ProcessError> {
    let mut instructions = Vec::new();
    for request in requests {
        match request.new_params.validate(pool_pairs) {
            Ok(()) => {
                *params = request.new_params.clone();
                sync_staking_pools(params, staking_pools);
                instructions.push(Instruction::new(
                    InstructionKind::ModifyParams,
                    request.shard_id,
                    InstructionStatus::Accepted,
                    &ModifyParamsAcceptedContent {
                        params: request.new_params.clone(),
                        tx_id: request.tx_id,
                    },
                )?);
            }
            Err(err) => {
                debug!(tx = %request.tx_id, %err, "rejecting params replacement");
                instructions.push(Instruction::new(
                    InstructionKind::ModifyParams,
                    request.shard_id,
                    InstructionStatus::Rejected,
                    &ModifyParamsRejectedContent { request: request.clone() },
                )?);
            }
        }
    }
    Ok(instructions)
}

/// Every configured staking pool must exist as an aggregate, even before its
/// first staker arrives.
pub(crate) fn sync_staking_pools(params: &Params, staking_pools: &mut StakingPools) {
    for staking_token in params.staking_pools_share.keys() {
        staking_pools
            .entry(*staking_token)
            .or_insert_with(StakingPoolState::new);
    }
}
