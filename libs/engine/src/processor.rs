//! State processor: replays instructions into committed state
//!
//! The processor is a pure function of `(prior state, instruction list)`.
//! It never recomputes business decisions - accepted outcomes carry their
//! deltas - but it does re-derive cheap values (share grants, withdrawal
//! amounts) and cross-checks them against the encoded ones: a mismatch means
//! the producing node and this node disagree, which is fatal for the block.

use std::collections::BTreeMap;

use num_bigint::BigUint;
use num_traits::Zero;
use tracing::warn;

use sharddex_amm::liquidity::calculate_share_amount;
use sharddex_amm::{add_lp_fee, add_staking_and_protocol_fee};
use sharddex_types::{AccessId, PoolPairId, ProcessError, TokenId};

use crate::instructions::*;
use crate::params::Params;
use crate::pool_pair::PoolPairState;
use crate::producer::{apply_staking_distribution, sync_staking_pools, try_withdraw_lp_fee};
use crate::request::{ContributionData, WithdrawLpFeeRequest};
use crate::staking::StakingPoolState;

type Pools = BTreeMap<PoolPairId, PoolPairState>;
type Waiting = BTreeMap<String, ContributionData>;
type NftIds = BTreeMap<AccessId, u64>;
type StakingPools = BTreeMap<TokenId, StakingPoolState>;

fn unexpected_status(instruction: &Instruction) -> ProcessError {
    ProcessError::UnknownStatus(format!(
        "{} for kind {:?}",
        instruction.status.as_str(),
        instruction.kind
    ))
}

fn divergence(context: &str, detail: impl std::fmt::Display) -> ProcessError {
    warn!(context, %detail, "producer/processor divergence");
    ProcessError::Divergence(format!("{context}: {detail}"))
}

pub fn add_liquidity(
    instruction: &Instruction,
    pool_pairs: &mut Pools,
    waiting: &mut Waiting,
    height: u64,
) -> Result<(), ProcessError> {
    match instruction.status {
        InstructionStatus::Waiting => {
            let content: ContributionContent = instruction.decode_content()?;
            waiting.insert(
                content.contribution.pair_hash.clone(),
                content.contribution,
            );
            Ok(())
        }
        InstructionStatus::Refund => {
            let content: ContributionContent = instruction.decode_content()?;
            // Only sweep the waiting slot when it holds this very deposit; a
            // refund for an unrelated deposit must not evict someone else's
            // waiting half.
            let matches_waiting = waiting
                .get(&content.contribution.pair_hash)
                .map(|entry| entry.tx_id == content.contribution.tx_id)
                .unwrap_or(false);
            if matches_waiting {
                waiting.remove(&content.contribution.pair_hash);
            }
            Ok(())
        }
        InstructionStatus::Matched => {
            let content: ContributionMatchedContent = instruction.decode_content()?;
            waiting.remove(&content.contribution.pair_hash);

            let mut pool = PoolPairState::init_from_contributions(
                &content.paired_contribution,
                &content.contribution,
            );
            let share_amount = calculate_share_amount(0, 0, pool.reserve.token0_real, 0, 0)
                .map_err(|err| divergence("new-pool share seed", err))?;
            if share_amount != content.share_amount {
                return Err(divergence(
                    "new-pool share grant",
                    format!("computed {share_amount}, instruction says {}", content.share_amount),
                ));
            }
            pool.add_share(content.contribution.access_id, share_amount, height)
                .map_err(|err| divergence("new-pool share grant", err))?;
            pool_pairs.insert(content.pool_pair_id, pool);
            Ok(())
        }
        InstructionStatus::MatchedReturned => {
            let content: ContributionMatchedReturnedContent = instruction.decode_content()?;
            waiting.remove(&content.contribution.pair_hash);
            if content.paired_tx.is_none() {
                // Informational side of the match; its twin applies the state.
                return Ok(());
            }

            let pool = pool_pairs
                .get_mut(&content.pool_pair_id)
                .ok_or_else(|| ProcessError::UnknownPoolPair(content.pool_pair_id.to_string()))?;
            let (amount0, amount1) = if content.contribution.token_id == pool.reserve.token0_id {
                (content.actual_amount, content.counterpart_actual)
            } else {
                (content.counterpart_actual, content.actual_amount)
            };
            let share_amount = pool
                .add_reserve_and_calculate_share(
                    pool.reserve.token0_id,
                    pool.reserve.token1_id,
                    amount0,
                    amount1,
                )
                .map_err(|err| divergence("contribution reserve update", err))?;
            if share_amount != content.share_amount {
                return Err(divergence(
                    "contribution share grant",
                    format!("computed {share_amount}, instruction says {}", content.share_amount),
                ));
            }
            pool.add_share(content.contribution.access_id, share_amount, height)
                .map_err(|err| divergence("contribution share grant", err))?;
            Ok(())
        }
        _ => Err(unexpected_status(instruction)),
    }
}

pub fn trade(
    instruction: &Instruction,
    pool_pairs: &mut Pools,
    params: &Params,
) -> Result<(), ProcessError> {
    match instruction.status {
        InstructionStatus::Refund => {
            let _: TradeRefundContent = instruction.decode_content()?;
            Ok(())
        }
        InstructionStatus::Accepted => {
            let content: TradeAcceptedContent = instruction.decode_content()?;
            apply_accepted_trade(&content, pool_pairs, params)
        }
        _ => Err(unexpected_status(instruction)),
    }
}

fn apply_accepted_trade(
    content: &TradeAcceptedContent,
    pool_pairs: &mut Pools,
    params: &Params,
) -> Result<(), ProcessError> {
    let trade = &content.trade;
    let hops = trade.trade_path.len();
    if trade.pair_changes.len() != hops
        || trade.order_changes.len() != hops
        || trade.reward_earned.len() != hops
        || content.order_reward_changes.len() != hops
        || content.making_volume_changes.len() != hops
    {
        return Err(ProcessError::Content(
            "trade payload hop counts disagree".to_string(),
        ));
    }

    for hop in 0..hops {
        let pool_pair_id = &trade.trade_path[hop];
        let pool = pool_pairs
            .get_mut(pool_pair_id)
            .ok_or_else(|| ProcessError::UnknownPoolPair(pool_pair_id.to_string()))?;

        pool.reserve
            .apply_reserve_changes(&trade.pair_changes[hop])
            .map_err(|err| divergence("trade reserve replay", err))?;

        for (order_id, change) in &trade.order_changes[hop] {
            let order = pool
                .orderbook
                .order_mut(order_id)
                .ok_or_else(|| divergence("trade order replay", format!("unknown order {order_id}")))?;
            order
                .apply_balance_changes(change)
                .map_err(|err| divergence("trade order replay", err))?;
        }

        for (token, reward) in &trade.reward_earned[hop] {
            let maker_bucket = add_staking_and_protocol_fee(
                *token,
                &BigUint::from(*reward),
                &mut pool.protocol_fees,
                &mut pool.staking_pool_fees,
                params.trading_protocol_fee_percent,
                params.trading_staking_pool_reward_percent,
                &params.staking_reward_tokens,
                pool.reserve.share_amount,
            );
            let order_paid: BigUint = content.order_reward_changes[hop]
                .values()
                .filter_map(|per_token| per_token.get(token))
                .fold(BigUint::zero(), |acc, amount| acc + BigUint::from(*amount));
            if order_paid > maker_bucket {
                return Err(divergence(
                    "trade fee replay",
                    "order rewards exceed the maker bucket",
                ));
            }
            let amm_reward = maker_bucket - order_paid;
            add_lp_fee(
                *token,
                &amm_reward,
                pool.reserve.share_amount,
                &mut pool.lp_fees_per_share,
            );
        }

        for (owner, per_token) in &content.order_reward_changes[hop] {
            let reward = pool.order_rewards.entry(*owner).or_default();
            for (token, amount) in per_token {
                reward.add(*token, *amount);
            }
        }
        for (token, volumes) in &content.making_volume_changes[hop] {
            let making = pool.making_volume.entry(*token).or_default();
            for (owner, encoded) in volumes {
                let volume: BigUint = encoded.parse().map_err(|_| {
                    ProcessError::Content(format!("invalid making volume '{encoded}'"))
                })?;
                making.add(*owner, &volume);
            }
        }
    }
    Ok(())
}

pub fn add_order(instruction: &Instruction, pool_pairs: &mut Pools) -> Result<(), ProcessError> {
    match instruction.status {
        InstructionStatus::Refund => {
            let _: AddOrderRefundContent = instruction.decode_content()?;
            Ok(())
        }
        InstructionStatus::Accepted => {
            let content: AddOrderAcceptedContent = instruction.decode_content()?;
            let pool = pool_pairs
                .get_mut(&content.pool_pair_id)
                .ok_or_else(|| ProcessError::UnknownPoolPair(content.pool_pair_id.to_string()))?;
            if pool.orderbook.order(&content.order.id).is_some() {
                return Err(divergence(
                    "order placement replay",
                    format!("duplicate order {}", content.order.id),
                ));
            }
            pool.orderbook.insert_order(content.order);
            Ok(())
        }
        _ => Err(unexpected_status(instruction)),
    }
}

pub fn withdraw_order(
    instruction: &Instruction,
    pool_pairs: &mut Pools,
) -> Result<(), ProcessError> {
    match instruction.status {
        InstructionStatus::Rejected => {
            let _: WithdrawOrderRejectedContent = instruction.decode_content()?;
            Ok(())
        }
        InstructionStatus::Accepted => {
            let content: WithdrawOrderAcceptedContent = instruction.decode_content()?;
            let pool = pool_pairs
                .get_mut(&content.pool_pair_id)
                .ok_or_else(|| ProcessError::UnknownPoolPair(content.pool_pair_id.to_string()))?;
            let token0_id = pool.reserve.token0_id;
            let token1_id = pool.reserve.token1_id;
            if content.token_id != token0_id && content.token_id != token1_id {
                return Err(divergence(
                    "order withdrawal replay",
                    format!("token {} is not in the pair", content.token_id),
                ));
            }
            let order = pool
                .orderbook
                .order_mut(&content.order_id)
                .ok_or_else(|| {
                    divergence("order withdrawal replay", format!("unknown order {}", content.order_id))
                })?;
            let balance = if content.token_id == token0_id {
                &mut order.token0_balance
            } else {
                &mut order.token1_balance
            };
            *balance = balance.checked_sub(content.amount).ok_or_else(|| {
                divergence("order withdrawal replay", "withdrawal exceeds balance")
            })?;
            if order.is_depleted() {
                pool.orderbook.remove_order(&content.order_id);
            }
            Ok(())
        }
        _ => Err(unexpected_status(instruction)),
    }
}

pub fn withdraw_liquidity(
    instruction: &Instruction,
    pool_pairs: &mut Pools,
    height: u64,
) -> Result<(), ProcessError> {
    match instruction.status {
        InstructionStatus::Rejected => {
            let _: WithdrawLiquidityRejectedContent = instruction.decode_content()?;
            Ok(())
        }
        InstructionStatus::Accepted => {
            let content: WithdrawLiquidityAcceptedContent = instruction.decode_content()?;
            let pool = pool_pairs
                .get_mut(&content.pool_pair_id)
                .ok_or_else(|| ProcessError::UnknownPoolPair(content.pool_pair_id.to_string()))?;
            let (amount0, amount1, share_amount) = pool
                .deduct_share(content.access_id, content.share_amount, height)
                .map_err(|err| divergence("liquidity withdrawal replay", err))?;
            if (amount0, amount1, share_amount)
                != (content.token0_amount, content.token1_amount, content.share_amount)
            {
                return Err(divergence(
                    "liquidity withdrawal replay",
                    format!(
                        "computed ({amount0}, {amount1}, {share_amount}), instruction says ({}, {}, {})",
                        content.token0_amount, content.token1_amount, content.share_amount
                    ),
                ));
            }
            Ok(())
        }
        _ => Err(unexpected_status(instruction)),
    }
}

pub fn withdraw_lp_fee(
    instruction: &Instruction,
    pool_pairs: &mut Pools,
) -> Result<(), ProcessError> {
    match instruction.status {
        InstructionStatus::Rejected => {
            let _: WithdrawLpFeeRejectedContent = instruction.decode_content()?;
            Ok(())
        }
        InstructionStatus::Accepted => {
            let content: WithdrawLpFeeAcceptedContent = instruction.decode_content()?;
            let request = WithdrawLpFeeRequest {
                pool_pair_id: content.pool_pair_id.clone(),
                access_id: content.access_id,
                receiver: content.receiver.clone(),
                tx_id: content.tx_id,
                shard_id: 0,
            };
            let amounts = try_withdraw_lp_fee(&request, pool_pairs)
                .map_err(|err| divergence("LP fee withdrawal replay", err))?;
            if amounts != content.amounts {
                return Err(divergence(
                    "LP fee withdrawal replay",
                    "settled amounts disagree with instruction",
                ));
            }
            Ok(())
        }
        _ => Err(unexpected_status(instruction)),
    }
}

pub fn withdraw_protocol_fee(
    instruction: &Instruction,
    pool_pairs: &mut Pools,
) -> Result<(), ProcessError> {
    match instruction.status {
        InstructionStatus::Rejected => {
            let _: WithdrawProtocolFeeRejectedContent = instruction.decode_content()?;
            Ok(())
        }
        InstructionStatus::Accepted => {
            let content: WithdrawProtocolFeeAcceptedContent = instruction.decode_content()?;
            let pool = pool_pairs
                .get_mut(&content.pool_pair_id)
                .ok_or_else(|| ProcessError::UnknownPoolPair(content.pool_pair_id.to_string()))?;
            let amounts = std::mem::take(&mut pool.protocol_fees);
            if amounts != content.amounts {
                return Err(divergence(
                    "protocol fee withdrawal replay",
                    "swept amounts disagree with instruction",
                ));
            }
            Ok(())
        }
        _ => Err(unexpected_status(instruction)),
    }
}

pub fn staking(
    instruction: &Instruction,
    staking_pools: &mut StakingPools,
) -> Result<(), ProcessError> {
    match instruction.status {
        InstructionStatus::Refund => {
            let _: StakingRefundContent = instruction.decode_content()?;
            Ok(())
        }
        InstructionStatus::Accepted => {
            let content: StakingAcceptedContent = instruction.decode_content()?;
            let pool = staking_pools
                .get_mut(&content.staking_token)
                .ok_or_else(|| ProcessError::UnknownStakingPool(content.staking_token.to_string()))?;
            pool.add_liquidity(content.access_id, content.amount)
                .map_err(|err| divergence("staking replay", err))
        }
        _ => Err(unexpected_status(instruction)),
    }
}

pub fn unstaking(
    instruction: &Instruction,
    staking_pools: &mut StakingPools,
) -> Result<(), ProcessError> {
    match instruction.status {
        InstructionStatus::Rejected => {
            let _: UnstakingRejectedContent = instruction.decode_content()?;
            Ok(())
        }
        InstructionStatus::Accepted => {
            let content: UnstakingAcceptedContent = instruction.decode_content()?;
            let pool = staking_pools
                .get_mut(&content.staking_token)
                .ok_or_else(|| ProcessError::UnknownStakingPool(content.staking_token.to_string()))?;
            pool.remove_liquidity(content.access_id, content.amount)
                .map_err(|err| divergence("unstaking replay", err))
        }
        _ => Err(unexpected_status(instruction)),
    }
}

pub fn withdraw_staking_reward(
    instruction: &Instruction,
    staking_pools: &mut StakingPools,
) -> Result<(), ProcessError> {
    match instruction.status {
        InstructionStatus::Rejected => {
            let _: WithdrawStakingRewardRejectedContent = instruction.decode_content()?;
            Ok(())
        }
        InstructionStatus::Accepted => {
            let content: WithdrawStakingRewardAcceptedContent = instruction.decode_content()?;
            let pool = staking_pools
                .get_mut(&content.staking_token)
                .ok_or_else(|| ProcessError::UnknownStakingPool(content.staking_token.to_string()))?;
            let amounts = pool
                .withdraw_rewards(content.access_id)
                .map_err(|err| divergence("staking reward replay", err))?;
            let paid: BTreeMap<TokenId, u64> = amounts
                .into_iter()
                .filter(|(_, amount)| *amount > 0)
                .collect();
            let expected: BTreeMap<TokenId, u64> = content
                .amounts
                .iter()
                .filter(|(_, amount)| **amount > 0)
                .map(|(token, amount)| (*token, *amount))
                .collect();
            if paid != expected {
                return Err(divergence(
                    "staking reward replay",
                    "settled amounts disagree with instruction",
                ));
            }
            Ok(())
        }
        _ => Err(unexpected_status(instruction)),
    }
}

pub fn distribute_staking_reward(
    instruction: &Instruction,
    pool_pairs: &mut Pools,
    staking_pools: &mut StakingPools,
) -> Result<(), ProcessError> {
    match instruction.status {
        InstructionStatus::Accepted => {
            let content: DistributeStakingRewardContent = instruction.decode_content()?;
            for pool in pool_pairs.values_mut() {
                pool.staking_pool_fees.clear();
            }
            apply_staking_distribution(&content.rewards, staking_pools)
        }
        _ => Err(unexpected_status(instruction)),
    }
}

pub fn mint_nft(instruction: &Instruction, nft_ids: &mut NftIds) -> Result<(), ProcessError> {
    match instruction.status {
        InstructionStatus::Refund => {
            let _: MintNftRefundContent = instruction.decode_content()?;
            Ok(())
        }
        InstructionStatus::Accepted => {
            let content: MintNftAcceptedContent = instruction.decode_content()?;
            nft_ids.insert(content.nft_id, content.burn_amount);
            Ok(())
        }
        _ => Err(unexpected_status(instruction)),
    }
}

pub fn modify_params(
    instruction: &Instruction,
    params: &mut Params,
    staking_pools: &mut StakingPools,
) -> Result<(), ProcessError> {
    match instruction.status {
        InstructionStatus::Rejected => {
            let _: ModifyParamsRejectedContent = instruction.decode_content()?;
            Ok(())
        }
        InstructionStatus::Accepted => {
            let content: ModifyParamsAcceptedContent = instruction.decode_content()?;
            *params = content.params;
            sync_staking_pools(params, staking_pools);
            Ok(())
        }
        _ => Err(unexpected_status(instruction)),
    }
}
