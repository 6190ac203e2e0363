//! Legacy first-generation exchange state
//!
//! V1 predates order books and amplified reserves: plain constant-product
//! pools keyed by token pair, shares keyed by the composite
//! [`ShareKey`](sharddex_types::ShareKey). It remains a complete, total
//! implementation so historical chains replay, and it upgrades in place to
//! [`StateV2`](crate::state::StateV2).

use std::collections::BTreeMap;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sharddex_amm::liquidity::calculate_share_amount;
use sharddex_amm::BASE_AMPLIFIER;
use sharddex_types::{
    AccessId, PairKey, PoolPairId, ProcessError, ShareKey, TokenId, TxId,
};

use crate::instructions::{Instruction, InstructionKind, InstructionStatus};
use crate::pool_pair::PoolPairState;
use crate::share::Share;
use crate::state::{BlockEnv, StateV2};

/// A legacy pool: two real reserves, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolV1 {
    pub token0_amount: u64,
    pub token1_amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionV1 {
    pub pair_hash: String,
    pub contributor: String,
    pub token_id: TokenId,
    pub amount: u64,
    pub receiver: String,
    pub tx_id: TxId,
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRequestV1 {
    pub token_to_sell: TokenId,
    pub token_to_buy: TokenId,
    pub sell_amount: u64,
    pub min_acceptable: u64,
    pub trading_fee: u64,
    pub receiver: String,
    pub tx_id: TxId,
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequestV1 {
    pub token_a: TokenId,
    pub token_b: TokenId,
    pub contributor: String,
    pub share_amount: u64,
    pub receiver: String,
    pub tx_id: TxId,
    pub shard_id: u8,
}

/// Actions understood by the legacy exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestV1 {
    AddLiquidity(ContributionV1),
    Trade(TradeRequestV1),
    WithdrawLiquidity(WithdrawRequestV1),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionV1Content {
    pub contribution: ContributionV1,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionV1MatchedContent {
    pub contribution: ContributionV1,
    pub paired_contribution: ContributionV1,
    pub share_amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeV1AcceptedContent {
    pub request: TradeRequestV1,
    pub receive_amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeV1RefundContent {
    pub request: TradeRequestV1,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawV1AcceptedContent {
    pub request: WithdrawRequestV1,
    pub token0_amount: u64,
    pub token1_amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawV1RejectedContent {
    pub request: WithdrawRequestV1,
}

/// The legacy aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateV1 {
    pub pool_pairs: BTreeMap<PairKey, PoolV1>,
    pub shares: BTreeMap<ShareKey, u64>,
    pub total_shares: BTreeMap<PairKey, u64>,
    pub waiting_contributions: BTreeMap<String, ContributionV1>,
}

impl StateV1 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert into an equivalent V2 state: base-amplifier pools, empty
    /// order books, share records under identities derived from the legacy
    /// contributor addresses.
    pub fn into_v2(self) -> StateV2 {
        let mut state = StateV2::default();
        for (pair, pool) in &self.pool_pairs {
            let pool_pair_id = PoolPairId::derive(&pair.token0, &pair.token1, &TxId::zero());
            let mut upgraded = PoolPairState::new(sharddex_amm::reserve::PairReserve {
                token0_id: pair.token0,
                token1_id: pair.token1,
                share_amount: self.total_shares.get(pair).copied().unwrap_or(0),
                token0_real: pool.token0_amount,
                token1_real: pool.token1_amount,
                token0_virtual: BigUint::from(pool.token0_amount),
                token1_virtual: BigUint::from(pool.token1_amount),
                amplifier: BASE_AMPLIFIER,
            });
            for (key, amount) in &self.shares {
                if key.pair != *pair || *amount == 0 {
                    continue;
                }
                let access_id = AccessId::from_tag(&key.contributor);
                upgraded
                    .shares
                    .insert(access_id, Share { amount: *amount, ..Share::new() });
                state.nft_ids.entry(access_id).or_insert(0);
            }
            state.pool_pairs.insert(pool_pair_id, upgraded);
        }
        state
    }

    pub fn build_instructions(&mut self, env: &BlockEnv) -> Result<Vec<Instruction>, ProcessError> {
        let mut instructions = Vec::new();
        for request in &env.legacy_requests {
            match request {
                RequestV1::AddLiquidity(contribution) => {
                    instructions.extend(self.produce_contribution(contribution)?)
                }
                RequestV1::Trade(trade) => instructions.push(self.produce_trade(trade)?),
                RequestV1::WithdrawLiquidity(withdraw) => {
                    instructions.push(self.produce_withdraw(withdraw)?)
                }
            }
        }
        Ok(instructions)
    }

    fn produce_contribution(
        &mut self,
        contribution: &ContributionV1,
    ) -> Result<Vec<Instruction>, ProcessError> {
        let Some(paired) = self.waiting_contributions.remove(&contribution.pair_hash) else {
            self.waiting_contributions
                .insert(contribution.pair_hash.clone(), contribution.clone());
            return Ok(vec![Instruction::new(
                InstructionKind::AddLiquidity,
                contribution.shard_id,
                InstructionStatus::Waiting,
                &ContributionV1Content { contribution: contribution.clone() },
            )?]);
        };

        if paired.token_id == contribution.token_id
            || paired.contributor != contribution.contributor
            || paired.amount == 0
            || contribution.amount == 0
        {
            debug!(pair_hash = %contribution.pair_hash, "refunding legacy contribution pair");
            let refund = |c: &ContributionV1| {
                Instruction::new(
                    InstructionKind::AddLiquidity,
                    c.shard_id,
                    InstructionStatus::Refund,
                    &ContributionV1Content { contribution: c.clone() },
                )
            };
            return Ok(vec![refund(&paired)?, refund(contribution)?]);
        }

        let share_amount = self.apply_contribution_match(&paired, contribution)?;
        Ok(vec![Instruction::new(
            InstructionKind::AddLiquidity,
            contribution.shard_id,
            InstructionStatus::Matched,
            &ContributionV1MatchedContent {
                contribution: contribution.clone(),
                paired_contribution: paired,
                share_amount,
            },
        )?])
    }

    /// Both deposits join the pool in full; the share grant follows the
    /// standard min-ratio formula against the pre-deposit reserves.
    fn apply_contribution_match(
        &mut self,
        paired: &ContributionV1,
        contribution: &ContributionV1,
    ) -> Result<u64, ProcessError> {
        let pair = PairKey::new(paired.token_id, contribution.token_id);
        let (amount0, amount1) = if paired.token_id == pair.token0 {
            (paired.amount, contribution.amount)
        } else {
            (contribution.amount, paired.amount)
        };
        let pool = self
            .pool_pairs
            .entry(pair)
            .or_insert(PoolV1 { token0_amount: 0, token1_amount: 0 });
        let total = self.total_shares.entry(pair).or_insert(0);
        let share_amount =
            calculate_share_amount(pool.token0_amount, pool.token1_amount, amount0, amount1, *total)
                .map_err(|err| ProcessError::Divergence(format!("legacy share grant: {err}")))?;
        pool.token0_amount += amount0;
        pool.token1_amount += amount1;
        *total += share_amount;
        let key = ShareKey::new(pair, contribution.contributor.clone());
        *self.shares.entry(key).or_insert(0) += share_amount;
        Ok(share_amount)
    }

    fn produce_trade(&mut self, request: &TradeRequestV1) -> Result<Instruction, ProcessError> {
        match self.evaluate_trade(request) {
            Some(receive_amount) => {
                self.apply_trade(request, receive_amount);
                Instruction::new(
                    InstructionKind::Trade,
                    request.shard_id,
                    InstructionStatus::Accepted,
                    &TradeV1AcceptedContent { request: request.clone(), receive_amount },
                )
            }
            None => {
                debug!(tx = %request.tx_id, "refunding legacy trade");
                Instruction::new(
                    InstructionKind::Trade,
                    request.shard_id,
                    InstructionStatus::Refund,
                    &TradeV1RefundContent { request: request.clone() },
                )
            }
        }
    }

    /// Constant-product output, or `None` when the trade must refund.
    fn evaluate_trade(&self, request: &TradeRequestV1) -> Option<u64> {
        if request.sell_amount == 0 || request.token_to_sell == request.token_to_buy {
            return None;
        }
        let pair = PairKey::new(request.token_to_sell, request.token_to_buy);
        let pool = self.pool_pairs.get(&pair)?;
        let (sell_reserve, buy_reserve) = if request.token_to_sell == pair.token0 {
            (pool.token0_amount, pool.token1_amount)
        } else {
            (pool.token1_amount, pool.token0_amount)
        };
        if sell_reserve == 0 || buy_reserve == 0 {
            return None;
        }
        // The full burned amount (sell + fee) must fit the reserve domain.
        let added = request.sell_amount.checked_add(request.trading_fee)?;
        sell_reserve.checked_add(added)?;
        let numerator = BigUint::from(request.sell_amount) * BigUint::from(buy_reserve);
        let denominator = BigUint::from(request.sell_amount) + BigUint::from(sell_reserve);
        let receive = u64::try_from(&(numerator / denominator)).ok()?;
        if receive == 0 || receive < request.min_acceptable || receive >= buy_reserve {
            return None;
        }
        Some(receive)
    }

    fn apply_trade(&mut self, request: &TradeRequestV1, receive_amount: u64) {
        let pair = PairKey::new(request.token_to_sell, request.token_to_buy);
        if let Some(pool) = self.pool_pairs.get_mut(&pair) {
            // The fee joins the sell-side reserve, compounding for LPs.
            let added = request.sell_amount + request.trading_fee;
            if request.token_to_sell == pair.token0 {
                pool.token0_amount += added;
                pool.token1_amount -= receive_amount;
            } else {
                pool.token1_amount += added;
                pool.token0_amount -= receive_amount;
            }
        }
    }

    fn produce_withdraw(&mut self, request: &WithdrawRequestV1) -> Result<Instruction, ProcessError> {
        match self.evaluate_withdraw(request) {
            Some((token0_amount, token1_amount)) => {
                self.apply_withdraw(request, token0_amount, token1_amount);
                Instruction::new(
                    InstructionKind::WithdrawLiquidity,
                    request.shard_id,
                    InstructionStatus::Accepted,
                    &WithdrawV1AcceptedContent {
                        request: request.clone(),
                        token0_amount,
                        token1_amount,
                    },
                )
            }
            None => {
                debug!(tx = %request.tx_id, "rejecting legacy withdrawal");
                Instruction::new(
                    InstructionKind::WithdrawLiquidity,
                    request.shard_id,
                    InstructionStatus::Rejected,
                    &WithdrawV1RejectedContent { request: request.clone() },
                )
            }
        }
    }

    fn evaluate_withdraw(&self, request: &WithdrawRequestV1) -> Option<(u64, u64)> {
        if request.share_amount == 0 {
            return None;
        }
        let pair = PairKey::new(request.token_a, request.token_b);
        let pool = self.pool_pairs.get(&pair)?;
        let total = self.total_shares.get(&pair).copied().unwrap_or(0);
        let key = ShareKey::new(pair, request.contributor.clone());
        let recorded = self.shares.get(&key).copied().unwrap_or(0);
        if total == 0 || recorded < request.share_amount {
            return None;
        }
        let payout = |reserve: u64| {
            u64::try_from(
                &(BigUint::from(reserve) * BigUint::from(request.share_amount)
                    / BigUint::from(total)),
            )
            .ok()
        };
        Some((payout(pool.token0_amount)?, payout(pool.token1_amount)?))
    }

    fn apply_withdraw(&mut self, request: &WithdrawRequestV1, amount0: u64, amount1: u64) {
        let pair = PairKey::new(request.token_a, request.token_b);
        if let Some(pool) = self.pool_pairs.get_mut(&pair) {
            pool.token0_amount -= amount0;
            pool.token1_amount -= amount1;
        }
        if let Some(total) = self.total_shares.get_mut(&pair) {
            *total -= request.share_amount;
        }
        let key = ShareKey::new(pair, request.contributor.clone());
        if let Some(share) = self.shares.get_mut(&key) {
            *share -= request.share_amount;
            if *share == 0 {
                self.shares.remove(&key);
            }
        }
    }

    pub fn process(
        &mut self,
        _prev_height: u64,
        instructions: &[Instruction],
    ) -> Result<(), ProcessError> {
        for instruction in instructions {
            match (instruction.kind, instruction.status) {
                (InstructionKind::AddLiquidity, InstructionStatus::Waiting) => {
                    let content: ContributionV1Content = instruction.decode_content()?;
                    self.waiting_contributions
                        .insert(content.contribution.pair_hash.clone(), content.contribution);
                }
                (InstructionKind::AddLiquidity, InstructionStatus::Refund) => {
                    let content: ContributionV1Content = instruction.decode_content()?;
                    self.waiting_contributions
                        .remove(&content.contribution.pair_hash);
                }
                (InstructionKind::AddLiquidity, InstructionStatus::Matched) => {
                    let content: ContributionV1MatchedContent = instruction.decode_content()?;
                    self.waiting_contributions
                        .remove(&content.contribution.pair_hash);
                    let share_amount = self
                        .apply_contribution_match(&content.paired_contribution, &content.contribution)?;
                    if share_amount != content.share_amount {
                        return Err(ProcessError::Divergence(format!(
                            "legacy share grant computed {share_amount}, instruction says {}",
                            content.share_amount
                        )));
                    }
                }
                (InstructionKind::Trade, InstructionStatus::Refund) => {
                    let _: TradeV1RefundContent = instruction.decode_content()?;
                }
                (InstructionKind::Trade, InstructionStatus::Accepted) => {
                    let content: TradeV1AcceptedContent = instruction.decode_content()?;
                    let computed = self.evaluate_trade(&content.request).ok_or_else(|| {
                        ProcessError::Divergence("legacy trade no longer evaluates".to_string())
                    })?;
                    if computed != content.receive_amount {
                        return Err(ProcessError::Divergence(format!(
                            "legacy trade computed {computed}, instruction says {}",
                            content.receive_amount
                        )));
                    }
                    self.apply_trade(&content.request, computed);
                }
                (InstructionKind::WithdrawLiquidity, InstructionStatus::Rejected) => {
                    let _: WithdrawV1RejectedContent = instruction.decode_content()?;
                }
                (InstructionKind::WithdrawLiquidity, InstructionStatus::Accepted) => {
                    let content: WithdrawV1AcceptedContent = instruction.decode_content()?;
                    let (amount0, amount1) =
                        self.evaluate_withdraw(&content.request).ok_or_else(|| {
                            ProcessError::Divergence(
                                "legacy withdrawal no longer evaluates".to_string(),
                            )
                        })?;
                    if (amount0, amount1) != (content.token0_amount, content.token1_amount) {
                        return Err(ProcessError::Divergence(format!(
                            "legacy withdrawal computed ({amount0}, {amount1}), instruction says ({}, {})",
                            content.token0_amount, content.token1_amount
                        )));
                    }
                    self.apply_withdraw(&content.request, amount0, amount1);
                }
                _ => {
                    return Err(ProcessError::UnknownStatus(format!(
                        "{} for legacy kind {:?}",
                        instruction.status.as_str(),
                        instruction.kind
                    )))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contribution(pair_hash: &str, token: &str, amount: u64, tx: &str) -> ContributionV1 {
        ContributionV1 {
            pair_hash: pair_hash.to_string(),
            contributor: "alice".to_string(),
            token_id: TokenId::from_tag(token),
            amount,
            receiver: "alice-addr".to_string(),
            tx_id: TxId::from_tag(tx),
            shard_id: 0,
        }
    }

    fn seeded_state() -> StateV1 {
        let mut state = StateV1::new();
        let env = BlockEnv {
            prev_height: 1,
            requests: vec![],
            legacy_requests: vec![
                RequestV1::AddLiquidity(contribution("h1", "aaa", 1_000, "tx1")),
                RequestV1::AddLiquidity(contribution("h1", "bbb", 4_000, "tx2")),
            ],
        };
        state.build_instructions(&env).unwrap();
        state
    }

    #[test]
    fn contribution_pair_seeds_pool() {
        let state = seeded_state();
        let pair = PairKey::new(TokenId::from_tag("aaa"), TokenId::from_tag("bbb"));
        assert_eq!(
            state.pool_pairs[&pair],
            PoolV1 { token0_amount: 1_000, token1_amount: 4_000 }
        );
        assert_eq!(state.total_shares[&pair], 1_000);
        assert_eq!(state.shares[&ShareKey::new(pair, "alice")], 1_000);
        assert!(state.waiting_contributions.is_empty());
    }

    #[test]
    fn lone_contribution_waits() {
        let mut state = StateV1::new();
        let env = BlockEnv {
            prev_height: 1,
            requests: vec![],
            legacy_requests: vec![RequestV1::AddLiquidity(contribution("h9", "aaa", 10, "tx"))],
        };
        let instructions = state.build_instructions(&env).unwrap();
        assert_eq!(instructions.len(), 1);
        assert_eq!(instructions[0].status, InstructionStatus::Waiting);
        assert!(state.waiting_contributions.contains_key("h9"));
    }

    #[test]
    fn trade_moves_reserves_and_min_amount_refunds() {
        let mut state = seeded_state();
        let trade = TradeRequestV1 {
            token_to_sell: TokenId::from_tag("aaa"),
            token_to_buy: TokenId::from_tag("bbb"),
            sell_amount: 100,
            min_acceptable: 1,
            trading_fee: 3,
            receiver: "bob".to_string(),
            tx_id: TxId::from_tag("trade"),
            shard_id: 0,
        };
        let env = BlockEnv {
            prev_height: 2,
            requests: vec![],
            legacy_requests: vec![RequestV1::Trade(trade.clone())],
        };
        let instructions = state.build_instructions(&env).unwrap();
        assert_eq!(instructions[0].status, InstructionStatus::Accepted);
        let pair = PairKey::new(TokenId::from_tag("aaa"), TokenId::from_tag("bbb"));
        // floor(100 * 4000 / 1100) = 363; fee of 3 joins the sell side.
        assert_eq!(
            state.pool_pairs[&pair],
            PoolV1 { token0_amount: 1_103, token1_amount: 3_637 }
        );

        let greedy = TradeRequestV1 { min_acceptable: 1_000_000, ..trade };
        let env = BlockEnv {
            prev_height: 3,
            requests: vec![],
            legacy_requests: vec![RequestV1::Trade(greedy)],
        };
        let instructions = state.build_instructions(&env).unwrap();
        assert_eq!(instructions[0].status, InstructionStatus::Refund);
    }

    #[test]
    fn withdraw_round_trips() {
        let mut state = seeded_state();
        let env = BlockEnv {
            prev_height: 2,
            requests: vec![],
            legacy_requests: vec![RequestV1::WithdrawLiquidity(WithdrawRequestV1 {
                token_a: TokenId::from_tag("bbb"),
                token_b: TokenId::from_tag("aaa"),
                contributor: "alice".to_string(),
                share_amount: 1_000,
                receiver: "alice-addr".to_string(),
                tx_id: TxId::from_tag("wd"),
                shard_id: 0,
            })],
        };
        let instructions = state.build_instructions(&env).unwrap();
        assert_eq!(instructions[0].status, InstructionStatus::Accepted);
        let pair = PairKey::new(TokenId::from_tag("aaa"), TokenId::from_tag("bbb"));
        assert_eq!(
            state.pool_pairs[&pair],
            PoolV1 { token0_amount: 0, token1_amount: 0 }
        );
        assert!(state.shares.is_empty());
    }

    #[test]
    fn producer_and_processor_agree() {
        let env = BlockEnv {
            prev_height: 1,
            requests: vec![],
            legacy_requests: vec![
                RequestV1::AddLiquidity(contribution("h1", "aaa", 1_000, "tx1")),
                RequestV1::AddLiquidity(contribution("h1", "bbb", 4_000, "tx2")),
                RequestV1::Trade(TradeRequestV1 {
                    token_to_sell: TokenId::from_tag("aaa"),
                    token_to_buy: TokenId::from_tag("bbb"),
                    sell_amount: 100,
                    min_acceptable: 1,
                    trading_fee: 3,
                    receiver: "bob".to_string(),
                    tx_id: TxId::from_tag("trade"),
                    shard_id: 0,
                }),
            ],
        };
        let mut producing = StateV1::new();
        let instructions = producing.build_instructions(&env).unwrap();

        let mut processing = StateV1::new();
        processing.process(env.prev_height, &instructions).unwrap();
        assert_eq!(processing, producing);
    }

    #[test]
    fn upgrade_carries_pools_and_shares() {
        let state = seeded_state();
        let upgraded = state.into_v2();
        assert_eq!(upgraded.pool_pairs.len(), 1);
        let pool = upgraded.pool_pairs.values().next().unwrap();
        assert_eq!(pool.reserve.token0_real, 1_000);
        assert_eq!(pool.reserve.token0_virtual, BigUint::from(1_000u64));
        assert_eq!(pool.reserve.amplifier, BASE_AMPLIFIER);
        assert_eq!(pool.reserve.share_amount, 1_000);
        assert_eq!(pool.total_provider_shares(), 1_000);
        assert!(pool.orderbook.is_empty());
    }
}
