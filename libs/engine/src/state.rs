//! Versioned exchange state
//!
//! [`State`] is a sum type over protocol versions, so every node dispatches
//! exhaustively at compile time - there is no base implementation that
//! panics on unimplemented capability. Both versions provide total
//! `build_instructions` / `process` implementations.
//!
//! Lifecycle per block: load at height `h`, either produce (speculative, on
//! a private clone) or process (canonical), then the block pipeline commits
//! and the state is loaded at `h + 1`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sharddex_types::{AccessId, PoolPairId, ProcessError, TokenId};
use tracing::info;

use crate::instructions::{Instruction, InstructionKind};
use crate::params::Params;
use crate::pool_pair::PoolPairState;
use crate::request::{ContributionData, Request};
use crate::staking::StakingPoolState;
use crate::v1::{RequestV1, StateV1};
use crate::{processor, producer};

/// Protocol version of a state instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// Legacy AMM-only exchange: no order book, no amplifier.
    V1,
    /// AMM plus order book with amplified virtual reserves.
    V2,
}

/// In-memory inputs for one block. Snapshots only; the core performs no I/O.
#[derive(Debug, Clone, Default)]
pub struct BlockEnv {
    pub prev_height: u64,
    /// Decoded actions for a V2 state, in intake order.
    pub requests: Vec<Request>,
    /// Decoded actions for a legacy V1 state, in intake order.
    pub legacy_requests: Vec<RequestV1>,
}

/// The aggregate root, versioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum State {
    V1(StateV1),
    V2(StateV2),
}

impl State {
    pub fn version(&self) -> ProtocolVersion {
        match self {
            State::V1(_) => ProtocolVersion::V1,
            State::V2(_) => ProtocolVersion::V2,
        }
    }

    /// Speculatively evaluate a batch of requests, emitting instructions.
    /// Run this on a clone: the mutations here are tentative until the block
    /// pipeline commits them.
    pub fn build_instructions(&mut self, env: &BlockEnv) -> Result<Vec<Instruction>, ProcessError> {
        match self {
            State::V1(state) => state.build_instructions(env),
            State::V2(state) => state.build_instructions(env),
        }
    }

    /// Deterministically replay instructions produced earlier (possibly by
    /// another node) into this state.
    pub fn process(
        &mut self,
        prev_height: u64,
        instructions: &[Instruction],
    ) -> Result<(), ProcessError> {
        match self {
            State::V1(state) => state.process(prev_height, instructions),
            State::V2(state) => state.process(prev_height, instructions),
        }
    }

    /// One-way version upgrade. A V1 state becomes an equivalent V2 state
    /// with base-amplifier pools and empty order books; a V2 state is
    /// returned unchanged.
    pub fn upgrade_to_v2(self) -> State {
        match self {
            State::V1(state) => {
                info!(pools = state.pool_pairs.len(), "upgrading legacy state to v2");
                State::V2(state.into_v2())
            }
            upgraded @ State::V2(_) => upgraded,
        }
    }
}

/// Version 2 state: pools with order books, staking pools, access NFTs and
/// governance params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateV2 {
    pub pool_pairs: BTreeMap<PoolPairId, PoolPairState>,
    pub waiting_contributions: BTreeMap<String, ContributionData>,
    pub params: Params,
    pub staking_pools: BTreeMap<TokenId, StakingPoolState>,
    pub nft_ids: BTreeMap<AccessId, u64>,
}

impl Default for StateV2 {
    fn default() -> Self {
        Self::new(Params::default())
    }
}

impl StateV2 {
    pub fn new(params: Params) -> Self {
        let mut staking_pools = BTreeMap::new();
        producer::sync_staking_pools(&params, &mut staking_pools);
        Self {
            pool_pairs: BTreeMap::new(),
            waiting_contributions: BTreeMap::new(),
            params,
            staking_pools,
            nft_ids: BTreeMap::new(),
        }
    }

    /// Block preamble, identical on the producing and processing paths:
    /// staking fee buckets accrue within a single block only.
    fn begin_block(&mut self) {
        for pool in self.pool_pairs.values_mut() {
            pool.staking_pool_fees.clear();
        }
    }

    pub fn build_instructions(&mut self, env: &BlockEnv) -> Result<Vec<Instruction>, ProcessError> {
        self.begin_block();
        let height = env.prev_height + 1;

        let mut add_liquidity = Vec::new();
        let mut trades = Vec::new();
        let mut add_orders = Vec::new();
        let mut withdraw_orders = Vec::new();
        let mut withdraw_liquidity = Vec::new();
        let mut withdraw_lp_fees = Vec::new();
        let mut withdraw_protocol_fees = Vec::new();
        let mut staking = Vec::new();
        let mut unstaking = Vec::new();
        let mut withdraw_staking_rewards = Vec::new();
        let mut mint_nfts = Vec::new();
        let mut modify_params = Vec::new();
        for request in &env.requests {
            match request {
                Request::AddLiquidity(r) => add_liquidity.push(r.clone()),
                Request::Trade(r) => trades.push(r.clone()),
                Request::AddOrder(r) => add_orders.push(r.clone()),
                Request::WithdrawOrder(r) => withdraw_orders.push(r.clone()),
                Request::WithdrawLiquidity(r) => withdraw_liquidity.push(r.clone()),
                Request::WithdrawLpFee(r) => withdraw_lp_fees.push(r.clone()),
                Request::WithdrawProtocolFee(r) => withdraw_protocol_fees.push(r.clone()),
                Request::Staking(r) => staking.push(r.clone()),
                Request::Unstaking(r) => unstaking.push(r.clone()),
                Request::WithdrawStakingReward(r) => withdraw_staking_rewards.push(r.clone()),
                Request::MintNft(r) => mint_nfts.push(r.clone()),
                Request::ModifyParams(r) => modify_params.push(r.clone()),
            }
        }

        // Withdrawals first, then trades, then deposits; params move last so
        // every action in this block ran under the params it was produced
        // with. The processor sees the same order and therefore the same
        // intermediate states.
        let mut instructions = Vec::new();
        instructions.extend(producer::withdraw_lp_fee(
            &withdraw_lp_fees,
            &mut self.pool_pairs,
        )?);
        instructions.extend(producer::withdraw_protocol_fee(
            &withdraw_protocol_fees,
            &mut self.pool_pairs,
        )?);
        instructions.extend(producer::withdraw_liquidity(
            &withdraw_liquidity,
            &mut self.pool_pairs,
            height,
        )?);
        instructions.extend(producer::withdraw_order(
            &withdraw_orders,
            &mut self.pool_pairs,
        )?);
        instructions.extend(producer::unstaking(&unstaking, &mut self.staking_pools)?);
        instructions.extend(producer::withdraw_staking_reward(
            &withdraw_staking_rewards,
            &mut self.staking_pools,
        )?);
        instructions.extend(producer::trade(&trades, &mut self.pool_pairs, &self.params)?);
        instructions.extend(producer::distribute_staking_reward(
            &mut self.pool_pairs,
            &self.params,
            &mut self.staking_pools,
        )?);
        instructions.extend(producer::add_liquidity(
            &add_liquidity,
            &mut self.pool_pairs,
            &mut self.waiting_contributions,
            &self.nft_ids,
            height,
        )?);
        instructions.extend(producer::staking(
            &staking,
            &mut self.staking_pools,
            &self.nft_ids,
        )?);
        instructions.extend(producer::add_order(
            &add_orders,
            &mut self.pool_pairs,
            &self.nft_ids,
            &self.params,
        )?);
        instructions.extend(producer::mint_nft(
            &mint_nfts,
            &mut self.nft_ids,
            &self.params,
        )?);
        instructions.extend(producer::modify_params(
            &modify_params,
            &mut self.params,
            &self.pool_pairs,
            &mut self.staking_pools,
        )?);
        Ok(instructions)
    }

    pub fn process(
        &mut self,
        prev_height: u64,
        instructions: &[Instruction],
    ) -> Result<(), ProcessError> {
        self.begin_block();
        let height = prev_height + 1;
        for instruction in instructions {
            match instruction.kind {
                InstructionKind::AddLiquidity => processor::add_liquidity(
                    instruction,
                    &mut self.pool_pairs,
                    &mut self.waiting_contributions,
                    height,
                )?,
                InstructionKind::Trade => {
                    processor::trade(instruction, &mut self.pool_pairs, &self.params)?
                }
                InstructionKind::AddOrder => {
                    processor::add_order(instruction, &mut self.pool_pairs)?
                }
                InstructionKind::WithdrawOrder => {
                    processor::withdraw_order(instruction, &mut self.pool_pairs)?
                }
                InstructionKind::WithdrawLiquidity => {
                    processor::withdraw_liquidity(instruction, &mut self.pool_pairs, height)?
                }
                InstructionKind::WithdrawLpFee => {
                    processor::withdraw_lp_fee(instruction, &mut self.pool_pairs)?
                }
                InstructionKind::WithdrawProtocolFee => {
                    processor::withdraw_protocol_fee(instruction, &mut self.pool_pairs)?
                }
                InstructionKind::Staking => {
                    processor::staking(instruction, &mut self.staking_pools)?
                }
                InstructionKind::Unstaking => {
                    processor::unstaking(instruction, &mut self.staking_pools)?
                }
                InstructionKind::WithdrawStakingReward => {
                    processor::withdraw_staking_reward(instruction, &mut self.staking_pools)?
                }
                InstructionKind::DistributeStakingReward => processor::distribute_staking_reward(
                    instruction,
                    &mut self.pool_pairs,
                    &mut self.staking_pools,
                )?,
                InstructionKind::MintNft => processor::mint_nft(instruction, &mut self.nft_ids)?,
                InstructionKind::ModifyParams => processor::modify_params(
                    instruction,
                    &mut self.params,
                    &mut self.staking_pools,
                )?,
            }
        }
        Ok(())
    }
}
