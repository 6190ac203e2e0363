//! Decoded user actions consumed by the state producer
//!
//! The surrounding node decodes and validates transactions; by the time a
//! request reaches this crate it is structurally sound. Business validation
//! (does the pool exist, is the fee sufficient) happens in the producer and
//! resolves into accept or refund instructions, never into dropped requests.

use serde::{Deserialize, Serialize};
use sharddex_types::{AccessId, OrderId, PoolPairId, TokenId, TxId};

use crate::params::Params;

/// One half of a two-sided liquidity deposit. Also the persisted form of a
/// waiting contribution and the payload echoed in contribution instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionData {
    /// Target pool. Empty for the first contribution to a brand new pair.
    pub pool_pair_id: PoolPairId,
    /// Groups the two one-sided deposits of one logical contribution.
    pub pair_hash: String,
    /// Where refunds and receipts for this deposit go.
    pub receiver: String,
    pub token_id: TokenId,
    pub amount: u64,
    pub amplifier: u64,
    pub access_id: AccessId,
    pub tx_id: TxId,
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLiquidityRequest {
    pub contribution: ContributionData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRequest {
    /// Pools to route through, in order.
    pub trade_path: Vec<PoolPairId>,
    pub token_to_sell: TokenId,
    pub sell_amount: u64,
    /// Minimum output below which the whole trade refunds.
    pub min_acceptable: u64,
    /// Fee burned alongside the sell amount.
    pub trading_fee: u64,
    /// Fee was burned in the native coin rather than the sold token.
    pub fee_in_native: bool,
    pub receiver: String,
    pub tx_id: TxId,
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOrderRequest {
    pub pool_pair_id: PoolPairId,
    pub token_to_sell: TokenId,
    pub sell_amount: u64,
    /// The full countervalue asked for `sell_amount`; together they fix the
    /// order's rate.
    pub min_acceptable: u64,
    pub access_id: AccessId,
    pub receiver: String,
    pub tx_id: TxId,
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawOrderRequest {
    pub pool_pair_id: PoolPairId,
    pub order_id: OrderId,
    pub token_id: TokenId,
    /// Amount of `token_id` balance to withdraw; zero withdraws everything.
    pub amount: u64,
    pub access_id: AccessId,
    pub receiver: String,
    pub tx_id: TxId,
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawLiquidityRequest {
    pub pool_pair_id: PoolPairId,
    pub share_amount: u64,
    pub access_id: AccessId,
    pub receiver: String,
    pub tx_id: TxId,
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawLpFeeRequest {
    pub pool_pair_id: PoolPairId,
    pub access_id: AccessId,
    pub receiver: String,
    pub tx_id: TxId,
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawProtocolFeeRequest {
    pub pool_pair_id: PoolPairId,
    pub receiver: String,
    pub tx_id: TxId,
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingRequest {
    /// Staking pools are keyed by the staked token.
    pub staking_token: TokenId,
    pub amount: u64,
    pub access_id: AccessId,
    pub receiver: String,
    pub tx_id: TxId,
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstakingRequest {
    pub staking_token: TokenId,
    pub amount: u64,
    pub access_id: AccessId,
    pub receiver: String,
    pub tx_id: TxId,
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawStakingRewardRequest {
    pub staking_token: TokenId,
    pub access_id: AccessId,
    pub receiver: String,
    pub tx_id: TxId,
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintNftRequest {
    pub burn_amount: u64,
    pub receiver: String,
    pub tx_id: TxId,
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyParamsRequest {
    pub new_params: Params,
    pub tx_id: TxId,
    pub shard_id: u8,
}

/// A decoded user action awaiting production. Variants map one-to-one onto
/// instruction kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    AddLiquidity(AddLiquidityRequest),
    Trade(TradeRequest),
    AddOrder(AddOrderRequest),
    WithdrawOrder(WithdrawOrderRequest),
    WithdrawLiquidity(WithdrawLiquidityRequest),
    WithdrawLpFee(WithdrawLpFeeRequest),
    WithdrawProtocolFee(WithdrawProtocolFeeRequest),
    Staking(StakingRequest),
    Unstaking(UnstakingRequest),
    WithdrawStakingReward(WithdrawStakingRewardRequest),
    MintNft(MintNftRequest),
    ModifyParams(ModifyParamsRequest),
}
