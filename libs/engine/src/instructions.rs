//! Canonical instruction wire format
//!
//! Every resolved action becomes one ordered tuple of four string fields:
//! `[kind, shard, status, content]`, where `content` is a versioned JSON
//! payload. The processor treats this stream as the single source of truth;
//! anything undecodable is fatal for the whole block.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sharddex_types::{AccessId, OrderId, PoolPairId, ProcessError, TokenId, TxId};

use crate::orderbook::Order;
use crate::params::Params;
use crate::request::{
    AddOrderRequest, ContributionData, MintNftRequest, ModifyParamsRequest, StakingRequest,
    TradeRequest, UnstakingRequest, WithdrawLiquidityRequest, WithdrawLpFeeRequest,
    WithdrawOrderRequest, WithdrawProtocolFeeRequest, WithdrawStakingRewardRequest,
};
use crate::trade::AcceptedTrade;

/// Action kind tags. The numeric codes are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstructionKind {
    AddLiquidity,
    WithdrawLiquidity,
    WithdrawLpFee,
    WithdrawProtocolFee,
    Trade,
    AddOrder,
    WithdrawOrder,
    MintNft,
    Staking,
    Unstaking,
    WithdrawStakingReward,
    DistributeStakingReward,
    ModifyParams,
}

impl InstructionKind {
    pub fn code(self) -> u32 {
        match self {
            InstructionKind::AddLiquidity => 281,
            InstructionKind::WithdrawLiquidity => 282,
            InstructionKind::WithdrawLpFee => 283,
            InstructionKind::WithdrawProtocolFee => 284,
            InstructionKind::Trade => 285,
            InstructionKind::AddOrder => 286,
            InstructionKind::WithdrawOrder => 287,
            InstructionKind::MintNft => 288,
            InstructionKind::Staking => 289,
            InstructionKind::Unstaking => 290,
            InstructionKind::WithdrawStakingReward => 291,
            InstructionKind::DistributeStakingReward => 292,
            InstructionKind::ModifyParams => 293,
        }
    }

    pub fn from_code(code: &str) -> Result<Self, ProcessError> {
        match code {
            "281" => Ok(InstructionKind::AddLiquidity),
            "282" => Ok(InstructionKind::WithdrawLiquidity),
            "283" => Ok(InstructionKind::WithdrawLpFee),
            "284" => Ok(InstructionKind::WithdrawProtocolFee),
            "285" => Ok(InstructionKind::Trade),
            "286" => Ok(InstructionKind::AddOrder),
            "287" => Ok(InstructionKind::WithdrawOrder),
            "288" => Ok(InstructionKind::MintNft),
            "289" => Ok(InstructionKind::Staking),
            "290" => Ok(InstructionKind::Unstaking),
            "291" => Ok(InstructionKind::WithdrawStakingReward),
            "292" => Ok(InstructionKind::DistributeStakingReward),
            "293" => Ok(InstructionKind::ModifyParams),
            other => Err(ProcessError::UnknownKind(other.to_string())),
        }
    }
}

/// Per-action resolution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstructionStatus {
    Waiting,
    Matched,
    MatchedReturned,
    Refund,
    Accepted,
    Rejected,
}

impl InstructionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstructionStatus::Waiting => "waiting",
            InstructionStatus::Matched => "matched",
            InstructionStatus::MatchedReturned => "matchedNReturned",
            InstructionStatus::Refund => "refund",
            InstructionStatus::Accepted => "accepted",
            InstructionStatus::Rejected => "rejected",
        }
    }

    pub fn from_str_tag(tag: &str) -> Result<Self, ProcessError> {
        match tag {
            "waiting" => Ok(InstructionStatus::Waiting),
            "matched" => Ok(InstructionStatus::Matched),
            "matchedNReturned" => Ok(InstructionStatus::MatchedReturned),
            "refund" => Ok(InstructionStatus::Refund),
            "accepted" => Ok(InstructionStatus::Accepted),
            "rejected" => Ok(InstructionStatus::Rejected),
            other => Err(ProcessError::UnknownStatus(other.to_string())),
        }
    }
}

/// One resolved action on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub shard_id: u8,
    pub status: InstructionStatus,
    pub content: String,
}

impl Instruction {
    pub fn new<T: Serialize>(
        kind: InstructionKind,
        shard_id: u8,
        status: InstructionStatus,
        content: &T,
    ) -> Result<Self, ProcessError> {
        let content = serde_json::to_string(content)
            .map_err(|err| ProcessError::Content(err.to_string()))?;
        Ok(Self { kind, shard_id, status, content })
    }

    /// Encode as the four-field string tuple.
    pub fn to_fields(&self) -> Vec<String> {
        vec![
            self.kind.code().to_string(),
            self.shard_id.to_string(),
            self.status.as_str().to_string(),
            self.content.clone(),
        ]
    }

    /// Decode from the four-field string tuple. Wrong field counts and
    /// unknown tags are fatal.
    pub fn from_fields(fields: &[String]) -> Result<Self, ProcessError> {
        if fields.len() != 4 {
            return Err(ProcessError::WrongFieldCount { expected: 4, actual: fields.len() });
        }
        let kind = InstructionKind::from_code(&fields[0])?;
        let shard_id = fields[1]
            .parse::<u8>()
            .map_err(|_| ProcessError::Content(format!("invalid shard id '{}'", fields[1])))?;
        let status = InstructionStatus::from_str_tag(&fields[2])?;
        Ok(Self { kind, shard_id, status, content: fields[3].clone() })
    }

    pub fn decode_content<T: DeserializeOwned>(&self) -> Result<T, ProcessError> {
        serde_json::from_str(&self.content).map_err(|err| ProcessError::Content(err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Content payloads
// ---------------------------------------------------------------------------

/// Waiting and refunded contributions echo the deposit back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionContent {
    pub contribution: ContributionData,
}

/// Second half of a new-pool creation: carries both deposits and the pool
/// they seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionMatchedContent {
    pub contribution: ContributionData,
    pub paired_contribution: ContributionData,
    pub pool_pair_id: PoolPairId,
    pub share_amount: u64,
}

/// Ratio-matched contribution into an existing pool. Each side gets one
/// instruction; only the applying side (the one carrying `paired_tx`)
/// mutates processor state, using both actual amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionMatchedReturnedContent {
    pub contribution: ContributionData,
    pub pool_pair_id: PoolPairId,
    pub actual_amount: u64,
    pub returned_amount: u64,
    /// Actual amount accepted from the paired deposit's token side.
    pub counterpart_actual: u64,
    /// Shares granted by the match; zero on the informational side.
    pub share_amount: u64,
    /// Present on the side whose processing applies the match.
    pub paired_tx: Option<TxId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeAcceptedContent {
    pub tx_id: TxId,
    pub trade: AcceptedTrade,
    pub order_reward_changes: Vec<BTreeMap<AccessId, BTreeMap<TokenId, u64>>>,
    /// Making volumes as decimal strings, keyed by bought token then maker.
    pub making_volume_changes: Vec<BTreeMap<TokenId, BTreeMap<AccessId, String>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRefundContent {
    pub request: TradeRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOrderAcceptedContent {
    pub pool_pair_id: PoolPairId,
    pub order: Order,
    pub receiver: String,
    pub tx_id: TxId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOrderRefundContent {
    pub request: AddOrderRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawOrderAcceptedContent {
    pub pool_pair_id: PoolPairId,
    pub order_id: OrderId,
    pub token_id: TokenId,
    pub amount: u64,
    pub access_id: AccessId,
    pub receiver: String,
    pub tx_id: TxId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawOrderRejectedContent {
    pub request: WithdrawOrderRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawLiquidityAcceptedContent {
    pub pool_pair_id: PoolPairId,
    pub access_id: AccessId,
    pub token0_id: TokenId,
    pub token0_amount: u64,
    pub token1_id: TokenId,
    pub token1_amount: u64,
    pub share_amount: u64,
    pub receiver: String,
    pub tx_id: TxId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawLiquidityRejectedContent {
    pub request: WithdrawLiquidityRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawLpFeeAcceptedContent {
    pub pool_pair_id: PoolPairId,
    pub access_id: AccessId,
    pub amounts: BTreeMap<TokenId, u64>,
    pub receiver: String,
    pub tx_id: TxId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawLpFeeRejectedContent {
    pub request: WithdrawLpFeeRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawProtocolFeeAcceptedContent {
    pub pool_pair_id: PoolPairId,
    pub amounts: BTreeMap<TokenId, u64>,
    pub receiver: String,
    pub tx_id: TxId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawProtocolFeeRejectedContent {
    pub request: WithdrawProtocolFeeRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingAcceptedContent {
    pub staking_token: TokenId,
    pub access_id: AccessId,
    pub amount: u64,
    pub tx_id: TxId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingRefundContent {
    pub request: StakingRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstakingAcceptedContent {
    pub staking_token: TokenId,
    pub access_id: AccessId,
    pub amount: u64,
    pub receiver: String,
    pub tx_id: TxId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstakingRejectedContent {
    pub request: UnstakingRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawStakingRewardAcceptedContent {
    pub staking_token: TokenId,
    pub access_id: AccessId,
    pub amounts: BTreeMap<TokenId, u64>,
    pub receiver: String,
    pub tx_id: TxId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawStakingRewardRejectedContent {
    pub request: WithdrawStakingRewardRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintNftAcceptedContent {
    pub nft_id: AccessId,
    pub burn_amount: u64,
    pub receiver: String,
    pub tx_id: TxId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintNftRefundContent {
    pub request: MintNftRequest,
}

/// Block-wide distribution of accrued staking fees, keyed by staking pool
/// then reward token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributeStakingRewardContent {
    pub rewards: BTreeMap<TokenId, BTreeMap<TokenId, u64>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyParamsAcceptedContent {
    pub params: Params,
    pub tx_id: TxId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyParamsRejectedContent {
    pub request: ModifyParamsRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips() {
        let content = DistributeStakingRewardContent { rewards: BTreeMap::new() };
        let instruction = Instruction::new(
            InstructionKind::DistributeStakingReward,
            0,
            InstructionStatus::Accepted,
            &content,
        )
        .unwrap();
        let fields = instruction.to_fields();
        assert_eq!(fields[0], "292");
        assert_eq!(fields[2], "accepted");

        let back = Instruction::from_fields(&fields).unwrap();
        assert_eq!(back, instruction);
        let decoded: DistributeStakingRewardContent = back.decode_content().unwrap();
        assert_eq!(decoded, content);
    }

    #[test]
    fn malformed_envelopes_are_fatal() {
        let short = vec!["285".to_string(), "0".to_string()];
        assert_eq!(
            Instruction::from_fields(&short).unwrap_err(),
            ProcessError::WrongFieldCount { expected: 4, actual: 2 }
        );

        let bad_kind = vec![
            "999".to_string(),
            "0".to_string(),
            "accepted".to_string(),
            "{}".to_string(),
        ];
        assert_eq!(
            Instruction::from_fields(&bad_kind).unwrap_err(),
            ProcessError::UnknownKind("999".to_string())
        );

        let bad_status = vec![
            "285".to_string(),
            "0".to_string(),
            "shrugged".to_string(),
            "{}".to_string(),
        ];
        assert_eq!(
            Instruction::from_fields(&bad_status).unwrap_err(),
            ProcessError::UnknownStatus("shrugged".to_string())
        );
    }

    #[test]
    fn garbage_content_is_fatal() {
        let instruction = Instruction {
            kind: InstructionKind::Trade,
            shard_id: 0,
            status: InstructionStatus::Accepted,
            content: "not json".to_string(),
        };
        assert!(matches!(
            instruction.decode_content::<TradeRefundContent>().unwrap_err(),
            ProcessError::Content(_)
        ));
    }
}
