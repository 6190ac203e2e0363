//! # Sharddex Engine - Versioned Exchange State and Matching
//!
//! ## Purpose
//!
//! The trading core of the exchange: pool pair aggregates with order books
//! and fee accumulators, the multi-hop trade matching engine, liquidity
//! contribution/withdrawal, staking pools, governance params, and the
//! producer/processor pair that turns user requests into canonical
//! instructions and replays them identically on every validating node.
//!
//! ## Architecture Role
//!
//! Per block, [`State::build_instructions`] speculatively evaluates pending
//! requests against a cloned snapshot and emits an ordered instruction list.
//! Every node later feeds that list into [`State::process`] against its
//! committed copy; both paths share the same engine functions so their
//! results cannot diverge. Refundable business failures become refund
//! instructions; only malformed instructions or cross-node divergence abort
//! a block.
//!
//! The core is single-threaded and deterministic by design: no I/O, no
//! clocks, no randomness, and exact integer arithmetic throughout
//! (see `sharddex-amm`).

pub mod instructions;
pub mod orderbook;
pub mod params;
pub mod pool_pair;
pub mod processor;
pub mod producer;
pub mod request;
pub mod share;
pub mod staking;
pub mod state;
pub mod storage;
pub mod trade;
pub mod v1;

pub use instructions::{Instruction, InstructionKind, InstructionStatus};
pub use orderbook::{Order, OrderFill, Orderbook};
pub use params::Params;
pub use pool_pair::PoolPairState;
pub use producer::MAX_TRADE_PATH_LENGTH;
pub use request::Request;
pub use share::{MakingVolume, OrderReward, Share};
pub use staking::{Staker, StakingPoolState};
pub use state::{BlockEnv, ProtocolVersion, State, StateV2};
pub use storage::{StateReader, StateWriter};
pub use trade::{maybe_accept_trade, track_fee, AcceptedTrade};
pub use v1::{RequestV1, StateV1};

pub use sharddex_amm::{BASE_AMPLIFIER, BPS};
