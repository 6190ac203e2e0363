//! # Sharddex Types - Typed Identifiers and Error Taxonomy
//!
//! ## Purpose
//!
//! Foundation crate for the Sharddex trading core. Provides type-safe wrappers
//! for every identifier the exchange state is keyed by (tokens, pool pairs,
//! access NFTs, orders, transactions) plus the shared error taxonomy used by
//! the math and engine crates.
//!
//! ## Design Notes
//!
//! - Identifiers are newtypes, never raw strings or byte arrays, so pool ids
//!   cannot be confused with token ids at compile time.
//! - Token ordering inside a pair is canonical (lexicographic by id bytes);
//!   [`PairKey::new`] enforces it at construction.
//! - Share lookups use the composite [`ShareKey`] instead of concatenated
//!   string keys, eliminating prefix-collision bugs.
//! - All errors are explicit `thiserror` values; none of the core paths panic.

pub mod direction;
pub mod errors;
pub mod identifiers;

pub use direction::TradeDirection;
pub use errors::{
    ArithmeticError, ContributionError, LiquidityError, OrderError, ParamsError, ProcessError,
    StakingError, SwapError,
};
pub use identifiers::{AccessId, OrderId, PairKey, PoolPairId, ShareKey, TokenId, TxId};
