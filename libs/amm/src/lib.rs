//! # Sharddex AMM - Exact DEX Mathematics
//!
//! ## Purpose
//!
//! Pure math for the trading core: constant-product swap formulas over
//! amplified virtual reserves, the partial swap that stops exactly at a
//! resting order's rate, proportional share-grant math and the multi-tier
//! fee split. Every state-affecting computation is exact - u64 for custodied
//! amounts, arbitrary precision (`num_bigint`) for intermediate products -
//! because every validating node must reproduce results bit for bit.
//!
//! ## Integration Points
//!
//! - **Input Sources**: pool reserves and order rates supplied by the engine
//!   crate's aggregates
//! - **Output Destinations**: the state producer (tentative outcomes) and the
//!   state processor (deterministic replay) in `sharddex-engine`
//! - **Precision**: no floating point anywhere; rounding is always against
//!   the trader (floor on amounts received, ceil on amounts owed)
//!
//! Big-integer operation order (mul before div, sqrt-then-subtract) is pinned
//! and must not be "simplified": consensus requires the exact sequence, not a
//! mathematically equivalent one.

pub mod fees;
pub mod liquidity;
pub mod reserve;
pub mod safe_math;
pub mod serde_big;

use num_bigint::BigUint;
use once_cell::sync::Lazy;

pub use fees::{add_lp_fee, add_staking_and_protocol_fee, get_making_volumes, split_trading_reward};
pub use liquidity::{calculate_share_amount, calculate_virtual_amount};
pub use reserve::{
    calculate_buy_amount, calculate_amount_to_sell, OrderRate, PairChange, PairReserve, SwapStep,
};
pub use safe_math::{
    execute_op_big, execute_op_u64, mul_div_ceil_u64, mul_div_floor_u64, to_u64, Operator,
};

/// Amplifier value meaning "no amplification": virtual reserves equal real
/// reserves. Amplifiers are expressed in units of 1/10000.
pub const BASE_AMPLIFIER: u64 = 10_000;

/// Basis-point denominator for fee rates and reward ratios.
pub const BPS: u64 = 10_000;

/// Scaling base for the per-share fee accumulators. Fees are tracked as
/// `fee * BASE_LP_FEES_PER_SHARE / total_shares` so sub-unit amounts per
/// share are not lost to integer division.
pub static BASE_LP_FEES_PER_SHARE: Lazy<BigUint> = Lazy::new(|| BigUint::from(10u64).pow(18));
