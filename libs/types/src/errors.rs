//! Error taxonomy for the trading core
//!
//! Two families exist, mirroring how failures propagate through the block
//! pipeline:
//!
//! - Refundable business failures ([`SwapError`], [`ContributionError`],
//!   [`OrderError`], [`LiquidityError`], [`StakingError`], [`ParamsError`]).
//!   The producer converts these into refund/reject instructions; they never
//!   abort a block.
//! - Fatal failures ([`ProcessError`]). Malformed instructions or a
//!   producer/processor divergence abort processing of the whole block.

use thiserror::Error;

/// Failures while parsing a typed identifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("invalid hex identifier: '{input}'")]
    InvalidHex { input: String },

    #[error("identifier length {actual} does not match expected {expected}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Exact-arithmetic failures in the u64 amount domain.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArithmeticError {
    #[error("u64 overflow adding {delta} to {value}")]
    Overflow { value: u64, delta: u64 },

    #[error("u64 underflow subtracting {delta} from {value}")]
    Underflow { value: u64, delta: u64 },

    #[error("big integer result would be negative")]
    NegativeResult,

    #[error("division by zero")]
    DivisionByZero,

    #[error("result does not fit the u64 amount domain")]
    AmountOutOfRange,
}

/// Refundable failures while evaluating a trade against pools and orders.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SwapError {
    #[error("no liquidity in pool for swap")]
    InsufficientLiquidity,

    #[error("cannot match trade with order of same direction")]
    SameDirectionMatch,

    #[error("trade path, directions and orderbooks have mismatched lengths")]
    PathMismatch,

    #[error("trade input {amount} insufficient for trading fee {fee}")]
    FeeExceedsInput { amount: u64, fee: u64 },

    #[error("unknown pool pair '{0}' in trade path")]
    UnknownPoolPair(String),

    #[error("token being sold does not belong to pool pair '{0}'")]
    TokenNotInPair(String),

    #[error("min acceptable amount {min} not reached - trade output {actual}")]
    MinAmountNotReached { min: u64, actual: u64 },

    #[error("invalid signs for reserve changes {change0}, {change1}")]
    InvalidReserveChange { change0: String, change1: String },

    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),
}

/// Refundable failures while matching a two-sided liquidity contribution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContributionError {
    #[error("pool is invalid to contribute")]
    InvalidPool,

    #[error("matched contribution resolves to zero on one side")]
    DegenerateMatch,

    #[error("contributions disagree on pool id or amplifier")]
    MismatchedSides,

    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),
}

/// Refundable failures for limit-order placement and withdrawal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("unknown order id '{0}'")]
    UnknownOrder(String),

    #[error("order '{0}' is not owned by the requesting identity")]
    NotOwner(String),

    #[error("order rate must be non-zero on both sides")]
    ZeroRate,

    #[error("order count {count} for identity reached the cap {cap}")]
    TooManyOrders { count: usize, cap: usize },

    #[error("requested withdrawal token is not part of the order's pair")]
    TokenNotInPair,

    #[error("order balance {balance} below requested withdrawal {requested}")]
    BalanceTooLow { balance: u64, requested: u64 },

    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),
}

/// Refundable failures for share withdrawal and LP-fee claims.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LiquidityError {
    #[error("no share recorded for the requesting identity")]
    UnknownProvider,

    #[error("share amount to withdraw is zero")]
    ZeroShareWithdrawal,

    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),
}

/// Refundable failures for staking pool operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StakingError {
    #[error("unknown staking pool '{0}'")]
    UnknownPool(String),

    #[error("no stake recorded for the requesting identity")]
    UnknownStaker,

    #[error("staked liquidity {liquidity} below requested amount {requested}")]
    LiquidityTooLow { liquidity: u64, requested: u64 },

    #[error("staking amount is zero")]
    ZeroAmount,

    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),
}

/// Rejection reasons for a governance params replacement.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParamsError {
    #[error("fee rate {rate} bps exceeds cap {cap} bps")]
    FeeRateTooHigh { rate: u64, cap: u64 },

    #[error("{name} percent {value} exceeds 100")]
    PercentOutOfRange { name: &'static str, value: u64 },

    #[error("protocol and staking percents sum to {sum}, above 100")]
    SplitOverflow { sum: u64 },

    #[error("params reference unknown pool pair '{0}'")]
    UnknownPoolPair(String),

    #[error("params reference unknown staking pool '{0}'")]
    UnknownStakingPool(String),
}

/// Fatal failures while replaying instructions. Any of these aborts the
/// block: they mean the instruction stream is corrupt or the producer and
/// processor disagree, which is a protocol bug rather than a user error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("instruction has {actual} fields, expected {expected}")]
    WrongFieldCount { expected: usize, actual: usize },

    #[error("unknown instruction kind tag '{0}'")]
    UnknownKind(String),

    #[error("unknown instruction status '{0}'")]
    UnknownStatus(String),

    #[error("undecodable instruction content: {0}")]
    Content(String),

    #[error("instruction references unknown pool pair '{0}'")]
    UnknownPoolPair(String),

    #[error("instruction references unknown staking pool '{0}'")]
    UnknownStakingPool(String),

    #[error("producer/processor divergence: {0}")]
    Divergence(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = SwapError::MinAmountNotReached { min: 10, actual: 7 };
        assert!(err.to_string().contains("10"));
        assert!(err.to_string().contains('7'));

        let err = ArithmeticError::Underflow { value: 1, delta: 2 };
        assert_eq!(err.to_string(), "u64 underflow subtracting 2 from 1");
    }

    #[test]
    fn arithmetic_converts_into_swap_error() {
        fn inner() -> Result<(), SwapError> {
            Err(ArithmeticError::DivisionByZero)?
        }
        assert_eq!(
            inner().unwrap_err(),
            SwapError::Arithmetic(ArithmeticError::DivisionByZero)
        );
    }
}
