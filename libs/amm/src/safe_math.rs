//! Checked arithmetic over the u64 amount domain
//!
//! State mutations are expressed as signed deltas applied with an explicit
//! [`Operator`], so the add and subtract paths share one overflow-checked
//! implementation instead of being scattered across call sites.

use num_bigint::BigUint;
use sharddex_types::ArithmeticError;

/// Direction of a reserve/share mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
}

/// Apply `delta` to `value` under `op`, failing loudly on wrap-around.
pub fn execute_op_u64(value: u64, delta: u64, op: Operator) -> Result<u64, ArithmeticError> {
    match op {
        Operator::Add => value
            .checked_add(delta)
            .ok_or(ArithmeticError::Overflow { value, delta }),
        Operator::Sub => value
            .checked_sub(delta)
            .ok_or(ArithmeticError::Underflow { value, delta }),
    }
}

/// Big-integer counterpart of [`execute_op_u64`]. Subtraction below zero is
/// an error: virtual reserves are non-negative by construction.
pub fn execute_op_big(
    value: &BigUint,
    delta: &BigUint,
    op: Operator,
) -> Result<BigUint, ArithmeticError> {
    match op {
        Operator::Add => Ok(value + delta),
        Operator::Sub => {
            if delta > value {
                Err(ArithmeticError::NegativeResult)
            } else {
                Ok(value - delta)
            }
        }
    }
}

/// Floor of `value * numerator / denominator` computed without intermediate
/// overflow, converted back into the u64 amount domain.
pub fn mul_div_floor_u64(
    value: u64,
    numerator: u64,
    denominator: u64,
) -> Result<u64, ArithmeticError> {
    if denominator == 0 {
        return Err(ArithmeticError::DivisionByZero);
    }
    let result = BigUint::from(value) * BigUint::from(numerator) / BigUint::from(denominator);
    to_u64(&result)
}

/// Ceiling counterpart of [`mul_div_floor_u64`], used where rounding must go
/// against the party paying.
pub fn mul_div_ceil_u64(
    value: u64,
    numerator: u64,
    denominator: u64,
) -> Result<u64, ArithmeticError> {
    if denominator == 0 {
        return Err(ArithmeticError::DivisionByZero);
    }
    let product = BigUint::from(value) * BigUint::from(numerator);
    let denominator = BigUint::from(denominator);
    let result = (product + &denominator - BigUint::from(1u64)) / denominator;
    to_u64(&result)
}

/// Convert a big integer back into the u64 amount domain.
pub fn to_u64(value: &BigUint) -> Result<u64, ArithmeticError> {
    u64::try_from(value).map_err(|_| ArithmeticError::AmountOutOfRange)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_ops_check_bounds() {
        assert_eq!(execute_op_u64(5, 3, Operator::Add).unwrap(), 8);
        assert_eq!(execute_op_u64(5, 3, Operator::Sub).unwrap(), 2);
        assert_eq!(
            execute_op_u64(u64::MAX, 1, Operator::Add).unwrap_err(),
            ArithmeticError::Overflow { value: u64::MAX, delta: 1 }
        );
        assert_eq!(
            execute_op_u64(2, 3, Operator::Sub).unwrap_err(),
            ArithmeticError::Underflow { value: 2, delta: 3 }
        );
    }

    #[test]
    fn big_sub_rejects_negative() {
        let a = BigUint::from(10u64);
        let b = BigUint::from(11u64);
        assert_eq!(
            execute_op_big(&a, &b, Operator::Sub).unwrap_err(),
            ArithmeticError::NegativeResult
        );
        assert_eq!(execute_op_big(&b, &a, Operator::Sub).unwrap(), BigUint::from(1u64));
    }

    #[test]
    fn mul_div_ceil_rounds_up() {
        assert_eq!(mul_div_ceil_u64(7, 3, 2).unwrap(), 11); // ceil(21/2)
        assert_eq!(mul_div_ceil_u64(6, 3, 2).unwrap(), 9); // exact
        assert_eq!(
            mul_div_ceil_u64(1, 1, 0).unwrap_err(),
            ArithmeticError::DivisionByZero
        );
    }

    #[test]
    fn mul_div_floor_avoids_intermediate_overflow() {
        // u64::MAX * 3 overflows u64 but not the big-int intermediate.
        assert_eq!(mul_div_floor_u64(u64::MAX, 3, 3).unwrap(), u64::MAX);
        assert_eq!(mul_div_floor_u64(7, 3, 2).unwrap(), 10); // floor(21/2)
        assert_eq!(
            mul_div_floor_u64(1, 1, 0).unwrap_err(),
            ArithmeticError::DivisionByZero
        );
        assert_eq!(
            mul_div_floor_u64(u64::MAX, 2, 1).unwrap_err(),
            ArithmeticError::AmountOutOfRange
        );
    }
}
