//! Share-grant and virtual-reserve math for liquidity contributions.

use num_bigint::BigUint;
use sharddex_types::ArithmeticError;

use crate::safe_math::to_u64;
use crate::BASE_AMPLIFIER;

/// Virtual reserves for a fresh pool: real amounts inflated by
/// `amplifier / BASE_AMPLIFIER` (multiply before divide, floored).
pub fn calculate_virtual_amount(amount0: u64, amount1: u64, amplifier: u64) -> (BigUint, BigUint) {
    if amplifier == BASE_AMPLIFIER {
        return (BigUint::from(amount0), BigUint::from(amount1));
    }
    let scale = |amount: u64| {
        BigUint::from(amount) * BigUint::from(amplifier) / BigUint::from(BASE_AMPLIFIER)
    };
    (scale(amount0), scale(amount1))
}

/// Shares granted for contributing `(amount0, amount1)` to a pool holding
/// `(real0, real1)` with `total_share` outstanding.
///
/// A virgin pool seeds shares equal to the token0 contribution. Otherwise the
/// grant is `min(amount0 * S / real0, amount1 * S / real1)`, floored, so a
/// contribution never mints more shares than the value backing it.
pub fn calculate_share_amount(
    real0: u64,
    real1: u64,
    amount0: u64,
    amount1: u64,
    total_share: u64,
) -> Result<u64, ArithmeticError> {
    if total_share == 0 {
        return Ok(amount0);
    }
    if real0 == 0 || real1 == 0 {
        return Err(ArithmeticError::DivisionByZero);
    }
    let shares = BigUint::from(total_share);
    let by_token0 = BigUint::from(amount0) * &shares / BigUint::from(real0);
    let by_token1 = BigUint::from(amount1) * &shares / BigUint::from(real1);
    to_u64(&by_token0.min(by_token1))
}
