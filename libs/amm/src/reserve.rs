//! Pool pair reserves and constant-product swap math
//!
//! [`PairReserve`] is the pricing view of one trading pair: real custodied
//! balances in u64 plus amplified virtual balances as big integers. All swap
//! formulas price against the virtual amounts while solvency checks run
//! against the real amounts.

use std::fmt;

use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Roots;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};
use sharddex_types::{ArithmeticError, SwapError, TokenId, TradeDirection};

use crate::safe_math::{execute_op_big, execute_op_u64, to_u64, Operator};
use crate::BASE_AMPLIFIER;

/// Reserve state of one pool pair. Token ids are canonically ordered
/// (`token0_id < token1_id`); the invariant `virtual >= real` holds per side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairReserve {
    pub token0_id: TokenId,
    pub token1_id: TokenId,
    pub share_amount: u64,
    pub token0_real: u64,
    pub token1_real: u64,
    #[serde(with = "crate::serde_big::biguint")]
    pub token0_virtual: BigUint,
    #[serde(with = "crate::serde_big::biguint")]
    pub token1_virtual: BigUint,
    pub amplifier: u64,
}

/// Signed reserve delta of one trade step, from the pool's perspective:
/// positive means the pool (or order) received that token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PairChange {
    pub token0: BigInt,
    pub token1: BigInt,
}

/// Result of one partial swap against the curve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapStep {
    /// Amount of the bought token produced by this step.
    pub buy_amount: u64,
    /// Portion of the input that the curve could not absorb before reaching
    /// the order rate; it is matched against the order next.
    pub sell_remain: u64,
    /// Reserve delta already applied to the pair.
    pub change: PairChange,
}

/// The fixed exchange rate of a resting order, as seen by the swap solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderRate {
    pub direction: TradeDirection,
    pub token0_rate: u64,
    pub token1_rate: u64,
}

impl PairChange {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.token0.is_zero() && self.token1.is_zero()
    }

    /// Delta where the pool receives `sold` and pays out `bought`.
    pub fn from_fill(direction: TradeDirection, sold: u64, bought: u64) -> Self {
        match direction {
            TradeDirection::Sell0 => Self {
                token0: BigInt::from(sold),
                token1: -BigInt::from(bought),
            },
            TradeDirection::Sell1 => Self {
                token0: -BigInt::from(bought),
                token1: BigInt::from(sold),
            },
        }
    }

    pub fn accumulate(&mut self, other: &PairChange) {
        self.token0 += &other.token0;
        self.token1 += &other.token1;
    }
}

// Decimal strings on the wire; BigInt has no canonical serde shape of its own.
impl Serialize for PairChange {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Shadow<'a> {
            token0: &'a str,
            token1: &'a str,
        }
        let t0 = self.token0.to_string();
        let t1 = self.token1.to_string();
        Shadow { token0: &t0, token1: &t1 }.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PairChange {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as DeError;
        #[derive(Deserialize)]
        struct Shadow {
            token0: String,
            token1: String,
        }
        let shadow = Shadow::deserialize(deserializer)?;
        let parse = |raw: &str| {
            raw.parse::<BigInt>()
                .map_err(|_| D::Error::custom(format!("invalid big integer '{raw}'")))
        };
        Ok(PairChange {
            token0: parse(&shadow.token0)?,
            token1: parse(&shadow.token1)?,
        })
    }
}

impl fmt::Display for PairChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.token0, self.token1)
    }
}

/// Output of a constant-product swap: `floor(dx * y_v / (dx + x_v))`.
///
/// Fails when either real reserve is empty or the result leaves the u64
/// amount domain. Fees must be deducted before calling.
pub fn calculate_buy_amount(
    sell_amount: u64,
    real_in: u64,
    real_out: u64,
    virtual_in: &BigUint,
    virtual_out: &BigUint,
) -> Result<u64, SwapError> {
    if real_in == 0 || real_out == 0 {
        return Err(SwapError::InsufficientLiquidity);
    }
    let dx = BigUint::from(sell_amount);
    let numerator = &dx * virtual_out;
    let denominator = &dx + virtual_in;
    if denominator.is_zero() {
        return Err(ArithmeticError::DivisionByZero.into());
    }
    Ok(to_u64(&(numerator / denominator))?)
}

/// Inverse of [`calculate_buy_amount`]: the input needed for a desired
/// output, `ceil(x_v * dy / (y_v - dy))`, rounding up so the trader never
/// underpays.
pub fn calculate_amount_to_sell(
    buy_amount: u64,
    real_in: u64,
    real_out: u64,
    virtual_in: &BigUint,
    virtual_out: &BigUint,
) -> Result<u64, SwapError> {
    if real_in == 0 || real_out == 0 {
        return Err(SwapError::InsufficientLiquidity);
    }
    let dy = BigUint::from(buy_amount);
    if dy >= *virtual_out {
        return Err(SwapError::InsufficientLiquidity);
    }
    let numerator = virtual_in * &dy;
    let denominator = virtual_out - &dy;
    let result = (&numerator + &denominator - BigUint::from(1u64)) / denominator;
    Ok(to_u64(&result)?)
}

impl PairReserve {
    pub fn has_insufficient_liquidity(&self) -> bool {
        self.token0_real == 0 || self.token1_real == 0
    }

    /// Output amount for selling into the pool in `direction`.
    pub fn buy_amount(&self, sell_amount: u64, direction: TradeDirection) -> Result<u64, SwapError> {
        match direction {
            TradeDirection::Sell0 => calculate_buy_amount(
                sell_amount,
                self.token0_real,
                self.token1_real,
                &self.token0_virtual,
                &self.token1_virtual,
            ),
            TradeDirection::Sell1 => calculate_buy_amount(
                sell_amount,
                self.token1_real,
                self.token0_real,
                &self.token1_virtual,
                &self.token0_virtual,
            ),
        }
    }

    /// Input amount required to buy `buy_amount` in `direction`.
    pub fn amount_to_sell(&self, buy_amount: u64, direction: TradeDirection) -> Result<u64, SwapError> {
        match direction {
            TradeDirection::Sell0 => calculate_amount_to_sell(
                buy_amount,
                self.token0_real,
                self.token1_real,
                &self.token0_virtual,
                &self.token1_virtual,
            ),
            TradeDirection::Sell1 => calculate_amount_to_sell(
                buy_amount,
                self.token1_real,
                self.token0_real,
                &self.token1_virtual,
                &self.token0_virtual,
            ),
        }
    }

    /// Partial swap using pool liquidity only, bounded so the pool price does
    /// not cross `order`'s rate.
    ///
    /// With no order present the full amount swaps in the pool. Otherwise the
    /// bound is `dx = sqrt(L * x_ord / y_ord) - x_v` with `L = x_v * y_v`;
    /// whatever the curve cannot absorb is returned in `sell_remain` for the
    /// caller to match against the order at its fixed rate.
    pub fn swap_to_reach_order_rate(
        &mut self,
        max_sell_after_fee: u64,
        direction: TradeDirection,
        order: Option<&OrderRate>,
    ) -> Result<SwapStep, SwapError> {
        if self.has_insufficient_liquidity() {
            return Err(SwapError::InsufficientLiquidity);
        }

        // x is the selling side, y the buying side.
        let (x_virtual, y_virtual) = match direction {
            TradeDirection::Sell0 => (&self.token0_virtual, &self.token1_virtual),
            TradeDirection::Sell1 => (&self.token1_virtual, &self.token0_virtual),
        };

        let target_delta_x = match order {
            None => None,
            Some(ord) => {
                if ord.direction == direction {
                    return Err(SwapError::SameDirectionMatch);
                }
                let (x_rate, y_rate) = match direction {
                    TradeDirection::Sell0 => (ord.token0_rate, ord.token1_rate),
                    TradeDirection::Sell1 => (ord.token1_rate, ord.token0_rate),
                };
                if y_rate == 0 {
                    return Err(ArithmeticError::DivisionByZero.into());
                }
                // Operation order is part of consensus: mul, div, sqrt, sub.
                let invariant = x_virtual * y_virtual;
                let scaled = invariant * BigUint::from(x_rate) / BigUint::from(y_rate);
                let root = scaled.sqrt();
                Some(BigInt::from(root) - BigInt::from(x_virtual.clone()))
            }
        };

        let max_delta_x = BigInt::from(max_sell_after_fee);
        let (final_sell_amount, sell_remain, reached_order) = match &target_delta_x {
            // No order ahead, or the order rate lies beyond what this input
            // can move the price: trade fully in the pool.
            Some(target) if *target < max_delta_x => {
                if !target.is_positive() {
                    // Pool price already at or past the order rate.
                    return Ok(SwapStep {
                        buy_amount: 0,
                        sell_remain: max_sell_after_fee,
                        change: PairChange::zero(),
                    });
                }
                // 0 < target < max_delta_x, so the conversion cannot fail.
                let partial = u64::try_from(target).map_err(|_| ArithmeticError::AmountOutOfRange)?;
                (partial, max_sell_after_fee - partial, true)
            }
            _ => (max_sell_after_fee, 0, false),
        };

        let buy_amount = self.buy_amount(final_sell_amount, direction)?;
        if reached_order && buy_amount == 0 {
            // Pool price close enough to the order rate that the remaining
            // curve segment yields nothing.
            return Ok(SwapStep {
                buy_amount: 0,
                sell_remain: max_sell_after_fee,
                change: PairChange::zero(),
            });
        }

        let change = PairChange::from_fill(direction, final_sell_amount, buy_amount);
        self.apply_reserve_changes(&change)?;

        Ok(SwapStep { buy_amount, sell_remain, change })
    }

    /// Apply a signed reserve delta to both real and virtual amounts.
    ///
    /// The two sides must move in opposite directions (or both be zero), and
    /// real reserves must stay inside the u64 amount domain.
    pub fn apply_reserve_changes(&mut self, change: &PairChange) -> Result<(), SwapError> {
        let sign_product = sign_of(&change.token0) * sign_of(&change.token1);
        if sign_product >= 0 && !change.is_zero() {
            return Err(SwapError::InvalidReserveChange {
                change0: change.token0.to_string(),
                change1: change.token1.to_string(),
            });
        }

        let new_real0 = checked_real(self.token0_real, &change.token0)?;
        let new_virtual0 = checked_virtual(&self.token0_virtual, &change.token0)?;
        let new_real1 = checked_real(self.token1_real, &change.token1)?;
        let new_virtual1 = checked_virtual(&self.token1_virtual, &change.token1)?;

        self.token0_real = new_real0;
        self.token0_virtual = new_virtual0;
        self.token1_real = new_real1;
        self.token1_virtual = new_virtual1;
        Ok(())
    }

    /// Apply a liquidity delta to reserves (contribution or withdrawal).
    ///
    /// With the base amplifier the virtual deltas equal the real deltas.
    /// Otherwise each virtual amount is rescaled by the share-count change
    /// `(S +/- share_amount) / S` - big-int multiply before divide - and
    /// floored, but never below the new real amount.
    pub fn update_reserve_data(
        &mut self,
        amount0: u64,
        amount1: u64,
        share_amount: u64,
        op: Operator,
    ) -> Result<(), ArithmeticError> {
        let new0 = self.updated_single_side(
            self.token0_real,
            &self.token0_virtual,
            amount0,
            share_amount,
            op,
        )?;
        let new1 = self.updated_single_side(
            self.token1_real,
            &self.token1_virtual,
            amount1,
            share_amount,
            op,
        )?;
        (self.token0_real, self.token0_virtual) = new0;
        (self.token1_real, self.token1_virtual) = new1;
        Ok(())
    }

    fn updated_single_side(
        &self,
        real: u64,
        virtual_amount: &BigUint,
        amount: u64,
        share_amount: u64,
        op: Operator,
    ) -> Result<(u64, BigUint), ArithmeticError> {
        let new_share_amount = execute_op_u64(self.share_amount, share_amount, op)?;
        let new_real = execute_op_u64(real, amount, op)?;
        let new_virtual = if self.amplifier != BASE_AMPLIFIER {
            if self.share_amount == 0 {
                return Err(ArithmeticError::DivisionByZero);
            }
            let scaled = virtual_amount * BigUint::from(new_share_amount)
                / BigUint::from(self.share_amount);
            scaled.max(BigUint::from(new_real))
        } else {
            execute_op_big(virtual_amount, &BigUint::from(amount), op)?
        };
        Ok((new_real, new_virtual))
    }
}

fn sign_of(value: &BigInt) -> i8 {
    match value.sign() {
        Sign::Minus => -1,
        Sign::NoSign => 0,
        Sign::Plus => 1,
    }
}

fn checked_real(real: u64, change: &BigInt) -> Result<u64, SwapError> {
    let next = BigInt::from(real) + change;
    if next.is_negative() {
        return Err(SwapError::InsufficientLiquidity);
    }
    u64::try_from(next).map_err(|_| SwapError::Arithmetic(ArithmeticError::AmountOutOfRange))
}

fn checked_virtual(virtual_amount: &BigUint, change: &BigInt) -> Result<BigUint, SwapError> {
    let next = BigInt::from(virtual_amount.clone()) + change;
    BigUint::try_from(next).map_err(|_| SwapError::Arithmetic(ArithmeticError::NegativeResult))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(real0: u64, real1: u64, virt0: u64, virt1: u64, shares: u64, amp: u64) -> PairReserve {
        PairReserve {
            token0_id: TokenId::from_tag("123"),
            token1_id: TokenId::from_tag("456"),
            share_amount: shares,
            token0_real: real0,
            token1_real: real1,
            token0_virtual: BigUint::from(virt0),
            token1_virtual: BigUint::from(virt1),
            amplifier: amp,
        }
    }

    #[test]
    fn buy_amount_floors() {
        // floor(50 * 800 / (50 + 200)) = 160
        let p = pair(100, 400, 200, 800, 200, 20_000);
        assert_eq!(p.buy_amount(50, TradeDirection::Sell0).unwrap(), 160);
    }

    #[test]
    fn buy_amount_requires_liquidity() {
        let p = pair(0, 400, 200, 800, 200, 20_000);
        assert_eq!(
            p.buy_amount(50, TradeDirection::Sell0).unwrap_err(),
            SwapError::InsufficientLiquidity
        );
    }

    #[test]
    fn amount_to_sell_ceils() {
        let p = pair(100, 400, 200, 800, 200, 20_000);
        // Selling the computed input must yield at least the requested output.
        let needed = p.amount_to_sell(160, TradeDirection::Sell0).unwrap();
        assert!(p.buy_amount(needed, TradeDirection::Sell0).unwrap() >= 160);
        // And one unit less must not.
        assert!(p.buy_amount(needed - 1, TradeDirection::Sell0).unwrap() < 160);
    }

    #[test]
    fn amount_to_sell_rejects_draining_virtual_reserve() {
        let p = pair(100, 400, 200, 800, 200, 20_000);
        assert_eq!(
            p.amount_to_sell(800, TradeDirection::Sell0).unwrap_err(),
            SwapError::InsufficientLiquidity
        );
    }

    #[test]
    fn swap_without_order_consumes_all_input() {
        let mut p = pair(100, 400, 200, 800, 200, 20_000);
        let step = p
            .swap_to_reach_order_rate(50, TradeDirection::Sell0, None)
            .unwrap();
        assert_eq!(step.buy_amount, 160);
        assert_eq!(step.sell_remain, 0);
        assert_eq!(p.token0_real, 150);
        assert_eq!(p.token1_real, 240);
        assert_eq!(p.token0_virtual, BigUint::from(250u64));
        assert_eq!(p.token1_virtual, BigUint::from(640u64));
    }

    #[test]
    fn swap_preserves_constant_product() {
        let mut p = pair(100, 400, 200, 800, 200, 20_000);
        let before = &p.token0_virtual * &p.token1_virtual;
        p.swap_to_reach_order_rate(37, TradeDirection::Sell0, None)
            .unwrap();
        let after = &p.token0_virtual * &p.token1_virtual;
        assert!(after >= before, "product decreased: {before} -> {after}");
    }

    #[test]
    fn swap_stops_at_order_rate() {
        // Pool price starts at 800/200 = 4 token1 per token0. A resting sell1
        // order at rate 1:2 halts the swap once the pool reaches 2.
        let mut p = pair(100, 400, 200, 800, 200, 20_000);
        let order = OrderRate {
            direction: TradeDirection::Sell1,
            token0_rate: 1,
            token1_rate: 2,
        };
        let step = p
            .swap_to_reach_order_rate(1_000, TradeDirection::Sell0, Some(&order))
            .unwrap();
        // target dx = sqrt(200*800*1/2) - 200 = sqrt(80000) - 200 = 82
        assert_eq!(step.sell_remain, 1_000 - 82);
        let expected_buy = calculate_buy_amount(
            82,
            100,
            400,
            &BigUint::from(200u64),
            &BigUint::from(800u64),
        )
        .unwrap();
        assert_eq!(step.buy_amount, expected_buy);
        // Marginal pool price is now at (or just under) the order rate.
        let price_num = p.token1_virtual.clone();
        let price_den = p.token0_virtual.clone();
        assert!(price_num * BigUint::from(1u64) <= price_den.clone() * BigUint::from(2u64) + price_den);
    }

    #[test]
    fn swap_exits_when_price_already_past_order() {
        // Pool price 4; an order at rate 1:8 is better than the pool can
        // ever offer, so nothing swaps and everything remains for the order.
        let mut p = pair(100, 400, 200, 800, 200, 20_000);
        let order = OrderRate {
            direction: TradeDirection::Sell1,
            token0_rate: 1,
            token1_rate: 8,
        };
        let step = p
            .swap_to_reach_order_rate(500, TradeDirection::Sell0, Some(&order))
            .unwrap();
        assert_eq!(step.buy_amount, 0);
        assert_eq!(step.sell_remain, 500);
        assert!(step.change.is_zero());
        assert_eq!(p, pair(100, 400, 200, 800, 200, 20_000));
    }

    #[test]
    fn same_direction_order_is_rejected() {
        let mut p = pair(100, 400, 200, 800, 200, 20_000);
        let order = OrderRate {
            direction: TradeDirection::Sell0,
            token0_rate: 1,
            token1_rate: 2,
        };
        assert_eq!(
            p.swap_to_reach_order_rate(10, TradeDirection::Sell0, Some(&order))
                .unwrap_err(),
            SwapError::SameDirectionMatch
        );
    }

    #[test]
    fn apply_reserve_changes_rejects_same_sign() {
        let mut p = pair(100, 400, 200, 800, 200, 20_000);
        let bad = PairChange { token0: BigInt::from(5), token1: BigInt::from(5) };
        assert!(matches!(
            p.apply_reserve_changes(&bad).unwrap_err(),
            SwapError::InvalidReserveChange { .. }
        ));
    }

    #[test]
    fn apply_reserve_changes_guards_real_balance() {
        let mut p = pair(100, 400, 200, 800, 200, 20_000);
        let drain = PairChange {
            token0: BigInt::from(10),
            token1: BigInt::from(-401),
        };
        assert_eq!(
            p.apply_reserve_changes(&drain).unwrap_err(),
            SwapError::InsufficientLiquidity
        );
    }

    #[test]
    fn update_reserve_data_base_amplifier_moves_virtual_by_real_delta() {
        let mut p = pair(100, 400, 100, 400, 200, BASE_AMPLIFIER);
        p.update_reserve_data(50, 200, 100, Operator::Add).unwrap();
        assert_eq!(p.token0_real, 150);
        assert_eq!(p.token1_real, 600);
        assert_eq!(p.token0_virtual, BigUint::from(150u64));
        assert_eq!(p.token1_virtual, BigUint::from(600u64));
    }

    #[test]
    fn update_reserve_data_amplified_rescales_by_share_ratio() {
        let mut p = pair(100, 400, 200, 800, 200, 20_000);
        p.update_reserve_data(50, 200, 100, Operator::Add).unwrap();
        assert_eq!(p.token0_real, 150);
        assert_eq!(p.token1_real, 600);
        // virtual * (200 + 100) / 200
        assert_eq!(p.token0_virtual, BigUint::from(300u64));
        assert_eq!(p.token1_virtual, BigUint::from(1_200u64));
    }

    #[test]
    fn update_reserve_data_rejects_underflow() {
        let mut p = pair(100, 400, 200, 800, 200, 20_000);
        assert_eq!(
            p.update_reserve_data(101, 0, 10, Operator::Sub).unwrap_err(),
            ArithmeticError::Underflow { value: 100, delta: 101 }
        );
    }

    #[test]
    fn pair_change_serde_round_trip() {
        let change = PairChange {
            token0: BigInt::from(-12345),
            token1: BigInt::from(67890),
        };
        let json = serde_json::to_string(&change).unwrap();
        assert!(json.contains("-12345"));
        let back: PairChange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, change);
    }
}
