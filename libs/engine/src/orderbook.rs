//! Price-ordered limit order book for one pool pair
//!
//! Orders rest in a single list sorted ascending by `token1_rate /
//! token0_rate` (compared by cross-multiplication, never division). The two
//! trade directions consume the book from opposite ends: an incoming sell of
//! token1 walks from the front (cheapest token0 sellers first), an incoming
//! sell of token0 walks from the back (best-paying token1 sellers first).
//! The tie-break on insertion is asymmetric for the same reason - sell0
//! orders go after their equal-rate peers, sell1 orders before - so both
//! scans see equal-rate orders in arrival order.

use num_bigint::BigInt;
use num_traits::Signed;
use serde::{Deserialize, Serialize};
use sharddex_amm::reserve::{OrderRate, PairChange};
use sharddex_amm::safe_math::{mul_div_ceil_u64, mul_div_floor_u64};
use sharddex_types::{AccessId, ArithmeticError, OrderId, SwapError, TradeDirection};

/// A resting limit order. `direction` is the side the maker sells;
/// `token0_rate : token1_rate` is its fixed exchange rate. Balances track
/// what remains sellable and what has been received so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub access_id: AccessId,
    pub direction: TradeDirection,
    pub token0_rate: u64,
    pub token1_rate: u64,
    pub token0_balance: u64,
    pub token1_balance: u64,
}

/// Outcome of matching an incoming trade amount against one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFill {
    pub buy_amount: u64,
    pub sell_remain: u64,
    /// Balance delta applied to the order (positive = order received).
    pub change: PairChange,
}

impl Order {
    pub fn rate(&self) -> OrderRate {
        OrderRate {
            direction: self.direction,
            token0_rate: self.token0_rate,
            token1_rate: self.token1_rate,
        }
    }

    /// Whether an incoming trade in `incoming` direction can take from this
    /// order: directions must oppose and the maker's sell side must still
    /// hold balance.
    pub fn can_match(&self, incoming: TradeDirection) -> bool {
        if self.direction == incoming {
            return false;
        }
        match self.direction {
            TradeDirection::Sell0 => self.token0_balance > 0,
            TradeDirection::Sell1 => self.token1_balance > 0,
        }
    }

    /// What the incoming trader receives for selling `sell_amount`, floored.
    fn buy_amount(&self, sell_amount: u64, incoming: TradeDirection) -> Result<u64, ArithmeticError> {
        match incoming {
            TradeDirection::Sell0 => mul_div_floor_u64(sell_amount, self.token1_rate, self.token0_rate),
            TradeDirection::Sell1 => mul_div_floor_u64(sell_amount, self.token0_rate, self.token1_rate),
        }
    }

    /// What the incoming trader must pay for `buy_amount`, rounded up.
    fn amount_to_sell(&self, buy_amount: u64, incoming: TradeDirection) -> Result<u64, ArithmeticError> {
        match incoming {
            TradeDirection::Sell0 => mul_div_ceil_u64(buy_amount, self.token0_rate, self.token1_rate),
            TradeDirection::Sell1 => mul_div_ceil_u64(buy_amount, self.token1_rate, self.token0_rate),
        }
    }

    /// Match up to `max_sell` of an incoming trade at this order's fixed
    /// rate. Fills the order completely when the incoming amount covers its
    /// remaining balance; otherwise fills partially with floor rounding.
    pub fn match_incoming(
        &mut self,
        max_sell: u64,
        incoming: TradeDirection,
    ) -> Result<OrderFill, SwapError> {
        if self.direction == incoming {
            return Err(SwapError::SameDirectionMatch);
        }
        let max_buying = match incoming {
            TradeDirection::Sell0 => self.token1_balance,
            TradeDirection::Sell1 => self.token0_balance,
        };
        let max_amount_to_sell = self.amount_to_sell(max_buying, incoming)?;

        let (sell_used, buy_amount) = if max_sell >= max_amount_to_sell {
            (max_amount_to_sell, max_buying)
        } else {
            (max_sell, self.buy_amount(max_sell, incoming)?)
        };

        let change = PairChange::from_fill(incoming, sell_used, buy_amount);
        self.apply_balance_changes(&change)?;

        Ok(OrderFill {
            buy_amount,
            sell_remain: max_sell - sell_used,
            change,
        })
    }

    /// Apply a balance delta, enforcing that it moves the order the only way
    /// its direction allows (a sell0 order only loses token0 and gains
    /// token1) and that balances stay in the u64 domain.
    pub fn apply_balance_changes(&mut self, change: &PairChange) -> Result<(), SwapError> {
        let legal = match self.direction {
            TradeDirection::Sell0 => !change.token0.is_positive() && !change.token1.is_negative(),
            TradeDirection::Sell1 => !change.token1.is_positive() && !change.token0.is_negative(),
        };
        if !legal {
            return Err(SwapError::InvalidReserveChange {
                change0: change.token0.to_string(),
                change1: change.token1.to_string(),
            });
        }
        self.token0_balance = applied_balance(self.token0_balance, &change.token0)?;
        self.token1_balance = applied_balance(self.token1_balance, &change.token1)?;
        Ok(())
    }

    pub fn is_depleted(&self) -> bool {
        self.token0_balance == 0 && self.token1_balance == 0
    }
}

fn applied_balance(balance: u64, change: &BigInt) -> Result<u64, SwapError> {
    let next = BigInt::from(balance) + change;
    u64::try_from(next).map_err(|_| SwapError::Arithmetic(ArithmeticError::AmountOutOfRange))
}

/// The pair's resting orders, kept sorted ascending by rate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Orderbook {
    orders: Vec<Order>,
}

impl Orderbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Insert keeping the ascending rate order. Equal-rate sell0 orders land
    /// after their peers and sell1 orders before, so each direction's scan
    /// end sees arrivals in FIFO order.
    pub fn insert_order(&mut self, order: Order) {
        let index = self.orders.partition_point(|existing| {
            // existing.rate vs order.rate by cross-multiplication; the u128
            // products are exact for u64 rates.
            let existing_rate = existing.token1_rate as u128 * order.token0_rate as u128;
            let new_rate = order.token1_rate as u128 * existing.token0_rate as u128;
            match order.direction {
                TradeDirection::Sell0 => existing_rate <= new_rate,
                TradeDirection::Sell1 => existing_rate < new_rate,
            }
        });
        self.orders.insert(index, order);
    }

    /// Index of the next matchable order for an incoming trade, or `None`
    /// when the book holds nothing on the opposite side. Not finding an
    /// order is a normal outcome, never an error.
    pub fn next_order_index(&self, incoming: TradeDirection) -> Option<usize> {
        match incoming {
            // Selling token0 buys from the best-paying token1 sellers, which
            // sit at the high-rate end of the list.
            TradeDirection::Sell0 => (0..self.orders.len())
                .rev()
                .find(|&i| self.orders[i].can_match(incoming)),
            TradeDirection::Sell1 => {
                (0..self.orders.len()).find(|&i| self.orders[i].can_match(incoming))
            }
        }
    }

    pub fn order(&self, id: &OrderId) -> Option<&Order> {
        self.orders.iter().find(|order| order.id == *id)
    }

    pub fn order_mut(&mut self, id: &OrderId) -> Option<&mut Order> {
        self.orders.iter_mut().find(|order| order.id == *id)
    }

    pub fn order_at_mut(&mut self, index: usize) -> &mut Order {
        &mut self.orders[index]
    }

    pub fn remove_order(&mut self, id: &OrderId) -> Option<Order> {
        let index = self.orders.iter().position(|order| order.id == *id)?;
        Some(self.orders.remove(index))
    }

    pub fn count_for(&self, access_id: &AccessId) -> usize {
        self.orders
            .iter()
            .filter(|order| order.access_id == *access_id)
            .count()
    }

    /// Owner of every resting order, for maker-reward attribution.
    pub fn owners(&self) -> std::collections::BTreeMap<OrderId, AccessId> {
        self.orders
            .iter()
            .map(|order| (order.id.clone(), order.access_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: &str, direction: TradeDirection, rate0: u64, rate1: u64) -> Order {
        let (balance0, balance1) = match direction {
            TradeDirection::Sell0 => (rate0, 0),
            TradeDirection::Sell1 => (0, rate1),
        };
        Order {
            id: OrderId::from(id),
            access_id: AccessId::from_tag(id),
            direction,
            token0_rate: rate0,
            token1_rate: rate1,
            token0_balance: balance0,
            token1_balance: balance1,
        }
    }

    fn ids(book: &Orderbook) -> Vec<&str> {
        book.orders().iter().map(|o| o.id.as_str()).collect()
    }

    #[test]
    fn inserts_sorted_regardless_of_permutation() {
        let fixtures = [
            order("a", TradeDirection::Sell0, 2, 1),
            order("b", TradeDirection::Sell1, 1, 3),
            order("c", TradeDirection::Sell0, 1, 1),
        ];
        // All six permutations must yield the same book.
        let permutations: [[usize; 3]; 6] =
            [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        for permutation in permutations {
            let mut book = Orderbook::new();
            for &i in &permutation {
                book.insert_order(fixtures[i].clone());
            }
            assert_eq!(ids(&book), vec!["a", "c", "b"], "permutation {permutation:?}");
            // Incoming sell0 takes the highest-rate sell1 order.
            assert_eq!(book.next_order_index(TradeDirection::Sell0), Some(2));
            // Incoming sell1 takes the lowest-rate sell0 order.
            assert_eq!(book.next_order_index(TradeDirection::Sell1), Some(0));
        }
    }

    #[test]
    fn equal_rate_orders_fill_in_arrival_order() {
        let mut book = Orderbook::new();
        book.insert_order(order("s0-first", TradeDirection::Sell0, 2, 1));
        book.insert_order(order("s0-second", TradeDirection::Sell0, 2, 1));
        book.insert_order(order("s1-first", TradeDirection::Sell1, 2, 1));
        book.insert_order(order("s1-second", TradeDirection::Sell1, 2, 1));

        // sell0 ties append, sell1 ties prepend within the rate class.
        assert_eq!(
            ids(&book),
            vec!["s1-second", "s1-first", "s0-first", "s0-second"]
        );
        // Front scan (incoming sell1) reaches s0-first before s0-second;
        // back scan (incoming sell0) reaches s1-first before s1-second.
        assert_eq!(book.next_order_index(TradeDirection::Sell1), Some(2));
        assert_eq!(book.next_order_index(TradeDirection::Sell0), Some(1));
    }

    #[test]
    fn skips_depleted_orders() {
        let mut book = Orderbook::new();
        let mut depleted = order("dead", TradeDirection::Sell1, 1, 2);
        depleted.token1_balance = 0;
        book.insert_order(depleted);
        book.insert_order(order("live", TradeDirection::Sell1, 1, 3));

        let index = book.next_order_index(TradeDirection::Sell0).unwrap();
        assert_eq!(book.orders()[index].id.as_str(), "live");
        assert_eq!(book.next_order_index(TradeDirection::Sell1), None);
    }

    #[test]
    fn partial_fill_floors_the_buy_side() {
        // Maker sells 100 token1 at 3 token1 per 2 token0.
        let mut ord = order("m", TradeDirection::Sell1, 2, 3);
        ord.token1_balance = 100;
        let fill = ord.match_incoming(5, TradeDirection::Sell0).unwrap();
        // floor(5 * 3 / 2) = 7
        assert_eq!(fill.buy_amount, 7);
        assert_eq!(fill.sell_remain, 0);
        assert_eq!(ord.token0_balance, 5);
        assert_eq!(ord.token1_balance, 93);
    }

    #[test]
    fn full_fill_ceils_the_sell_side() {
        let mut ord = order("m", TradeDirection::Sell1, 2, 3);
        ord.token1_balance = 100;
        // Exhausting 100 token1 costs ceil(100 * 2 / 3) = 67 token0.
        let fill = ord.match_incoming(1_000, TradeDirection::Sell0).unwrap();
        assert_eq!(fill.buy_amount, 100);
        assert_eq!(fill.sell_remain, 1_000 - 67);
        assert_eq!(ord.token0_balance, 67);
        assert_eq!(ord.token1_balance, 0);
    }

    #[test]
    fn same_direction_match_is_rejected() {
        let mut ord = order("m", TradeDirection::Sell0, 2, 3);
        assert_eq!(
            ord.match_incoming(10, TradeDirection::Sell0).unwrap_err(),
            SwapError::SameDirectionMatch
        );
    }

    #[test]
    fn balance_changes_respect_direction_monotonicity() {
        let mut ord = order("m", TradeDirection::Sell0, 10, 10);
        // A sell0 order may never regain token0.
        let bad = PairChange {
            token0: BigInt::from(1),
            token1: BigInt::from(-1),
        };
        assert!(matches!(
            ord.apply_balance_changes(&bad).unwrap_err(),
            SwapError::InvalidReserveChange { .. }
        ));
    }

    #[test]
    fn remove_order_by_id() {
        let mut book = Orderbook::new();
        book.insert_order(order("a", TradeDirection::Sell0, 2, 1));
        book.insert_order(order("b", TradeDirection::Sell1, 1, 3));
        let removed = book.remove_order(&OrderId::from("a")).unwrap();
        assert_eq!(removed.id.as_str(), "a");
        assert!(book.order(&OrderId::from("a")).is_none());
        assert_eq!(book.len(), 1);
    }
}
