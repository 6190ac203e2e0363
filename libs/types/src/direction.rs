//! Trade direction over a canonical token pair.

use serde::{Deserialize, Serialize};

/// Which side of a pair an actor is selling. `Sell0` sells token0 for token1.
///
/// Stored and wire-encoded as `0` / `1`, matching the canonical token order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TradeDirection {
    Sell0,
    Sell1,
}

impl TradeDirection {
    /// The direction a counterparty order must have to match this one.
    pub fn opposite(self) -> Self {
        match self {
            TradeDirection::Sell0 => TradeDirection::Sell1,
            TradeDirection::Sell1 => TradeDirection::Sell0,
        }
    }
}

impl From<TradeDirection> for u8 {
    fn from(direction: TradeDirection) -> u8 {
        match direction {
            TradeDirection::Sell0 => 0,
            TradeDirection::Sell1 => 1,
        }
    }
}

impl TryFrom<u8> for TradeDirection {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TradeDirection::Sell0),
            1 => Ok(TradeDirection::Sell1),
            other => Err(format!("invalid trade direction tag {other}")),
        }
    }
}
