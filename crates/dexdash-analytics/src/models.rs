use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar. `time` is the bar's open, in unix seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.time, 0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub price: f64,
    pub size: f64,
    pub side: Side,
    pub time: i64,
}

impl Trade {
    pub fn executed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.time, 0)
    }

    pub fn notional(&self) -> f64 {
        self.price * self.size
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketStats {
    pub market: String,
    pub last_price: f64,
    /// Fractional change over 24h (0.05 is +5%).
    pub change_24h: f64,
    pub volume_24h: f64,
    pub high_24h: f64,
    pub low_24h: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: f64,
    pub size: f64,
}

/// Order book snapshot. Bids best-first (descending), asks best-first
/// (ascending).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Depth {
    #[serde(default)]
    pub bids: Vec<DepthLevel>,
    #[serde(default)]
    pub asks: Vec<DepthLevel>,
}

impl Depth {
    pub fn best_bid(&self) -> Option<DepthLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<DepthLevel> {
        self.asks.first().copied()
    }

    pub fn spread(&self) -> Option<f64> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    pub fn mid(&self) -> Option<f64> {
        Some((self.best_ask()?.price + self.best_bid()?.price) / 2.0)
    }
}
