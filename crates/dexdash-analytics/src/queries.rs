//! Named GraphQL operations and their variables.
//!
//! Documents are sent verbatim; the server resolves every operation under the
//! `market` namespace, so a response is shaped `data.market.<operation>`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const NAMESPACE: &str = "market";

/// A named query document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Operation {
    pub namespace: &'static str,
    pub name: &'static str,
    pub document: &'static str,
}

pub const PRICE_CANDLES: Operation = Operation {
    namespace: NAMESPACE,
    name: "priceCandles",
    document: "query priceCandles($market: String!, $resolution: String!, $from: Int!, $to: Int!) \
{ market { priceCandles(market: $market, resolution: $resolution, from: $from, to: $to) \
{ time open high low close volume } } }",
};

pub const TRADES: Operation = Operation {
    namespace: NAMESPACE,
    name: "trades",
    document: "query trades($market: String!, $limit: Int!) \
{ market { trades(market: $market, limit: $limit) { id price size side time } } }",
};

pub const MARKET_STATS: Operation = Operation {
    namespace: NAMESPACE,
    name: "marketStats",
    document: "query marketStats($market: String!) \
{ market { marketStats(market: $market) { market lastPrice change24h volume24h high24h low24h } } }",
};

pub const DEPTH: Operation = Operation {
    namespace: NAMESPACE,
    name: "depth",
    document: "query depth($market: String!) \
{ market { depth(market: $market) { bids { price size } asks { price size } } } }",
};

/// Candle width.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "1")]
    OneMinute,
    #[serde(rename = "5")]
    FiveMinutes,
    #[serde(rename = "15")]
    FifteenMinutes,
    #[default]
    #[serde(rename = "60")]
    OneHour,
    #[serde(rename = "240")]
    FourHours,
    #[serde(rename = "1D")]
    OneDay,
}

impl Resolution {
    pub const ALL: [Resolution; 6] = [
        Self::OneMinute,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::OneHour,
        Self::FourHours,
        Self::OneDay,
    ];

    /// The value the API expects.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::OneMinute => "1",
            Self::FiveMinutes => "5",
            Self::FifteenMinutes => "15",
            Self::OneHour => "60",
            Self::FourHours => "240",
            Self::OneDay => "1D",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }

    pub fn duration(&self) -> Duration {
        let minutes = match self {
            Self::OneMinute => 1,
            Self::FiveMinutes => 5,
            Self::FifteenMinutes => 15,
            Self::OneHour => 60,
            Self::FourHours => 240,
            Self::OneDay => 1440,
        };
        Duration::from_secs(minutes * 60)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Resolution {
    type Err = String;

    /// Accepts either the label (`4h`) or the wire value (`240`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|r| r.label().eq_ignore_ascii_case(s) || r.as_wire().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown resolution: {s}"))
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CandleVariables<'a> {
    pub market: &'a str,
    pub resolution: Resolution,
    /// Unix seconds, inclusive.
    pub from: i64,
    /// Unix seconds, exclusive.
    pub to: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct TradesVariables<'a> {
    pub market: &'a str,
    pub limit: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct MarketVariables<'a> {
    pub market: &'a str,
}
