//! Market-data records: bars, ticks, depth levels, greeks, news.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One bar of historical or real-time aggregated data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BarData {
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub wap: f64,
    pub bar_count: i32,
}

/// One price level of an order-book side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomLevel {
    pub price: f64,
    pub size: f64,
    pub market_maker: String,
}

/// Book side a depth update targets. Wire encoding: 0 = ask, 1 = bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepthSide {
    Ask,
    Bid,
}

impl DepthSide {
    pub fn from_wire(side: i32) -> Option<Self> {
        match side {
            0 => Some(Self::Ask),
            1 => Some(Self::Bid),
            _ => None,
        }
    }
}

/// Depth operation. Wire encoding: 0 = insert, 1 = update, 2 = delete.
/// Insert and update both mean insert-or-overwrite at the level position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepthOperation {
    Insert,
    Update,
    Delete,
}

impl DepthOperation {
    pub fn from_wire(operation: i32) -> Option<Self> {
        match operation {
            0 => Some(Self::Insert),
            1 => Some(Self::Update),
            2 => Some(Self::Delete),
            _ => None,
        }
    }
}

/// One applied depth mutation, recorded in the per-cycle depth log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthTick {
    pub time: DateTime<Utc>,
    pub position: i32,
    pub market_maker: String,
    pub operation: DepthOperation,
    pub side: DepthSide,
    pub price: f64,
    pub size: f64,
}

/// One raw price/size tick, recorded in the per-cycle tick log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickData {
    pub time: DateTime<Utc>,
    pub tick_type: i32,
    pub price: f64,
    pub size: f64,
}

/// Trade-condition flags on a tick-by-tick last trade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickAttribLast {
    pub past_limit: bool,
    pub unreported: bool,
}

/// Quote-condition flags on a tick-by-tick bid/ask update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickAttribBidAsk {
    pub bid_past_low: bool,
    pub ask_past_high: bool,
}

/// One tick-by-tick event, recorded in the per-cycle tick-by-tick log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TickByTick {
    AllLast {
        tick_type: i32,
        time: DateTime<Utc>,
        price: f64,
        size: f64,
        attrib: TickAttribLast,
        exchange: String,
        special_conditions: String,
    },
    BidAsk {
        time: DateTime<Utc>,
        bid_price: f64,
        ask_price: f64,
        bid_size: f64,
        ask_size: f64,
        attrib: TickAttribBidAsk,
    },
    MidPoint { time: DateTime<Utc>, mid_point: f64 },
}

/// Greeks snapshot from an option-model computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionComputation {
    pub tick_attrib: i32,
    pub implied_vol: Option<f64>,
    pub delta: Option<f64>,
    pub opt_price: Option<f64>,
    pub pv_dividend: Option<f64>,
    pub gamma: Option<f64>,
    pub vega: Option<f64>,
    pub theta: Option<f64>,
    pub und_price: Option<f64>,
}

/// Dividend projection from the dividends string tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dividends {
    pub past12_months: Option<f64>,
    pub next12_months: Option<f64>,
    pub next_date: Option<DateTime<Utc>>,
    pub next_amount: Option<f64>,
}

/// One historical midpoint tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalTick {
    pub time: DateTime<Utc>,
    pub price: f64,
    pub size: f64,
}

/// One historical bid/ask tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalTickBidAsk {
    pub time: DateTime<Utc>,
    pub price_bid: f64,
    pub price_ask: f64,
    pub size_bid: f64,
    pub size_ask: f64,
}

/// One historical last-trade tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalTickLast {
    pub time: DateTime<Utc>,
    pub price: f64,
    pub size: f64,
    pub exchange: String,
    pub special_conditions: String,
}

/// Streaming news headline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsTick {
    pub time_stamp: i64,
    pub provider_code: String,
    pub article_id: String,
    pub headline: String,
    pub extra_data: String,
}

/// Broker-wide news bulletin, keyed by message id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsBulletin {
    pub msg_id: i32,
    pub msg_type: i32,
    pub message: String,
    pub orig_exchange: String,
}

/// A subscribable news provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsProvider {
    pub code: String,
    pub name: String,
}
