//! Per-instrument streaming quote state and delta application.
//!
//! A [`Ticker`] holds the current level-1 quote, the previous-value
//! shadows for delta computation, both order-book sides, the greeks
//! snapshots and the per-cycle tick logs. It is mutated only through the
//! `apply_*` methods, each of which applies one decoded tick event and
//! reports whether the instrument became dirty.
//!
//! Empty-quote handling: a bid/ask/last side reported with size zero is
//! rewritten to the configured empty-price/empty-size sentinel pair so
//! "no quote" stays distinguishable from a valid zero. O/H/L/C-style
//! price ticks are valid at size zero and bypass the rewrite.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use smallvec::SmallVec;

use crate::errors::{Error, Result};
use crate::ticks::{
    generic_field, greeks_field, price_field, size_field, GenericField, GreeksField, PriceField,
    SizeField,
};
use crate::types::{
    Contract, Defaults, DepthOperation, DepthSide, DepthTick, Dividends, DomLevel,
    OptionComputation, TickByTick, TickData,
};

fn is_empty_price(value: f64, defaults: &Defaults) -> bool {
    value.is_nan() || value == defaults.empty_price
}

/// Streaming quote state for one instrument.
///
/// Created on first subscription, shared by every concurrent subscription
/// type for the same instrument, and only dropped by an engine reset.
#[derive(Debug, Clone)]
pub struct Ticker {
    pub contract: Contract,
    /// Time of the read cycle that last mutated this state.
    pub time: Option<DateTime<Utc>>,
    pub market_data_type: i32,
    pub min_tick: f64,
    pub bbo_exchange: String,
    pub snapshot_permissions: i32,

    pub bid: f64,
    pub bid_size: f64,
    pub bid_exchange: String,
    pub ask: f64,
    pub ask_size: f64,
    pub ask_exchange: String,
    pub last: f64,
    pub last_size: f64,
    pub last_exchange: String,

    pub prev_bid: f64,
    pub prev_bid_size: f64,
    pub prev_ask: f64,
    pub prev_ask_size: f64,
    pub prev_last: f64,
    pub prev_last_size: f64,

    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub low_13_week: f64,
    pub high_13_week: f64,
    pub low_26_week: f64,
    pub high_26_week: f64,
    pub low_52_week: f64,
    pub high_52_week: f64,
    pub auction_price: f64,
    pub mark_price: f64,
    pub bid_yield: f64,
    pub ask_yield: f64,
    pub last_yield: f64,

    pub volume: f64,
    pub volume_rate_3_min: f64,
    pub volume_rate_5_min: f64,
    pub volume_rate_10_min: f64,
    pub av_volume: f64,
    pub call_open_interest: f64,
    pub put_open_interest: f64,
    pub call_volume: f64,
    pub put_volume: f64,
    pub auction_volume: f64,
    pub auction_imbalance: f64,
    pub regulatory_imbalance: f64,
    pub futures_open_interest: f64,
    pub av_option_volume: f64,
    pub shortable_shares: f64,

    pub hist_volatility: f64,
    pub implied_volatility: f64,
    pub index_future_premium: f64,
    pub shortable: f64,
    pub halted: f64,
    pub trade_count: f64,
    pub trade_rate: f64,
    pub volume_rate: f64,
    pub rt_hist_volatility: f64,

    pub rt_volume: f64,
    pub rt_trade_volume: f64,
    pub vwap: f64,
    pub rt_time: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub dividends: Option<Dividends>,

    pub bid_greeks: Option<OptionComputation>,
    pub ask_greeks: Option<OptionComputation>,
    pub last_greeks: Option<OptionComputation>,
    pub model_greeks: Option<OptionComputation>,

    /// Order-book sides, keyed by level position. Gap positions are
    /// tolerated; the visible lists below are re-derived after every
    /// mutation.
    pub dom_bids_map: BTreeMap<i32, DomLevel>,
    pub dom_asks_map: BTreeMap<i32, DomLevel>,
    pub dom_bids: Vec<DomLevel>,
    pub dom_asks: Vec<DomLevel>,

    /// Per-cycle append-only logs, cleared at each read-cycle start.
    pub ticks: SmallVec<[TickData; 8]>,
    pub tick_by_ticks: SmallVec<[TickByTick; 4]>,
    pub dom_ticks: SmallVec<[DepthTick; 8]>,
}

impl Ticker {
    pub fn new(contract: Contract) -> Self {
        Self {
            contract,
            time: None,
            market_data_type: 1,
            min_tick: f64::NAN,
            bbo_exchange: String::new(),
            snapshot_permissions: 0,
            bid: f64::NAN,
            bid_size: f64::NAN,
            bid_exchange: String::new(),
            ask: f64::NAN,
            ask_size: f64::NAN,
            ask_exchange: String::new(),
            last: f64::NAN,
            last_size: f64::NAN,
            last_exchange: String::new(),
            prev_bid: f64::NAN,
            prev_bid_size: f64::NAN,
            prev_ask: f64::NAN,
            prev_ask_size: f64::NAN,
            prev_last: f64::NAN,
            prev_last_size: f64::NAN,
            open: f64::NAN,
            high: f64::NAN,
            low: f64::NAN,
            close: f64::NAN,
            low_13_week: f64::NAN,
            high_13_week: f64::NAN,
            low_26_week: f64::NAN,
            high_26_week: f64::NAN,
            low_52_week: f64::NAN,
            high_52_week: f64::NAN,
            auction_price: f64::NAN,
            mark_price: f64::NAN,
            bid_yield: f64::NAN,
            ask_yield: f64::NAN,
            last_yield: f64::NAN,
            volume: f64::NAN,
            volume_rate_3_min: f64::NAN,
            volume_rate_5_min: f64::NAN,
            volume_rate_10_min: f64::NAN,
            av_volume: f64::NAN,
            call_open_interest: f64::NAN,
            put_open_interest: f64::NAN,
            call_volume: f64::NAN,
            put_volume: f64::NAN,
            auction_volume: f64::NAN,
            auction_imbalance: f64::NAN,
            regulatory_imbalance: f64::NAN,
            futures_open_interest: f64::NAN,
            av_option_volume: f64::NAN,
            shortable_shares: f64::NAN,
            hist_volatility: f64::NAN,
            implied_volatility: f64::NAN,
            index_future_premium: f64::NAN,
            shortable: f64::NAN,
            halted: f64::NAN,
            trade_count: f64::NAN,
            trade_rate: f64::NAN,
            volume_rate: f64::NAN,
            rt_hist_volatility: f64::NAN,
            rt_volume: f64::NAN,
            rt_trade_volume: f64::NAN,
            vwap: f64::NAN,
            rt_time: None,
            last_timestamp: None,
            dividends: None,
            bid_greeks: None,
            ask_greeks: None,
            last_greeks: None,
            model_greeks: None,
            dom_bids_map: BTreeMap::new(),
            dom_asks_map: BTreeMap::new(),
            dom_bids: Vec::new(),
            dom_asks: Vec::new(),
            ticks: SmallVec::new(),
            tick_by_ticks: SmallVec::new(),
            dom_ticks: SmallVec::new(),
        }
    }

    /// Clear the per-cycle logs at the start of a read cycle.
    pub fn begin_cycle(&mut self) {
        self.ticks.clear();
        self.tick_by_ticks.clear();
        self.dom_ticks.clear();
    }

    /// True if both bid and ask are populated with positive sizes.
    pub fn has_bid_ask(&self) -> bool {
        self.bid != -1.0
            && !self.bid.is_nan()
            && self.bid_size > 0.0
            && self.ask != -1.0
            && !self.ask.is_nan()
            && self.ask_size > 0.0
    }

    /// Average of bid and ask, or NaN without a valid bid/ask pair.
    pub fn midpoint(&self) -> f64 {
        if self.has_bid_ask() {
            (self.bid + self.ask) * 0.5
        } else {
            f64::NAN
        }
    }

    /// Best-effort current price: last if inside the quote (or no quote),
    /// otherwise the midpoint.
    pub fn market_price(&self) -> f64 {
        if self.has_bid_ask() {
            if self.bid <= self.last && self.last <= self.ask {
                self.last
            } else {
                self.midpoint()
            }
        } else {
            self.last
        }
    }

    /// Apply a combined price+size tick.
    ///
    /// Bid/ask updates with size zero are rewritten to the empty sentinel
    /// pair; last updates only for the broker's -1/0 no-trade shape when a
    /// close exists (index feeds legitimately quote price -1 with no
    /// close). Every other mapped price code stores the price verbatim.
    pub fn apply_price_size(
        &mut self,
        code: i32,
        price: f64,
        size: f64,
        defaults: &Defaults,
        time: DateTime<Utc>,
    ) -> Result<bool> {
        let mut price = price;
        let mut size = size;
        match code {
            1 | 66 => {
                if size == 0.0 {
                    price = defaults.empty_price;
                    size = defaults.empty_size;
                }
                self.prev_bid = self.bid;
                self.prev_bid_size = self.bid_size;
                self.bid = price;
                self.bid_size = size;
            }
            2 | 67 => {
                if size == 0.0 {
                    price = defaults.empty_price;
                    size = defaults.empty_size;
                }
                self.prev_ask = self.ask;
                self.prev_ask_size = self.ask_size;
                self.ask = price;
                self.ask_size = size;
            }
            4 | 68 => {
                if price == -1.0 && size == 0.0 && self.close > 0.0 {
                    price = defaults.empty_price;
                    size = defaults.empty_size;
                }
                self.prev_last = self.last;
                self.prev_last_size = self.last_size;
                self.last = price;
                self.last_size = size;
            }
            _ => {
                let field = price_field(code).ok_or(Error::UnmappedTick {
                    kind: "price",
                    code,
                })?;
                self.set_price_field(field, price);
            }
        }

        if price != 0.0 || size != 0.0 {
            self.ticks.push(TickData {
                time,
                tick_type: code,
                price,
                size,
            });
        }
        Ok(true)
    }

    /// Apply a size-only tick.
    ///
    /// A bid/ask size equal to the stored size is a redundant replay and
    /// leaves the state (and the dirty set) untouched.
    pub fn apply_size(
        &mut self,
        code: i32,
        size: f64,
        defaults: &Defaults,
        time: DateTime<Utc>,
    ) -> Result<bool> {
        let mut price = defaults.empty_price;
        match code {
            0 | 69 => {
                if size == self.bid_size {
                    return Ok(false);
                }
                self.prev_bid_size = self.bid_size;
                if size == 0.0 {
                    self.bid = defaults.empty_price;
                    self.bid_size = defaults.empty_size;
                } else {
                    price = self.bid;
                    self.bid_size = size;
                }
            }
            3 | 70 => {
                if size == self.ask_size {
                    return Ok(false);
                }
                self.prev_ask_size = self.ask_size;
                if size == 0.0 {
                    self.ask = defaults.empty_price;
                    self.ask_size = defaults.empty_size;
                } else {
                    price = self.ask;
                    self.ask_size = size;
                }
            }
            5 | 71 => {
                price = self.last;
                if is_empty_price(price, defaults) {
                    return Ok(false);
                }
                if size != self.last_size {
                    self.prev_last_size = self.last_size;
                    self.last_size = size;
                }
            }
            _ => {
                let field = size_field(code).ok_or(Error::UnmappedTick { kind: "size", code })?;
                self.set_size_field(field, size);
            }
        }

        if price != 0.0 || size != 0.0 {
            self.ticks.push(TickData {
                time,
                tick_type: code,
                price,
                size,
            });
        }
        Ok(true)
    }

    /// Apply a generic numeric tick. Non-positive values collapse to the
    /// empty-size sentinel.
    pub fn apply_generic(
        &mut self,
        code: i32,
        value: f64,
        defaults: &Defaults,
        time: DateTime<Utc>,
    ) -> Result<bool> {
        let value = if value > 0.0 { value } else { defaults.empty_size };
        let field = generic_field(code).ok_or(Error::UnmappedTick {
            kind: "generic",
            code,
        })?;
        self.set_generic_field(field, value);
        self.ticks.push(TickData {
            time,
            tick_type: code,
            price: value,
            size: 0.0,
        });
        Ok(true)
    }

    /// Apply a string-valued tick (exchange tags, timestamps, RT volume,
    /// dividends).
    pub fn apply_string(&mut self, code: i32, value: &str, time: DateTime<Utc>) -> Result<bool> {
        match code {
            32 => {
                self.bid_exchange = value.to_string();
                Ok(true)
            }
            33 => {
                self.ask_exchange = value.to_string();
                Ok(true)
            }
            84 => {
                self.last_exchange = value.to_string();
                Ok(true)
            }
            45 => {
                let timestamp: i64 = value.parse().map_err(|_| Error::MalformedTick {
                    field: "lastTimestamp",
                    value: value.to_string(),
                })?;
                // A zero timestamp means "never traded", not 1970.
                if timestamp != 0 {
                    self.last_timestamp = Utc.timestamp_opt(timestamp, 0).single();
                }
                Ok(true)
            }
            48 | 77 => self.apply_rt_volume(code, value, time),
            59 => {
                self.dividends = Some(parse_dividends(value)?);
                Ok(true)
            }
            _ => Err(Error::UnmappedTick {
                kind: "string",
                code,
            }),
        }
    }

    /// RT volume / RT trade volume string format:
    /// `price;size;ms since epoch;total volume;VWAP;single trade`.
    fn apply_rt_volume(&mut self, code: i32, value: &str, time: DateTime<Utc>) -> Result<bool> {
        let malformed = || Error::MalformedTick {
            field: "rtVolume",
            value: value.to_string(),
        };
        let parts: Vec<&str> = value.split(';').collect();
        if parts.len() < 6 {
            return Err(malformed());
        }
        let (price_str, size_str, rt_time, volume, vwap) =
            (parts[0], parts[1], parts[2], parts[3], parts[4]);

        if !volume.is_empty() {
            let volume: f64 = volume.parse().map_err(|_| malformed())?;
            if code == 48 {
                self.rt_volume = volume;
            } else {
                self.rt_trade_volume = volume;
            }
        }
        if !vwap.is_empty() {
            self.vwap = vwap.parse().map_err(|_| malformed())?;
        }
        if !rt_time.is_empty() {
            let millis: i64 = rt_time.parse().map_err(|_| malformed())?;
            self.rt_time = Utc.timestamp_millis_opt(millis).single();
        }

        // Volume-only updates carry no trade to apply.
        if price_str.is_empty() {
            return Ok(false);
        }
        let price: f64 = price_str.parse().map_err(|_| malformed())?;
        let size: f64 = size_str.parse().map_err(|_| malformed())?;

        self.prev_last = self.last;
        self.prev_last_size = self.last_size;
        self.last = price;
        self.last_size = size;
        self.ticks.push(TickData {
            time,
            tick_type: code,
            price,
            size,
        });
        Ok(true)
    }

    /// Apply an option-greeks computation tick.
    pub fn apply_greeks(&mut self, code: i32, computation: OptionComputation) -> Result<bool> {
        let field = greeks_field(code).ok_or(Error::UnmappedTick {
            kind: "greeks",
            code,
        })?;
        let slot = match field {
            GreeksField::Bid => &mut self.bid_greeks,
            GreeksField::Ask => &mut self.ask_greeks,
            GreeksField::Last => &mut self.last_greeks,
            GreeksField::Model => &mut self.model_greeks,
        };
        *slot = Some(computation);
        Ok(true)
    }

    /// Apply a tick-by-tick event.
    pub fn apply_tick_by_tick(&mut self, event: TickByTick, defaults: &Defaults) -> bool {
        match event {
            TickByTick::AllLast {
                tick_type,
                time,
                mut price,
                mut size,
                attrib,
                exchange,
                special_conditions,
            } => {
                if price == -1.0 && size == 0.0 {
                    price = defaults.empty_price;
                    size = defaults.empty_size;
                }
                self.prev_last = self.last;
                self.prev_last_size = self.last_size;
                self.last = price;
                self.last_size = size;
                self.tick_by_ticks.push(TickByTick::AllLast {
                    tick_type,
                    time,
                    price,
                    size,
                    attrib,
                    exchange,
                    special_conditions,
                });
            }
            TickByTick::BidAsk {
                time,
                bid_price,
                ask_price,
                bid_size,
                ask_size,
                attrib,
            } => {
                if bid_price != self.bid {
                    self.prev_bid = self.bid;
                    self.bid = if bid_price > 0.0 {
                        bid_price
                    } else {
                        defaults.empty_price
                    };
                }
                if bid_size != self.bid_size {
                    self.prev_bid_size = self.bid_size;
                    self.bid_size = if bid_size > 0.0 {
                        bid_size
                    } else {
                        defaults.empty_size
                    };
                }
                if ask_price != self.ask {
                    self.prev_ask = self.ask;
                    self.ask = if ask_price > 0.0 {
                        ask_price
                    } else {
                        defaults.empty_price
                    };
                }
                if ask_size != self.ask_size {
                    self.prev_ask_size = self.ask_size;
                    self.ask_size = if ask_size > 0.0 {
                        ask_size
                    } else {
                        defaults.empty_size
                    };
                }
                self.tick_by_ticks.push(TickByTick::BidAsk {
                    time,
                    bid_price,
                    ask_price,
                    bid_size,
                    ask_size,
                    attrib,
                });
            }
            midpoint @ TickByTick::MidPoint { .. } => {
                self.tick_by_ticks.push(midpoint);
            }
        }
        true
    }

    /// Apply one depth update to a book side.
    ///
    /// Insert and update both mean insert-or-overwrite at the position;
    /// delete removes the position and is tolerated when it is absent.
    /// The visible ordered list is re-derived from the map afterwards.
    pub fn apply_depth(
        &mut self,
        position: i32,
        market_maker: String,
        operation: DepthOperation,
        side: DepthSide,
        price: f64,
        size: f64,
        time: DateTime<Utc>,
    ) -> bool {
        let mut log_price = price;
        let mut log_size = size;
        {
            let book = match side {
                DepthSide::Bid => &mut self.dom_bids_map,
                DepthSide::Ask => &mut self.dom_asks_map,
            };
            match operation {
                DepthOperation::Insert | DepthOperation::Update => {
                    book.insert(
                        position,
                        DomLevel {
                            price,
                            size,
                            market_maker: market_maker.clone(),
                        },
                    );
                }
                DepthOperation::Delete => {
                    log_size = 0.0;
                    if let Some(level) = book.remove(&position) {
                        log_price = level.price;
                    }
                }
            }
        }
        self.rebuild_dom_side(side);
        self.dom_ticks.push(DepthTick {
            time,
            position,
            market_maker,
            operation,
            side,
            price: log_price,
            size: log_size,
        });
        true
    }

    /// Clear both book sides, logging a delete for every dropped level.
    /// Used when the broker signals a depth-data reset.
    pub fn clear_depth(&mut self, time: DateTime<Utc>) {
        for level in &self.dom_asks {
            self.dom_ticks.push(DepthTick {
                time,
                position: 0,
                market_maker: String::new(),
                operation: DepthOperation::Delete,
                side: DepthSide::Ask,
                price: level.price,
                size: 0.0,
            });
        }
        for level in &self.dom_bids {
            self.dom_ticks.push(DepthTick {
                time,
                position: 0,
                market_maker: String::new(),
                operation: DepthOperation::Delete,
                side: DepthSide::Bid,
                price: level.price,
                size: 0.0,
            });
        }
        self.dom_asks.clear();
        self.dom_bids.clear();
        self.dom_asks_map.clear();
        self.dom_bids_map.clear();
    }

    fn rebuild_dom_side(&mut self, side: DepthSide) {
        match side {
            DepthSide::Bid => self.dom_bids = self.dom_bids_map.values().cloned().collect(),
            DepthSide::Ask => self.dom_asks = self.dom_asks_map.values().cloned().collect(),
        }
    }

    fn set_price_field(&mut self, field: PriceField, value: f64) {
        match field {
            PriceField::High => self.high = value,
            PriceField::Low => self.low = value,
            PriceField::Close => self.close = value,
            PriceField::Open => self.open = value,
            PriceField::Low13Week => self.low_13_week = value,
            PriceField::High13Week => self.high_13_week = value,
            PriceField::Low26Week => self.low_26_week = value,
            PriceField::High26Week => self.high_26_week = value,
            PriceField::Low52Week => self.low_52_week = value,
            PriceField::High52Week => self.high_52_week = value,
            PriceField::AuctionPrice => self.auction_price = value,
            PriceField::MarkPrice => self.mark_price = value,
            PriceField::BidYield => self.bid_yield = value,
            PriceField::AskYield => self.ask_yield = value,
            PriceField::LastYield => self.last_yield = value,
        }
    }

    fn set_size_field(&mut self, field: SizeField, value: f64) {
        match field {
            SizeField::Volume => self.volume = value,
            SizeField::VolumeRate3Min => self.volume_rate_3_min = value,
            SizeField::VolumeRate5Min => self.volume_rate_5_min = value,
            SizeField::VolumeRate10Min => self.volume_rate_10_min = value,
            SizeField::AvVolume => self.av_volume = value,
            SizeField::CallOpenInterest => self.call_open_interest = value,
            SizeField::PutOpenInterest => self.put_open_interest = value,
            SizeField::CallVolume => self.call_volume = value,
            SizeField::PutVolume => self.put_volume = value,
            SizeField::AuctionVolume => self.auction_volume = value,
            SizeField::AuctionImbalance => self.auction_imbalance = value,
            SizeField::RegulatoryImbalance => self.regulatory_imbalance = value,
            SizeField::FuturesOpenInterest => self.futures_open_interest = value,
            SizeField::AvOptionVolume => self.av_option_volume = value,
            SizeField::ShortableShares => self.shortable_shares = value,
        }
    }

    fn set_generic_field(&mut self, field: GenericField, value: f64) {
        match field {
            GenericField::HistVolatility => self.hist_volatility = value,
            GenericField::ImpliedVolatility => self.implied_volatility = value,
            GenericField::IndexFuturePremium => self.index_future_premium = value,
            GenericField::Shortable => self.shortable = value,
            GenericField::Halted => self.halted = value,
            GenericField::TradeCount => self.trade_count = value,
            GenericField::TradeRate => self.trade_rate = value,
            GenericField::VolumeRate => self.volume_rate = value,
            GenericField::RtHistVolatility => self.rt_hist_volatility = value,
        }
    }
}

/// Dividend string format: `past12,next12,nextDate,nextAmount`,
/// e.g. `0.83,0.92,20130219,0.23`. Empty components mean "unknown".
fn parse_dividends(value: &str) -> Result<Dividends> {
    let malformed = || Error::MalformedTick {
        field: "dividends",
        value: value.to_string(),
    };
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() != 4 {
        return Err(malformed());
    }
    let number = |part: &str| -> Result<Option<f64>> {
        if part.is_empty() {
            Ok(None)
        } else {
            part.parse().map(Some).map_err(|_| malformed())
        }
    };
    let next_date = if parts[2].is_empty() {
        None
    } else {
        Some(crate::types::parse_wire_datetime(parts[2]).ok_or_else(malformed)?)
    };
    Ok(Dividends {
        past12_months: number(parts[0])?,
        next12_months: number(parts[1])?,
        next_date,
        next_amount: number(parts[3])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker() -> Ticker {
        Ticker::new(Contract::stock("AAPL", "SMART", "USD"))
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_bid_tick_size_zero_rewritten_to_sentinel() {
        let mut t = ticker();
        let d = Defaults::default();
        let dirty = t.apply_price_size(1, 101.25, 0.0, &d, now()).unwrap();
        assert!(dirty);
        assert!(t.bid.is_nan());
        assert_eq!(t.bid_size, 0.0);
    }

    #[test]
    fn test_bid_tick_nonzero_size_stored_verbatim() {
        let mut t = ticker();
        let d = Defaults::default();
        t.apply_price_size(1, 101.25, 300.0, &d, now()).unwrap();
        assert_eq!(t.bid, 101.25);
        assert_eq!(t.bid_size, 300.0);
    }

    #[test]
    fn test_ohlc_tick_valid_at_size_zero() {
        let mut t = ticker();
        let d = Defaults::default();
        // Close arrives with size 0 and must bypass the sentinel rewrite.
        t.apply_price_size(9, 99.5, 0.0, &d, now()).unwrap();
        assert_eq!(t.close, 99.5);
        t.apply_price_size(14, 100.0, 0.0, &d, now()).unwrap();
        assert_eq!(t.open, 100.0);
    }

    #[test]
    fn test_last_no_trade_shape_rewritten_only_with_close() {
        let mut t = ticker();
        let d = Defaults::default();
        // Without a close, -1/0 is a legitimate last (index feeds).
        t.apply_price_size(4, -1.0, 0.0, &d, now()).unwrap();
        assert_eq!(t.last, -1.0);

        t.apply_price_size(9, 99.5, 0.0, &d, now()).unwrap();
        t.apply_price_size(4, -1.0, 0.0, &d, now()).unwrap();
        assert!(t.last.is_nan());
    }

    #[test]
    fn test_price_mutation_shadows_previous() {
        let mut t = ticker();
        let d = Defaults::default();
        t.apply_price_size(1, 101.0, 100.0, &d, now()).unwrap();
        t.apply_price_size(1, 101.5, 200.0, &d, now()).unwrap();
        assert_eq!(t.prev_bid, 101.0);
        assert_eq!(t.prev_bid_size, 100.0);
        assert_eq!(t.bid, 101.5);
        assert_eq!(t.bid_size, 200.0);
    }

    #[test]
    fn test_unmapped_price_code_fails_loudly() {
        let mut t = ticker();
        let d = Defaults::default();
        let err = t.apply_price_size(999, 1.0, 1.0, &d, now()).unwrap_err();
        assert_eq!(
            err,
            Error::UnmappedTick {
                kind: "price",
                code: 999
            }
        );
    }

    #[test]
    fn test_redundant_size_replay_is_clean() {
        let mut t = ticker();
        let d = Defaults::default();
        t.apply_price_size(1, 101.0, 100.0, &d, now()).unwrap();
        t.begin_cycle();
        // Same bid size again: no state change, not dirty, no log entry.
        let dirty = t.apply_size(0, 100.0, &d, now()).unwrap();
        assert!(!dirty);
        assert!(t.ticks.is_empty());
        // The shadow from the original update is untouched by the replay.
        assert!(t.prev_bid_size.is_nan());
    }

    #[test]
    fn test_size_zero_empties_the_side() {
        let mut t = ticker();
        let d = Defaults::default();
        t.apply_price_size(2, 102.0, 50.0, &d, now()).unwrap();
        let dirty = t.apply_size(3, 0.0, &d, now()).unwrap();
        assert!(dirty);
        assert!(t.ask.is_nan());
        assert_eq!(t.ask_size, 0.0);
        assert_eq!(t.prev_ask_size, 50.0);
    }

    #[test]
    fn test_last_size_ignored_when_last_unset() {
        let mut t = ticker();
        let d = Defaults::default();
        let dirty = t.apply_size(5, 10.0, &d, now()).unwrap();
        assert!(!dirty);
        assert!(t.last_size.is_nan());
    }

    #[test]
    fn test_generic_tick_nonpositive_collapses() {
        let mut t = ticker();
        let d = Defaults::default();
        t.apply_generic(49, 1.0, &d, now()).unwrap();
        assert_eq!(t.halted, 1.0);
        t.apply_generic(49, -1.0, &d, now()).unwrap();
        assert_eq!(t.halted, d.empty_size);
    }

    #[test]
    fn test_rt_volume_updates_last_and_vwap() {
        let mut t = ticker();
        let dirty = t
            .apply_string(48, "701.28;1;1348075471534;67854;701.46918464;true", now())
            .unwrap();
        assert!(dirty);
        assert_eq!(t.last, 701.28);
        assert_eq!(t.last_size, 1.0);
        assert_eq!(t.rt_volume, 67854.0);
        assert!((t.vwap - 701.46918464).abs() < 1e-12);
        assert_eq!(t.ticks.len(), 1);
    }

    #[test]
    fn test_rt_volume_without_price_is_volume_only() {
        let mut t = ticker();
        let dirty = t
            .apply_string(48, ";;1348075471534;67854;701.5;false", now())
            .unwrap();
        assert!(!dirty);
        assert_eq!(t.rt_volume, 67854.0);
        assert!(t.last.is_nan());
        assert!(t.ticks.is_empty());
    }

    #[test]
    fn test_dividends_parse() {
        let mut t = ticker();
        t.apply_string(59, "0.83,0.92,20130219,0.23", now()).unwrap();
        let dividends = t.dividends.as_ref().unwrap();
        assert_eq!(dividends.past12_months, Some(0.83));
        assert_eq!(dividends.next12_months, Some(0.92));
        assert!(dividends.next_date.is_some());
        assert_eq!(dividends.next_amount, Some(0.23));
    }

    #[test]
    fn test_malformed_string_tick_is_error() {
        let mut t = ticker();
        assert!(t.apply_string(45, "not-a-timestamp", now()).is_err());
        assert!(t.apply_string(59, "1,2,3", now()).is_err());
        assert!(matches!(
            t.apply_string(1234, "x", now()),
            Err(Error::UnmappedTick { kind: "string", .. })
        ));
    }

    #[test]
    fn test_depth_insert_update_delete() {
        let mut t = ticker();
        let time = now();
        t.apply_depth(0, "MM1".into(), DepthOperation::Insert, DepthSide::Bid, 100.0, 5.0, time);
        t.apply_depth(1, "MM2".into(), DepthOperation::Insert, DepthSide::Bid, 99.5, 7.0, time);
        assert_eq!(t.dom_bids.len(), 2);

        // Update overwrites in place.
        t.apply_depth(0, "MM1".into(), DepthOperation::Update, DepthSide::Bid, 100.25, 4.0, time);
        assert_eq!(t.dom_bids[0].price, 100.25);

        t.apply_depth(0, String::new(), DepthOperation::Delete, DepthSide::Bid, 0.0, 0.0, time);
        assert_eq!(t.dom_bids.len(), 1);
        assert_eq!(t.dom_bids[0].price, 99.5);
        // Delete logs the removed level's price.
        let last_tick = t.dom_ticks.last().unwrap();
        assert_eq!(last_tick.price, 100.25);
        assert_eq!(last_tick.size, 0.0);
    }

    #[test]
    fn test_depth_delete_missing_position_is_tolerated() {
        let mut t = ticker();
        let time = now();
        t.apply_depth(0, "MM1".into(), DepthOperation::Insert, DepthSide::Ask, 101.0, 5.0, time);
        t.apply_depth(7, String::new(), DepthOperation::Delete, DepthSide::Ask, 0.0, 0.0, time);
        assert_eq!(t.dom_asks.len(), 1);
        assert_eq!(t.dom_asks_map.len(), 1);
    }

    #[test]
    fn test_depth_positions_may_gap() {
        let mut t = ticker();
        let time = now();
        t.apply_depth(0, String::new(), DepthOperation::Insert, DepthSide::Ask, 101.0, 5.0, time);
        t.apply_depth(4, String::new(), DepthOperation::Insert, DepthSide::Ask, 103.0, 2.0, time);
        assert_eq!(t.dom_asks.len(), 2);
        assert_eq!(t.dom_asks[1].price, 103.0);
    }

    #[test]
    fn test_clear_depth_logs_deletes() {
        let mut t = ticker();
        let time = now();
        t.apply_depth(0, String::new(), DepthOperation::Insert, DepthSide::Bid, 100.0, 5.0, time);
        t.apply_depth(0, String::new(), DepthOperation::Insert, DepthSide::Ask, 101.0, 5.0, time);
        t.begin_cycle();
        t.clear_depth(time);
        assert!(t.dom_bids.is_empty());
        assert!(t.dom_asks.is_empty());
        assert!(t.dom_bids_map.is_empty());
        assert!(t.dom_asks_map.is_empty());
        assert_eq!(t.dom_ticks.len(), 2);
        assert!(t
            .dom_ticks
            .iter()
            .all(|tick| tick.operation == DepthOperation::Delete && tick.size == 0.0));
    }

    #[test]
    fn test_tick_by_tick_all_last_rewrites_no_trade() {
        let mut t = ticker();
        let d = Defaults::default();
        t.apply_tick_by_tick(
            TickByTick::AllLast {
                tick_type: 1,
                time: now(),
                price: -1.0,
                size: 0.0,
                attrib: Default::default(),
                exchange: String::new(),
                special_conditions: String::new(),
            },
            &d,
        );
        assert!(t.last.is_nan());
        assert_eq!(t.tick_by_ticks.len(), 1);
    }

    #[test]
    fn test_tick_by_tick_bid_ask_shadows_changed_fields_only() {
        let mut t = ticker();
        let d = Defaults::default();
        let event = |bid: f64, ask: f64, bid_size: f64, ask_size: f64| TickByTick::BidAsk {
            time: now(),
            bid_price: bid,
            ask_price: ask,
            bid_size,
            ask_size,
            attrib: Default::default(),
        };
        t.apply_tick_by_tick(event(100.0, 101.0, 5.0, 6.0), &d);
        t.apply_tick_by_tick(event(100.5, 101.0, 5.0, 8.0), &d);
        assert_eq!(t.prev_bid, 100.0);
        assert_eq!(t.bid, 100.5);
        // Unchanged ask price keeps its shadow from the first event.
        assert!(t.prev_ask.is_nan());
        assert_eq!(t.prev_ask_size, 6.0);
        assert_eq!(t.ask_size, 8.0);
    }

    #[test]
    fn test_begin_cycle_clears_logs() {
        let mut t = ticker();
        let d = Defaults::default();
        t.apply_price_size(1, 101.0, 100.0, &d, now()).unwrap();
        t.apply_depth(0, String::new(), DepthOperation::Insert, DepthSide::Bid, 100.0, 5.0, now());
        assert!(!t.ticks.is_empty());
        assert!(!t.dom_ticks.is_empty());
        t.begin_cycle();
        assert!(t.ticks.is_empty());
        assert!(t.dom_ticks.is_empty());
        // The book itself survives the cycle boundary.
        assert_eq!(t.dom_bids.len(), 1);
    }

    #[test]
    fn test_market_price_prefers_last_inside_quote() {
        let mut t = ticker();
        let d = Defaults::default();
        t.apply_price_size(1, 100.0, 10.0, &d, now()).unwrap();
        t.apply_price_size(2, 101.0, 10.0, &d, now()).unwrap();
        t.apply_price_size(4, 100.4, 1.0, &d, now()).unwrap();
        assert_eq!(t.market_price(), 100.4);
        t.apply_price_size(4, 103.0, 1.0, &d, now()).unwrap();
        assert_eq!(t.market_price(), 100.5);
    }
}
