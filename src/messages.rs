//! Decoded wire messages and the outbound transport seam.
//!
//! The Transport collaborator decodes the byte-level protocol and hands
//! the engine one [`Message`] per inbound frame, in wire-delivery order.
//! The message set is closed: dispatch is an exhaustive `match`, so a new
//! wire callback is a compile-time change, not a runtime surprise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::order::{Order, OrderState, OrderStatus};
use crate::types::{
    BarData, Contract, ContractDescription, ContractDetails, DepthMktDataDescription, Execution,
    HistoricalTick, HistoricalTickBidAsk, HistoricalTickLast, NewsProvider, OptionComputation,
    PriceIncrement, TickAttribBidAsk, TickAttribLast,
};

/// One decoded inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Message {
    ManagedAccounts {
        accounts: String,
    },
    NextValidId {
        order_id: i32,
    },
    CurrentTime {
        time: i64,
    },
    Error {
        req_id: i32,
        code: i32,
        message: String,
        advanced_order_reject: String,
    },

    AccountValue {
        account: String,
        tag: String,
        value: String,
        currency: String,
    },
    AccountDownloadEnd {
        account: String,
    },
    AccountUpdateMulti {
        req_id: i32,
        account: String,
        model_code: String,
        tag: String,
        value: String,
        currency: String,
    },
    AccountUpdateMultiEnd {
        req_id: i32,
    },
    AccountSummary {
        req_id: i32,
        account: String,
        tag: String,
        value: String,
        currency: String,
    },
    AccountSummaryEnd {
        req_id: i32,
    },
    Portfolio {
        contract: Contract,
        position: f64,
        market_price: f64,
        market_value: f64,
        average_cost: f64,
        unrealized_pnl: f64,
        realized_pnl: f64,
        account: String,
    },
    Position {
        account: String,
        contract: Contract,
        position: f64,
        avg_cost: f64,
    },
    PositionEnd,
    Pnl {
        req_id: i32,
        daily_pnl: f64,
        unrealized_pnl: f64,
        realized_pnl: f64,
    },
    PnlSingle {
        req_id: i32,
        position: f64,
        daily_pnl: f64,
        unrealized_pnl: f64,
        realized_pnl: f64,
        value: f64,
    },

    OpenOrder {
        order_id: i32,
        contract: Contract,
        order: Order,
        order_state: OrderState,
    },
    OpenOrderEnd,
    CompletedOrder {
        contract: Contract,
        order: Order,
        order_state: OrderState,
    },
    CompletedOrdersEnd,
    OrderStatus {
        order_id: i32,
        status: OrderStatus,
        filled: f64,
        remaining: f64,
        avg_fill_price: f64,
        perm_id: i64,
        parent_id: i32,
        last_fill_price: f64,
        client_id: i32,
        why_held: String,
        mkt_cap_price: f64,
    },
    ExecDetails {
        req_id: i32,
        contract: Contract,
        execution: Execution,
    },
    ExecDetailsEnd {
        req_id: i32,
    },
    CommissionReport {
        report: crate::types::CommissionReport,
    },

    ContractDetails {
        req_id: i32,
        details: ContractDetails,
    },
    ContractDetailsEnd {
        req_id: i32,
    },
    SymbolSamples {
        req_id: i32,
        descriptions: Vec<ContractDescription>,
    },
    MarketRule {
        market_rule_id: i32,
        price_increments: Vec<PriceIncrement>,
    },
    MktDepthExchanges {
        descriptions: Vec<DepthMktDataDescription>,
    },
    SecDefOptParams {
        req_id: i32,
        exchange: String,
        underlying_con_id: i32,
        trading_class: String,
        multiplier: String,
        expirations: Vec<String>,
        strikes: Vec<f64>,
    },
    SecDefOptParamsEnd {
        req_id: i32,
    },

    MarketDataType {
        req_id: i32,
        market_data_type: i32,
    },
    TickPriceSize {
        req_id: i32,
        tick_type: i32,
        price: f64,
        size: f64,
    },
    TickSize {
        req_id: i32,
        tick_type: i32,
        size: f64,
    },
    TickString {
        req_id: i32,
        tick_type: i32,
        value: String,
    },
    TickGeneric {
        req_id: i32,
        tick_type: i32,
        value: f64,
    },
    TickOptionComputation {
        req_id: i32,
        tick_type: i32,
        computation: OptionComputation,
    },
    TickReqParams {
        req_id: i32,
        min_tick: f64,
        bbo_exchange: String,
        snapshot_permissions: i32,
    },
    TickSnapshotEnd {
        req_id: i32,
    },
    TickByTickAllLast {
        req_id: i32,
        tick_type: i32,
        time: i64,
        price: f64,
        size: f64,
        attrib: TickAttribLast,
        exchange: String,
        special_conditions: String,
    },
    TickByTickBidAsk {
        req_id: i32,
        time: i64,
        bid_price: f64,
        ask_price: f64,
        bid_size: f64,
        ask_size: f64,
        attrib: TickAttribBidAsk,
    },
    TickByTickMidPoint {
        req_id: i32,
        time: i64,
        mid_point: f64,
    },
    MarketDepth {
        req_id: i32,
        position: i32,
        operation: i32,
        side: i32,
        price: f64,
        size: f64,
    },
    MarketDepthL2 {
        req_id: i32,
        position: i32,
        market_maker: String,
        operation: i32,
        side: i32,
        price: f64,
        size: f64,
        is_smart_depth: bool,
    },

    HistoricalData {
        req_id: i32,
        bar: BarData,
    },
    HistoricalDataEnd {
        req_id: i32,
    },
    HistoricalDataUpdate {
        req_id: i32,
        bar: BarData,
    },
    RealTimeBar {
        req_id: i32,
        time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        wap: f64,
        count: i32,
    },
    HeadTimestamp {
        req_id: i32,
        timestamp: String,
    },
    HistoricalTicks {
        req_id: i32,
        ticks: Vec<HistoricalTick>,
        done: bool,
    },
    HistoricalTicksBidAsk {
        req_id: i32,
        ticks: Vec<HistoricalTickBidAsk>,
        done: bool,
    },
    HistoricalTicksLast {
        req_id: i32,
        ticks: Vec<HistoricalTickLast>,
        done: bool,
    },

    NewsProviders {
        providers: Vec<NewsProvider>,
    },
    TickNews {
        req_id: i32,
        time_stamp: i64,
        provider_code: String,
        article_id: String,
        headline: String,
        extra_data: String,
    },
    NewsBulletin {
        msg_id: i32,
        msg_type: i32,
        message: String,
        orig_exchange: String,
    },
}

/// Parameters of a live bar subscription, kept so the subscription can be
/// re-issued verbatim when the broker busts the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BarParams {
    RealTime {
        contract: Contract,
        bar_size: i32,
        what_to_show: String,
        use_rth: bool,
    },
    Historical {
        contract: Contract,
        end_date_time: String,
        duration: String,
        bar_size_setting: String,
        what_to_show: String,
        use_rth: bool,
        format_date: i32,
        keep_up_to_date: bool,
    },
}

impl BarParams {
    pub fn contract(&self) -> &Contract {
        match self {
            Self::RealTime { contract, .. } | Self::Historical { contract, .. } => contract,
        }
    }
}

/// Outgoing request message handed to the Transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Request {
    RealTimeBars {
        req_id: i32,
        contract: Contract,
        bar_size: i32,
        what_to_show: String,
        use_rth: bool,
    },
    CancelRealTimeBars {
        req_id: i32,
    },
    HistoricalData {
        req_id: i32,
        contract: Contract,
        end_date_time: String,
        duration: String,
        bar_size_setting: String,
        what_to_show: String,
        use_rth: bool,
        format_date: i32,
        keep_up_to_date: bool,
    },
    CancelHistoricalData {
        req_id: i32,
    },
}

impl Request {
    /// Build the subscribe request that re-issues `params` under `req_id`.
    pub fn resubscribe(req_id: i32, params: &BarParams) -> Self {
        match params.clone() {
            BarParams::RealTime {
                contract,
                bar_size,
                what_to_show,
                use_rth,
            } => Self::RealTimeBars {
                req_id,
                contract,
                bar_size,
                what_to_show,
                use_rth,
            },
            BarParams::Historical {
                contract,
                end_date_time,
                duration,
                bar_size_setting,
                what_to_show,
                use_rth,
                format_date,
                keep_up_to_date,
            } => Self::HistoricalData {
                req_id,
                contract,
                end_date_time,
                duration,
                bar_size_setting,
                what_to_show,
                use_rth,
                format_date,
                keep_up_to_date,
            },
        }
    }
}

/// Outbound seam to the wire.
///
/// The engine only sends when performing automatic recovery; the session
/// layer sends everything else itself. Sending must not block: the engine
/// never suspends mid-handler.
pub trait Transport {
    fn send(&mut self, request: Request);
}

impl Transport for tokio::sync::mpsc::UnboundedSender<Request> {
    fn send(&mut self, request: Request) {
        // A dropped receiver means the connection is already going away;
        // recovery traffic can only be dropped with it.
        let _ = tokio::sync::mpsc::UnboundedSender::send(self, request);
    }
}

/// Transport that discards every request, for sessions that handle
/// recovery resubscription themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn send(&mut self, _request: Request) {}
}

/// Convert a wire epoch-second stamp.
pub fn wire_time(secs: i64) -> DateTime<Utc> {
    use chrono::TimeZone;
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resubscribe_keeps_parameters_identical() {
        let params = BarParams::RealTime {
            contract: Contract::stock("ES", "CME", "USD"),
            bar_size: 5,
            what_to_show: "TRADES".to_string(),
            use_rth: true,
        };
        let request = Request::resubscribe(42, &params);
        match request {
            Request::RealTimeBars {
                req_id,
                bar_size,
                what_to_show,
                use_rth,
                ..
            } => {
                assert_eq!(req_id, 42);
                assert_eq!(bar_size, 5);
                assert_eq!(what_to_show, "TRADES");
                assert!(use_rth);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_unbounded_sender_transport() {
        let (mut tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        Transport::send(&mut tx, Request::CancelRealTimeBars { req_id: 1 });
        assert_eq!(
            rx.try_recv().unwrap(),
            Request::CancelRealTimeBars { req_id: 1 }
        );
    }
}
