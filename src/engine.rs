//! The inbound-message reconciliation engine.
//!
//! Owns every piece of session state — account values, positions, trades,
//! quote state, pending operations — and applies each decoded inbound
//! message to it in wire-delivery order. All mutation happens on this
//! dispatch path; subscribers only read.
//!
//! # Read cycles
//!
//! The Transport brackets each batch of inbound frames with
//! [`Engine::begin_cycle`] and [`Engine::end_cycle`]. The dirty-instrument
//! set is cleared at the cycle start and drained at the cycle end, where
//! one update notification per dirty instrument plus one batched
//! notification are emitted. However many ticks an instrument received in
//! the cycle, it flushes once.
//!
//! # Lifecycle
//!
//! State is built on connect and reconstructed from the broker's
//! open-order/position snapshot replay on reconnect. `connection_closed`
//! fails every outstanding operation with a connection-closed fault and
//! resets all state; nothing is persisted.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::errors::{ApiError, RequestFault, Result};
use crate::events::{BarUpdate, Events};
use crate::ledger::{
    CorrelationKey, Ledger, PendingOperation, ResponseItem, SingletonRequest,
};
use crate::messages::{wire_time, BarParams, Message, Request, Transport};
use crate::order::{
    Order, OrderKey, OrderState, OrderStatus, OrderStatusReport, Trade, TradeLogEntry,
};
use crate::ticker::Ticker;
use crate::types::{
    is_unset_double, AccountSummaryKey, AccountValue, AccountValueKey, BarData, CommissionReport,
    Contract, Defaults, DepthOperation, DepthSide, Execution, Fill, InstrumentId, NewsBulletin,
    NewsTick, PnL, PnLSingle, PortfolioItem, Position, TickByTick, UNSET_INTEGER,
};
use crate::watchdog::{Watchdog, WatchdogCheck};

/// Severity of a broker-reported error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Warning,
    Error,
}

/// Codes the broker labels as errors but which leave the order live.
const WARNING_CODES: [i32; 10] = [105, 110, 165, 321, 329, 399, 404, 434, 492, 10167];

/// Code signalling that depth data for the request was reset server-side.
const CODE_DEPTH_RESET: i32 = 317;

/// Code signalling that a live bar subscription was busted and must be
/// re-issued.
const CODE_STREAM_BUST: i32 = 10225;

/// Statically classify an error code, ignoring context.
///
/// A contiguous band of system codes is always a warning. Two codes get a
/// contextual override on top of this (see the error handler): a
/// price-out-of-bounds report escalates to an error when it concerns a
/// request or an order still pending submission.
pub fn classify_error_code(code: i32) -> ErrorSeverity {
    if WARNING_CODES.contains(&code) || (2100..2200).contains(&code) {
        ErrorSeverity::Warning
    } else {
        ErrorSeverity::Error
    }
}

/// Kinds of streaming market data multiplexed onto one instrument's
/// quote state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickerStream {
    MarketData,
    Depth,
    TickByTickLast,
    TickByTickAllLast,
    TickByTickBidAsk,
    TickByTickMidPoint,
}

/// A live bar subscription: its resend parameters and the accumulated
/// series.
#[derive(Debug, Clone)]
pub struct BarSeries {
    pub params: BarParams,
    pub bars: Vec<BarData>,
}

/// Engine configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    pub defaults: Defaults,
    /// Fail pending operations on broker-reported request errors. When
    /// off, a failed request resolves with whatever partial results
    /// accumulated.
    pub raise_request_errors: bool,
}

/// The reconciliation engine. See the module docs.
pub struct Engine {
    defaults: Defaults,
    raise_request_errors: bool,
    transport: Box<dyn Transport + Send>,

    events: Events,
    ledger: Ledger,
    watchdog: Watchdog,

    accounts: Vec<String>,
    client_id: i32,
    next_order_id: i32,
    /// Time of the current read cycle's first frame.
    last_time: DateTime<Utc>,

    account_values: HashMap<AccountValueKey, AccountValue>,
    account_summary: HashMap<AccountSummaryKey, AccountValue>,
    portfolio: HashMap<String, HashMap<i32, PortfolioItem>>,
    positions: HashMap<String, HashMap<i32, Position>>,

    trades: HashMap<OrderKey, Trade>,
    perm_id_index: HashMap<i64, OrderKey>,
    fills: HashMap<String, Fill>,

    tickers: HashMap<InstrumentId, Ticker>,
    dirty: HashSet<InstrumentId>,
    req_to_instrument: HashMap<i32, InstrumentId>,
    stream_req_ids: HashMap<(TickerStream, InstrumentId), i32>,

    bar_series: HashMap<i32, BarSeries>,
    pnl: HashMap<i32, PnL>,
    pnl_single: HashMap<i32, PnLSingle>,
    pnl_key_to_req: HashMap<(String, String), i32>,
    pnl_single_key_to_req: HashMap<(String, String, i32), i32>,

    news_ticks: Vec<NewsTick>,
    news_bulletins: HashMap<i32, NewsBulletin>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("client_id", &self.client_id)
            .field("accounts", &self.accounts)
            .field("trades", &self.trades.len())
            .field("tickers", &self.tickers.len())
            .field("pending", &self.ledger.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new<T: Transport + Send + 'static>(transport: T, config: EngineConfig) -> Self {
        Self {
            defaults: config.defaults,
            raise_request_errors: config.raise_request_errors,
            transport: Box::new(transport),
            events: Events::new(),
            ledger: Ledger::new(),
            watchdog: Watchdog::new(),
            accounts: Vec::new(),
            client_id: -1,
            next_order_id: 0,
            last_time: DateTime::<Utc>::MIN_UTC,
            account_values: HashMap::new(),
            account_summary: HashMap::new(),
            portfolio: HashMap::new(),
            positions: HashMap::new(),
            trades: HashMap::new(),
            perm_id_index: HashMap::new(),
            fills: HashMap::new(),
            tickers: HashMap::new(),
            dirty: HashSet::new(),
            req_to_instrument: HashMap::new(),
            stream_req_ids: HashMap::new(),
            bar_series: HashMap::new(),
            pnl: HashMap::new(),
            pnl_single: HashMap::new(),
            pnl_key_to_req: HashMap::new(),
            pnl_single_key_to_req: HashMap::new(),
            news_ticks: Vec::new(),
            news_bulletins: HashMap::new(),
        }
    }

    // === Session lifecycle ===

    /// Drop all session state back to the just-constructed shape.
    /// Event listeners survive a reset.
    pub fn reset(&mut self) {
        self.accounts.clear();
        self.client_id = -1;
        self.next_order_id = 0;
        self.last_time = DateTime::<Utc>::MIN_UTC;
        self.account_values.clear();
        self.account_summary.clear();
        self.portfolio.clear();
        self.positions.clear();
        self.trades.clear();
        self.perm_id_index.clear();
        self.fills.clear();
        self.tickers.clear();
        self.dirty.clear();
        self.req_to_instrument.clear();
        self.stream_req_ids.clear();
        self.bar_series.clear();
        self.pnl.clear();
        self.pnl_single.clear();
        self.pnl_key_to_req.clear();
        self.pnl_single_key_to_req.clear();
        self.news_ticks.clear();
        self.news_bulletins.clear();
        self.ledger.clear();
        self.watchdog.disarm();
    }

    /// Must be called by the Transport exactly once per disconnect,
    /// before any reconnect. Fails every outstanding operation with a
    /// connection-closed fault, raises the global fault event and resets.
    pub fn connection_closed(&mut self) {
        let failed = self.ledger.fail_all(RequestFault::ConnectionClosed);
        if failed > 0 {
            warn!(failed, "connection closed with outstanding operations");
        }
        self.events.fault.emit(RequestFault::ConnectionClosed);
        self.reset();
    }

    // === Read cycle boundaries ===

    /// Start an inbound-read cycle: stamp the cycle time and clear the
    /// previous cycle's dirty set and per-instrument tick logs.
    pub fn begin_cycle(&mut self) {
        self.last_time = Utc::now();
        self.watchdog.touch();
        for instrument in self.dirty.drain() {
            if let Some(ticker) = self.tickers.get_mut(&instrument) {
                ticker.begin_cycle();
            }
        }
    }

    /// End the cycle: flush the dirty set. One notification per dirty
    /// instrument plus the batched set, regardless of tick counts.
    pub fn end_cycle(&mut self) {
        if self.dirty.is_empty() {
            return;
        }
        let dirty: Vec<InstrumentId> = self.dirty.iter().copied().collect();
        for &instrument in &dirty {
            if let Some(ticker) = self.tickers.get_mut(&instrument) {
                ticker.time = Some(self.last_time);
            }
            self.events.ticker_update.emit(instrument);
        }
        self.events.pending_tickers.emit(dirty);
    }

    // === Liveness watchdog ===

    /// Arm the liveness watchdog; zero disarms.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.watchdog.set_timeout(timeout);
    }

    /// Deferred liveness check. Emits the timeout event when the idle
    /// limit elapsed; otherwise returns how long to wait before checking
    /// again. None means disarmed (or just fired).
    pub fn poll_watchdog(&mut self) -> Option<Duration> {
        match self.watchdog.check(Instant::now()) {
            WatchdogCheck::TimedOut(idle) => {
                debug!(idle_secs = idle.as_secs_f64(), "connection liveness timeout");
                self.events.timeout.emit(idle);
                None
            }
            WatchdogCheck::Wait(remaining) => Some(remaining),
            WatchdogCheck::Disarmed => None,
        }
    }

    // === Requests and subscriptions (session-layer surface) ===

    /// Register a unit of work around a request the session is sending.
    pub fn start_operation(&mut self, key: impl Into<CorrelationKey>) -> PendingOperation {
        self.ledger.start(key)
    }

    /// Like [`Engine::start_operation`], also tying the key to a contract
    /// for error reporting.
    pub fn start_operation_for_contract(
        &mut self,
        key: impl Into<CorrelationKey>,
        contract: Contract,
    ) -> PendingOperation {
        self.ledger.start_with_contract(key, contract)
    }

    /// Register a market-data stream for an instrument, creating (or
    /// reusing) its quote state.
    pub fn start_ticker(
        &mut self,
        req_id: i32,
        contract: Contract,
        stream: TickerStream,
    ) -> InstrumentId {
        let instrument = contract.instrument_id();
        self.tickers
            .entry(instrument)
            .or_insert_with(|| Ticker::new(contract.clone()));
        self.req_to_instrument.insert(req_id, instrument);
        self.stream_req_ids.insert((stream, instrument), req_id);
        self.ledger.set_contract(req_id, contract);
        instrument
    }

    /// Unregister a stream; returns the request id it was using so the
    /// session can send the matching cancel. The quote state stays: late
    /// in-flight ticks still apply, and other streams may share it.
    pub fn end_ticker(&mut self, instrument: InstrumentId, stream: TickerStream) -> Option<i32> {
        let req_id = self.stream_req_ids.remove(&(stream, instrument))?;
        self.ledger.remove_contract(req_id);
        Some(req_id)
    }

    /// Register a live bar subscription so its data reconciles and the
    /// engine can re-issue it on a stream bust.
    pub fn start_bars(&mut self, req_id: i32, params: BarParams) {
        self.ledger
            .set_contract(req_id, params.contract().clone());
        self.bar_series.insert(
            req_id,
            BarSeries {
                params,
                bars: Vec::new(),
            },
        );
    }

    /// Unregister a live bar subscription, returning the accumulated
    /// series.
    pub fn end_bars(&mut self, req_id: i32) -> Option<BarSeries> {
        self.ledger.remove_contract(req_id);
        self.bar_series.remove(&req_id)
    }

    /// Register a live account-PnL subscription.
    pub fn start_pnl(&mut self, req_id: i32, account: &str, model_code: &str) {
        self.pnl.insert(
            req_id,
            PnL {
                account: account.to_string(),
                model_code: model_code.to_string(),
                ..PnL::default()
            },
        );
        self.pnl_key_to_req
            .insert((account.to_string(), model_code.to_string()), req_id);
    }

    pub fn end_pnl(&mut self, req_id: i32) {
        if let Some(pnl) = self.pnl.remove(&req_id) {
            self.pnl_key_to_req.remove(&(pnl.account, pnl.model_code));
        }
    }

    /// Register a live single-position PnL subscription.
    pub fn start_pnl_single(&mut self, req_id: i32, account: &str, model_code: &str, con_id: i32) {
        self.pnl_single.insert(
            req_id,
            PnLSingle {
                account: account.to_string(),
                model_code: model_code.to_string(),
                con_id,
                ..PnLSingle::default()
            },
        );
        self.pnl_single_key_to_req
            .insert((account.to_string(), model_code.to_string(), con_id), req_id);
    }

    pub fn end_pnl_single(&mut self, req_id: i32) {
        if let Some(pnl) = self.pnl_single.remove(&req_id) {
            self.pnl_single_key_to_req
                .remove(&(pnl.account, pnl.model_code, pnl.con_id));
        }
    }

    /// Record that the session placed or modified an order.
    ///
    /// A new order creates its Trade in PendingSubmit; re-registering an
    /// existing key records a modification request in the trade log (the
    /// wire does not always acknowledge successful modifications, so the
    /// status handler synthesizes one from this entry).
    pub fn register_order(&mut self, contract: Contract, order: Order) -> OrderKey {
        let key = OrderKey::derive(order.client_id, order.order_id, order.perm_id);
        let order_id = order.order_id;
        if let Some(trade) = self.trades.get_mut(&key) {
            let status = trade.status.status;
            trade.order = order;
            trade.log.push(TradeLogEntry {
                time: self.last_time,
                status,
                message: "Modify".to_string(),
                error_code: 0,
            });
        } else {
            let status = OrderStatusReport {
                order_id,
                status: OrderStatus::PendingSubmit,
                remaining: order.total_quantity,
                client_id: order.client_id,
                ..OrderStatusReport::default()
            };
            let mut trade = Trade::new(contract, order, status);
            trade.log.push(TradeLogEntry {
                time: self.last_time,
                status: OrderStatus::PendingSubmit,
                message: String::new(),
                error_code: 0,
            });
            self.trades.insert(key, trade);
        }
        self.update_order_id_floor(order_id + 1);
        key
    }

    // === Dispatch ===

    /// Apply one decoded inbound message.
    ///
    /// A returned error is a protocol fault: that message was not applied
    /// (beyond any already-consistent partial work), shared state is not
    /// corrupted, and subsequent messages process normally.
    pub fn dispatch(&mut self, message: Message) -> Result<()> {
        self.watchdog.touch();
        match message {
            Message::ManagedAccounts { accounts } => {
                self.accounts = accounts
                    .split(',')
                    .filter(|account| !account.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            Message::NextValidId { order_id } => self.update_order_id_floor(order_id),
            Message::CurrentTime { time } => {
                self.ledger.resolve(
                    SingletonRequest::CurrentTime,
                    Some(vec![ResponseItem::Timestamp(wire_time(time))]),
                );
            }
            Message::Error {
                req_id,
                code,
                message,
                advanced_order_reject,
            } => self.on_error(req_id, code, message, advanced_order_reject),

            Message::AccountValue {
                account,
                tag,
                value,
                currency,
            } => self.on_account_value(account, tag, value, currency, String::new()),
            Message::AccountDownloadEnd { account: _ } => {
                self.ledger.resolve(SingletonRequest::AccountValues, None);
            }
            Message::AccountUpdateMulti {
                req_id: _,
                account,
                model_code,
                tag,
                value,
                currency,
            } => self.on_account_value(account, tag, value, currency, model_code),
            Message::AccountUpdateMultiEnd { req_id } => self.ledger.resolve(req_id, None),
            Message::AccountSummary {
                req_id: _,
                account,
                tag,
                value,
                currency,
            } => {
                let record = AccountValue {
                    account,
                    tag,
                    value,
                    currency,
                    model_code: String::new(),
                };
                self.account_summary.insert(
                    (
                        record.account.clone(),
                        record.tag.clone(),
                        record.currency.clone(),
                    ),
                    record.clone(),
                );
                self.events.account_summary.emit(record);
            }
            Message::AccountSummaryEnd { req_id } => self.ledger.resolve(req_id, None),
            Message::Portfolio {
                contract,
                position,
                market_price,
                market_value,
                average_cost,
                unrealized_pnl,
                realized_pnl,
                account,
            } => {
                let item = PortfolioItem {
                    contract,
                    position,
                    market_price,
                    market_value,
                    average_cost,
                    unrealized_pnl,
                    realized_pnl,
                    account,
                };
                let rows = self.portfolio.entry(item.account.clone()).or_default();
                if item.position == 0.0 {
                    // Flat means gone: no zero rows.
                    rows.remove(&item.contract.con_id);
                } else {
                    rows.insert(item.contract.con_id, item.clone());
                }
                info!(
                    account = %item.account,
                    con_id = item.contract.con_id,
                    position = item.position,
                    "portfolio update"
                );
                self.events.portfolio.emit(item);
            }
            Message::Position {
                account,
                contract,
                position,
                avg_cost,
            } => {
                let record = Position {
                    account,
                    contract,
                    position,
                    avg_cost,
                };
                let rows = self.positions.entry(record.account.clone()).or_default();
                if record.position == 0.0 {
                    rows.remove(&record.contract.con_id);
                } else {
                    rows.insert(record.contract.con_id, record.clone());
                }
                info!(
                    account = %record.account,
                    con_id = record.contract.con_id,
                    position = record.position,
                    "position update"
                );
                self.ledger.push(
                    SingletonRequest::Positions,
                    ResponseItem::Position(record.clone()),
                );
                self.events.position.emit(record);
            }
            Message::PositionEnd => self.ledger.resolve(SingletonRequest::Positions, None),
            Message::Pnl {
                req_id,
                daily_pnl,
                unrealized_pnl,
                realized_pnl,
            } => {
                if let Some(pnl) = self.pnl.get_mut(&req_id) {
                    pnl.daily_pnl = daily_pnl;
                    pnl.unrealized_pnl = unrealized_pnl;
                    pnl.realized_pnl = realized_pnl;
                    let snapshot = pnl.clone();
                    self.events.pnl.emit(snapshot);
                }
            }
            Message::PnlSingle {
                req_id,
                position,
                daily_pnl,
                unrealized_pnl,
                realized_pnl,
                value,
            } => {
                if let Some(pnl) = self.pnl_single.get_mut(&req_id) {
                    pnl.position = position;
                    pnl.daily_pnl = daily_pnl;
                    pnl.unrealized_pnl = unrealized_pnl;
                    pnl.realized_pnl = realized_pnl;
                    pnl.value = value;
                    let snapshot = pnl.clone();
                    self.events.pnl_single.emit(snapshot);
                }
            }

            Message::OpenOrder {
                order_id,
                contract,
                order,
                order_state,
            } => self.on_open_order(order_id, contract, order, order_state),
            Message::OpenOrderEnd => self.ledger.resolve(SingletonRequest::OpenOrders, None),
            Message::CompletedOrder {
                contract,
                order,
                order_state,
            } => self.on_completed_order(contract, order, order_state),
            Message::CompletedOrdersEnd => {
                self.ledger.resolve(SingletonRequest::CompletedOrders, None);
            }
            Message::OrderStatus {
                order_id,
                status,
                filled,
                remaining,
                avg_fill_price,
                perm_id,
                parent_id,
                last_fill_price,
                client_id,
                why_held,
                mkt_cap_price,
            } => self.on_order_status(OrderStatusReport {
                order_id,
                status,
                filled,
                remaining,
                avg_fill_price,
                perm_id,
                parent_id,
                last_fill_price,
                client_id,
                why_held,
                mkt_cap_price,
            }),
            Message::ExecDetails {
                req_id,
                contract,
                execution,
            } => self.on_exec_details(req_id, contract, execution),
            Message::ExecDetailsEnd { req_id } => self.ledger.resolve(req_id, None),
            Message::CommissionReport { report } => self.on_commission_report(report),

            Message::ContractDetails { req_id, details } => {
                self.ledger
                    .push(req_id, ResponseItem::ContractDetails(details));
            }
            Message::ContractDetailsEnd { req_id } => self.ledger.resolve(req_id, None),
            Message::SymbolSamples {
                req_id,
                descriptions,
            } => {
                let items = descriptions
                    .into_iter()
                    .map(ResponseItem::ContractDescription)
                    .collect();
                self.ledger.resolve(req_id, Some(items));
            }
            Message::MarketRule {
                market_rule_id,
                price_increments,
            } => {
                let items = price_increments
                    .into_iter()
                    .map(ResponseItem::PriceIncrement)
                    .collect();
                self.ledger
                    .resolve(CorrelationKey::MarketRule(market_rule_id), Some(items));
            }
            Message::MktDepthExchanges { descriptions } => {
                let items = descriptions
                    .into_iter()
                    .map(ResponseItem::DepthExchange)
                    .collect();
                self.ledger
                    .resolve(SingletonRequest::MktDepthExchanges, Some(items));
            }
            Message::SecDefOptParams {
                req_id,
                exchange,
                underlying_con_id,
                trading_class,
                multiplier,
                expirations,
                strikes,
            } => {
                self.ledger.push(
                    req_id,
                    ResponseItem::OptionChain(crate::types::OptionChain {
                        exchange,
                        underlying_con_id,
                        trading_class,
                        multiplier,
                        expirations,
                        strikes,
                    }),
                );
            }
            Message::SecDefOptParamsEnd { req_id } => self.ledger.resolve(req_id, None),

            Message::MarketDataType {
                req_id,
                market_data_type,
            } => {
                if let Some(ticker) = self.ticker_for_request_mut(req_id) {
                    ticker.market_data_type = market_data_type;
                }
            }
            Message::TickPriceSize {
                req_id,
                tick_type,
                price,
                size,
            } => {
                let (defaults, time) = (self.defaults, self.last_time);
                let Some(instrument) = self.instrument_for(req_id) else {
                    error!(req_id, tick_type, "price tick for unknown request");
                    return Ok(());
                };
                let Some(ticker) = self.tickers.get_mut(&instrument) else {
                    return Ok(());
                };
                if ticker.apply_price_size(tick_type, price, size, &defaults, time)? {
                    self.dirty.insert(instrument);
                }
            }
            Message::TickSize {
                req_id,
                tick_type,
                size,
            } => {
                let (defaults, time) = (self.defaults, self.last_time);
                let Some(instrument) = self.instrument_for(req_id) else {
                    error!(req_id, tick_type, "size tick for unknown request");
                    return Ok(());
                };
                let Some(ticker) = self.tickers.get_mut(&instrument) else {
                    return Ok(());
                };
                if ticker.apply_size(tick_type, size, &defaults, time)? {
                    self.dirty.insert(instrument);
                }
            }
            Message::TickString {
                req_id,
                tick_type,
                value,
            } => {
                let time = self.last_time;
                let Some(instrument) = self.instrument_for(req_id) else {
                    return Ok(());
                };
                let Some(ticker) = self.tickers.get_mut(&instrument) else {
                    return Ok(());
                };
                if ticker.apply_string(tick_type, &value, time)? {
                    self.dirty.insert(instrument);
                }
            }
            Message::TickGeneric {
                req_id,
                tick_type,
                value,
            } => {
                let (defaults, time) = (self.defaults, self.last_time);
                let Some(instrument) = self.instrument_for(req_id) else {
                    return Ok(());
                };
                let Some(ticker) = self.tickers.get_mut(&instrument) else {
                    return Ok(());
                };
                if ticker.apply_generic(tick_type, value, &defaults, time)? {
                    self.dirty.insert(instrument);
                }
            }
            Message::TickOptionComputation {
                req_id,
                tick_type,
                computation,
            } => {
                if let Some(instrument) = self.instrument_for(req_id) {
                    if let Some(ticker) = self.tickers.get_mut(&instrument) {
                        if ticker.apply_greeks(tick_type, computation)? {
                            self.dirty.insert(instrument);
                        }
                        return Ok(());
                    }
                }
                if self.ledger.is_pending(req_id) {
                    // Reply to a standalone volatility/price computation.
                    self.ledger
                        .resolve(req_id, Some(vec![ResponseItem::Greeks(computation)]));
                } else {
                    error!(req_id, "option computation for unknown request");
                }
            }
            Message::TickReqParams {
                req_id,
                min_tick,
                bbo_exchange,
                snapshot_permissions,
            } => {
                if let Some(ticker) = self.ticker_for_request_mut(req_id) {
                    ticker.min_tick = min_tick;
                    ticker.bbo_exchange = bbo_exchange;
                    ticker.snapshot_permissions = snapshot_permissions;
                }
            }
            Message::TickSnapshotEnd { req_id } => self.ledger.resolve(req_id, None),
            Message::TickByTickAllLast {
                req_id,
                tick_type,
                time: _,
                price,
                size,
                attrib,
                exchange,
                special_conditions,
            } => {
                let event = TickByTick::AllLast {
                    tick_type,
                    time: self.last_time,
                    price,
                    size,
                    attrib,
                    exchange,
                    special_conditions,
                };
                self.apply_tick_by_tick(req_id, event);
            }
            Message::TickByTickBidAsk {
                req_id,
                time: _,
                bid_price,
                ask_price,
                bid_size,
                ask_size,
                attrib,
            } => {
                let event = TickByTick::BidAsk {
                    time: self.last_time,
                    bid_price,
                    ask_price,
                    bid_size,
                    ask_size,
                    attrib,
                };
                self.apply_tick_by_tick(req_id, event);
            }
            Message::TickByTickMidPoint {
                req_id,
                time: _,
                mid_point,
            } => {
                let event = TickByTick::MidPoint {
                    time: self.last_time,
                    mid_point,
                };
                self.apply_tick_by_tick(req_id, event);
            }
            Message::MarketDepth {
                req_id,
                position,
                operation,
                side,
                price,
                size,
            } => {
                self.on_market_depth(req_id, position, String::new(), operation, side, price, size)?
            }
            Message::MarketDepthL2 {
                req_id,
                position,
                market_maker,
                operation,
                side,
                price,
                size,
                is_smart_depth: _,
            } => self.on_market_depth(req_id, position, market_maker, operation, side, price, size)?,

            Message::HistoricalData { req_id, bar } => {
                self.ledger.push(req_id, ResponseItem::Bar(bar));
            }
            Message::HistoricalDataEnd { req_id } => self.ledger.resolve(req_id, None),
            Message::HistoricalDataUpdate { req_id, bar } => {
                self.on_historical_data_update(req_id, bar);
            }
            Message::RealTimeBar {
                req_id,
                time,
                open,
                high,
                low,
                close,
                volume,
                wap,
                count,
            } => {
                let bar = BarData {
                    date: wire_time(time),
                    open,
                    high,
                    low,
                    close,
                    volume,
                    wap,
                    bar_count: count,
                };
                if let Some(series) = self.bar_series.get_mut(&req_id) {
                    series.bars.push(bar);
                    self.events.bar_update.emit(BarUpdate {
                        req_id,
                        has_new_bar: true,
                    });
                }
            }
            Message::HeadTimestamp { req_id, timestamp } => {
                match crate::types::parse_wire_datetime(&timestamp) {
                    Some(parsed) => self
                        .ledger
                        .resolve(req_id, Some(vec![ResponseItem::Timestamp(parsed)])),
                    None => self.ledger.fail(req_id, RequestFault::BadReply(timestamp)),
                }
            }
            Message::HistoricalTicks {
                req_id,
                ticks,
                done,
            } => {
                self.ledger
                    .push_all(req_id, ticks.into_iter().map(ResponseItem::HistoricalTick));
                if done {
                    self.ledger.resolve(req_id, None);
                }
            }
            Message::HistoricalTicksBidAsk {
                req_id,
                ticks,
                done,
            } => {
                self.ledger.push_all(
                    req_id,
                    ticks.into_iter().map(ResponseItem::HistoricalTickBidAsk),
                );
                if done {
                    self.ledger.resolve(req_id, None);
                }
            }
            Message::HistoricalTicksLast {
                req_id,
                ticks,
                done,
            } => {
                self.ledger.push_all(
                    req_id,
                    ticks.into_iter().map(ResponseItem::HistoricalTickLast),
                );
                if done {
                    self.ledger.resolve(req_id, None);
                }
            }

            Message::NewsProviders { providers } => {
                let items = providers.into_iter().map(ResponseItem::NewsProvider).collect();
                self.ledger
                    .resolve(SingletonRequest::NewsProviders, Some(items));
            }
            Message::TickNews {
                req_id: _,
                time_stamp,
                provider_code,
                article_id,
                headline,
                extra_data,
            } => {
                let news = NewsTick {
                    time_stamp,
                    provider_code,
                    article_id,
                    headline,
                    extra_data,
                };
                self.news_ticks.push(news.clone());
                self.events.news_tick.emit(news);
            }
            Message::NewsBulletin {
                msg_id,
                msg_type,
                message,
                orig_exchange,
            } => {
                let bulletin = NewsBulletin {
                    msg_id,
                    msg_type,
                    message,
                    orig_exchange,
                };
                self.news_bulletins.insert(msg_id, bulletin.clone());
                self.events.news_bulletin.emit(bulletin);
            }
        }
        Ok(())
    }

    // === Handlers ===

    fn on_account_value(
        &mut self,
        account: String,
        tag: String,
        value: String,
        currency: String,
        model_code: String,
    ) {
        let record = AccountValue {
            account,
            tag,
            value,
            currency,
            model_code,
        };
        self.account_values.insert(record.key(), record.clone());
        self.events.account_value.emit(record);
    }

    fn on_open_order(
        &mut self,
        order_id: i32,
        contract: Contract,
        order: Order,
        order_state: OrderState,
    ) {
        if order.what_if {
            // Margin preview replies correlate by the order id; the
            // preview may be echoed before it is populated.
            if !is_unset_double(order_state.init_margin_change) {
                self.ledger.resolve(
                    order.order_id,
                    Some(vec![ResponseItem::OrderState(order_state)]),
                );
            }
        } else {
            let key = OrderKey::derive(order.client_id, order.order_id, order.perm_id);
            let perm_id = order.perm_id;
            let snapshot = if let Some(trade) = self.trades.get_mut(&key) {
                trade.order.perm_id = order.perm_id;
                trade.order.total_quantity = order.total_quantity;
                trade.order.lmt_price = order.lmt_price;
                trade.order.aux_price = order.aux_price;
                trade.order.order_type = order.order_type.clone();
                trade.order.order_ref = order.order_ref.clone();
                trade.clone()
            } else {
                let status = OrderStatusReport {
                    order_id,
                    status: order_state.status,
                    ..OrderStatusReport::default()
                };
                let trade = Trade::new(contract, order, status);
                info!(?key, "open order created trade");
                self.trades.insert(key, trade.clone());
                trade
            };
            if perm_id != 0 {
                self.perm_id_index.entry(perm_id).or_insert(key);
            }
            if self.ledger.has_container(SingletonRequest::OpenOrders) {
                self.ledger
                    .push(SingletonRequest::OpenOrders, ResponseItem::Trade(snapshot));
            } else {
                self.events.open_order.emit(snapshot);
            }
        }

        // Keep locally issued order ids above anything observed, even from
        // other clients, to avoid duplicate-id rejections.
        self.update_order_id_floor(order_id + 1);
    }

    fn on_completed_order(&mut self, contract: Contract, order: Order, order_state: OrderState) {
        let perm_id = order.perm_id;
        let status = OrderStatusReport {
            order_id: order.order_id,
            status: order_state.status,
            ..OrderStatusReport::default()
        };
        let trade = Trade::new(contract, order, status);
        self.ledger.push(
            SingletonRequest::CompletedOrders,
            ResponseItem::Trade(trade.clone()),
        );
        if !self.perm_id_index.contains_key(&perm_id) {
            let key = OrderKey::Perm(perm_id);
            self.perm_id_index.insert(perm_id, key);
            self.trades.insert(key, trade);
        }
    }

    fn on_order_status(&mut self, candidate: OrderStatusReport) {
        let key = OrderKey::derive(candidate.client_id, candidate.order_id, candidate.perm_id);
        let Some(trade) = self.trades.get_mut(&key) else {
            error!(
                order_id = candidate.order_id,
                client_id = candidate.client_id,
                "order status for unknown order"
            );
            return;
        };

        let old_status = trade.status.status;
        let status = candidate.status;
        let message = if candidate != trade.status {
            trade.status = candidate;
            Some(String::new())
        } else if status == OrderStatus::Submitted
            && trade.log.last().is_some_and(|entry| entry.message == "Modify")
        {
            // The wire acknowledged our modification only by replaying the
            // unchanged status; synthesize the acknowledgment.
            Some("Modified".to_string())
        } else {
            // Redundant replay: no log entry, no notification.
            None
        };
        let Some(message) = message else { return };

        trade.log.push(TradeLogEntry {
            time: self.last_time,
            status,
            message,
            error_code: 0,
        });
        let snapshot = trade.clone();
        info!(?key, %status, "order status");
        self.events.order_status.emit(snapshot.clone());
        if status != old_status {
            // Terminal notifications fire on the transition, not the level.
            if status == OrderStatus::Filled {
                self.events.filled.emit(snapshot);
            } else if status == OrderStatus::Cancelled {
                self.events.cancelled.emit(snapshot);
            }
        }
    }

    fn on_exec_details(&mut self, req_id: i32, contract: Contract, mut execution: Execution) {
        // Broker quirk: executions of manually placed orders report an
        // unset order id.
        if execution.order_id == UNSET_INTEGER {
            execution.order_id = 0;
        }

        let key = self
            .perm_id_index
            .get(&execution.perm_id)
            .copied()
            .or_else(|| {
                let key =
                    OrderKey::derive(execution.client_id, execution.order_id, execution.perm_id);
                self.trades.contains_key(&key).then_some(key)
            });

        let contract = match key.and_then(|key| self.trades.get(&key)) {
            Some(trade) if trade.contract == contract => trade.contract.clone(),
            _ => contract,
        };

        let exec_id = execution.exec_id.clone();
        // Replies to an execution query carry their own timestamps; live
        // fills are stamped with the cycle time.
        let is_live = !self.ledger.is_pending(req_id);
        let time = if is_live { self.last_time } else { execution.time };
        let fill = Fill {
            contract,
            execution,
            commission_report: CommissionReport::default(),
            time,
        };

        if !self.fills.contains_key(&exec_id) {
            self.fills.insert(exec_id.clone(), fill.clone());
            if let Some(key) = key {
                let mut snapshot = None;
                if let Some(trade) = self.trades.get_mut(&key) {
                    trade.fills.push(fill.clone());
                    trade.log.push(TradeLogEntry {
                        time,
                        status: trade.status.status,
                        message: format!(
                            "Fill {}@{}",
                            fill.execution.shares, fill.execution.price
                        ),
                        error_code: 0,
                    });
                    snapshot = Some(trade.clone());
                }
                if is_live {
                    if let Some(snapshot) = snapshot {
                        info!(exec_id = %exec_id, shares = fill.execution.shares, "execution");
                        self.events.exec_details.emit((snapshot, fill.clone()));
                    }
                }
            }
        }

        if !is_live {
            self.ledger.push(req_id, ResponseItem::Fill(fill));
        }
    }

    fn on_commission_report(&mut self, mut report: CommissionReport) {
        if is_unset_double(report.yield_amount) {
            report.yield_amount = 0.0;
        }
        if is_unset_double(report.realized_pnl) {
            report.realized_pnl = 0.0;
        }

        let Some(fill) = self.fills.get_mut(&report.exec_id) else {
            // Not an execution of this client.
            debug!(exec_id = %report.exec_id, "commission report for unknown execution");
            return;
        };
        fill.commission_report = report.clone();
        let perm_id = fill.execution.perm_id;
        let fill_snapshot = fill.clone();

        if let Some(&key) = self.perm_id_index.get(&perm_id) {
            let mut snapshot = None;
            if let Some(trade) = self.trades.get_mut(&key) {
                if let Some(trade_fill) = trade
                    .fills
                    .iter_mut()
                    .find(|fill| fill.execution.exec_id == report.exec_id)
                {
                    trade_fill.commission_report = report.clone();
                }
                snapshot = Some(trade.clone());
            }
            if let Some(snapshot) = snapshot {
                info!(exec_id = %report.exec_id, commission = report.commission, "commission report");
                self.events
                    .commission_report
                    .emit((snapshot, fill_snapshot, report));
            }
        }
        // With no owning trade the execution predates this session; the
        // update is recorded on the fill only.
    }

    fn apply_tick_by_tick(&mut self, req_id: i32, event: TickByTick) {
        let defaults = self.defaults;
        let Some(instrument) = self.instrument_for(req_id) else {
            error!(req_id, "tick-by-tick for unknown request");
            return;
        };
        let Some(ticker) = self.tickers.get_mut(&instrument) else {
            return;
        };
        if ticker.apply_tick_by_tick(event, &defaults) {
            self.dirty.insert(instrument);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_market_depth(
        &mut self,
        req_id: i32,
        position: i32,
        market_maker: String,
        operation: i32,
        side: i32,
        price: f64,
        size: f64,
    ) -> Result<()> {
        let operation = DepthOperation::from_wire(operation)
            .ok_or(crate::errors::Error::UnmappedDepthOperation { operation })?;
        let side =
            DepthSide::from_wire(side).ok_or(crate::errors::Error::UnmappedDepthSide { side })?;
        let time = self.last_time;
        let Some(instrument) = self.instrument_for(req_id) else {
            error!(req_id, "depth update for unknown request");
            return Ok(());
        };
        let Some(ticker) = self.tickers.get_mut(&instrument) else {
            return Ok(());
        };
        if ticker.apply_depth(position, market_maker, operation, side, price, size, time) {
            self.dirty.insert(instrument);
        }
        Ok(())
    }

    fn on_historical_data_update(&mut self, req_id: i32, bar: BarData) {
        let Some(series) = self.bar_series.get_mut(&req_id) else {
            return;
        };
        let has_new_bar = match series.bars.last() {
            None => true,
            Some(last) => {
                if bar.date < last.date {
                    // Out-of-order patch for an already-closed bar.
                    return;
                }
                bar.date > last.date
            }
        };
        if has_new_bar {
            series.bars.push(bar);
        } else if let Some(last) = series.bars.last_mut() {
            if *last == bar {
                return;
            }
            *last = bar;
        }
        self.events.bar_update.emit(BarUpdate { req_id, has_new_bar });
    }

    fn on_error(&mut self, req_id: i32, code: i32, message: String, advanced_order_reject: String) {
        let is_request = self.ledger.is_pending(req_id);
        // The id of an order-related error is the local order id; -1 marks
        // a global event.
        let order_key = OrderKey::Client {
            client_id: self.client_id,
            order_id: req_id,
        };
        let trade_known = req_id != -1 && self.trades.contains_key(&order_key);

        let mut is_warning = classify_error_code(code) == ErrorSeverity::Warning;
        if code == 110 && is_request {
            // Price-bound report on a request (e.g. a what-if preview)
            // fails that request.
            is_warning = false;
        }
        if code == 110
            && trade_known
            && self
                .trades
                .get(&order_key)
                .is_some_and(|trade| trade.status.status == OrderStatus::PendingSubmit)
        {
            // An invalid price on a not-yet-live order kills the order.
            is_warning = false;
        }

        let contract = self.ledger.contract(req_id).cloned();
        let mut text = format!(
            "{} {code}, reqId {req_id}: {message}",
            if is_warning { "Warning" } else { "Error" }
        );
        if let Some(contract) = &contract {
            text.push_str(&format!(", contract: {}", contract.symbol));
        }

        if is_warning {
            if trade_known {
                let mut snapshot = None;
                if let Some(trade) = self.trades.get_mut(&order_key) {
                    // The order is still live at the broker; record the
                    // warning without touching the trade's existence.
                    trade.status.status = OrderStatus::ValidationError;
                    trade.log.push(TradeLogEntry {
                        time: self.last_time,
                        status: OrderStatus::ValidationError,
                        message: text.clone(),
                        error_code: code,
                    });
                    snapshot = Some(trade.clone());
                }
                if let Some(snapshot) = snapshot {
                    warn!(order_id = req_id, code, "broker validation warning");
                    self.events.order_status.emit(snapshot);
                }
            } else {
                info!("{text}");
            }
        } else {
            error!("{text}");
            if is_request {
                if self.raise_request_errors {
                    self.ledger.fail(
                        req_id,
                        RequestFault::Api {
                            req_id,
                            code,
                            message: message.clone(),
                        },
                    );
                } else {
                    self.ledger.resolve(req_id, None);
                }
            } else if trade_known {
                let mut cancelled = None;
                if let Some(trade) = self.trades.get_mut(&order_key) {
                    if !advanced_order_reject.is_empty() {
                        trade.advanced_error = advanced_order_reject;
                    }
                    if !trade.is_done() {
                        trade.status.status = OrderStatus::Cancelled;
                        trade.log.push(TradeLogEntry {
                            time: self.last_time,
                            status: OrderStatus::Cancelled,
                            message: text.clone(),
                            error_code: code,
                        });
                        cancelled = Some(trade.clone());
                    }
                }
                if let Some(snapshot) = cancelled {
                    warn!(order_id = req_id, code, "order cancelled by broker error");
                    self.events.order_status.emit(snapshot.clone());
                    self.events.cancelled.emit(snapshot);
                }
            }
        }

        match code {
            CODE_DEPTH_RESET => {
                // Local recovery: clear and re-announce an empty book.
                let time = self.last_time;
                if let Some(instrument) = self.instrument_for(req_id) {
                    if let Some(ticker) = self.tickers.get_mut(&instrument) {
                        ticker.clear_depth(time);
                        self.dirty.insert(instrument);
                    }
                }
            }
            CODE_STREAM_BUST => {
                // Local recovery: transparently re-issue the original bar
                // subscription with identical parameters.
                if let Some(series) = self.bar_series.get(&req_id) {
                    let params = series.params.clone();
                    let cancel = match &params {
                        BarParams::RealTime { .. } => Request::CancelRealTimeBars { req_id },
                        BarParams::Historical { .. } => Request::CancelHistoricalData { req_id },
                    };
                    info!(req_id, "resubscribing busted bar stream");
                    self.transport.send(cancel);
                    self.transport.send(Request::resubscribe(req_id, &params));
                }
            }
            _ => {}
        }

        self.events.error.emit(ApiError {
            req_id,
            code,
            message,
            contract,
        });
    }

    // === Lookups ===

    fn instrument_for(&self, req_id: i32) -> Option<InstrumentId> {
        self.req_to_instrument.get(&req_id).copied()
    }

    fn ticker_for_request_mut(&mut self, req_id: i32) -> Option<&mut Ticker> {
        let instrument = *self.req_to_instrument.get(&req_id)?;
        self.tickers.get_mut(&instrument)
    }

    fn update_order_id_floor(&mut self, candidate: i32) {
        self.next_order_id = self.next_order_id.max(candidate);
    }

    // === Read-only accessors ===

    pub fn events(&mut self) -> &mut Events {
        &mut self.events
    }

    pub fn accounts(&self) -> &[String] {
        &self.accounts
    }

    pub fn client_id(&self) -> i32 {
        self.client_id
    }

    /// Set by the session layer once the connection handshake assigns it.
    pub fn set_client_id(&mut self, client_id: i32) {
        self.client_id = client_id;
    }

    /// Smallest order id safe for the session layer to issue next.
    pub fn next_order_id(&self) -> i32 {
        self.next_order_id
    }

    pub fn account_values(&self) -> &HashMap<AccountValueKey, AccountValue> {
        &self.account_values
    }

    pub fn account_summary(&self) -> &HashMap<AccountSummaryKey, AccountValue> {
        &self.account_summary
    }

    pub fn portfolio(&self, account: &str) -> Option<&HashMap<i32, PortfolioItem>> {
        self.portfolio.get(account)
    }

    pub fn positions(&self) -> &HashMap<String, HashMap<i32, Position>> {
        &self.positions
    }

    pub fn trades(&self) -> &HashMap<OrderKey, Trade> {
        &self.trades
    }

    pub fn trade(&self, key: &OrderKey) -> Option<&Trade> {
        self.trades.get(key)
    }

    pub fn trade_by_perm_id(&self, perm_id: i64) -> Option<&Trade> {
        self.trades.get(self.perm_id_index.get(&perm_id)?)
    }

    pub fn fills(&self) -> &HashMap<String, Fill> {
        &self.fills
    }

    pub fn tickers(&self) -> &HashMap<InstrumentId, Ticker> {
        &self.tickers
    }

    pub fn ticker(&self, instrument: InstrumentId) -> Option<&Ticker> {
        self.tickers.get(&instrument)
    }

    pub fn ticker_for_request(&self, req_id: i32) -> Option<&Ticker> {
        self.tickers.get(self.req_to_instrument.get(&req_id)?)
    }

    pub fn bar_series(&self, req_id: i32) -> Option<&BarSeries> {
        self.bar_series.get(&req_id)
    }

    pub fn pnl(&self, req_id: i32) -> Option<&PnL> {
        self.pnl.get(&req_id)
    }

    pub fn pnl_single(&self, req_id: i32) -> Option<&PnLSingle> {
        self.pnl_single.get(&req_id)
    }

    pub fn pnl_req_id(&self, account: &str, model_code: &str) -> Option<i32> {
        self.pnl_key_to_req
            .get(&(account.to_string(), model_code.to_string()))
            .copied()
    }

    pub fn news_ticks(&self) -> &[NewsTick] {
        &self.news_ticks
    }

    pub fn news_bulletins(&self) -> &HashMap<i32, NewsBulletin> {
        &self.news_bulletins
    }
}
