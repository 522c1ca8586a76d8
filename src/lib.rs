#![deny(unreachable_pub)]

//! Client-side reconciliation engine for the Interactive Brokers wire
//! protocol.
//!
//! One persistent connection carries interleaved replies to many
//! outstanding requests and an unbounded number of live subscriptions,
//! multiplexed by small integer ids. This crate turns that stream of
//! loosely-ordered, partially-redundant inbound events into a consistent
//! queryable in-memory model: request/response correlation with
//! at-most-one completion per request, per-instrument quote-delta
//! tracking with batched flush, order/trade/fill reconciliation, error
//! classification with automatic recovery, and liveness watchdog.
//!
//! The byte-level wire protocol is not implemented here: an external
//! Transport decodes frames into [`Message`] values and feeds them to
//! [`Engine::dispatch`], bracketed by [`Engine::begin_cycle`] /
//! [`Engine::end_cycle`] per read batch, and calls
//! [`Engine::connection_closed`] exactly once per disconnect.

// Core modules
mod engine;
mod errors;
mod events;
mod ledger;
mod messages;
mod order;
mod ticker;
mod watchdog;

// Shared vocabulary
pub mod ticks;
pub mod types;

// Re-exports
pub use engine::{
    classify_error_code, BarSeries, Engine, EngineConfig, ErrorSeverity, TickerStream,
};
pub use errors::{ApiError, Error, RequestFault, Result};
pub use events::{BarUpdate, Events, Listeners};
pub use ledger::{
    CorrelationKey, Ledger, OperationResult, PendingOperation, ResponseItem, SingletonRequest,
};
pub use messages::{wire_time, BarParams, Message, NullTransport, Request, Transport};
pub use order::{
    Order, OrderKey, OrderState, OrderStatus, OrderStatusReport, Trade, TradeLogEntry,
};
pub use ticker::Ticker;
pub use watchdog::{Watchdog, WatchdogCheck};
