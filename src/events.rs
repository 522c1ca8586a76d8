//! Event fan-out.
//!
//! Each notification category keeps its own registered listener list of
//! unbounded channel senders. Emitting clones the payload into every live
//! listener and prunes listeners whose receiver was dropped. Subscribers
//! only ever read; all mutation stays on the engine's dispatch path.

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::errors::{ApiError, RequestFault};
use crate::order::Trade;
use crate::types::{
    AccountValue, CommissionReport, Fill, InstrumentId, NewsBulletin, NewsTick, PnL, PnLSingle,
    PortfolioItem, Position,
};

/// Registered listeners for one event category.
#[derive(Debug)]
pub struct Listeners<T> {
    senders: Vec<UnboundedSender<T>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            senders: Vec::new(),
        }
    }
}

impl<T: Clone> Listeners<T> {
    /// Register a new listener and return its receiving end.
    pub fn subscribe(&mut self) -> UnboundedReceiver<T> {
        let (tx, rx) = unbounded_channel();
        self.senders.push(tx);
        rx
    }

    /// Deliver one event to every live listener, dropping closed ones.
    pub fn emit(&mut self, event: T) {
        self.senders.retain(|sender| sender.send(event.clone()).is_ok());
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }
}

/// Per-bar-series update notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarUpdate {
    pub req_id: i32,
    /// True when a new bar opened, false when the current bar was patched.
    pub has_new_bar: bool,
}

/// All event categories raised by the engine.
///
/// Trade-carrying events deliver a snapshot of the trade at emission time,
/// so late readers are not confused by further mutation.
#[derive(Debug, Default)]
pub struct Events {
    pub account_value: Listeners<AccountValue>,
    pub account_summary: Listeners<AccountValue>,
    pub portfolio: Listeners<PortfolioItem>,
    pub position: Listeners<Position>,
    pub pnl: Listeners<PnL>,
    pub pnl_single: Listeners<PnLSingle>,

    pub open_order: Listeners<Trade>,
    pub order_status: Listeners<Trade>,
    /// Transition into Filled only, not re-raised on replays.
    pub filled: Listeners<Trade>,
    /// Transition into Cancelled only.
    pub cancelled: Listeners<Trade>,
    pub exec_details: Listeners<(Trade, Fill)>,
    pub commission_report: Listeners<(Trade, Fill, CommissionReport)>,

    /// One notification per dirty instrument at the end of a read cycle.
    pub ticker_update: Listeners<InstrumentId>,
    /// The batched dirty set, once per read cycle.
    pub pending_tickers: Listeners<Vec<InstrumentId>>,
    pub bar_update: Listeners<BarUpdate>,

    pub news_tick: Listeners<NewsTick>,
    pub news_bulletin: Listeners<NewsBulletin>,

    /// Every broker-reported error event.
    pub error: Listeners<ApiError>,
    /// Unrecoverable connection faults, broadcast to all subscribers.
    pub fault: Listeners<RequestFault>,
    /// Liveness-watchdog timeout, carrying the idle duration.
    pub timeout: Listeners<std::time::Duration>,
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_all_listeners() {
        let mut listeners = Listeners::default();
        let mut a = listeners.subscribe();
        let mut b = listeners.subscribe();
        listeners.emit(5u32);
        assert_eq!(a.try_recv().unwrap(), 5);
        assert_eq!(b.try_recv().unwrap(), 5);
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let mut listeners = Listeners::default();
        let rx = listeners.subscribe();
        let mut live = listeners.subscribe();
        drop(rx);
        listeners.emit(1u32);
        assert_eq!(listeners.len(), 1);
        assert_eq!(live.try_recv().unwrap(), 1);
    }

    #[test]
    fn test_emit_without_listeners_is_noop() {
        let mut listeners: Listeners<u32> = Listeners::default();
        listeners.emit(1);
        assert!(listeners.is_empty());
    }
}
