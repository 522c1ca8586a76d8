//! Request correlation ledger.
//!
//! Owns the mapping from a correlation key to the pending-completion
//! handle and the accumulating result container for one outstanding unit
//! of work. Replies and end-of-stream markers for the same key can arrive
//! from independent message types, so removal-on-first-resolution is
//! centralized here: resolving a key twice is a no-op, which makes
//! duplicate "end" signals from the wire harmless.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::errors::RequestFault;
use crate::order::{OrderState, Trade};
use crate::types::{
    BarData, Contract, ContractDescription, ContractDetails, DepthMktDataDescription, Fill,
    HistoricalTick, HistoricalTickBidAsk, HistoricalTickLast, NewsProvider, OptionChain,
    OptionComputation, Position, PriceIncrement,
};

/// Requests that are correlated by what they are rather than by a
/// client-assigned id: at most one of each can be outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SingletonRequest {
    AccountValues,
    Positions,
    OpenOrders,
    CompletedOrders,
    MktDepthExchanges,
    NewsProviders,
    CurrentTime,
}

/// Key multiplexing one logical request onto the shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    /// Client-assigned request id (also used for what-if order previews,
    /// which correlate by their order id).
    Request(i32),
    Singleton(SingletonRequest),
    MarketRule(i32),
}

impl From<i32> for CorrelationKey {
    fn from(req_id: i32) -> Self {
        Self::Request(req_id)
    }
}

impl From<SingletonRequest> for CorrelationKey {
    fn from(kind: SingletonRequest) -> Self {
        Self::Singleton(kind)
    }
}

/// One partial-reply payload appended to a request's result container.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseItem {
    ContractDetails(ContractDetails),
    ContractDescription(ContractDescription),
    PriceIncrement(PriceIncrement),
    OptionChain(OptionChain),
    Bar(BarData),
    HistoricalTick(HistoricalTick),
    HistoricalTickBidAsk(HistoricalTickBidAsk),
    HistoricalTickLast(HistoricalTickLast),
    Fill(Fill),
    Trade(Trade),
    Position(Position),
    Greeks(OptionComputation),
    OrderState(OrderState),
    Timestamp(chrono::DateTime<chrono::Utc>),
    DepthExchange(DepthMktDataDescription),
    NewsProvider(NewsProvider),
}

/// Resolution of a pending operation: the accumulated (or explicit)
/// partial replies in arrival order, or a fault.
pub type OperationResult = Result<Vec<ResponseItem>, RequestFault>;

/// Caller-side handle to an outstanding request.
///
/// Resolved at most once by the ledger. Dropping the handle abandons the
/// operation: a reply that still arrives resolves into a closed channel
/// and is discarded without error.
#[derive(Debug)]
pub struct PendingOperation {
    key: CorrelationKey,
    rx: oneshot::Receiver<OperationResult>,
}

impl PendingOperation {
    pub fn key(&self) -> CorrelationKey {
        self.key
    }

    /// Wait for the resolution.
    pub async fn result(self) -> OperationResult {
        match self.rx.await {
            Ok(result) => result,
            // The ledger entry was dropped without resolving (superseded by
            // a newer operation on the same key, or the engine went away).
            Err(_) => Err(RequestFault::ConnectionClosed),
        }
    }

    /// Non-blocking poll, for callers driving their own loop.
    pub fn try_result(&mut self) -> Option<OperationResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(Err(RequestFault::ConnectionClosed))
            }
        }
    }
}

/// The ledger of outstanding operations.
#[derive(Debug, Default)]
pub struct Ledger {
    pending: HashMap<CorrelationKey, oneshot::Sender<OperationResult>>,
    results: HashMap<CorrelationKey, Vec<ResponseItem>>,
    contracts: HashMap<CorrelationKey, Contract>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new unit of work and hand back its completion handle.
    ///
    /// A live operation under the same key is silently replaced (last
    /// writer wins); its abandoned handle resolves as a closed channel.
    pub fn start(&mut self, key: impl Into<CorrelationKey>) -> PendingOperation {
        let key = key.into();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(key, tx);
        self.results.insert(key, Vec::new());
        PendingOperation { key, rx }
    }

    /// Register a new unit of work tied to a contract. The contract is
    /// reported back in error events for the same key.
    pub fn start_with_contract(
        &mut self,
        key: impl Into<CorrelationKey>,
        contract: Contract,
    ) -> PendingOperation {
        let key = key.into();
        let operation = self.start(key);
        self.contracts.insert(key, contract);
        operation
    }

    /// True if the key has a live operation.
    pub fn is_pending(&self, key: impl Into<CorrelationKey>) -> bool {
        self.pending.contains_key(&key.into())
    }

    /// Contract registered for the key, if any.
    pub fn contract(&self, key: impl Into<CorrelationKey>) -> Option<&Contract> {
        self.contracts.get(&key.into())
    }

    /// Attach an auxiliary key-to-contract mapping without starting an
    /// operation (live subscriptions register their contract this way).
    pub fn set_contract(&mut self, key: impl Into<CorrelationKey>, contract: Contract) {
        self.contracts.insert(key.into(), contract);
    }

    pub fn remove_contract(&mut self, key: impl Into<CorrelationKey>) {
        self.contracts.remove(&key.into());
    }

    /// Append one partial reply to the key's result container.
    /// Returns false when no container exists (nobody asked).
    pub fn push(&mut self, key: impl Into<CorrelationKey>, item: ResponseItem) -> bool {
        match self.results.get_mut(&key.into()) {
            Some(items) => {
                items.push(item);
                true
            }
            None => false,
        }
    }

    /// Append a batch of partial replies, preserving arrival order.
    pub fn push_all(
        &mut self,
        key: impl Into<CorrelationKey>,
        items: impl IntoIterator<Item = ResponseItem>,
    ) -> bool {
        match self.results.get_mut(&key.into()) {
            Some(container) => {
                container.extend(items);
                true
            }
            None => false,
        }
    }

    /// True if the key has an accumulating result container.
    pub fn has_container(&self, key: impl Into<CorrelationKey>) -> bool {
        self.results.contains_key(&key.into())
    }

    /// Resolve the key's operation successfully.
    ///
    /// With no explicit value the accumulated container is delivered and
    /// forgotten. Resolving a key with no live operation is a no-op.
    pub fn resolve(&mut self, key: impl Into<CorrelationKey>, value: Option<Vec<ResponseItem>>) {
        let key = key.into();
        self.contracts.remove(&key);
        if let Some(tx) = self.pending.remove(&key) {
            let items = match value {
                Some(items) => {
                    self.results.remove(&key);
                    items
                }
                None => self.results.remove(&key).unwrap_or_default(),
            };
            // The caller may have abandoned the operation; that is fine.
            let _ = tx.send(Ok(items));
        }
    }

    /// Resolve the key's operation with a fault. No-op if absent.
    pub fn fail(&mut self, key: impl Into<CorrelationKey>, fault: RequestFault) {
        let key = key.into();
        self.contracts.remove(&key);
        self.results.remove(&key);
        if let Some(tx) = self.pending.remove(&key) {
            let _ = tx.send(Err(fault));
        }
    }

    /// Fail every outstanding operation with the same fault. Used on
    /// connection loss, the one case where an error is broadcast to many
    /// unrelated waiters.
    pub fn fail_all(&mut self, fault: RequestFault) -> usize {
        let failed = self.pending.len();
        for (_, tx) in self.pending.drain() {
            let _ = tx.send(Err(fault.clone()));
        }
        self.results.clear();
        self.contracts.clear();
        failed
    }

    /// Number of outstanding operations.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop all state without resolving anything.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.results.clear();
        self.contracts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceIncrement;

    fn increment(low_edge: f64) -> ResponseItem {
        ResponseItem::PriceIncrement(PriceIncrement {
            low_edge,
            increment: 0.01,
        })
    }

    #[test]
    fn test_partials_accumulate_in_arrival_order() {
        let mut ledger = Ledger::new();
        let mut op = ledger.start(1);
        ledger.push(1, increment(1.0));
        ledger.push(1, increment(2.0));
        ledger.push(1, increment(3.0));
        ledger.resolve(1, None);

        let items = op.try_result().unwrap().unwrap();
        assert_eq!(items, vec![increment(1.0), increment(2.0), increment(3.0)]);
    }

    #[test]
    fn test_resolve_twice_is_idempotent() {
        let mut ledger = Ledger::new();
        let mut op = ledger.start(1);
        ledger.resolve(1, None);
        // Duplicate end signal from the wire.
        ledger.resolve(1, None);
        assert!(op.try_result().unwrap().is_ok());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_explicit_value_overrides_container() {
        let mut ledger = Ledger::new();
        let mut op = ledger.start(1);
        ledger.push(1, increment(1.0));
        ledger.resolve(1, Some(vec![increment(9.0)]));
        let items = op.try_result().unwrap().unwrap();
        assert_eq!(items, vec![increment(9.0)]);
        assert!(!ledger.has_container(1));
    }

    #[test]
    fn test_push_without_operation_is_rejected() {
        let mut ledger = Ledger::new();
        assert!(!ledger.push(5, increment(1.0)));
    }

    #[test]
    fn test_last_writer_wins_on_key_reuse() {
        let mut ledger = Ledger::new();
        let mut first = ledger.start(1);
        let mut second = ledger.start(1);
        ledger.push(1, increment(42.0));
        ledger.resolve(1, None);

        // The replaced operation observes a dead channel.
        assert_eq!(
            first.try_result(),
            Some(Err(RequestFault::ConnectionClosed))
        );
        assert!(second.try_result().unwrap().is_ok());
    }

    #[test]
    fn test_abandonment_is_safe() {
        let mut ledger = Ledger::new();
        let op = ledger.start(7);
        drop(op);
        ledger.push(7, increment(1.0));
        // Resolution into a dropped handle must neither panic nor leak the
        // ledger entry.
        ledger.resolve(7, None);
        assert!(ledger.is_empty());
        assert!(!ledger.has_container(7));
    }

    #[test]
    fn test_fail_all_broadcasts_connection_fault() {
        let mut ledger = Ledger::new();
        let mut ops: Vec<_> = (1..=3).map(|id| ledger.start(id)).collect();
        let failed = ledger.fail_all(RequestFault::ConnectionClosed);
        assert_eq!(failed, 3);
        for op in &mut ops {
            assert_eq!(
                op.try_result(),
                Some(Err(RequestFault::ConnectionClosed))
            );
        }
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_resolve_clears_contract_mapping() {
        let mut ledger = Ledger::new();
        let contract = Contract::stock("AAPL", "SMART", "USD");
        let _op = ledger.start_with_contract(3, contract);
        assert!(ledger.contract(3).is_some());
        ledger.resolve(3, None);
        assert!(ledger.contract(3).is_none());
    }

    #[tokio::test]
    async fn test_async_await_resolution() {
        let mut ledger = Ledger::new();
        let op = ledger.start(CorrelationKey::Singleton(SingletonRequest::Positions));
        ledger.push(
            SingletonRequest::Positions,
            ResponseItem::Position(Position::default()),
        );
        ledger.resolve(SingletonRequest::Positions, None);
        let items = op.result().await.unwrap();
        assert_eq!(items.len(), 1);
    }
}
