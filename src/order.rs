//! Order records, status classification and the Trade aggregate.
//!
//! A [`Trade`] is created on first sighting of an order and is never
//! deleted: it persists as an audit trail for the process lifetime even
//! after reaching a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Contract, Fill, UNSET_DOUBLE};

/// Order lifecycle status.
///
/// The label set is closed; class membership (waiting / working / active /
/// done) is a static lookup from the label and nothing else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    #[default]
    PendingSubmit,
    PendingCancel,
    PreSubmitted,
    Submitted,
    ApiPending,
    ApiCancelled,
    ApiUpdate,
    Cancelled,
    Filled,
    Inactive,
    /// Transient state set when the broker reports a validation warning on
    /// a live order. Not terminal: the order stays working at the broker.
    ValidationError,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingSubmit => "PendingSubmit",
            Self::PendingCancel => "PendingCancel",
            Self::PreSubmitted => "PreSubmitted",
            Self::Submitted => "Submitted",
            Self::ApiPending => "ApiPending",
            Self::ApiCancelled => "ApiCancelled",
            Self::ApiUpdate => "ApiUpdate",
            Self::Cancelled => "Cancelled",
            Self::Filled => "Filled",
            Self::Inactive => "Inactive",
            Self::ValidationError => "ValidationError",
        }
    }

    /// Completed, cancelled or destroyed by the broker's risk management.
    pub fn is_done(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::ApiCancelled | Self::Inactive
        )
    }

    /// Capable of executing at some time in the future.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::PendingSubmit
                | Self::ApiPending
                | Self::PreSubmitted
                | Self::Submitted
                | Self::ValidationError
                | Self::ApiUpdate
        )
    }

    /// Sent to the broker but not live against an exchange yet.
    pub fn is_waiting(self) -> bool {
        matches!(self, Self::PendingSubmit | Self::ApiPending | Self::PreSubmitted)
    }

    /// Live and hittable against public exchanges.
    pub fn is_working(self) -> bool {
        matches!(self, Self::Submitted | Self::ValidationError | Self::ApiUpdate)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an order within the session.
///
/// API-submitted orders key by (client id, order id); orders with no
/// locally-assigned id (placed manually at the broker, or visible from
/// another session) key by the broker's permanent id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKey {
    Client { client_id: i32, order_id: i32 },
    Perm(i64),
}

impl OrderKey {
    /// Derive the key the same way for every handler that resolves a Trade.
    pub fn derive(client_id: i32, order_id: i32, perm_id: i64) -> Self {
        if order_id <= 0 {
            Self::Perm(perm_id)
        } else {
            Self::Client { client_id, order_id }
        }
    }
}

/// Order parameters as submitted (or as reported for foreign orders).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: i32,
    pub client_id: i32,
    pub perm_id: i64,
    pub action: String,
    pub total_quantity: f64,
    pub order_type: String,
    pub lmt_price: f64,
    pub aux_price: f64,
    pub tif: String,
    pub order_ref: String,
    pub account: String,
    pub transmit: bool,
    /// Margin/commission preview request; never routed.
    pub what_if: bool,
}

impl Default for Order {
    fn default() -> Self {
        Self {
            order_id: 0,
            client_id: 0,
            perm_id: 0,
            action: String::new(),
            total_quantity: 0.0,
            order_type: String::new(),
            lmt_price: UNSET_DOUBLE,
            aux_price: UNSET_DOUBLE,
            tif: String::new(),
            order_ref: String::new(),
            account: String::new(),
            transmit: true,
            what_if: false,
        }
    }
}

/// Broker-computed margin and commission preview attached to an
/// open-order reply. For what-if orders this is the requested result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderState {
    pub status: OrderStatus,
    pub init_margin_change: f64,
    pub maint_margin_change: f64,
    pub equity_with_loan_change: f64,
    pub commission: f64,
    pub min_commission: f64,
    pub max_commission: f64,
    pub commission_currency: String,
    pub warning_text: String,
}

impl Default for OrderState {
    fn default() -> Self {
        Self {
            status: OrderStatus::default(),
            init_margin_change: UNSET_DOUBLE,
            maint_margin_change: UNSET_DOUBLE,
            equity_with_loan_change: UNSET_DOUBLE,
            commission: UNSET_DOUBLE,
            min_commission: UNSET_DOUBLE,
            max_commission: UNSET_DOUBLE,
            commission_currency: String::new(),
            warning_text: String::new(),
        }
    }
}

/// Latest order-status snapshot for a trade.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusReport {
    pub order_id: i32,
    pub status: OrderStatus,
    pub filled: f64,
    pub remaining: f64,
    pub avg_fill_price: f64,
    pub perm_id: i64,
    pub parent_id: i32,
    pub last_fill_price: f64,
    pub client_id: i32,
    pub why_held: String,
    pub mkt_cap_price: f64,
}

impl OrderStatusReport {
    /// Total size of the requested order.
    pub fn total(&self) -> f64 {
        self.filled + self.remaining
    }
}

/// One entry of a trade's audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeLogEntry {
    pub time: DateTime<Utc>,
    pub status: OrderStatus,
    pub message: String,
    pub error_code: i32,
}

/// An order together with its status snapshot, fills and audit log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub contract: Contract,
    pub order: Order,
    pub status: OrderStatusReport,
    pub fills: Vec<Fill>,
    pub log: Vec<TradeLogEntry>,
    /// Structured reject payload, when the broker attached one.
    pub advanced_error: String,
}

impl Trade {
    pub fn new(contract: Contract, order: Order, status: OrderStatusReport) -> Self {
        Self {
            contract,
            order,
            status,
            fills: Vec::new(),
            log: Vec::new(),
            advanced_error: String::new(),
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.status.status.is_waiting()
    }

    pub fn is_working(&self) -> bool {
        self.status.status.is_working()
    }

    pub fn is_active(&self) -> bool {
        self.status.status.is_active()
    }

    pub fn is_done(&self) -> bool {
        self.status.status.is_done()
    }

    /// Quantity filled so far.
    ///
    /// Combo orders report both the combo and per-leg executions; only the
    /// combo-level fills count toward the order's quantity.
    pub fn filled_quantity(&self) -> f64 {
        self.fills
            .iter()
            .filter(|fill| self.contract.sec_type != "BAG" || fill.contract.sec_type == "BAG")
            .map(|fill| fill.execution.shares)
            .sum()
    }

    /// Quantity remaining to be filled.
    pub fn remaining_quantity(&self) -> f64 {
        self.order.total_quantity - self.filled_quantity()
    }

    /// Parse the structured reject payload, if one was attached.
    pub fn advanced_error_json(&self) -> Option<serde_json::Value> {
        if self.advanced_error.is_empty() {
            return None;
        }
        serde_json::from_str(&self.advanced_error).ok()
    }
}
