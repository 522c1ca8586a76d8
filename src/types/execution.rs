//! Execution and commission records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::contract::Contract;

/// One execution (partial or full) reported by the broker.
///
/// Identified by `exec_id`; the same execution may be replayed by the wire
/// and must reconcile to a single fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub exec_id: String,
    pub time: DateTime<Utc>,
    pub acct_number: String,
    pub exchange: String,
    pub side: String,
    pub shares: f64,
    pub price: f64,
    pub perm_id: i64,
    pub client_id: i32,
    pub order_id: i32,
    pub liquidation: i32,
    pub cum_qty: f64,
    pub avg_price: f64,
}

impl Default for Execution {
    fn default() -> Self {
        Self {
            exec_id: String::new(),
            time: DateTime::<Utc>::MIN_UTC,
            acct_number: String::new(),
            exchange: String::new(),
            side: String::new(),
            shares: 0.0,
            price: 0.0,
            perm_id: 0,
            client_id: 0,
            order_id: 0,
            liquidation: 0,
            cum_qty: 0.0,
            avg_price: 0.0,
        }
    }
}

/// Commission attribution for one execution, delivered separately and
/// matched by execution id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionReport {
    pub exec_id: String,
    pub commission: f64,
    pub currency: String,
    pub realized_pnl: f64,
    pub yield_amount: f64,
    pub yield_redemption_date: i32,
}

/// An execution attached to a trade, later enriched by its commission
/// report. Immutable apart from that enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub contract: Contract,
    pub execution: Execution,
    pub commission_report: CommissionReport,
    pub time: DateTime<Utc>,
}
