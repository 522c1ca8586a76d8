//! Account, position and PnL records.

use serde::{Deserialize, Serialize};

use super::contract::Contract;

/// Key for the account-value map: (account, tag, currency, model code).
pub type AccountValueKey = (String, String, String, String);

/// Key for the account-summary map: (account, tag, currency).
pub type AccountSummaryKey = (String, String, String);

/// One tag of an account's value snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountValue {
    pub account: String,
    pub tag: String,
    pub value: String,
    pub currency: String,
    pub model_code: String,
}

impl AccountValue {
    pub fn key(&self) -> AccountValueKey {
        (
            self.account.clone(),
            self.tag.clone(),
            self.currency.clone(),
            self.model_code.clone(),
        )
    }
}

/// Held position in one instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub account: String,
    pub contract: Contract,
    pub position: f64,
    pub avg_cost: f64,
}

/// Portfolio row: a position plus its mark and PnL attribution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioItem {
    pub contract: Contract,
    pub position: f64,
    pub market_price: f64,
    pub market_value: f64,
    pub average_cost: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub account: String,
}

/// Live account-level PnL subscription state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PnL {
    pub account: String,
    pub model_code: String,
    pub daily_pnl: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
}

/// Live single-position PnL subscription state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PnLSingle {
    pub account: String,
    pub model_code: String,
    pub con_id: i32,
    pub daily_pnl: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub position: f64,
    pub value: f64,
}
