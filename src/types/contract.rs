//! Instrument descriptions and contract lookup results.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Stable in-memory identity of an instrument.
///
/// Quote state is keyed by this so that multiple concurrent subscription
/// types for the same instrument share one state record.
pub type InstrumentId = u64;

/// Tradable instrument description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub con_id: i32,
    pub symbol: String,
    pub sec_type: String,
    pub last_trade_date: String,
    pub strike: f64,
    pub right: String,
    pub multiplier: String,
    pub exchange: String,
    pub primary_exchange: String,
    pub currency: String,
    pub local_symbol: String,
    pub trading_class: String,
}

impl Contract {
    /// Minimal constructor for the common stock case.
    pub fn stock(symbol: &str, exchange: &str, currency: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            sec_type: "STK".to_string(),
            exchange: exchange.to_string(),
            currency: currency.to_string(),
            ..Self::default()
        }
    }

    /// Identity hash used to key quote state.
    ///
    /// The broker-assigned contract id is authoritative when present;
    /// otherwise the descriptive fields identify the instrument so that
    /// state can be created before a lookup completed.
    pub fn instrument_id(&self) -> InstrumentId {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        if self.con_id != 0 {
            self.con_id.hash(&mut hasher);
        } else {
            self.symbol.hash(&mut hasher);
            self.sec_type.hash(&mut hasher);
            self.last_trade_date.hash(&mut hasher);
            self.strike.to_bits().hash(&mut hasher);
            self.right.hash(&mut hasher);
            self.exchange.hash(&mut hasher);
            self.currency.hash(&mut hasher);
            self.local_symbol.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Full contract description returned by a contract-details lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDetails {
    pub contract: Contract,
    pub market_name: String,
    pub min_tick: f64,
    pub order_types: String,
    pub valid_exchanges: String,
    pub price_magnifier: i32,
    pub under_con_id: i32,
    pub long_name: String,
    pub contract_month: String,
    pub industry: String,
    pub category: String,
    pub time_zone_id: String,
    pub trading_hours: String,
    pub liquid_hours: String,
}

/// One match from a symbol-sample lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDescription {
    pub contract: Contract,
    pub derivative_sec_types: Vec<String>,
}

/// One band of a market rule's price increments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceIncrement {
    pub low_edge: f64,
    pub increment: f64,
}

/// Option chain parameters for one exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionChain {
    pub exchange: String,
    pub underlying_con_id: i32,
    pub trading_class: String,
    pub multiplier: String,
    pub expirations: Vec<String>,
    pub strikes: Vec<f64>,
}

/// Exchanges offering depth data, from a depth-exchanges lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthMktDataDescription {
    pub exchange: String,
    pub sec_type: String,
    pub listing_exch: String,
    pub service_data_type: String,
    pub agg_group: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_id_prefers_con_id() {
        let mut a = Contract::stock("AAPL", "SMART", "USD");
        let mut b = Contract::stock("MSFT", "SMART", "USD");
        a.con_id = 265598;
        b.con_id = 265598;
        // Same broker id means same instrument, whatever the descriptive fields say.
        assert_eq!(a.instrument_id(), b.instrument_id());
    }

    #[test]
    fn test_instrument_id_descriptive_fallback() {
        let a = Contract::stock("AAPL", "SMART", "USD");
        let b = Contract::stock("AAPL", "SMART", "USD");
        let c = Contract::stock("AAPL", "SMART", "EUR");
        assert_eq!(a.instrument_id(), b.instrument_id());
        assert_ne!(a.instrument_id(), c.instrument_id());
    }
}
