use chrono::{DateTime, Utc};
use engine_types::Symbol;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BrokerOrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone)]
pub struct BrokerOrderRequest {
    pub account_key: String,
    pub symbol: Symbol,
    pub side: BrokerOrderSide,
    pub quantity: u64,
    pub client_tag: String,
}

impl BrokerOrderRequest {
    pub fn buy(account_key: impl Into<String>, symbol: Symbol, quantity: u64, client_tag: impl Into<String>) -> Self {
        Self {
            account_key: account_key.into(),
            symbol,
            side: BrokerOrderSide::Buy,
            quantity,
            client_tag: client_tag.into(),
        }
    }

    pub fn sell(account_key: impl Into<String>, symbol: Symbol, quantity: u64, client_tag: impl Into<String>) -> Self {
        Self {
            account_key: account_key.into(),
            symbol,
            side: BrokerOrderSide::Sell,
            quantity,
            client_tag: client_tag.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerOrderStatus {
    Open,
    Executed,
    PartiallyFilled,
    Canceled,
    Rejected,
    Expired,
}

#[derive(Debug, Clone)]
pub struct BrokerOrder {
    pub order_id: String,
    pub status: BrokerOrderStatus,
    pub filled_quantity: u64,
    pub filled_avg_price: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct BrokerAccountRecord {
    pub account_id: String,
    pub account_key: String,
}

#[derive(Debug, Clone)]
pub struct BrokerBalance {
    pub available_cash: Decimal,
    pub total_account_value: Decimal,
}

#[derive(Debug, Clone)]
pub struct RawQuote {
    pub symbol: Symbol,
    pub last: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub volume: u64,
    pub day_high: Option<Decimal>,
    pub day_low: Option<Decimal>,
    pub prev_close: Option<Decimal>,
    pub captured_at: DateTime<Utc>,
}
