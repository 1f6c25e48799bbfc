//! OAuth Token Manager and broker RPC boundary.

pub mod client;
pub mod models;
pub mod signing;
pub mod tokens;

pub use client::{etrade::EtradeClient, BrokerClient};
pub use models::{
    BrokerAccountRecord, BrokerBalance, BrokerOrder, BrokerOrderRequest, BrokerOrderSide,
    BrokerOrderStatus, RawQuote,
};
pub use tokens::{Environment, TokenManager, TokenSet, TokenState};
