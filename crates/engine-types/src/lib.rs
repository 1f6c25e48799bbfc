//! Shared types for the trading engine: the `Symbol`, `Quote`, `Signal`,
//! `Position` and `EngineConfig` shapes every component crate depends on
//! without depending on each other.

pub mod alert;
pub mod config;
pub mod error;
pub mod phase;
pub mod position;
pub mod quote;
pub mod signal;
pub mod symbol;

pub use alert::{Alert, DailyReport, EntryAlert, ExitAlert, Heartbeat};
pub use config::{ConfigError, EngineConfig};
pub use error::EngineError;
pub use phase::Phase;
pub use position::{ExitReason, Position, PositionState, TradeRecord};
pub use quote::{AccountSnapshot, BrokerPosition, Quote};
pub use signal::{Agreement, EtradeMode, Side, Signal, StrategyMode, SystemMode};
pub use symbol::Symbol;
