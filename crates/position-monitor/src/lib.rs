//! Stealth Trailing Monitor: per-position exit state machine plus the
//! single position-map mutex it drives every tick.

pub mod machine;
pub mod monitor;

pub use machine::{tick, ExitDecision, TickFeatures};
pub use monitor::{ClosedPosition, PositionMonitor};
