use thiserror::Error;

/// Shared error taxonomy. Components return these kinds rather than ad
/// hoc strings so the scheduler and HTTP surface can reason about escalation
/// uniformly.
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("token expired: {0}")]
    TokenExpired(String),
    #[error("transient token error: {0}")]
    TokenTransient(String),
    #[error("transient broker error: {0}")]
    BrokerTransient(String),
    #[error("permanent broker error: {0}")]
    BrokerPermanent(String),
    #[error("data unavailable for one or more symbols: {0}")]
    DataUnavailable(String),
    #[error("position data-starved: {0}")]
    DataStarved(String),
    #[error("safe mode active: {0}")]
    SafeModeTripped(String),
    #[error("notification send failed: {0}")]
    SendError(String),
}
