use serde::{Deserialize, Serialize};
use std::fmt;

/// A ticker symbol: 1-5 uppercase letters. Immutable identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let upper = raw.to_ascii_uppercase();
        if upper.is_empty()
            || upper.len() > 5
            || !upper.chars().all(|c| c.is_ascii_uppercase())
        {
            return None;
        }
        Some(Self(upper))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_lowercase_and_long_tickers() {
        assert!(Symbol::new("aapl").is_some()); // normalized to uppercase
        assert_eq!(Symbol::new("aapl").unwrap().as_str(), "AAPL");
        assert!(Symbol::new("TOOLONG").is_none());
        assert!(Symbol::new("").is_none());
        assert!(Symbol::new("AB1").is_none());
    }
}
