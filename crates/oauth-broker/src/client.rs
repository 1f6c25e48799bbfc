use crate::models::{BrokerAccountRecord, BrokerBalance, BrokerOrder, BrokerOrderRequest, RawQuote};
use async_trait::async_trait;
use engine_types::{EngineError, Symbol};
use std::collections::BTreeMap;

/// The broker's HTTP surface is out of scope — this trait is
/// the opaque RPC boundary the engine calls through. Exactly the four
/// operations this system needs, plus an order-status read used to confirm
/// fills.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn list_accounts(&self) -> Result<Vec<BrokerAccountRecord>, EngineError>;
    async fn get_balance(&self, account_key: &str) -> Result<BrokerBalance, EngineError>;
    async fn batch_quotes(&self, symbols: &[Symbol]) -> Result<BTreeMap<Symbol, RawQuote>, EngineError>;
    async fn place_order(&self, request: &BrokerOrderRequest) -> Result<BrokerOrder, EngineError>;
    async fn get_order(&self, account_key: &str, order_id: &str) -> Result<BrokerOrder, EngineError>;
    fn is_paper(&self) -> bool;
    fn broker_name(&self) -> &str;
}

pub mod etrade {
    use super::*;
    use crate::signing::{sign, OAuthCredentials};
    use crate::tokens::{Environment, TokenManager};
    use chrono::Utc;
    use engine_types::config::EngineConfig;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// Concrete OAuth1.0a-signed client for an E*TRADE-shaped brokerage API.
    /// Mirrors the reqwest-client-plus-typed-conversion shape the corpus
    /// uses for its broker adapters, with HMAC-SHA1 request signing instead
    /// of a static API-key header.
    pub struct EtradeClient {
        http: reqwest::Client,
        base_url: String,
        tokens: Arc<TokenManager>,
        env: Environment,
        sandbox: bool,
    }

    impl EtradeClient {
        pub fn new(base_url: impl Into<String>, tokens: Arc<TokenManager>, env: Environment, sandbox: bool) -> Self {
            Self {
                http: reqwest::Client::new(),
                base_url: base_url.into(),
                tokens,
                env,
                sandbox,
            }
        }

        fn authorization_header(&self, method: &str, url: &str, params: &BTreeMap<String, String>) -> Result<String, EngineError> {
            let creds = self
                .tokens
                .credentials_for_signing(self.env)
                .map_err(|e| EngineError::TokenExpired(e.to_string()))?;
            let oauth_creds = OAuthCredentials {
                consumer_key: &creds.consumer_key,
                consumer_secret: &creds.consumer_secret,
                token: Some(&creds.access_token),
                token_secret: Some(&creds.access_token_secret),
            };
            Ok(sign(method, url, params, &oauth_creds))
        }

        async fn signed_get(&self, path: &str, params: &BTreeMap<String, String>) -> Result<reqwest::Response, EngineError> {
            let url = format!("{}{}", self.base_url, path);
            let header = self.authorization_header("GET", &url, params)?;
            let resp = self
                .http
                .get(&url)
                .query(params)
                .header("Authorization", header)
                .timeout(std::time::Duration::from_secs(10))
                .send()
                .await
                .map_err(|e| EngineError::BrokerTransient(e.to_string()))?;
            self.check_response(resp)
        }

        async fn signed_post(&self, path: &str, params: &BTreeMap<String, String>) -> Result<reqwest::Response, EngineError> {
            let url = format!("{}{}", self.base_url, path);
            let header = self.authorization_header("POST", &url, params)?;
            let resp = self
                .http
                .post(&url)
                .form(params)
                .header("Authorization", header)
                .timeout(std::time::Duration::from_secs(10))
                .send()
                .await
                .map_err(|e| EngineError::BrokerTransient(e.to_string()))?;
            self.check_response(resp)
        }

        /// Classifies the response status before anything else observes it.
        /// Only a genuinely successful response resets the token's
        /// `last_used_at`; a 401 marks the token EXPIRED instead, so a
        /// signature/auth failure can never be mistaken for proof the token
        /// is still good.
        fn check_response(&self, resp: reqwest::Response) -> Result<reqwest::Response, EngineError> {
            match Self::classify_status(resp.status()) {
                None => {
                    self.tokens.record_success(self.env, Utc::now());
                    Ok(resp)
                }
                Some(EngineError::TokenExpired(msg)) => {
                    self.tokens.mark_expired(self.env);
                    Err(EngineError::TokenExpired(msg))
                }
                Some(err) => Err(err),
            }
        }

        fn classify_status(status: reqwest::StatusCode) -> Option<EngineError> {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                Some(EngineError::TokenExpired("401 from broker".into()))
            } else if status.is_client_error() {
                Some(EngineError::BrokerPermanent(format!("client error: {status}")))
            } else if status.is_server_error() {
                Some(EngineError::BrokerTransient(format!("server error: {status}")))
            } else {
                None
            }
        }
    }

    #[async_trait]
    impl BrokerClient for EtradeClient {
        async fn list_accounts(&self) -> Result<Vec<BrokerAccountRecord>, EngineError> {
            let resp = self.signed_get("/v1/accounts/list", &BTreeMap::new()).await?;
            let body: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| EngineError::BrokerTransient(e.to_string()))?;
            let accounts = body
                .get("accounts")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter_map(|a| {
                    Some(BrokerAccountRecord {
                        account_id: a.get("accountId")?.as_str()?.to_string(),
                        account_key: a.get("accountIdKey")?.as_str()?.to_string(),
                    })
                })
                .collect();
            Ok(accounts)
        }

        async fn get_balance(&self, account_key: &str) -> Result<BrokerBalance, EngineError> {
            let mut params = BTreeMap::new();
            params.insert("accountIdKey".to_string(), account_key.to_string());
            let resp = self.signed_get("/v1/accounts/balance", &params).await?;
            let body: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| EngineError::BrokerTransient(e.to_string()))?;
            let available_cash = body
                .get("availableCash")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<Decimal>().ok())
                .unwrap_or_default();
            let total_account_value = body
                .get("totalAccountValue")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<Decimal>().ok())
                .unwrap_or_default();
            Ok(BrokerBalance {
                available_cash,
                total_account_value,
            })
        }

        async fn batch_quotes(&self, symbols: &[Symbol]) -> Result<BTreeMap<Symbol, RawQuote>, EngineError> {
            if symbols.is_empty() {
                return Ok(BTreeMap::new());
            }
            let joined = symbols.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(",");
            let mut params = BTreeMap::new();
            params.insert("symbols".to_string(), joined);
            let resp = self.signed_get("/v1/market/quote", &params).await?;
            let body: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| EngineError::BrokerTransient(e.to_string()))?;
            let mut out = BTreeMap::new();
            let now = Utc::now();
            for entry in body.get("quotes").and_then(|v| v.as_array()).cloned().unwrap_or_default() {
                let Some(symbol_str) = entry.get("symbol").and_then(|v| v.as_str()) else {
                    continue;
                };
                let Some(symbol) = Symbol::new(symbol_str) else {
                    continue;
                };
                let decimal_of = |key: &str| entry.get(key).and_then(|v| v.as_str()).and_then(|s| s.parse::<Decimal>().ok());
                out.insert(
                    symbol.clone(),
                    RawQuote {
                        symbol,
                        last: decimal_of("last"),
                        bid: decimal_of("bid"),
                        ask: decimal_of("ask"),
                        volume: entry.get("volume").and_then(|v| v.as_u64()).unwrap_or(0),
                        day_high: decimal_of("dayHigh"),
                        day_low: decimal_of("dayLow"),
                        prev_close: decimal_of("prevClose"),
                        captured_at: now,
                    },
                );
            }
            Ok(out)
        }

        async fn place_order(&self, request: &BrokerOrderRequest) -> Result<BrokerOrder, EngineError> {
            let mut params = BTreeMap::new();
            params.insert("accountIdKey".to_string(), request.account_key.clone());
            params.insert("symbol".to_string(), request.symbol.to_string());
            params.insert(
                "orderAction".to_string(),
                match request.side {
                    crate::models::BrokerOrderSide::Buy => "BUY".to_string(),
                    crate::models::BrokerOrderSide::Sell => "SELL".to_string(),
                },
            );
            params.insert("quantity".to_string(), request.quantity.to_string());
            params.insert("priceType".to_string(), "MARKET".to_string());
            params.insert("clientOrderId".to_string(), request.client_tag.clone());

            let resp = self.signed_post("/v1/accounts/order/place", &params).await?;
            let body: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| EngineError::BrokerTransient(e.to_string()))?;
            parse_order(&body)
        }

        async fn get_order(&self, account_key: &str, order_id: &str) -> Result<BrokerOrder, EngineError> {
            let mut params = BTreeMap::new();
            params.insert("accountIdKey".to_string(), account_key.to_string());
            params.insert("orderId".to_string(), order_id.to_string());
            let resp = self.signed_get("/v1/accounts/order", &params).await?;
            let body: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| EngineError::BrokerTransient(e.to_string()))?;
            parse_order(&body)
        }

        fn is_paper(&self) -> bool {
            self.sandbox
        }

        fn broker_name(&self) -> &str {
            "etrade"
        }
    }

    fn parse_order(body: &serde_json::Value) -> Result<BrokerOrder, EngineError> {
        let order_id = body
            .get("orderId")
            .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string())))
            .ok_or_else(|| EngineError::BrokerPermanent("missing orderId in response".into()))?;
        let status_str = body.get("status").and_then(|v| v.as_str()).unwrap_or("OPEN");
        let status = match status_str.to_uppercase().as_str() {
            "EXECUTED" => crate::models::BrokerOrderStatus::Executed,
            "PARTIAL" | "PARTIALLY_FILLED" => crate::models::BrokerOrderStatus::PartiallyFilled,
            "CANCELLED" | "CANCELED" => crate::models::BrokerOrderStatus::Canceled,
            "REJECTED" => crate::models::BrokerOrderStatus::Rejected,
            "EXPIRED" => crate::models::BrokerOrderStatus::Expired,
            _ => crate::models::BrokerOrderStatus::Open,
        };
        let filled_quantity = body.get("filledQuantity").and_then(|v| v.as_u64()).unwrap_or(0);
        let filled_avg_price = body
            .get("averageExecutionPrice")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Decimal>().ok());
        Ok(BrokerOrder {
            order_id,
            status,
            filled_quantity,
            filled_avg_price,
        })
    }

    /// Config-driven construction: picks the base URL for the configured
    /// environment via the explicit `etrade_mode` option rather than a
    /// base-URL-string-match check.
    pub fn base_url_for(config: &EngineConfig) -> &'static str {
        match config.etrade_mode {
            engine_types::EtradeMode::Live => "https://api.etrade.com",
            engine_types::EtradeMode::Sandbox => "https://apisb.etrade.com",
        }
    }
}
