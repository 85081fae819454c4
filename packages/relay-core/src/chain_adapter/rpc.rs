use log::warn;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use crate::Error;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Minimal JSON-RPC 2.0 client over HTTP, shared by the chain families.
#[derive(Clone)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl JsonRpcClient {
    pub fn new(url: &str, max_retries: u32, retry_delay: Duration) -> Result<Self, Error> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!("Unsupported endpoint {}, expected http(s)", url)));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            url: url.to_string(),
            max_retries: max_retries.max(1),
            retry_delay,
        })
    }

    /// Calls `method`, retrying transport failures with exponential backoff.
    /// Errors returned by the node itself are not retried.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, Error> {
        let result = self
            .retry_with_backoff(|| self.call_once(method, params.clone()))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| Error::Serialization(format!("Unexpected {} result: {}", method, e)))
    }

    async fn call_once(&self, method: &str, params: Value) -> Result<Value, Error> {
        let response = self
            .http
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let mut body: Value = response
            .json()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if let Some(err) = body.get("error") {
            return Err(Error::Chain(format!("{} failed: {}", method, err)));
        }
        Ok(body.get_mut("result").map(Value::take).unwrap_or(Value::Null))
    }

    async fn retry_with_backoff<F, Fut, T>(&self, operation: F) -> Result<T, Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(Error::Network(e)) => {
                    retries += 1;
                    if retries >= self.max_retries {
                        return Err(Error::Network(e));
                    }
                    let delay = self.backoff(retries);
                    warn!("Retry {}/{} for {} after {:?}: {}", retries, self.max_retries, self.url, delay, e);
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `retry_delay * 2^(retry - 1)`, capped at one minute.
    fn backoff(&self, retry: u32) -> Duration {
        2u32.checked_pow(retry.saturating_sub(1))
            .and_then(|factor| self.retry_delay.checked_mul(factor))
            .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
    }
}

/// Parses a `0x`-prefixed hex quantity.
pub fn parse_quantity(raw: &str) -> Result<u64, Error> {
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| Error::Serialization(format!("Invalid hex quantity {}: {}", raw, e)))
}

pub fn to_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_call_returns_result() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": "eth_blockNumber" })))
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x1b4"}"#)
            .create_async()
            .await;

        let client = JsonRpcClient::new(&server.url(), 3, Duration::from_millis(1)).unwrap();
        let block: String = client.call("eth_blockNumber", json!([])).await.unwrap();
        assert_eq!(parse_quantity(&block).unwrap(), 436);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_node_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"method not found"}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = JsonRpcClient::new(&server.url(), 3, Duration::from_millis(1)).unwrap();
        let err = client.call::<Value>("bogus_method", json!([])).await.unwrap_err();
        assert!(matches!(err, Error::Chain(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transport_failure_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_body("not json")
            .expect(3)
            .create_async()
            .await;

        let client = JsonRpcClient::new(&server.url(), 3, Duration::from_millis(1)).unwrap();
        let err = client.call::<Value>("eth_chainId", json!([])).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_many_retries_do_not_overflow_backoff() {
        let client = JsonRpcClient::new("http://127.0.0.1:1", 40, Duration::ZERO).unwrap();
        let err = client.call::<Value>("eth_chainId", json!([])).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[test]
    fn test_backoff_is_capped() {
        let client = JsonRpcClient::new("http://localhost:8545", 50, Duration::from_secs(1)).unwrap();
        assert_eq!(client.backoff(1), Duration::from_secs(1));
        assert_eq!(client.backoff(4), Duration::from_secs(8));
        assert_eq!(client.backoff(7), MAX_BACKOFF);
        assert_eq!(client.backoff(40), MAX_BACKOFF);
    }

    #[test]
    fn test_rejects_websocket_endpoint() {
        assert!(JsonRpcClient::new("ws://localhost:8545", 1, Duration::ZERO).is_err());
    }

    #[test]
    fn test_quantities() {
        assert_eq!(to_quantity(255), "0xff");
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert!(parse_quantity("0xzz").is_err());
    }
}
