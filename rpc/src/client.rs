//! JSON-RPC 2.0 over HTTP.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::RpcError;

/// Default connection timeout, independent of the per-request timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Serializes as an empty positional parameter list (`[]`).
pub const NO_PARAMS: [u8; 0] = [];

#[derive(Serialize)]
struct Request<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: i64,
    message: String,
}

/// A named JSON-RPC endpoint.
///
/// The name only labels log lines and errors (e.g. `"PayoutsWallet"`).
pub struct JsonRpcClient {
    name: String,
    url: String,
    http_client: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RpcError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(|e| RpcError::Client(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            http_client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method` and decode its `result`.
    ///
    /// A JSON `null` result decodes into `R` like any other value, so callers
    /// that expect "no result" should ask for an `Option`.
    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R, RpcError>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = Request {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        tracing::trace!(endpoint = %self.name, method, id, "rpc call");

        let response = self
            .http_client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(RpcError::RequestFailed {
                endpoint: self.name.clone(),
                reason: format!("HTTP status {} for {method}", response.status()),
            });
        }

        let reply: Response = response.json().await.map_err(|e| RpcError::InvalidResponse {
            endpoint: self.name.clone(),
            reason: format!("{method}: {e}"),
        })?;

        if let Some(err) = reply.error {
            return Err(RpcError::Remote {
                endpoint: self.name.clone(),
                code: err.code,
                message: err.message,
            });
        }

        serde_json::from_value(reply.result.unwrap_or(Value::Null)).map_err(|e| {
            RpcError::InvalidResponse {
                endpoint: self.name.clone(),
                reason: format!("{method}: {e}"),
            }
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> RpcError {
        let endpoint = self.name.clone();
        if e.is_timeout() {
            RpcError::Timeout {
                endpoint,
                reason: e.to_string(),
            }
        } else if e.is_connect() {
            RpcError::Unreachable {
                endpoint,
                reason: e.to_string(),
            }
        } else {
            RpcError::RequestFailed {
                endpoint,
                reason: e.to_string(),
            }
        }
    }
}
