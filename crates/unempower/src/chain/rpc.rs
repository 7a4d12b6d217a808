//! JSON-RPC client for an EVM node with rate limiting and retries.

use crate::chain::normalize::{format_quantity, parse_quantity, NormalizeError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
const RATE_LIMIT_MS: u64 = 50;
const MAX_RETRIES: u32 = 2;
const RETRY_BACKOFF_MS: u64 = 250;
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct RpcConfig {
    pub url: String,
    pub timeout_secs: u64,
    pub rate_limit_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RPC_URL.to_string(),
            timeout_secs: REQUEST_TIMEOUT_SECS,
            rate_limit_ms: RATE_LIMIT_MS,
            max_retries: MAX_RETRIES,
            retry_backoff_ms: RETRY_BACKOFF_MS,
        }
    }
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {0}: {1}")]
    Http(u16, String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("normalize: {0}")]
    Normalize(#[from] NormalizeError),
}

/// Raw log as returned by `eth_getLogs`. Some nodes include `blockTimestamp`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: Option<String>,
    pub transaction_hash: Option<String>,
    pub log_index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_timestamp: Option<String>,
}

/// Filter for `eth_getLogs`. `None` topic positions match anything; `to_block: None` means latest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFilter {
    pub address: String,
    pub from_block: u64,
    pub to_block: Option<u64>,
    pub topics: Vec<Option<String>>,
}

impl LogFilter {
    pub fn to_json(&self) -> serde_json::Value {
        let to = self
            .to_block
            .map(format_quantity)
            .unwrap_or_else(|| "latest".to_string());
        let mut obj = serde_json::json!({
            "address": self.address,
            "fromBlock": format_quantity(self.from_block),
            "toBlock": to,
        });
        if !self.topics.is_empty() {
            obj["topics"] = serde_json::Value::Array(
                self.topics
                    .iter()
                    .map(|t| t.clone().map_or(serde_json::Value::Null, serde_json::Value::String))
                    .collect(),
            );
        }
        obj
    }
}

/// The chain reads the indexer and the live fallback need.
pub trait LogSource: Send + Sync {
    fn block_number(&self) -> impl Future<Output = Result<u64, RpcError>> + Send;

    fn get_logs(
        &self,
        filter: &LogFilter,
    ) -> impl Future<Output = Result<Vec<RpcLog>, RpcError>> + Send;

    fn block_timestamp(&self, block: u64) -> impl Future<Output = Result<i64, RpcError>> + Send;
}

impl<T: LogSource> LogSource for Arc<T> {
    fn block_number(&self) -> impl Future<Output = Result<u64, RpcError>> + Send {
        self.as_ref().block_number()
    }

    fn get_logs(
        &self,
        filter: &LogFilter,
    ) -> impl Future<Output = Result<Vec<RpcLog>, RpcError>> + Send {
        self.as_ref().get_logs(filter)
    }

    fn block_timestamp(&self, block: u64) -> impl Future<Output = Result<i64, RpcError>> + Send {
        self.as_ref().block_timestamp(block)
    }
}

#[derive(Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct BlockHeader {
    timestamp: String,
}

/// HTTP JSON-RPC client. Spaces requests by `rate_limit_ms` and retries
/// transport and 5xx failures with exponential backoff.
#[derive(Debug)]
pub struct RpcClient {
    config: RpcConfig,
    client: reqwest::Client,
    last_request: Mutex<Option<OffsetDateTime>>,
    request_count: AtomicU64,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(config: RpcConfig) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            client,
            last_request: Mutex::new(None),
            request_count: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn rate_limit(&self) {
        let sleep_ms = {
            let prev = *self
                .last_request
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            match prev {
                Some(prev) => {
                    let elapsed = (OffsetDateTime::now_utc() - prev).whole_milliseconds();
                    let need = self.config.rate_limit_ms as i128;
                    (need - elapsed).max(0) as u64
                }
                None => 0,
            }
        };
        if sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        }
        *self
            .last_request
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(OffsetDateTime::now_utc());
    }

    /// Issue one JSON-RPC call and decode `result`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, RpcError> {
        self.rate_limit().await;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            match self.client.post(&self.config.url).json(&body).send().await {
                Ok(r) => {
                    let status = r.status();
                    let text = r.text().await.unwrap_or_default();
                    if status.is_server_error() {
                        last_err = Some(RpcError::Http(status.as_u16(), text));
                    } else if !status.is_success() {
                        return Err(RpcError::Http(status.as_u16(), text));
                    } else {
                        self.request_count.fetch_add(1, Ordering::Relaxed);
                        debug!(method, attempt, "rpc ok");
                        return Self::decode_envelope(&text);
                    }
                }
                Err(e) => last_err = Some(RpcError::Request(e)),
            }
            if attempt < self.config.max_retries {
                let ms = self.config.retry_backoff_ms * (1 << attempt);
                warn!(method, attempt, ms, "rpc retry after error");
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }
        Err(last_err.unwrap_or_else(|| RpcError::Malformed("no attempt made".to_string())))
    }

    fn decode_envelope<T: DeserializeOwned>(text: &str) -> Result<T, RpcError> {
        let env: RpcEnvelope<T> =
            serde_json::from_str(text).map_err(|e| RpcError::Malformed(e.to_string()))?;
        if let Some(err) = env.error {
            return Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        env.result
            .ok_or_else(|| RpcError::Malformed("missing result".to_string()))
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Pending nonce of `address`.
    pub async fn transaction_count(&self, address: &str) -> Result<u64, RpcError> {
        let raw: String = self
            .call(
                "eth_getTransactionCount",
                serde_json::json!([address, "pending"]),
            )
            .await?;
        Ok(parse_quantity(&raw)?)
    }
}

impl LogSource for RpcClient {
    async fn block_number(&self) -> Result<u64, RpcError> {
        let raw: String = self.call("eth_blockNumber", serde_json::json!([])).await?;
        Ok(parse_quantity(&raw)?)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RpcLog>, RpcError> {
        let logs: Vec<RpcLog> = self
            .call("eth_getLogs", serde_json::json!([filter.to_json()]))
            .await?;
        debug!(
            address = %filter.address,
            from = filter.from_block,
            to = ?filter.to_block,
            count = logs.len(),
            "eth_getLogs"
        );
        Ok(logs)
    }

    async fn block_timestamp(&self, block: u64) -> Result<i64, RpcError> {
        let header: Option<BlockHeader> = self
            .call(
                "eth_getBlockByNumber",
                serde_json::json!([format_quantity(block), false]),
            )
            .await?;
        let header =
            header.ok_or_else(|| RpcError::Malformed(format!("block {} not found", block)))?;
        i64::try_from(parse_quantity(&header.timestamp)?)
            .map_err(|_| RpcError::Malformed(format!("block {} timestamp out of range", block)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_json_shape() {
        let f = LogFilter {
            address: "0xabc".into(),
            from_block: 16,
            to_block: Some(31),
            topics: vec![Some("0x01".into()), None],
        };
        let v = f.to_json();
        assert_eq!(v["fromBlock"], "0x10");
        assert_eq!(v["toBlock"], "0x1f");
        assert_eq!(v["topics"][0], "0x01");
        assert!(v["topics"][1].is_null());
    }

    #[test]
    fn filter_defaults_to_latest_without_topics() {
        let f = LogFilter {
            address: "0xabc".into(),
            from_block: 0,
            to_block: None,
            topics: vec![],
        };
        let v = f.to_json();
        assert_eq!(v["toBlock"], "latest");
        assert!(v.get("topics").is_none());
    }

    #[test]
    fn envelope_error_is_surfaced() {
        let r: Result<String, _> = RpcClient::decode_envelope(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"limit exceeded"}}"#,
        );
        assert!(matches!(r, Err(RpcError::Rpc { code: -32005, .. })));
        let ok: String =
            RpcClient::decode_envelope(r#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#).unwrap();
        assert_eq!(ok, "0x10");
    }

    /// Answers one HTTP request with `result` and hands back the JSON body it received.
    async fn answer_once(result: &'static str) -> (String, tokio::task::JoinHandle<serde_json::Value>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let body = loop {
                let n = sock.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before body");
                buf.extend_from_slice(&chunk[..n]);
                let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                    continue;
                };
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break buf[end + 4..end + 4 + len].to_vec();
                }
            };
            let reply = format!(r#"{{"jsonrpc":"2.0","id":1,"result":{result}}}"#);
            let resp = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                reply.len(),
                reply
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
            serde_json::from_slice(&body).unwrap()
        });
        (url, handle)
    }

    fn client(url: String) -> RpcClient {
        RpcClient::new(RpcConfig {
            url,
            rate_limit_ms: 0,
            max_retries: 0,
            ..RpcConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn transaction_count_asks_for_pending_nonce() {
        let (url, server) = answer_once(r#""0x1a""#).await;
        let rpc = client(url);
        let addr = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";
        assert_eq!(rpc.transaction_count(addr).await.unwrap(), 26);
        assert_eq!(rpc.request_count(), 1);

        let sent = server.await.unwrap();
        assert_eq!(sent["jsonrpc"], "2.0");
        assert_eq!(sent["method"], "eth_getTransactionCount");
        assert_eq!(sent["params"], serde_json::json!([addr, "pending"]));
    }

    #[tokio::test]
    async fn block_timestamp_reads_header() {
        let (url, server) = answer_once(r#"{"number":"0x10","timestamp":"0x6553f100"}"#).await;
        let rpc = client(url);
        assert_eq!(rpc.block_timestamp(16).await.unwrap(), 0x6553f100);

        let sent = server.await.unwrap();
        assert_eq!(sent["method"], "eth_getBlockByNumber");
        assert_eq!(sent["params"], serde_json::json!(["0x10", false]));
    }

    #[tokio::test]
    async fn non_hex_block_number_is_a_normalize_error() {
        let (url, server) = answer_once(r#""not-hex""#).await;
        let rpc = client(url);
        assert!(matches!(rpc.block_number().await, Err(RpcError::Normalize(_))));
        assert_eq!(server.await.unwrap()["method"], "eth_blockNumber");
    }

    #[test]
    fn log_deserializes_from_node_json() {
        let log: RpcLog = serde_json::from_str(
            r#"{"address":"0x1","topics":["0x2"],"data":"0x","blockNumber":"0x5",
                "transactionHash":"0x3","logIndex":"0x0","removed":false}"#,
        )
        .unwrap();
        assert_eq!(log.block_number.as_deref(), Some("0x5"));
        assert!(log.block_timestamp.is_none());
    }
}
