//! Identity/trust gateway — on-chain and social checks behind one trait.
//!
//! * Token holding and contract ownership are read with JSON-RPC `eth_call`
//!   against any EVM node (`balanceOf(address)` and `owner()`).
//! * Social trust is read from the Neynar bulk user endpoint.
//!
//! Every failure surfaces as an error; deciding that an error means "deny"
//! is the job of [`crate::policy`]. Nothing here retries.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::errors::{BeaconError, Result};

/// `balanceOf(address)`
const BALANCE_OF_SELECTOR: &str = "70a08231";
/// `owner()`
const OWNER_SELECTOR: &str = "8da5cb5b";

#[async_trait]
pub trait IdentityGateway: Send + Sync {
    /// `balanceOf(wallet)` on the token, as a base-10 string.
    async fn token_balance(&self, token_address: &str, wallet: &str) -> Result<String>;

    /// True iff `wallet` holds a non-zero balance of the token.
    async fn is_token_holder(&self, token_address: &str, wallet: &str) -> Result<bool> {
        Ok(self.token_balance(token_address, wallet).await? != "0")
    }

    /// True iff `wallet` is the token contract's `owner()`.
    async fn is_contract_admin(&self, token_address: &str, wallet: &str) -> Result<bool>;

    /// True iff the social identity's score meets the trust threshold.
    async fn is_trusted_identity(&self, fid: u64) -> Result<bool>;
}

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

// ─────────────────────────────────────────────────────────
// HTTP implementation
// ─────────────────────────────────────────────────────────

pub struct HttpGateway {
    client: Client,
    rpc_url: String,
    neynar_api_url: String,
    neynar_api_key: Option<String>,
    trust_threshold: f64,
}

impl HttpGateway {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            rpc_url: config.rpc_url.clone(),
            neynar_api_url: config.neynar_api_url.clone(),
            neynar_api_key: config.neynar_api_key.clone(),
            trust_threshold: config.trust_threshold,
        }
    }

    /// Run a read-only call against the latest block and return the raw hex result.
    async fn eth_call(&self, to: &str, data: String) -> Result<String> {
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "eth_call",
                "params": [{ "to": to, "data": data }, "latest"],
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BeaconError::Upstream(format!("chain RPC returned {status}")));
        }

        let body: RpcResponse = response.json().await?;
        if let Some(err) = body.error {
            return Err(BeaconError::Upstream(format!(
                "chain RPC error {}: {}",
                err.code, err.message
            )));
        }

        body.result
            .ok_or_else(|| BeaconError::Upstream("Empty result from eth_call".to_string()))
    }
}

#[async_trait]
impl IdentityGateway for HttpGateway {
    async fn token_balance(&self, token_address: &str, wallet: &str) -> Result<String> {
        parse_address(token_address)?;
        let data = balance_of_calldata(&parse_address(wallet)?);
        let result = self.eth_call(token_address, data).await?;
        let balance = decimal_word(&result)?;
        debug!("balanceOf({wallet}) on {token_address}: {balance}");
        Ok(balance)
    }

    async fn is_contract_admin(&self, token_address: &str, wallet: &str) -> Result<bool> {
        parse_address(token_address)?;
        let wallet = parse_address(wallet)?;
        let result = self
            .eth_call(token_address, format!("0x{OWNER_SELECTOR}"))
            .await?;
        let owner = decode_address_word(&result)?;
        debug!("owner() of {token_address}: {owner:?}");
        Ok(owner == Some(wallet))
    }

    async fn is_trusted_identity(&self, fid: u64) -> Result<bool> {
        let api_key = self
            .neynar_api_key
            .as_deref()
            .ok_or_else(|| BeaconError::Upstream("NEYNAR_API_KEY is not configured".to_string()))?;

        let response = self
            .client
            .post(&self.neynar_api_url)
            .header("api_key", api_key)
            .json(&json!({ "fids": [fid] }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BeaconError::Upstream(format!("Neynar returned {status}")));
        }

        let body: Value = serde_json::from_str(&response.text().await?)?;
        let score = trust_score(&body);
        debug!("fid {fid} trust score {score}");
        Ok(score >= self.trust_threshold)
    }
}

// ─────────────────────────────────────────────────────────
// ABI helpers
// ─────────────────────────────────────────────────────────

/// Decode a `0x`-prefixed, 20-byte hex address.
pub fn parse_address(raw: &str) -> Result<[u8; 20]> {
    let invalid = || BeaconError::Validation(format!("invalid address: {raw}"));
    let hex_part = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(invalid)?;
    let bytes = hex::decode(hex_part).map_err(|_| invalid())?;
    bytes.try_into().map_err(|_| invalid())
}

fn balance_of_calldata(wallet: &[u8; 20]) -> String {
    format!("0x{BALANCE_OF_SELECTOR}{:0>64}", hex::encode(wallet))
}

fn decode_result(result: &str) -> Result<Vec<u8>> {
    let hex_part = result.strip_prefix("0x").unwrap_or(result);
    hex::decode(hex_part)
        .map_err(|_| BeaconError::Upstream(format!("malformed eth_call result: {result}")))
}

/// The big-endian unsigned integer in `result` as a decimal string. An empty
/// return (`0x`) counts as zero.
fn decimal_word(result: &str) -> Result<String> {
    let bytes = decode_result(result)?;
    let mut value: Vec<u8> = bytes.into_iter().skip_while(|b| *b == 0).collect();
    let mut digits = Vec::new();

    // Long division by ten, one base-256 digit at a time.
    while !value.is_empty() {
        let mut remainder = 0u16;
        let mut quotient = Vec::with_capacity(value.len());
        for byte in &value {
            let acc = (remainder << 8) | u16::from(*byte);
            let q = (acc / 10) as u8;
            remainder = acc % 10;
            if !(quotient.is_empty() && q == 0) {
                quotient.push(q);
            }
        }
        digits.push(char::from(b'0' + remainder as u8));
        value = quotient;
    }

    if digits.is_empty() {
        return Ok("0".to_string());
    }
    Ok(digits.into_iter().rev().collect())
}

/// The address in the first ABI word, or `None` when the call returned nothing
/// (the contract has no `owner()`).
fn decode_address_word(result: &str) -> Result<Option<[u8; 20]>> {
    let bytes = decode_result(result)?;
    if bytes.len() < 32 {
        return Ok(None);
    }
    let mut address = [0u8; 20];
    address.copy_from_slice(&bytes[12..32]);
    Ok(Some(address))
}

/// Score from `users[0].score`, falling back to `users[0].viewer_context.score`.
fn trust_score(body: &Value) -> f64 {
    let Some(user) = body.get("users").and_then(|u| u.get(0)) else {
        return 0.0;
    };
    user.get("score")
        .and_then(Value::as_f64)
        .or_else(|| {
            user.get("viewer_context")
                .and_then(|v| v.get("score"))
                .and_then(Value::as_f64)
        })
        .unwrap_or(0.0)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, routing::post, Json, Router};
    use parking_lot::Mutex;

    use super::*;

    const TOKEN: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";
    const WALLET: &str = "0x00000000000000000000000000000000DeaDBeef";

    #[test]
    fn parse_address_accepts_mixed_case() {
        let bytes = parse_address(WALLET).unwrap();
        assert_eq!(&bytes[16..], &[0xde, 0xad, 0xbe, 0xef]);
        assert!(parse_address("0XDEADBEEF00000000000000000000000000000000").is_ok());
    }

    #[test]
    fn parse_address_rejects_garbage() {
        for bad in ["", "0x", "deadbeef", "0x1234", "0xZZ00000000000000000000000000000000000000"] {
            assert!(
                matches!(parse_address(bad), Err(BeaconError::Validation(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn balance_of_calldata_pads_wallet() {
        let data = balance_of_calldata(&parse_address(WALLET).unwrap());
        assert_eq!(data.len(), 2 + 8 + 64);
        assert!(data.starts_with("0x70a08231000000000000000000000000"));
        assert!(data.ends_with("deadbeef"));
    }

    #[test]
    fn balance_word_to_decimal() {
        assert_eq!(decimal_word("0x").unwrap(), "0");
        assert_eq!(decimal_word(&format!("0x{}", "0".repeat(64))).unwrap(), "0");
        assert_eq!(decimal_word(&format!("0x{:0>64}", "2a")).unwrap(), "42");
        assert_eq!(
            decimal_word(&format!("0x{:0>64}", "0de0b6b3a7640000")).unwrap(),
            "1000000000000000000"
        );
        assert_eq!(
            decimal_word(&format!("0x{}", "f".repeat(64))).unwrap(),
            "115792089237316195423570985008687907853269984665640564039457584007913129639935"
        );
        assert!(decimal_word("0xzz").is_err());
    }

    #[test]
    fn owner_word_decoding() {
        assert_eq!(decode_address_word("0x").unwrap(), None);
        let word = format!("0x{:0>64}", "00000000000000000000000000000000deadbeef");
        assert_eq!(
            decode_address_word(&word).unwrap(),
            Some(parse_address(WALLET).unwrap())
        );
    }

    #[test]
    fn trust_score_prefers_top_level_score() {
        let body = json!({ "users": [{ "score": 0.91, "viewer_context": { "score": 0.1 } }] });
        assert_eq!(trust_score(&body), 0.91);
    }

    #[test]
    fn trust_score_falls_back_to_viewer_context() {
        let body = json!({ "users": [{ "viewer_context": { "score": 0.85 } }] });
        assert_eq!(trust_score(&body), 0.85);
    }

    #[test]
    fn trust_score_defaults_to_zero() {
        assert_eq!(trust_score(&json!({ "users": [] })), 0.0);
        assert_eq!(trust_score(&json!({})), 0.0);
        assert_eq!(trust_score(&json!({ "users": [{ "fid": 3 }] })), 0.0);
    }

    // ── Against a local stub node ─────────────────────────

    #[derive(Clone, Default)]
    struct StubNode {
        balance: String,
        owner: String,
        neynar: Value,
        calls: Arc<Mutex<Vec<Value>>>,
    }

    async fn rpc(State(node): State<StubNode>, Json(req): Json<Value>) -> Json<Value> {
        node.calls.lock().push(req.clone());
        let data = req["params"][0]["data"].as_str().unwrap_or_default();
        let result = if data.starts_with(&format!("0x{BALANCE_OF_SELECTOR}")) {
            node.balance.clone()
        } else {
            node.owner.clone()
        };
        Json(json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
    }

    async fn neynar(State(node): State<StubNode>, Json(req): Json<Value>) -> Json<Value> {
        node.calls.lock().push(req);
        Json(node.neynar.clone())
    }

    async fn spawn_stub(node: StubNode, api_key: Option<&str>) -> HttpGateway {
        let app = Router::new()
            .route("/rpc", post(rpc))
            .route("/neynar", post(neynar))
            .with_state(node);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        HttpGateway {
            client: Client::new(),
            rpc_url: format!("http://{addr}/rpc"),
            neynar_api_url: format!("http://{addr}/neynar"),
            neynar_api_key: api_key.map(String::from),
            trust_threshold: 0.8,
        }
    }

    #[tokio::test]
    async fn holder_and_admin_checks_against_node() {
        let node = StubNode {
            balance: format!("0x{:0>64}", "2a"),
            owner: format!("0x{:0>64}", "00000000000000000000000000000000deadbeef"),
            ..Default::default()
        };
        let gateway = spawn_stub(node.clone(), None).await;

        assert_eq!(gateway.token_balance(TOKEN, WALLET).await.unwrap(), "42");
        assert!(gateway.is_token_holder(TOKEN, WALLET).await.unwrap());
        assert!(gateway.is_contract_admin(TOKEN, WALLET).await.unwrap());
        assert!(!gateway
            .is_contract_admin(TOKEN, "0x0000000000000000000000000000000000000001")
            .await
            .unwrap());

        let calls = node.calls.lock();
        assert_eq!(calls[0]["method"], "eth_call");
        assert_eq!(calls[0]["params"][0]["to"], TOKEN);
        assert_eq!(calls[0]["params"][1], "latest");
    }

    #[tokio::test]
    async fn contract_without_owner_is_not_admin() {
        let node = StubNode {
            balance: "0x".to_string(),
            owner: "0x".to_string(),
            ..Default::default()
        };
        let gateway = spawn_stub(node, None).await;
        assert!(!gateway.is_contract_admin(TOKEN, WALLET).await.unwrap());
        assert_eq!(gateway.token_balance(TOKEN, WALLET).await.unwrap(), "0");
        assert!(!gateway.is_token_holder(TOKEN, WALLET).await.unwrap());
    }

    #[tokio::test]
    async fn trusted_identity_uses_threshold() {
        let node = StubNode {
            neynar: json!({ "users": [{ "fid": 9, "score": 0.8 }] }),
            ..Default::default()
        };
        let gateway = spawn_stub(node.clone(), Some("key")).await;
        assert!(gateway.is_trusted_identity(9).await.unwrap());
        assert_eq!(node.calls.lock()[0], json!({ "fids": [9] }));
    }

    #[tokio::test]
    async fn malformed_neynar_body_is_a_json_error() {
        let app = Router::new().route("/neynar", post(|| async { "<html>rate limited</html>" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let gateway = HttpGateway {
            client: Client::new(),
            rpc_url: format!("http://{addr}/rpc"),
            neynar_api_url: format!("http://{addr}/neynar"),
            neynar_api_key: Some("key".to_string()),
            trust_threshold: 0.8,
        };
        assert!(matches!(
            gateway.is_trusted_identity(9).await,
            Err(BeaconError::Json(_))
        ));
    }

    #[tokio::test]
    async fn trusted_identity_without_key_is_an_error() {
        let gateway = spawn_stub(StubNode::default(), None).await;
        assert!(matches!(
            gateway.is_trusted_identity(9).await,
            Err(BeaconError::Upstream(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_node_is_an_error() {
        let gateway = HttpGateway {
            client: Client::new(),
            rpc_url: "http://127.0.0.1:9/rpc".to_string(),
            neynar_api_url: "http://127.0.0.1:9/neynar".to_string(),
            neynar_api_key: None,
            trust_threshold: 0.8,
        };
        assert!(gateway.is_token_holder(TOKEN, WALLET).await.is_err());
    }
}
