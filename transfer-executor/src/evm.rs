//! JSON-RPC client for EVM chains

use crate::address::Address;
use crate::client::ChainClient;
use crate::error::{Error, Result};
use crate::types::{AssetKind, ChainReceipt, TransferInstruction};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// `balanceOf(address)`
const BALANCE_OF_SELECTOR: &str = "70a08231";
/// `transfer(address,uint256)`
const TRANSFER_SELECTOR: &str = "a9059cbb";

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    block_number: Option<String>,
    status: Option<String>,
}

/// Client for one JSON-RPC endpoint
pub struct EvmRpcClient {
    rpc_url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EvmRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmRpcClient")
            .field("rpc_url", &self.rpc_url)
            .field("client", &"reqwest::Client")
            .finish()
    }
}

impl EvmRpcClient {
    /// Client with a per-request timeout
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            rpc_url: rpc_url.into(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    /// Endpoint URL
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let body: JsonRpcResponse = response.json().await?;
        if let Some(error) = body.error {
            tracing::debug!(method, code = error.code, message = %error.message, "RPC error");
            return Err(Error::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(body.result)
    }

    async fn call_str(&self, method: &str, params: Value) -> Result<String> {
        match self.call(method, params).await? {
            Value::String(s) => Ok(s),
            other => Err(Error::Decode(format!("{}: expected string, got {}", method, other))),
        }
    }
}

#[async_trait]
impl ChainClient for EvmRpcClient {
    async fn code_at(&self, address: &Address) -> Result<Vec<u8>> {
        let code = self
            .call_str("eth_getCode", json!([address.as_str(), "latest"]))
            .await?;
        decode_hex(&code)
    }

    async fn native_balance(&self, address: &Address) -> Result<u128> {
        let balance = self
            .call_str("eth_getBalance", json!([address.as_str(), "latest"]))
            .await?;
        parse_quantity(&balance)
    }

    async fn token_balance(&self, contract: &Address, holder: &Address) -> Result<u128> {
        let data = format!("0x{}{}", BALANCE_OF_SELECTOR, holder.abi_word());
        let word = self
            .call_str(
                "eth_call",
                json!([{ "to": contract.as_str(), "data": data }, "latest"]),
            )
            .await?;
        parse_quantity(&word)
    }

    async fn submit(&self, instruction: &TransferInstruction) -> Result<String> {
        let tx = match &instruction.asset {
            AssetKind::Native => json!({
                "from": instruction.from.as_str(),
                "to": instruction.to.as_str(),
                "value": format!("0x{:x}", instruction.amount),
            }),
            AssetKind::Token { contract } => json!({
                "from": instruction.from.as_str(),
                "to": contract.as_str(),
                "data": format!(
                    "0x{}{}{:064x}",
                    TRANSFER_SELECTOR,
                    instruction.to.abi_word(),
                    instruction.amount
                ),
            }),
        };

        match self.call_str("eth_sendTransaction", json!([tx])).await {
            Ok(hash) => Ok(hash),
            Err(Error::Rpc { code, message }) => {
                Err(Error::Submission(format!("RPC error {}: {}", code, message)))
            }
            // Nothing reached the node
            Err(Error::Http(e)) if e.is_connect() || e.is_builder() => {
                Err(Error::Submission(e.to_string()))
            }
            Err(Error::Http(e)) => Err(Error::BroadcastUnknown(e.to_string())),
            Err(Error::Decode(msg)) => Err(Error::BroadcastUnknown(msg)),
            Err(e) => Err(e),
        }
    }

    async fn receipt(&self, reference: &str) -> Result<Option<ChainReceipt>> {
        let value = self
            .call("eth_getTransactionReceipt", json!([reference]))
            .await?;
        if value.is_null() {
            return Ok(None);
        }

        let receipt: RpcReceipt = serde_json::from_value(value)
            .map_err(|e| Error::Decode(format!("receipt: {}", e)))?;

        // Pending-block receipts carry no block number yet
        let Some(block) = receipt.block_number else {
            return Ok(None);
        };

        Ok(Some(ChainReceipt {
            block_height: u64::try_from(parse_quantity(&block)?)
                .map_err(|_| Error::Decode(format!("block number {} overflows", block)))?,
            success: receipt.status.as_deref() != Some("0x0"),
        }))
    }
}

/// Parse a hex quantity or a 32-byte ABI word into a `u128`
fn parse_quantity(hex: &str) -> Result<u128> {
    let digits = hex
        .strip_prefix("0x")
        .ok_or_else(|| Error::Decode(format!("{:?}: missing 0x prefix", hex)))?;
    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(significant, 16)
        .map_err(|e| Error::Decode(format!("{:?}: {}", hex, e)))
}

fn decode_hex(hex: &str) -> Result<Vec<u8>> {
    let digits = hex
        .strip_prefix("0x")
        .ok_or_else(|| Error::Decode(format!("{:?}: missing 0x prefix", hex)))?;
    if digits.len() % 2 != 0 {
        return Err(Error::Decode(format!("{:?}: odd length", hex)));
    }
    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| Error::Decode(format!("{:?}: not hex", hex)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn holder() -> Address {
        Address::parse("0x00000000000000000000000000000000000000aa").unwrap()
    }

    fn contract() -> Address {
        Address::parse("0xfde4c96c8593536e31f229ea8f37b2ada2699bb2").unwrap()
    }

    async fn mock_result(server: &MockServer, rpc_method: &str, result: Value) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": rpc_method })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": result })),
            )
            .mount(server)
            .await;
    }

    fn client(server: &MockServer) -> EvmRpcClient {
        EvmRpcClient::new(server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_code_and_balances() {
        let server = MockServer::start().await;
        mock_result(&server, "eth_getCode", json!("0x6080")).await;
        mock_result(&server, "eth_getBalance", json!("0xde0b6b3a7640000")).await;
        mock_result(
            &server,
            "eth_call",
            json!("0x0000000000000000000000000000000000000000000000000000000000989680"),
        )
        .await;

        let client = client(&server);
        assert_eq!(client.code_at(&holder()).await.unwrap(), vec![0x60, 0x80]);
        assert_eq!(
            client.native_balance(&holder()).await.unwrap(),
            1_000_000_000_000_000_000
        );
        assert_eq!(
            client.token_balance(&contract(), &holder()).await.unwrap(),
            10_000_000
        );
    }

    #[tokio::test]
    async fn test_token_transfer_calldata() {
        let server = MockServer::start().await;
        let expected_data = format!(
            "0xa9059cbb{}{:064x}",
            holder().abi_word(),
            10_000_000u128
        );
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_sendTransaction",
                "params": [{ "to": contract().as_str(), "data": expected_data }]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": "0xabc" })),
            )
            .mount(&server)
            .await;

        let instruction = TransferInstruction {
            from: Address::parse("0x00000000000000000000000000000000000000bb").unwrap(),
            to: holder(),
            asset: AssetKind::Token {
                contract: contract(),
            },
            amount: 10_000_000,
        };
        assert_eq!(client(&server).submit(&instruction).await.unwrap(), "0xabc");
    }

    #[tokio::test]
    async fn test_submit_rpc_error_is_submission_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "insufficient funds for gas" }
            })))
            .mount(&server)
            .await;

        let instruction = TransferInstruction {
            from: holder(),
            to: holder(),
            asset: AssetKind::Native,
            amount: 1,
        };
        assert!(matches!(
            client(&server).submit(&instruction).await,
            Err(Error::Submission(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_timeout_is_ambiguous() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": "0xabc" }))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = EvmRpcClient::new(server.uri(), Duration::from_millis(200)).unwrap();
        let instruction = TransferInstruction {
            from: holder(),
            to: holder(),
            asset: AssetKind::Native,
            amount: 1,
        };
        assert!(matches!(
            client.submit(&instruction).await,
            Err(Error::BroadcastUnknown(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_garbled_reply_is_ambiguous() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let instruction = TransferInstruction {
            from: holder(),
            to: holder(),
            asset: AssetKind::Native,
            amount: 1,
        };
        assert!(matches!(
            client(&server).submit(&instruction).await,
            Err(Error::BroadcastUnknown(_))
        ));
    }

    #[tokio::test]
    async fn test_receipt_states() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "params": ["0x01"] })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": null })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "params": ["0x02"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": { "blockNumber": "0x10", "status": "0x0" }
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        assert_eq!(client.receipt("0x01").await.unwrap(), None);
        assert_eq!(
            client.receipt("0x02").await.unwrap(),
            Some(ChainReceipt {
                block_height: 16,
                success: false
            })
        );
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        assert!(matches!(
            client(&server).native_balance(&holder()).await,
            Err(Error::Http(_))
        ));
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert_eq!(parse_quantity("0xff").unwrap(), 255);
        assert!(parse_quantity("ff").is_err());
        assert!(decode_hex("0x123").is_err());
        assert_eq!(decode_hex("0x00ff").unwrap(), vec![0x00, 0xff]);
    }

    #[test]
    fn test_decode_hex_rejects_non_ascii() {
        assert!(decode_hex("0xé1").is_err());
        assert!(decode_hex("0x€0").is_err());
        assert!(decode_hex("0xzz").is_err());
    }
}
