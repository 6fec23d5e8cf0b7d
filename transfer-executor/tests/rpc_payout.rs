//! End-to-end payout against a mocked JSON-RPC endpoint

use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use transfer_executor::{
    Address, AssetKind, ChannelSpec, ConfirmationSettings, Error, EvmRpcClient, TransferExecutor,
};
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sender() -> Address {
    Address::parse("0x00000000000000000000000000000000000000bb").unwrap()
}

fn recipient() -> Address {
    Address::parse("0x00000000000000000000000000000000000000aa").unwrap()
}

fn sepolia_spec() -> ChannelSpec {
    ChannelSpec {
        id: "sepolia-eth".to_string(),
        display_name: "Sepolia ETH".to_string(),
        symbol: "ETH".to_string(),
        asset: AssetKind::Native,
        payout: Decimal::from_str("0.005").unwrap(),
        decimals: 18,
        sender: sender(),
        explorer_tx_url: "https://sepolia.etherscan.io/tx/".to_string(),
    }
}

async fn respond(server: &MockServer, rpc_method: &str, result: serde_json::Value) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": rpc_method })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": result })),
        )
        .mount(server)
        .await;
}

fn settings() -> ConfirmationSettings {
    ConfirmationSettings {
        timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(20),
    }
}

#[tokio::test]
async fn test_native_payout_confirmed() {
    let server = MockServer::start().await;
    respond(&server, "eth_getBalance", json!("0xde0b6b3a7640000")).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "eth_sendTransaction",
            "params": [{ "from": sender().as_str(), "to": recipient().as_str(), "value": "0x11c37937e08000" }]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": "0xfeed" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    respond(
        &server,
        "eth_getTransactionReceipt",
        json!({ "blockNumber": "0x2a", "status": "0x1" }),
    )
    .await;

    let client = Arc::new(EvmRpcClient::new(server.uri(), Duration::from_secs(5)).unwrap());
    let executor = TransferExecutor::new(sepolia_spec(), client, settings()).unwrap();

    let receipt = executor.send(&recipient()).await.unwrap();
    assert_eq!(receipt.reference, "0xfeed");
    assert_eq!(receipt.block_height, 42);
    assert_eq!(
        executor.spec().explorer_url(&receipt.reference),
        "https://sepolia.etherscan.io/tx/0xfeed"
    );
}

#[tokio::test]
async fn test_unmined_transfer_is_unknown() {
    let server = MockServer::start().await;
    respond(&server, "eth_getBalance", json!("0xde0b6b3a7640000")).await;
    respond(&server, "eth_sendTransaction", json!("0xbeef")).await;
    respond(&server, "eth_getTransactionReceipt", json!(null)).await;

    let client = Arc::new(EvmRpcClient::new(server.uri(), Duration::from_secs(5)).unwrap());
    let executor = TransferExecutor::new(sepolia_spec(), client, settings()).unwrap();

    match executor.send(&recipient()).await {
        Err(Error::ConfirmationUnknown { reference }) => assert_eq!(reference, "0xbeef"),
        other => panic!("expected unknown confirmation, got {:?}", other),
    }
}
