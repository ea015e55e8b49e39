//! HTTP API for transaction submission, receipts and health

use crate::chain::ConnectionState;
use crate::config::ApiConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::tx::{TransactionManager, TransactionRequest};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::{Address, Bytes, TransactionReceipt, H256};
use ethers::utils::to_checksum;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<TransactionManager>,
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> GatewayResult<()> {
    let app = router(state, &config.root_path);

    let addr = format!("{}:{}", config.host, config.port);
    info!("API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| GatewayError::Config(format!("cannot bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))
}

/// Build the router, optionally nested under a root path such as `/api`
pub fn router(state: AppState, root_path: &str) -> Router {
    let routes: Router = Router::new()
        .route("/sendTx", post(send_tx))
        .route("/sendPreSignedTx", post(send_presigned_tx))
        .route("/callFunction", post(call_function))
        .route("/waitForTx/:hash", get(wait_for_tx))
        .route("/checkIfContractExists/:address", get(check_contract_exists))
        .route("/getAccountAddress", get(get_account_address))
        .route("/getBalance", get(get_balance))
        .route("/getTransaction/:hash", get(get_transaction))
        .route("/checkIfTxExists/:hash", get(check_tx_exists))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(state);

    let root_path = root_path.trim_end_matches('/');
    let app = if root_path.is_empty() {
        routes
    } else {
        Router::new().nest(root_path, routes)
    };

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Sign and submit; responds with the hash once the node accepted it
async fn send_tx(
    State(state): State<AppState>,
    Json(request): Json<TransactionRequest>,
) -> Result<String, GatewayError> {
    if let Err(e) = request.validate() {
        error!("{}. Returning 400 - Bad Request", e);
        return Err(e);
    }
    info!("sendTx request received");

    // a nonce gets issued; finish even if the client goes away
    let manager = state.manager.clone();
    let tx_hash = tokio::spawn(async move { manager.send_transaction(request).await })
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?
        .map_err(|e| {
            error!("Error during sendTx request: {}", e);
            e
        })?;

    Ok(format!("{:?}", tx_hash))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreSignedRequest {
    raw_transaction: Bytes,
}

async fn send_presigned_tx(
    State(state): State<AppState>,
    Json(request): Json<PreSignedRequest>,
) -> Result<Json<TransactionReceipt>, GatewayError> {
    info!("sendPreSignedTx request received");
    let receipt = state
        .manager
        .send_presigned(request.raw_transaction)
        .await
        .map_err(|e| {
            error!("Error during sendPreSignedTx request: {}", e);
            e
        })?;
    Ok(Json(receipt))
}

async fn call_function(
    State(state): State<AppState>,
    Json(request): Json<TransactionRequest>,
) -> Result<String, GatewayError> {
    if let Err(e) = request.validate() {
        error!("{}. Returning 400 - Bad Request", e);
        return Err(e);
    }
    info!("callFunction request received");

    let result = state.manager.call(&request).await?;
    Ok(format!("0x{}", hex::encode(&result)))
}

fn parse_hash(hash: &str) -> GatewayResult<H256> {
    hash.parse()
        .map_err(|_| GatewayError::Validation(format!("invalid transaction hash: {}", hash)))
}

async fn wait_for_tx(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<TransactionReceipt>, GatewayError> {
    let tx_hash = parse_hash(&hash)?;

    let receipt = state.manager.wait_for_receipt(tx_hash).await?;
    Ok(Json(receipt))
}

async fn check_contract_exists(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<bool>, GatewayError> {
    if !state.manager.is_address(&address) {
        return Err(GatewayError::Validation(format!(
            "invalid address: {}",
            address
        )));
    }
    let address: Address = address
        .trim()
        .parse()
        .map_err(|_| GatewayError::Validation(format!("invalid address: {}", address)))?;

    Ok(Json(state.manager.contract_exists(address).await?))
}

async fn check_tx_exists(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<bool>, GatewayError> {
    let tx_hash = parse_hash(&hash)?;
    Ok(Json(state.manager.exists(tx_hash).await?))
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, GatewayError> {
    let tx_hash = parse_hash(&hash)?;
    match state.manager.transaction(tx_hash).await? {
        Some(tx) => Ok(Json(tx).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            format!("unknown transaction {:?}", tx_hash),
        )
            .into_response()),
    }
}

/// Balance of the gateway account in wei, as a decimal string
async fn get_balance(State(state): State<AppState>) -> Result<String, GatewayError> {
    Ok(state.manager.balance().await?.to_string())
}

async fn get_account_address(State(state): State<AppState>) -> String {
    let address = to_checksum(&state.manager.account().address(), None);
    info!("/getAccountAddress returning: {}", address);
    address
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - the node must answer its liveness probe
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let connection = state.manager.connection();
    let node = connection.probe().await;

    let status = if node {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready: node,
            node,
            connection: connection.state().await,
            chain_id: state.manager.account().chain_id(),
        }),
    )
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    node: bool,
    connection: ConnectionState,
    chain_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{manager_for, FakeNode};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn app(node: Arc<FakeNode>, root_path: &str) -> Router {
        let manager = Arc::new(manager_for(node).await);
        router(AppState { manager }, root_path)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_send_tx_without_to_or_data_is_bad_request() {
        let node = FakeNode::new();
        let response = app(node.clone(), "")
            .await
            .oneshot(post_json("/sendTx", r#"{"value": 1}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(node.sent().is_empty());
    }

    #[tokio::test]
    async fn test_send_tx_returns_hash() {
        let node = FakeNode::new();
        let response = app(node.clone(), "")
            .await
            .oneshot(post_json(
                "/sendTx",
                r#"{"to": "0x00000000000000000000000000000000000000aa", "data": "0x01"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let hash = body_text(response).await;
        assert!(hash.starts_with("0x"));
        assert_eq!(hash.len(), 66);
        assert_eq!(node.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_submission_failure_is_server_error() {
        let node = FakeNode::new();
        node.script_sends([crate::test_utils::SendOutcome::Reject(
            "insufficient funds".to_string(),
        )]);
        let response = app(node, "")
            .await
            .oneshot(post_json(
                "/sendTx",
                r#"{"to": "0x00000000000000000000000000000000000000aa"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("insufficient funds"));
    }

    #[tokio::test]
    async fn test_send_presigned_tx_returns_receipt() {
        let node = FakeNode::new();
        let raw = Bytes::from(vec![0xf8, 0x6c, 0x80, 0x01]);
        let tx_hash = H256::from(ethers::utils::keccak256(&raw));
        node.mine_after(tx_hash, 1);

        let response = app(node.clone(), "")
            .await
            .oneshot(post_json(
                "/sendPreSignedTx",
                r#"{"rawTransaction": "0xf86c8001"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let receipt: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(receipt["transactionHash"], format!("{:?}", tx_hash));
        assert_eq!(node.sent(), vec![raw]);
    }

    #[tokio::test]
    async fn test_send_presigned_tx_rejection_is_server_error() {
        let node = FakeNode::new();
        node.script_sends([crate::test_utils::SendOutcome::Reject(
            "invalid sender".to_string(),
        )]);

        let response = app(node, "")
            .await
            .oneshot(post_json(
                "/sendPreSignedTx",
                r#"{"rawTransaction": "0xf86c8001"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("invalid sender"));
    }

    #[tokio::test]
    async fn test_get_account_address() {
        let response = app(FakeNode::new(), "")
            .await
            .oneshot(get_req("/getAccountAddress"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response).await,
            "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23"
        );
    }

    #[tokio::test]
    async fn test_wait_for_tx_rejects_malformed_hash() {
        let response = app(FakeNode::new(), "")
            .await
            .oneshot(get_req("/waitForTx/0x1234"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_check_contract_exists() {
        let node = FakeNode::new();
        let contract: Address = "0x00000000000000000000000000000000000000cc".parse().unwrap();
        node.set_code(contract, Bytes::from(vec![0x60, 0x80, 0x60, 0x40, 0x52, 0x00]));

        let response = app(node, "")
            .await
            .oneshot(get_req(
                "/checkIfContractExists/0x00000000000000000000000000000000000000cc",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "true");
    }

    #[tokio::test]
    async fn test_balance_and_transaction_lookups() {
        let node = FakeNode::new();
        let mined = H256::repeat_byte(0x33);
        node.mine_after(mined, 1);
        let app = app(node, "").await;

        let balance = app.clone().oneshot(get_req("/getBalance")).await.unwrap();
        assert_eq!(balance.status(), StatusCode::OK);
        assert_eq!(body_text(balance).await, "1000000000000000000");

        let exists = app
            .clone()
            .oneshot(get_req(&format!("/checkIfTxExists/{:?}", mined)))
            .await
            .unwrap();
        assert_eq!(body_text(exists).await, "true");

        let tx = app
            .oneshot(get_req(&format!("/getTransaction/{:?}", mined)))
            .await
            .unwrap();
        assert_eq!(tx.status(), StatusCode::OK);
        assert!(body_text(tx).await.contains(&format!("{:?}", mined)));
    }

    #[tokio::test]
    async fn test_routes_nest_under_root_path() {
        let app = app(FakeNode::new(), "/api/").await;

        let nested = app.clone().oneshot(get_req("/api/health")).await.unwrap();
        assert_eq!(nested.status(), StatusCode::OK);

        let bare = app.oneshot(get_req("/health")).await.unwrap();
        assert_eq!(bare.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_readiness_reflects_node_probe() {
        let node = FakeNode::new();
        let app = app(node.clone(), "").await;

        let ready = app.clone().oneshot(get_req("/ready")).await.unwrap();
        assert_eq!(ready.status(), StatusCode::OK);
        assert!(body_text(ready).await.contains(r#""connection":"connected""#));

        node.set_listening(false);
        let not_ready = app.oneshot(get_req("/ready")).await.unwrap();
        assert_eq!(not_ready.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
