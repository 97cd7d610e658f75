pub mod auth;
pub mod faucet;
pub mod live_stats;
pub mod login;

use crate::auth::{ApiAuthConfig, ApiRateLimiter};
use crate::faucet::{
    FaucetClientConfig, FaucetCooldownLedger, FaucetGateway, FaucetStatus, HttpFaucetClient,
    NoopFaucetGateway,
};
use crate::live_stats::LiveStatsFeedConfig;
use crate::login::{
    HttpSignatureVerifier, LoginConfig, NonceStore, SignatureVerifier, StaticSignatureVerifier,
    VerifierConfig,
};
use anyhow::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chain_stats::{
    ChainStats, DAYS_PER_YEAR, DEFAULT_STAKING_APR_BPS, PublishedStats, RewardPoint,
    SampleCoordinator, project_rewards, yearly_schedule,
};
use common::{ChainKey, format_address, parse_address};
use gas_oracle::{GasOracle, WalletView, buffered_gas_cost, can_afford, funding_message};
use node_client::{Block, CallRequest, HttpNodeClient, InMemoryNodeProvider, NodeClientConfig, NodeProvider};
use node_runtime::resolve_chain_key;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub chain_key: ChainKey,
    pub node: Arc<dyn NodeProvider>,
    pub stats: Arc<SampleCoordinator>,
    pub stats_rx: watch::Receiver<PublishedStats>,
    pub faucet: Arc<dyn FaucetGateway>,
    pub faucet_status: Arc<RwLock<FaucetStatus>>,
    pub faucet_cooldowns: Arc<FaucetCooldownLedger>,
    pub nonces: Arc<NonceStore>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub staking_apr_bps: u32,
    pub recent_blocks_limit: usize,
    pub api_auth: ApiAuthConfig,
    pub api_rate_limiter: ApiRateLimiter,
}

/// What `main` needs beyond the shared state: the stats publisher handle and
/// the live feed config, present only when a node url is configured.
pub struct RuntimeBootstrap {
    pub live_feed: Option<LiveStatsFeedConfig>,
    pub stats_tx: watch::Sender<PublishedStats>,
}

/// Assembles the service state from the environment. Without
/// `NEXUS_NODE_HTTP_URL` the service still runs, serving empty chain data,
/// so the dashboard can come up before the node does.
pub fn default_state_with_runtime() -> Result<(AppState, RuntimeBootstrap)> {
    let chain_key = resolve_chain_key(env::var("NEXUS_CHAIN_KEY").ok().as_deref());

    let (node, live_feed): (Arc<dyn NodeProvider>, Option<LiveStatsFeedConfig>) =
        match NodeClientConfig::from_env() {
            Some(config) => (
                Arc::new(HttpNodeClient::new(config)?),
                Some(LiveStatsFeedConfig::from_env()),
            ),
            None => {
                warn!("NEXUS_NODE_HTTP_URL not set; chain and wallet routes serve empty data");
                (Arc::new(InMemoryNodeProvider::new()), None)
            }
        };

    let faucet: Arc<dyn FaucetGateway> = match FaucetClientConfig::from_env() {
        Some(config) => Arc::new(HttpFaucetClient::new(config)?),
        None => Arc::new(NoopFaucetGateway),
    };
    let verifier: Arc<dyn SignatureVerifier> = match VerifierConfig::from_env() {
        Some(config) => Arc::new(HttpSignatureVerifier::new(config)?),
        None => Arc::new(StaticSignatureVerifier::rejecting()),
    };

    let api_auth = ApiAuthConfig::from_env();
    let api_rate_limiter = ApiRateLimiter::new(api_auth.requests_per_minute);
    let (stats_tx, stats_rx) = watch::channel(PublishedStats::default());

    let staking_apr_bps = env::var("NEXUS_STAKING_APR_BPS")
        .ok()
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .unwrap_or(DEFAULT_STAKING_APR_BPS);
    let recent_blocks_limit = env::var("NEXUS_RECENT_BLOCKS_LIMIT")
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(10)
        .clamp(1, 64);

    let state = AppState {
        chain_key,
        node,
        stats: Arc::new(SampleCoordinator::new()),
        stats_rx,
        faucet,
        faucet_status: Arc::new(RwLock::new(FaucetStatus::default())),
        faucet_cooldowns: Arc::new(FaucetCooldownLedger::from_env()),
        nonces: Arc::new(NonceStore::new(&LoginConfig::from_env())),
        verifier,
        staking_apr_bps,
        recent_blocks_limit,
        api_auth,
        api_rate_limiter,
    };

    Ok((state, RuntimeBootstrap { live_feed, stats_tx }))
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let protected = Router::new()
        .route("/chain/stats", get(chain_stats))
        .route("/chain/blocks", get(chain_blocks))
        .route("/wallet/{address}/gas", get(wallet_gas))
        .route("/wallet/estimate", post(wallet_estimate))
        .route("/faucet/drip", post(faucet_drip))
        .route("/faucet/status", get(faucet_status))
        .route("/auth/nonce", post(auth_nonce))
        .route("/auth/verify", post(auth_verify))
        .route("/staking/projection", get(staking_projection))
        .route("/dashboard/snapshot", get(dashboard_snapshot))
        .route("/dashboard/stream", get(dashboard_stream))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .merge(protected)
        .layer(cors)
        .with_state(state)
}

async fn require_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if !state.api_auth.enabled {
        return next.run(request).await;
    }

    let Some(api_key) = headers.get("x-api-key").and_then(|value| value.to_str().ok()) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    if !state.api_auth.validates_key(api_key) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if !state.api_rate_limiter.allow(api_key) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    next.run(request).await
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub chain: String,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            chain: state.chain_key.to_string(),
        }),
    )
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = render_prometheus_metrics(&state);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

fn render_prometheus_metrics(state: &AppState) -> String {
    let snapshot = state.stats.snapshot();
    let faucet = state.faucet_status.read();
    let mut out = String::new();

    out.push_str("# TYPE nexus_chain_head_height gauge\n");
    out.push_str(&format!("nexus_chain_head_height {}\n", snapshot.head));
    out.push_str("# TYPE nexus_chain_tps gauge\n");
    out.push_str(&format!(
        "nexus_chain_tps {}\n",
        snapshot.stats.transactions_per_second
    ));
    out.push_str("# TYPE nexus_chain_avg_block_time_seconds gauge\n");
    out.push_str(&format!(
        "nexus_chain_avg_block_time_seconds {}\n",
        snapshot.stats.average_block_time_secs
    ));
    out.push_str("# TYPE nexus_chain_window_transactions gauge\n");
    out.push_str(&format!(
        "nexus_chain_window_transactions {}\n",
        snapshot.stats.total_transactions
    ));
    out.push_str("# TYPE nexus_samples_published_total counter\n");
    out.push_str(&format!(
        "nexus_samples_published_total {}\n",
        snapshot.samples_published
    ));
    out.push_str("# TYPE nexus_sample_failures_total counter\n");
    out.push_str(&format!(
        "nexus_sample_failures_total {}\n",
        snapshot.sample_failures
    ));
    out.push_str("# TYPE nexus_malformed_discards_total counter\n");
    out.push_str(&format!(
        "nexus_malformed_discards_total {}\n",
        snapshot.malformed_discards
    ));
    out.push_str("# TYPE nexus_stale_results_total counter\n");
    out.push_str(&format!(
        "nexus_stale_results_total {}\n",
        snapshot.stale_results
    ));
    out.push_str("# TYPE nexus_faucet_requests_total counter\n");
    out.push_str(&format!(
        "nexus_faucet_requests_total {}\n",
        faucet.total_requests
    ));
    out.push_str("# TYPE nexus_faucet_granted_total counter\n");
    out.push_str(&format!(
        "nexus_faucet_granted_total {}\n",
        faucet.total_granted
    ));
    out.push_str("# TYPE nexus_faucet_rejected_total counter\n");
    out.push_str(&format!(
        "nexus_faucet_rejected_total {}\n",
        faucet.total_rejected
    ));
    out.push_str("# TYPE nexus_login_nonces_pending gauge\n");
    out.push_str(&format!(
        "nexus_login_nonces_pending {}\n",
        state.nonces.pending_count()
    ));
    out.push_str("# TYPE nexus_api_rate_limit_per_minute gauge\n");
    out.push_str(&format!(
        "nexus_api_rate_limit_per_minute {}\n",
        state.api_auth.requests_per_minute
    ));

    out
}

#[derive(Serialize)]
pub struct ChainStatsResponse {
    pub chain: String,
    pub head: u64,
    pub transactions_per_second: f64,
    pub average_block_time_secs: f64,
    pub total_transactions: u64,
    pub sampled_at_unix_ms: i64,
    pub samples_published: u64,
}

async fn chain_stats(State(state): State<AppState>) -> Json<ChainStatsResponse> {
    let snapshot = state.stats.snapshot();
    Json(ChainStatsResponse {
        chain: state.chain_key.to_string(),
        head: snapshot.head,
        transactions_per_second: snapshot.stats.transactions_per_second,
        average_block_time_secs: snapshot.stats.average_block_time_secs,
        total_transactions: snapshot.stats.total_transactions,
        sampled_at_unix_ms: snapshot.sampled_at_unix_ms,
        samples_published: snapshot.samples_published,
    })
}

#[derive(Deserialize)]
pub struct BlocksQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct BlockSummary {
    pub number: u64,
    pub timestamp: u64,
    pub transaction_count: u32,
    pub gas_used: u64,
    pub gas_limit: u64,
}

impl From<&Block> for BlockSummary {
    fn from(block: &Block) -> Self {
        Self {
            number: block.number,
            timestamp: block.timestamp,
            transaction_count: block.transaction_count,
            gas_used: block.gas_used,
            gas_limit: block.gas_limit,
        }
    }
}

async fn chain_blocks(
    State(state): State<AppState>,
    Query(query): Query<BlocksQuery>,
) -> Json<Vec<BlockSummary>> {
    let snapshot = state.stats.snapshot();
    let limit = query.limit.unwrap_or(state.recent_blocks_limit);
    let blocks = snapshot
        .blocks
        .iter()
        .rev()
        .take(limit)
        .map(BlockSummary::from)
        .collect();
    Json(blocks)
}

#[derive(Serialize)]
pub struct GasStatusResponse {
    pub address: String,
    pub native_balance_wei: u128,
    pub has_sufficient_gas: bool,
    pub minimum_required_wei: u128,
    pub funding_message: Option<String>,
}

async fn wallet_gas(State(state): State<AppState>, Path(address): Path<String>) -> Response {
    let Some(address) = parse_address(&address) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid wallet address");
    };

    let oracle = GasOracle::new(state.node.clone());
    match oracle.wallet_gas_status(&address).await {
        Ok(status) => {
            let funding_message = funding_message(&WalletView::Connected {
                balance_wei: status.native_balance_wei,
            });
            Json(GasStatusResponse {
                address: format_address(&address),
                native_balance_wei: status.native_balance_wei,
                has_sufficient_gas: status.has_sufficient_gas,
                minimum_required_wei: status.minimum_required_wei,
                funding_message,
            })
            .into_response()
        }
        Err(err) => {
            warn!(error = %err, "wallet balance lookup failed");
            error_response(StatusCode::BAD_GATEWAY, "node unavailable")
        }
    }
}

#[derive(Deserialize)]
pub struct EstimateRequest {
    pub from: Option<String>,
    pub to: Option<String>,
    pub value_wei: Option<u128>,
    pub data: Option<String>,
}

#[derive(Serialize)]
pub struct EstimateResponse {
    pub available: bool,
    pub gas_limit: Option<u64>,
    pub gas_cost_wei: Option<u128>,
    pub buffered_cost_wei: Option<u128>,
    pub can_afford: Option<bool>,
}

async fn wallet_estimate(
    State(state): State<AppState>,
    Json(request): Json<EstimateRequest>,
) -> Response {
    let from = match parse_optional_address(request.from.as_deref()) {
        Ok(from) => from,
        Err(response) => return response,
    };
    let to = match parse_optional_address(request.to.as_deref()) {
        Ok(to) => to,
        Err(response) => return response,
    };
    let data = match request.data.as_deref() {
        Some(raw) => match hex::decode(raw.strip_prefix("0x").unwrap_or(raw)) {
            Ok(data) => data,
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid call data hex"),
        },
        None => Vec::new(),
    };
    let call = CallRequest {
        from,
        to,
        value_wei: request.value_wei.unwrap_or(0),
        data,
    };

    let oracle = GasOracle::new(state.node.clone());
    match oracle.estimate(&call).await {
        Some(estimate) => {
            let can_afford_call = match call.from {
                Some(sender) => match state.node.balance(&sender).await {
                    Ok(balance_wei) => Some(can_afford(balance_wei, Some(&estimate))),
                    // Unknown balance is treated like an unaffordable call.
                    Err(_) => Some(false),
                },
                None => None,
            };
            Json(EstimateResponse {
                available: true,
                gas_limit: Some(estimate.gas_limit),
                gas_cost_wei: Some(estimate.gas_cost_wei),
                buffered_cost_wei: Some(buffered_gas_cost(estimate.gas_cost_wei)),
                can_afford: can_afford_call,
            })
            .into_response()
        }
        None => Json(EstimateResponse {
            available: false,
            gas_limit: None,
            gas_cost_wei: None,
            buffered_cost_wei: None,
            can_afford: Some(false),
        })
        .into_response(),
    }
}

fn parse_optional_address(raw: Option<&str>) -> Result<Option<common::Address>, Response> {
    match raw {
        None => Ok(None),
        Some(value) => match parse_address(value) {
            Some(address) => Ok(Some(address)),
            None => Err(error_response(StatusCode::BAD_REQUEST, "invalid address")),
        },
    }
}

#[derive(Deserialize)]
pub struct FaucetDripRequest {
    pub address: String,
}

#[derive(Serialize)]
pub struct FaucetDripResponse {
    pub ok: bool,
    pub final_state: String,
    pub retry_after_secs: Option<u64>,
    pub error: Option<String>,
}

async fn faucet_drip(
    State(state): State<AppState>,
    Json(request): Json<FaucetDripRequest>,
) -> Response {
    let Some(address) = parse_address(&request.address) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid wallet address");
    };

    let now_unix_ms = faucet::unix_ms_now();
    if let Some(retry_after_secs) = state.faucet_cooldowns.retry_after_secs(&address, now_unix_ms) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(FaucetDripResponse {
                ok: false,
                final_state: "cooldown".to_owned(),
                retry_after_secs: Some(retry_after_secs),
                error: Some("drip cooldown active for this address".to_owned()),
            }),
        )
            .into_response();
    }

    let result = state.faucet.request_drip(&address).await;
    let granted = result.granted;
    let final_state = result.final_state.clone();
    if granted {
        state
            .faucet_cooldowns
            .record_grant(&address, faucet::unix_ms_now());
    }
    state.faucet_status.write().record(result);

    if granted {
        Json(FaucetDripResponse {
            ok: true,
            final_state,
            retry_after_secs: None,
            error: None,
        })
        .into_response()
    } else {
        (
            StatusCode::BAD_GATEWAY,
            Json(FaucetDripResponse {
                ok: false,
                final_state,
                retry_after_secs: None,
                error: Some("faucet request was not granted".to_owned()),
            }),
        )
            .into_response()
    }
}

async fn faucet_status(State(state): State<AppState>) -> Json<FaucetStatus> {
    Json(state.faucet_status.read().clone())
}

#[derive(Deserialize)]
pub struct NonceRequest {
    pub address: String,
}

#[derive(Serialize)]
pub struct NonceResponse {
    pub nonce: String,
    pub expires_at_unix_ms: i64,
}

async fn auth_nonce(State(state): State<AppState>, Json(request): Json<NonceRequest>) -> Response {
    let Some(address) = parse_address(&request.address) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid wallet address");
    };

    let issued = state.nonces.issue(address, faucet::unix_ms_now());
    Json(NonceResponse {
        nonce: issued.nonce,
        expires_at_unix_ms: issued.expires_at_unix_ms,
    })
    .into_response()
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub address: String,
    pub nonce: String,
    pub signature: String,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    pub token: String,
}

async fn auth_verify(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Response {
    let Some(address) = parse_address(&request.address) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid wallet address");
    };
    if !state
        .nonces
        .consume(&request.nonce, &address, faucet::unix_ms_now())
    {
        return error_response(StatusCode::UNAUTHORIZED, "unknown or expired nonce");
    }

    match state
        .verifier
        .verify_login(&address, &request.nonce, &request.signature)
        .await
    {
        Ok(Some(token)) => Json(VerifyResponse { token }).into_response(),
        Ok(None) => error_response(StatusCode::UNAUTHORIZED, "signature rejected"),
        Err(err) => {
            warn!(error = %err, "login verification failed");
            error_response(StatusCode::BAD_GATEWAY, "auth service unavailable")
        }
    }
}

#[derive(Deserialize)]
pub struct ProjectionQuery {
    pub principal_wei: Option<String>,
    pub apr_bps: Option<u32>,
}

#[derive(Serialize)]
pub struct ProjectionResponse {
    pub principal_wei: u128,
    pub apr_bps: u32,
    pub full_year_wei: u128,
    pub schedule: Vec<RewardPoint>,
}

async fn staking_projection(
    State(state): State<AppState>,
    Query(query): Query<ProjectionQuery>,
) -> Response {
    let Some(principal_wei) = query
        .principal_wei
        .as_deref()
        .and_then(|raw| raw.trim().parse::<u128>().ok())
    else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "principal_wei must be a decimal wei amount",
        );
    };
    let apr_bps = query.apr_bps.unwrap_or(state.staking_apr_bps);

    Json(ProjectionResponse {
        principal_wei,
        apr_bps,
        full_year_wei: project_rewards(principal_wei, apr_bps, DAYS_PER_YEAR),
        schedule: yearly_schedule(principal_wei, apr_bps),
    })
    .into_response()
}

#[derive(Serialize)]
pub struct FaucetCounters {
    pub total_requests: u64,
    pub total_granted: u64,
    pub total_rejected: u64,
}

#[derive(Serialize)]
pub struct DashboardSnapshot {
    pub chain: String,
    pub head: u64,
    pub stats: ChainStats,
    pub recent_blocks: Vec<BlockSummary>,
    pub sampled_at_unix_ms: i64,
    pub faucet: FaucetCounters,
}

async fn dashboard_snapshot(State(state): State<AppState>) -> Json<DashboardSnapshot> {
    let snapshot = state.stats.snapshot();
    let faucet = {
        let status = state.faucet_status.read();
        FaucetCounters {
            total_requests: status.total_requests,
            total_granted: status.total_granted,
            total_rejected: status.total_rejected,
        }
    };
    let recent_blocks = snapshot
        .blocks
        .iter()
        .rev()
        .take(state.recent_blocks_limit)
        .map(BlockSummary::from)
        .collect();

    Json(DashboardSnapshot {
        chain: state.chain_key.to_string(),
        head: snapshot.head,
        stats: snapshot.stats,
        recent_blocks,
        sampled_at_unix_ms: snapshot.sampled_at_unix_ms,
        faucet,
    })
}

/// Pushes the published stats snapshot to the socket on every change. The
/// stream ends when the live feed stops or the client goes away.
async fn dashboard_stream(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    let stats = state.stats_rx.clone();
    upgrade.on_upgrade(move |socket| handle_stats_socket(socket, stats))
}

async fn handle_stats_socket(mut socket: WebSocket, mut stats: watch::Receiver<PublishedStats>) {
    let snapshot = stats.borrow_and_update().clone();
    if let Ok(payload) = serde_json::to_string(&snapshot)
        && socket.send(Message::Text(payload.into())).await.is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            changed = stats.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = stats.borrow_and_update().clone();
                let Ok(payload) = serde_json::to_string(&snapshot) else {
                    continue;
                };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    return;
                }
            }
            maybe_message = socket.recv() => {
                match maybe_message {
                    None => break,
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_owned(),
        }),
    )
        .into_response()
}
