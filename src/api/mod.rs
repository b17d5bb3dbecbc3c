//! HTTP API for health checks, nonce lookups, swap submission and
//! cancellation

use crate::chain::ChainManager;
use crate::config::{ApiConfig, SwapProtectionSetting};
use crate::error::{SubmitterError, SubmitterResult};
use crate::policy::SwapProtectionPolicy;
use crate::ports::PendingTransactionStore;
use crate::tx::{CancellationPlanner, NonceReconciler, SubmittedTx, SwapParams, SwapSequencer};
use crate::types::{
    Account, AnalyticsContext, PendingTransactionRecord, SubmissionChannel, TransactionTypeInfo,
    TxRequest, TxRequestBody,
};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub chain_manager: Arc<ChainManager>,
    pub store: Arc<dyn PendingTransactionStore>,
    pub nonces: Arc<NonceReconciler>,
    pub sequencer: Arc<SwapSequencer>,
    pub canceller: Arc<CancellationPlanner>,
    pub policy: Arc<SwapProtectionPolicy>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/chains", get(get_chains))
        .route("/chains/:chain_id/nonce/:address", get(get_nonce))
        .route("/swaps", post(submit_swap))
        .route("/accounts/:address/transactions", get(list_transactions))
        .route(
            "/transactions/:id/cancel",
            get(preview_cancellation).post(submit_cancellation),
        )
        .route(
            "/settings/swap-protection",
            get(get_swap_protection).put(set_swap_protection),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> SubmitterResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| SubmitterError::Config(format!("Cannot bind API address {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| SubmitterError::Internal(e.to_string()))?;

    Ok(())
}

/// Error body returned by every failing endpoint
struct ApiError(SubmitterError);

impl From<SubmitterError> for ApiError {
    fn from(e: SubmitterError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SubmitterError::MalformedRequest(_) | SubmitterError::UnsupportedFeeShape(_) => {
                StatusCode::BAD_REQUEST
            }
            SubmitterError::UnsupportedOperation(_) | SubmitterError::InvalidStateTransition { .. } => {
                StatusCode::CONFLICT
            }
            SubmitterError::SinkRejection { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            SubmitterError::ChainNotFound { .. } | SubmitterError::TransactionNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            e if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - verify all dependencies
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let (store, chain_health) =
        futures::join!(state.store.health_check(), state.chain_manager.health_check());
    let store_ok = store.is_ok();
    let chains_ok = chain_health.iter().all(|(_, healthy)| *healthy);
    let ready = store_ok && chains_ok;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            store: store_ok,
            chains: chains_ok,
            details: chain_health
                .into_iter()
                .map(|(id, h)| ChainHealth {
                    chain_id: id,
                    healthy: h,
                })
                .collect(),
        }),
    )
}

/// Get connected chains
async fn get_chains(State(state): State<AppState>) -> impl IntoResponse {
    Json(ChainsResponse {
        chains: state.chain_manager.connected_chains(),
        private_relay_chains: state.chain_manager.private_relay_chains(),
    })
}

async fn get_nonce(
    State(state): State<AppState>,
    Path((chain_id, address)): Path<(u64, Address)>,
    Query(query): Query<NonceQuery>,
) -> ApiResult<NonceResponse> {
    let channel = query.channel.unwrap_or_default();
    let nonce = state.nonces.resolve_nonce(address, chain_id, channel).await?;
    let private_in_flight = state.nonces.private_in_flight_count(address, chain_id).await;

    Ok(Json(NonceResponse {
        chain_id,
        address,
        channel,
        nonce,
        private_in_flight,
    }))
}

async fn submit_swap(
    State(state): State<AppState>,
    Json(body): Json<SwapBody>,
) -> ApiResult<SwapResponse> {
    let analytics = body.analytics.clone();
    let params = body.into_params()?;

    match state.sequencer.submit(params).await {
        Ok(submission) => Ok(Json(SwapResponse {
            chain_id: submission.chain_id,
            channel: submission.channel,
            approval: submission.approval.map(Into::into),
            swap: submission.swap.into(),
        })),
        Err(e) => {
            error!(analytics = %analytics, "Swap submission failed: {}", e);
            Err(e.into())
        }
    }
}

async fn list_transactions(
    State(state): State<AppState>,
    Path(address): Path<Address>,
) -> ApiResult<Vec<PendingTransactionRecord>> {
    Ok(Json(state.store.list_pending(address).await?))
}

async fn find_record(state: &AppState, id: Uuid) -> SubmitterResult<PendingTransactionRecord> {
    state
        .store
        .get(id)
        .await?
        .ok_or_else(|| SubmitterError::TransactionNotFound { tx_id: id.to_string() })
}

async fn preview_cancellation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<CancellationPreview> {
    let record = find_record(&state, id).await?;
    let plan = state.canceller.plan(&record).await?;

    Ok(Json(CancellationPreview {
        replaced_id: id,
        request: plan.request,
        max_total_fee: plan.fee,
    }))
}

async fn submit_cancellation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelBody>,
) -> ApiResult<SubmittedTxResponse> {
    let record = find_record(&state, id).await?;
    let submitted = state
        .canceller
        .submit(&record, Account::new(body.account), body.analytics)
        .await?;

    Ok(Json(submitted.into()))
}

async fn get_swap_protection(State(state): State<AppState>) -> impl IntoResponse {
    Json(SwapProtectionResponse {
        swap_protection: state.policy.setting(),
        private_relay_enabled: state.policy.feature_gate(),
    })
}

async fn set_swap_protection(
    State(state): State<AppState>,
    Json(body): Json<SwapProtectionBody>,
) -> impl IntoResponse {
    state.policy.set_setting(body.swap_protection);
    get_swap_protection(State(state)).await
}

// Request types

#[derive(Deserialize)]
struct NonceQuery {
    channel: Option<SubmissionChannel>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapBody {
    tx_id: Option<Uuid>,
    account: Address,
    approve: Option<TxRequestBody>,
    swap: TxRequestBody,
    input_currency_id: String,
    output_currency_id: String,
    #[serde(default)]
    analytics: AnalyticsContext,
}

impl SwapBody {
    fn into_params(self) -> SubmitterResult<SwapParams> {
        let approve_request = self.approve.map(TxRequest::try_from).transpose()?;
        let swap_request = TxRequest::try_from(self.swap)?;

        Ok(SwapParams {
            tx_id: self.tx_id,
            account: Account::new(self.account),
            approve_request,
            swap_request,
            swap_type_info: TransactionTypeInfo::Swap {
                input_currency_id: self.input_currency_id,
                output_currency_id: self.output_currency_id,
            },
            analytics: self.analytics,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelBody {
    account: Address,
    #[serde(default)]
    analytics: AnalyticsContext,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapProtectionBody {
    swap_protection: SwapProtectionSetting,
}

// Response types

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    store: bool,
    chains: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    healthy: bool,
}

#[derive(Serialize)]
struct ChainsResponse {
    chains: Vec<u64>,
    private_relay_chains: Vec<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NonceResponse {
    chain_id: u64,
    address: Address,
    channel: SubmissionChannel,
    nonce: u64,
    private_in_flight: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmittedTxResponse {
    id: Uuid,
    nonce: u64,
    tx_hash: ethers::types::H256,
}

impl From<SubmittedTx> for SubmittedTxResponse {
    fn from(tx: SubmittedTx) -> Self {
        Self {
            id: tx.id,
            nonce: tx.nonce,
            tx_hash: tx.tx_hash,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    chain_id: u64,
    channel: SubmissionChannel,
    approval: Option<SubmittedTxResponse>,
    swap: SubmittedTxResponse,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CancellationPreview {
    replaced_id: Uuid,
    request: TxRequest,
    max_total_fee: U256,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapProtectionResponse {
    swap_protection: SwapProtectionSetting,
    private_relay_enabled: bool,
}
