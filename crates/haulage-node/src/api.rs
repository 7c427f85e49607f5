//! HTTP API server for the Haulage node.
//!
//! Thin JSON layer over [`SettlementEngine`]. Authentication happens at the
//! edge; the edge forwards the caller as `x-account-id` and `x-roles`
//! headers, which every caller-scoped route requires.

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use haulage_core::{
    AccountId, Currency, DisputeId, DisputeStatus, HoldId, HoldState, PaymentId, PayoutId, TripId,
    WalletId,
};
use haulage_settlement::{
    CallbackAck, CallbackStatus, Caller, DepositRequest, Dispute, EngineStats,
    EscrowHold, HistoryQuery, HoldCreated, LedgerEntry, OpenDispute, Page, PaymentCallback,
    PaymentInitiated, PaymentRecord, PayoutRecord, PlatformRevenue, Provider, Refunded, Released,
    Resolution, Role, SettlementError, TripSnapshot, TripStatus, Wallet, WalletStatus,
    WithdrawRequest,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::state::NodeState;

// --- Request / response types ---

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_secs: u64,
    pub stats: EngineStats,
    pub providers: Vec<Provider>,
}

#[derive(Deserialize)]
pub struct OpenWalletRequest {
    /// Defaults to the caller's own account.
    #[serde(default)]
    pub account: Option<AccountId>,
    #[serde(default)]
    pub currency: Option<Currency>,
}

#[derive(Deserialize)]
pub struct WalletStatusRequest {
    pub status: WalletStatus,
}

/// The hold amount always comes from the trip's agreed price.
#[derive(Deserialize)]
pub struct CreateHoldRequest {
    pub trip_id: TripId,
}

#[derive(Deserialize)]
pub struct TripStatusRequest {
    pub status: TripStatus,
}

#[derive(Deserialize)]
pub struct HoldFilter {
    #[serde(default)]
    pub state: Option<HoldState>,
}

#[derive(Deserialize)]
pub struct DisputeFilter {
    #[serde(default)]
    pub status: Option<DisputeStatus>,
}

#[derive(Deserialize, Default)]
pub struct NotesRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub resolution: Resolution,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct SandboxSettleRequest {
    pub external_key: String,
    pub status: CallbackStatus,
}

#[derive(Serialize)]
pub struct AuditResponse {
    pub wallet_id: WalletId,
    pub consistent: bool,
}

/// The caller as forwarded by the edge.
pub struct AuthCaller(pub Caller);

impl<S> FromRequestParts<S> for AuthCaller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let account = header("x-account-id")
            .ok_or_else(|| unauthenticated("missing x-account-id header"))?
            .parse::<AccountId>()
            .map_err(|_| unauthenticated("x-account-id is not a valid account id"))?;
        let roles = header("x-roles")
            .unwrap_or_default()
            .split(',')
            .filter(|r| !r.trim().is_empty())
            .map(str::parse::<Role>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(reject)?;
        Ok(AuthCaller(Caller::new(account, roles)))
    }
}

fn unauthenticated(message: &str) -> ApiError {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

fn status_for(error: &SettlementError) -> StatusCode {
    use SettlementError as E;
    match error {
        E::Unauthorized { .. } => StatusCode::FORBIDDEN,
        E::WalletNotFound(_)
        | E::HoldNotFound(_)
        | E::TripNotFound(_)
        | E::NoHoldForTrip(_)
        | E::DisputeNotFound(_)
        | E::PayoutNotFound(_)
        | E::ExternalPaymentNotFound(_) => StatusCode::NOT_FOUND,
        E::WalletUnavailable { .. }
        | E::DuplicateHold { .. }
        | E::InvalidHoldState { .. }
        | E::InvalidDisputeState { .. }
        | E::TripNotEligible { .. }
        | E::ActiveDisputeExists { .. } => StatusCode::CONFLICT,
        E::InsufficientFunds { .. }
        | E::SplitExceedsHold { .. }
        | E::AmountOutOfRange { .. }
        | E::InvalidHandle(_)
        | E::Validation(_)
        | E::Core(_) => StatusCode::UNPROCESSABLE_ENTITY,
        E::GatewayNotRegistered(_) => StatusCode::BAD_REQUEST,
        E::Gateway(_) => StatusCode::BAD_GATEWAY,
        E::LedgerMismatch { .. } | E::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(error: SettlementError) -> ApiError {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::error!(error = %error, "request failed");
    } else {
        tracing::debug!(error = %error, %status, "request rejected");
    }
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

// --- Handlers ---

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
    })
}

async fn handle_status(State(state): State<Arc<NodeState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        stats: state.engine.stats(),
        providers: state.sandboxes.keys().copied().collect(),
    })
}

async fn handle_open_wallet(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Json(req): Json<OpenWalletRequest>,
) -> ApiResult<Wallet> {
    let account = req.account.unwrap_or(caller.account);
    let currency = req
        .currency
        .unwrap_or(state.engine.config().default_currency);
    state
        .engine
        .get_or_create_wallet(&caller, account, currency)
        .map(Json)
        .map_err(reject)
}

async fn handle_account_wallets(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(account): Path<AccountId>,
) -> ApiResult<Vec<Wallet>> {
    state
        .engine
        .wallet_summary(&caller, account)
        .map(Json)
        .map_err(reject)
}

async fn handle_get_wallet(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(wallet_id): Path<WalletId>,
) -> ApiResult<Wallet> {
    state
        .engine
        .get_wallet(&caller, wallet_id)
        .map(Json)
        .map_err(reject)
}

async fn handle_history(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(wallet_id): Path<WalletId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Page<LedgerEntry>> {
    state
        .engine
        .transaction_history(&caller, wallet_id, &query)
        .map(Json)
        .map_err(reject)
}

async fn handle_wallet_status(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(wallet_id): Path<WalletId>,
    Json(req): Json<WalletStatusRequest>,
) -> ApiResult<Wallet> {
    state
        .engine
        .set_wallet_status(&caller, wallet_id, req.status)
        .map(Json)
        .map_err(reject)
}

async fn handle_audit_wallet(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(wallet_id): Path<WalletId>,
) -> ApiResult<AuditResponse> {
    state
        .engine
        .audit_wallet(&caller, wallet_id)
        .map_err(reject)?;
    Ok(Json(AuditResponse {
        wallet_id,
        consistent: true,
    }))
}

async fn handle_deposit(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Json(req): Json<DepositRequest>,
) -> Result<(StatusCode, Json<PaymentInitiated>), ApiError> {
    let initiated = state.engine.deposit(&caller, req).await.map_err(reject)?;
    state.journal_payment(initiated.payment_id);
    Ok((StatusCode::ACCEPTED, Json(initiated)))
}

async fn handle_withdraw(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Json(req): Json<WithdrawRequest>,
) -> Result<(StatusCode, Json<PaymentInitiated>), ApiError> {
    let initiated = state.engine.withdraw(&caller, req).await.map_err(reject)?;
    state.journal_payment(initiated.payment_id);
    Ok((StatusCode::ACCEPTED, Json(initiated)))
}

fn apply_callback(state: &NodeState, callback: PaymentCallback) -> ApiResult<CallbackAck> {
    let ack = state.engine.payment_callback(callback).map_err(reject)?;
    if let CallbackAck::Applied { payment_id, .. } = &ack {
        state.journal_payment(*payment_id);
    }
    Ok(Json(ack))
}

/// Webhook for the mobile-money rails. Replays are acknowledged, not rejected.
async fn handle_callback(
    State(state): State<Arc<NodeState>>,
    Json(callback): Json<PaymentCallback>,
) -> ApiResult<CallbackAck> {
    apply_callback(&state, callback)
}

async fn handle_get_payment(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(payment_id): Path<PaymentId>,
) -> ApiResult<PaymentRecord> {
    state
        .engine
        .get_payment(&caller, payment_id)
        .map(Json)
        .map_err(reject)
}

async fn handle_payment_by_key(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(external_key): Path<String>,
) -> ApiResult<PaymentRecord> {
    state
        .engine
        .payment_by_key(&caller, &external_key)
        .map(Json)
        .map_err(reject)
}

/// Drive a sandbox request to a terminal outcome, as the real rail would.
async fn handle_sandbox_settle(
    State(state): State<Arc<NodeState>>,
    Path(provider): Path<Provider>,
    Json(req): Json<SandboxSettleRequest>,
) -> ApiResult<CallbackAck> {
    let gateway = state
        .sandboxes
        .get(&provider)
        .ok_or_else(|| reject(SettlementError::GatewayNotRegistered(provider)))?;
    let callback = gateway
        .settle(&req.external_key, req.status)
        .ok_or_else(|| reject(SettlementError::ExternalPaymentNotFound(req.external_key.clone())))?;
    apply_callback(&state, callback)
}

/// Trip lifecycle signal from the trip service.
async fn handle_upsert_trip(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Json(trip): Json<TripSnapshot>,
) -> ApiResult<TripSnapshot> {
    caller.require_admin("publish trip signals").map_err(reject)?;
    state.trips.upsert(trip.clone());
    Ok(Json(trip))
}

async fn handle_trip_status(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(trip_id): Path<TripId>,
    Json(req): Json<TripStatusRequest>,
) -> Result<StatusCode, ApiError> {
    caller.require_admin("publish trip signals").map_err(reject)?;
    if !state.trips.set_status(&trip_id, req.status) {
        return Err(reject(SettlementError::TripNotFound(trip_id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_trip_hold(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(trip_id): Path<TripId>,
) -> ApiResult<EscrowHold> {
    state
        .engine
        .hold_for_trip_id(&caller, trip_id)
        .map(Json)
        .map_err(reject)
}

async fn handle_create_hold(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Json(req): Json<CreateHoldRequest>,
) -> Result<(StatusCode, Json<HoldCreated>), ApiError> {
    let created = state
        .engine
        .hold_for_trip(&caller, req.trip_id)
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn handle_list_holds(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Query(filter): Query<HoldFilter>,
) -> ApiResult<Vec<EscrowHold>> {
    state
        .engine
        .list_holds(&caller, filter.state)
        .map(Json)
        .map_err(reject)
}

async fn handle_get_hold(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(hold_id): Path<HoldId>,
) -> ApiResult<EscrowHold> {
    state
        .engine
        .get_hold(&caller, hold_id)
        .map(Json)
        .map_err(reject)
}

async fn handle_release(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(hold_id): Path<HoldId>,
) -> ApiResult<Released> {
    state
        .engine
        .release(&caller, hold_id)
        .map(Json)
        .map_err(reject)
}

async fn handle_refund(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(hold_id): Path<HoldId>,
) -> ApiResult<Refunded> {
    state
        .engine
        .refund(&caller, hold_id)
        .map(Json)
        .map_err(reject)
}

async fn handle_open_dispute(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Json(req): Json<OpenDispute>,
) -> Result<(StatusCode, Json<Dispute>), ApiError> {
    let dispute = state.engine.open_dispute(&caller, req).map_err(reject)?;
    Ok((StatusCode::CREATED, Json(dispute)))
}

async fn handle_list_disputes(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Query(filter): Query<DisputeFilter>,
) -> ApiResult<Vec<Dispute>> {
    state
        .engine
        .list_disputes(&caller, filter.status)
        .map(Json)
        .map_err(reject)
}

async fn handle_get_dispute(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(dispute_id): Path<DisputeId>,
) -> ApiResult<Dispute> {
    state
        .engine
        .get_dispute(&caller, dispute_id)
        .map(Json)
        .map_err(reject)
}

async fn handle_review_dispute(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(dispute_id): Path<DisputeId>,
    Json(req): Json<NotesRequest>,
) -> ApiResult<Dispute> {
    state
        .engine
        .begin_review(&caller, dispute_id, req.notes)
        .map(Json)
        .map_err(reject)
}

async fn handle_escalate_dispute(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(dispute_id): Path<DisputeId>,
    Json(req): Json<NotesRequest>,
) -> ApiResult<Dispute> {
    state
        .engine
        .escalate_dispute(&caller, dispute_id, req.notes)
        .map(Json)
        .map_err(reject)
}

async fn handle_resolve_dispute(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(dispute_id): Path<DisputeId>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult<Dispute> {
    state
        .engine
        .resolve_dispute(&caller, dispute_id, req.resolution, req.notes)
        .map(Json)
        .map_err(reject)
}

async fn handle_account_payouts(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(account): Path<AccountId>,
) -> ApiResult<Vec<PayoutRecord>> {
    state
        .engine
        .list_payouts(&caller, account)
        .map(Json)
        .map_err(reject)
}

async fn handle_get_payout(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(payout_id): Path<PayoutId>,
) -> ApiResult<PayoutRecord> {
    state
        .engine
        .get_payout(&caller, payout_id)
        .map(Json)
        .map_err(reject)
}

async fn handle_platform_revenue(
    State(state): State<Arc<NodeState>>,
    AuthCaller(caller): AuthCaller,
    Path(currency): Path<Currency>,
) -> ApiResult<PlatformRevenue> {
    caller.require_admin("view platform revenue").map_err(reject)?;
    Ok(Json(state.engine.platform_revenue(currency)))
}

// --- Server ---

pub fn build_router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handle_health))
        .route("/api/v1/status", get(handle_status))
        .route("/api/v1/wallets", post(handle_open_wallet))
        .route("/api/v1/wallets/{id}", get(handle_get_wallet))
        .route("/api/v1/wallets/{id}/transactions", get(handle_history))
        .route("/api/v1/wallets/{id}/status", put(handle_wallet_status))
        .route("/api/v1/wallets/{id}/audit", post(handle_audit_wallet))
        .route("/api/v1/accounts/{id}/wallets", get(handle_account_wallets))
        .route("/api/v1/accounts/{id}/payouts", get(handle_account_payouts))
        .route("/api/v1/payments/deposit", post(handle_deposit))
        .route("/api/v1/payments/withdraw", post(handle_withdraw))
        .route("/api/v1/payments/callback", post(handle_callback))
        .route("/api/v1/payments/{id}", get(handle_get_payment))
        .route("/api/v1/payments/by-key/{key}", get(handle_payment_by_key))
        .route("/api/v1/sandbox/{provider}/settle", post(handle_sandbox_settle))
        .route("/api/v1/trips", post(handle_upsert_trip))
        .route("/api/v1/trips/{id}/status", put(handle_trip_status))
        .route("/api/v1/trips/{id}/hold", get(handle_trip_hold))
        .route("/api/v1/holds", get(handle_list_holds).post(handle_create_hold))
        .route("/api/v1/holds/{id}", get(handle_get_hold))
        .route("/api/v1/holds/{id}/release", post(handle_release))
        .route("/api/v1/holds/{id}/refund", post(handle_refund))
        .route("/api/v1/disputes", get(handle_list_disputes).post(handle_open_dispute))
        .route("/api/v1/disputes/{id}", get(handle_get_dispute))
        .route("/api/v1/disputes/{id}/review", post(handle_review_dispute))
        .route("/api/v1/disputes/{id}/escalate", post(handle_escalate_dispute))
        .route("/api/v1/disputes/{id}/resolve", post(handle_resolve_dispute))
        .route("/api/v1/payouts/{id}", get(handle_get_payout))
        .route("/api/v1/platform/revenue/{currency}", get(handle_platform_revenue))
        .with_state(state)
}

pub async fn start_api_server(listen_addr: SocketAddr, state: Arc<NodeState>) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(%listen_addr, "HTTP API server started");
    axum::serve(listener, app).await?;
    Ok(())
}
