//! HTTP API
//!
//! ## Endpoints
//!
//! ### Restock
//! - `POST /v1/restock/:product` - Run the restock check for one product
//! - `POST /v1/restock` - Run the restock check for every product
//!
//! ### Payments
//! - `POST /v1/payments` - Execute a payment intent
//! - `GET /v1/transactions` - Recent outcomes with totals
//!
//! ### Sessions
//! - `GET /v1/sessions` - List sessions
//! - `POST /v1/sessions` - Delegate a new session
//! - `GET /v1/sessions/:owner` - Session with remaining budget
//! - `POST /v1/sessions/:owner/revoke` - Revoke the owner's session
//!
//! ### Shop simulation
//! - `GET /v1/stock` - Shelf quantities
//! - `POST /v1/stock/sell` - Sell units, optionally followed by a restock check
//! - `POST /v1/stock/receive` - Receive a delivery

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use stockeasy_policy::StoreError;
use stockeasy_restock::{FeedError, RestockResult};
use stockeasy_types::{OwnerId, PaymentIntent, ProductId};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::SessionSeed;
use crate::state::{session_from_seed, AppState};

/// Build the router over shared state
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        // Restock
        .route("/v1/restock", post(restock_all))
        .route("/v1/restock/:product", post(restock_product))
        // Payments
        .route("/v1/payments", post(execute_payment))
        .route("/v1/transactions", get(transactions))
        // Sessions
        .route("/v1/sessions", get(list_sessions).post(create_session))
        .route("/v1/sessions/:owner", get(get_session))
        .route("/v1/sessions/:owner/revoke", post(revoke_session))
        // Shop simulation
        .route("/v1/stock", get(stock))
        .route("/v1/stock/sell", post(sell))
        .route("/v1/stock/receive", post(receive))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Store(StoreError),
    Feed(FeedError),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            Self::Store(e) => {
                let status = match e {
                    StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                    StoreError::SessionTerminal { .. } => StatusCode::CONFLICT,
                    StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
                    StoreError::Serialization(_) | StoreError::Backend(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.error_code(), e.to_string())
            }
            Self::Feed(e) => {
                let status = match e {
                    FeedError::UnknownProduct(_) => StatusCode::NOT_FOUND,
                    FeedError::InsufficientStock { .. } => StatusCode::CONFLICT,
                    FeedError::Unavailable(_) => StatusCode::BAD_GATEWAY,
                };
                (status, e.error_code(), e.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, %message, "request failed");
        }
        (
            status,
            Json(serde_json::json!({
                "error": true,
                "code": code,
                "message": message,
            })),
        )
            .into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<FeedError> for AppError {
    fn from(e: FeedError) -> Self {
        Self::Feed(e)
    }
}

type ApiResult<T> = Result<T, AppError>;

// ============================================================================
// Response Types
// ============================================================================

/// Restock result in the shape the dashboard reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestockResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl From<RestockResult> for RestockResponse {
    fn from(result: RestockResult) -> Self {
        match result {
            RestockResult::Skipped { reason } => Self {
                success: false,
                transaction_reference: None,
                error: Some(reason.to_string()),
                code: Some(reason.code().to_string()),
            },
            RestockResult::Attempted(outcome) => Self {
                success: outcome.approved,
                error: outcome.error_message(),
                code: outcome.denial_reason.map(|r| r.code().to_string()),
                transaction_reference: outcome.transaction_reference,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CycleEntry {
    product: ProductId,
    #[serde(flatten)]
    response: RestockResponse,
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

/// Admin request to delegate a session
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub owner_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub agent_key: String,
    pub allowlist: Vec<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub per_transaction_limit: u64,
    pub daily_limit: u64,
    pub monthly_limit: u64,
    #[serde(default = "default_valid_for_hours")]
    pub valid_for_hours: i64,
}

fn default_currency() -> String {
    "INR".to_string()
}

fn default_valid_for_hours() -> i64 {
    24
}

impl From<CreateSessionRequest> for SessionSeed {
    fn from(req: CreateSessionRequest) -> Self {
        SessionSeed {
            owner_id: req.owner_id,
            session_id: req.session_id,
            agent_key: req.agent_key,
            allowlist: req.allowlist,
            currency: req.currency,
            per_transaction_limit: req.per_transaction_limit,
            daily_limit: req.daily_limit,
            monthly_limit: req.monthly_limit,
            valid_for_hours: req.valid_for_hours,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StockChange {
    product: String,
    #[serde(default = "default_quantity")]
    quantity: u64,
}

fn default_quantity() -> u64 {
    1
}

// ============================================================================
// Handlers
// ============================================================================

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "stockeasy",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "POST /v1/restock/:product",
            "POST /v1/restock",
            "POST /v1/payments",
            "GET /v1/transactions",
            "GET /v1/sessions",
            "POST /v1/sessions",
            "GET /v1/sessions/:owner",
            "POST /v1/sessions/:owner/revoke",
            "GET /v1/stock",
            "POST /v1/stock/sell",
            "POST /v1/stock/receive",
        ]
    }))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "stockeasy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn restock_product(
    State(state): State<Arc<AppState>>,
    Path(product): Path<String>,
) -> ApiResult<Json<RestockResponse>> {
    let result = state
        .restock
        .request_restock(&ProductId::from(product))
        .await?;
    Ok(Json(result.into()))
}

async fn restock_all(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let report = state.restock.run_cycle().await?;
    let mut entries = Vec::with_capacity(report.len());
    for (product, result) in report {
        let response = match result {
            Ok(result) => result.into(),
            Err(e) => RestockResponse {
                success: false,
                transaction_reference: None,
                error: Some(e.to_string()),
                code: Some(e.error_code().to_string()),
            },
        };
        entries.push(CycleEntry { product, response });
    }
    let paid = entries.iter().filter(|e| e.response.success).count();
    Ok(Json(serde_json::json!({
        "paid": paid,
        "results": entries,
    })))
}

async fn execute_payment(
    State(state): State<Arc<AppState>>,
    Json(intent): Json<PaymentIntent>,
) -> impl IntoResponse {
    let outcome = state.orchestrator.execute(intent).await;
    Json(outcome)
}

async fn transactions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50).min(500);
    let journal = state.orchestrator.journal();
    let summary = journal.summary().await;
    let entries = journal.recent(limit).await;
    Json(serde_json::json!({
        "summary": summary,
        "transactions": entries,
    }))
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let sessions = state.store.list().await?;
    Ok(Json(serde_json::json!({
        "count": sessions.len(),
        "sessions": sessions,
    })))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let session = state.store.get(&OwnerId::from(owner)).await?;
    let (remaining_today, remaining_this_month) = session.remaining_at(chrono::Utc::now());
    Ok(Json(serde_json::json!({
        "session": session,
        "remainingToday": remaining_today,
        "remainingThisMonth": remaining_this_month,
    })))
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.allowlist.is_empty() {
        return Err(AppError::BadRequest("allowlist must not be empty".to_string()));
    }
    if req.valid_for_hours <= 0 {
        return Err(AppError::BadRequest(
            "validForHours must be positive".to_string(),
        ));
    }
    let session = state
        .store
        .put(session_from_seed(&SessionSeed::from(req)))
        .await?;
    tracing::info!(
        owner = %session.owner_id,
        session = %session.session_id,
        "session delegated"
    );
    Ok((StatusCode::CREATED, Json(session)))
}

async fn revoke_session(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let owner = OwnerId::from(owner);
    let status = state.store.revoke(&owner).await?;
    tracing::info!(owner = %owner, %status, "session revoked");
    Ok(Json(serde_json::json!({
        "ownerId": owner,
        "status": status,
    })))
}

async fn stock(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let threshold = state.restock.trigger().config().low_stock_threshold;
    let items: Vec<_> = state
        .inventory
        .snapshot()
        .into_iter()
        .map(|(product, level)| {
            serde_json::json!({
                "product": product,
                "quantity": level.quantity,
                "epoch": level.epoch,
                "low": level.quantity < threshold,
            })
        })
        .collect();
    Json(serde_json::json!({ "items": items }))
}

async fn sell(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StockChange>,
) -> ApiResult<impl IntoResponse> {
    if req.quantity == 0 {
        return Err(AppError::BadRequest("quantity must be positive".to_string()));
    }
    let product = ProductId::from(req.product);
    let level = state.inventory.sell(&product, req.quantity)?;
    tracing::info!(product = %product, sold = req.quantity, left = level.quantity, "sale recorded");

    let restock = if state.auto_restock_on_sale {
        Some(RestockResponse::from(
            state.restock.request_restock(&product).await?,
        ))
    } else {
        None
    };

    Ok(Json(serde_json::json!({
        "message": "Sold!",
        "product": product,
        "currentStock": level.quantity,
        "restock": restock,
    })))
}

async fn receive(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StockChange>,
) -> ApiResult<impl IntoResponse> {
    if req.quantity == 0 {
        return Err(AppError::BadRequest("quantity must be positive".to_string()));
    }
    let product = ProductId::from(req.product);
    let level = state.inventory.receive(&product, req.quantity);
    tracing::info!(product = %product, received = req.quantity, epoch = level.epoch, "delivery received");
    Ok(Json(serde_json::json!({
        "product": product,
        "currentStock": level.quantity,
        "epoch": level.epoch,
    })))
}
