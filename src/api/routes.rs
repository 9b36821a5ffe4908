//! API Routes
//!
//! HTTP endpoint definitions.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use crate::domain::OperationContext;
use crate::error::AppError;
use crate::handlers::{CreateAccountCommand, CreditAccountCommand, DebitAccountCommand};
use crate::ledger::Ledger;
use crate::projection::{AccountOperation, BankAccount};
use crate::query::AccountSubscription;

/// Shared state of every route
pub type AppState = Arc<Ledger>;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub balance: Decimal,
    pub currency: String,
}

/// Body of debit and credit requests
#[derive(Debug, Serialize, Deserialize)]
pub struct MoneyRequest {
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountIdResponse {
    pub account_id: Uuid,
    /// Stream version after the command
    pub version: i64,
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub id: Uuid,
    pub position: i64,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub sequence: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct EventsListResponse {
    pub events: Vec<EventResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct RebuildResponse {
    pub events_replayed: u64,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        // Commands
        .route("/accounts", post(create_account).get(list_accounts))
        .route("/accounts/:account_id/debit", post(debit_account))
        .route("/accounts/:account_id/credit", post(credit_account))
        // Queries
        .route("/accounts/:account_id", get(get_account))
        .route("/accounts/:account_id/operations", get(get_account_operations))
        .route("/accounts/:account_id/watch", get(watch_account))
        .route("/accounts/:account_id/events", get(get_account_events))
        // Admin
        .route("/admin/projections/rebuild", post(rebuild_projections))
}

// =========================================================================
// POST /accounts
// =========================================================================

/// Open a new account
async fn create_account(
    State(ledger): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<AccountIdResponse>), AppError> {
    let command = CreateAccountCommand::new(request.balance, request.currency);
    let result = ledger.dispatch(command.into(), context).await?;

    Ok((
        StatusCode::CREATED,
        Json(AccountIdResponse {
            account_id: result.aggregate_id,
            version: result.version,
        }),
    ))
}

// =========================================================================
// POST /accounts/:account_id/debit
// =========================================================================

async fn debit_account(
    State(ledger): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<MoneyRequest>,
) -> Result<Json<AccountIdResponse>, AppError> {
    let command = DebitAccountCommand::new(account_id, request.amount, request.currency);
    let result = ledger.dispatch(command.into(), context).await?;

    Ok(Json(AccountIdResponse {
        account_id: result.aggregate_id,
        version: result.version,
    }))
}

// =========================================================================
// POST /accounts/:account_id/credit
// =========================================================================

async fn credit_account(
    State(ledger): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<MoneyRequest>,
) -> Result<Json<AccountIdResponse>, AppError> {
    let command = CreditAccountCommand::new(account_id, request.amount, request.currency);
    let result = ledger.dispatch(command.into(), context).await?;

    Ok(Json(AccountIdResponse {
        account_id: result.aggregate_id,
        version: result.version,
    }))
}

// =========================================================================
// GET /accounts, /accounts/:account_id, /accounts/:account_id/operations
// =========================================================================

async fn list_accounts(State(ledger): State<AppState>) -> Result<Json<Vec<BankAccount>>, AppError> {
    Ok(Json(ledger.get_all_accounts().await?))
}

async fn get_account(
    State(ledger): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<BankAccount>, AppError> {
    Ok(Json(ledger.get_account(account_id).await?))
}

async fn get_account_operations(
    State(ledger): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<Vec<AccountOperation>>, AppError> {
    Ok(Json(ledger.get_account_operations(account_id).await?))
}

// =========================================================================
// GET /accounts/:account_id/watch
// =========================================================================

/// Server-sent events: the current row first, then every change to it
async fn watch_account(
    State(ledger): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let AccountSubscription { initial, updates } = ledger.subscribe_account(account_id).await?;

    let stream = tokio_stream::once(initial)
        .chain(updates)
        .map(|account| Ok(account_event(&account)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn account_event(account: &BankAccount) -> Event {
    Event::default()
        .event("account")
        .json_data(account)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

// =========================================================================
// GET /accounts/:account_id/events
// =========================================================================

/// Raw event stream of an account
async fn get_account_events(
    State(ledger): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<EventsListResponse>, AppError> {
    let events = ledger.account_events(account_id).await?;
    if events.is_empty() {
        return Err(AppError::AccountNotFound(account_id));
    }

    let events: Vec<EventResponse> = events
        .into_iter()
        .map(|e| EventResponse {
            id: e.id,
            position: e.position,
            aggregate_type: e.aggregate_type,
            aggregate_id: e.aggregate_id,
            sequence: e.sequence,
            event_type: e.event_type,
            payload: e.payload,
            metadata: e.metadata,
            recorded_at: e.recorded_at,
        })
        .collect();
    let total = events.len();

    Ok(Json(EventsListResponse { events, total }))
}

// =========================================================================
// POST /admin/projections/rebuild
// =========================================================================

async fn rebuild_projections(
    State(ledger): State<AppState>,
) -> Result<Json<RebuildResponse>, AppError> {
    let events_replayed = ledger.rebuild_projections().await?;
    Ok(Json(RebuildResponse { events_replayed }))
}
