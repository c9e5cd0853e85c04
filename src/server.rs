use crate::agreement::{View, ViewValue};
use crate::chain::{ChainError, LogEntry, Receipt};
use crate::session::{
    self, AccountsOverview, ActionOutcome, AgreementSnapshot, DeployRequest, Explanation, Session,
    SessionError,
};
use crate::types::{Address, Timestamp, TxHash};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

pub type SharedSession = Arc<RwLock<Session>>;

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::NotDeployed => StatusCode::NOT_FOUND,
            SessionError::InvalidParameter(_) | SessionError::Unit(_) => StatusCode::BAD_REQUEST,
            SessionError::Chain(
                ChainError::TimeTravelBackwards { .. } | ChainError::TimestampOutOfRange(_),
            ) => StatusCode::BAD_REQUEST,
            SessionError::Chain(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        SessionError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{}", self.message);
        } else {
            debug!(status = %self.status, "{}", self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct TimeTravelRequest {
    pub timestamp: Timestamp,
}

pub fn router(session: SharedSession) -> Router {
    Router::new()
        .route("/accounts", get(accounts))
        .route("/agreement", get(snapshot).post(deploy))
        .route("/agreement/sign", post(sign))
        .route("/agreement/pay", post(pay))
        .route("/agreement/confirm", post(confirm))
        .route("/agreement/cancel", post(cancel))
        .route("/agreement/events", get(events))
        .route("/agreement/view/:view", get(view))
        .route("/tx/:hash", get(receipt))
        .route("/chain/time-travel", post(time_travel))
        .route("/explain", get(explain))
        .with_state(session)
}

/// Serves the API until the listener fails.
pub async fn serve(addr: SocketAddr, session: SharedSession) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", listener.local_addr()?);
    Ok(axum::serve(listener, router(session)).await?)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeployResponse {
    pub address: Option<Address>,
    pub receipt: Receipt,
}

async fn accounts(State(session): State<SharedSession>) -> Json<AccountsOverview> {
    Json(session.read().await.accounts())
}

async fn deploy(
    State(session): State<SharedSession>,
    Json(request): Json<DeployRequest>,
) -> ApiResult<DeployResponse> {
    let receipt = session.write().await.deploy(request)?;
    Ok(Json(DeployResponse {
        address: receipt.contract_address,
        receipt,
    }))
}

async fn snapshot(State(session): State<SharedSession>) -> ApiResult<AgreementSnapshot> {
    Ok(Json(session.read().await.snapshot()?))
}

async fn sign(State(session): State<SharedSession>) -> ApiResult<Vec<ActionOutcome>> {
    Ok(Json(session.write().await.sign()?))
}

async fn pay(State(session): State<SharedSession>) -> ApiResult<Vec<ActionOutcome>> {
    Ok(Json(session.write().await.pay()?))
}

async fn confirm(State(session): State<SharedSession>) -> ApiResult<Vec<ActionOutcome>> {
    Ok(Json(session.write().await.confirm_delivery()?))
}

async fn cancel(State(session): State<SharedSession>) -> ApiResult<Vec<ActionOutcome>> {
    Ok(Json(session.write().await.cancel()?))
}

async fn events(State(session): State<SharedSession>) -> ApiResult<Vec<LogEntry>> {
    Ok(Json(session.read().await.events()?))
}

async fn view(
    State(session): State<SharedSession>,
    Path(view): Path<View>,
) -> ApiResult<ViewValue> {
    Ok(Json(session.read().await.view(view)?))
}

async fn receipt(
    State(session): State<SharedSession>,
    Path(hash): Path<TxHash>,
) -> ApiResult<Receipt> {
    session
        .read()
        .await
        .chain()
        .receipt(&hash)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no receipt for {hash}")))
}

async fn time_travel(
    State(session): State<SharedSession>,
    Json(request): Json<TimeTravelRequest>,
) -> ApiResult<TimeTravelRequest> {
    session
        .write()
        .await
        .chain_mut()
        .time_travel(request.timestamp)?;
    Ok(Json(request))
}

async fn explain() -> Json<Explanation> {
    Json(session::explain())
}
