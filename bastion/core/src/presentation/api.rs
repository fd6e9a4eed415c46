// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::application::access_guard::{AccessGuard, Admission};
use crate::application::credential_vault::CredentialVault;
use crate::application::outbound_proxy::OutboundProxy;
use crate::application::query_executor::TenantScopedExecutor;
use crate::domain::credential::{ProviderId, VaultError};
use crate::domain::guard::{GuardRejection, InboundRequest};
use crate::domain::ledger::{AccountId, NewAccount, NewEntry};
use crate::domain::outbound::{HttpMethod, ProxyError, RequestSpec};
use crate::domain::scoping::{DataError, LedgerStatements, TransactionSource};
use crate::domain::security_context::AuthError;

pub struct AppState<S: TransactionSource> {
    pub guard: Arc<AccessGuard>,
    pub executor: Arc<TenantScopedExecutor<S>>,
    pub proxy: Arc<OutboundProxy>,
    pub vault: Arc<CredentialVault>,
}

pub fn app<S>(state: Arc<AppState<S>>) -> Router
where
    S: TransactionSource + 'static,
    S::Connection: LedgerStatements + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/v1/accounts", get(list_accounts::<S>).post(open_account::<S>))
        .route(
            "/v1/accounts/{id}/entries",
            get(list_entries::<S>).post(record_entry::<S>),
        )
        .route("/v1/providers/{provider}/calls", post(call_provider::<S>))
        .route(
            "/v1/providers/{provider}/quarantine/release",
            post(release_quarantine::<S>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error body: `{"error": "<message>", "code": "<kind>"}`.
#[derive(Debug)]
pub enum ApiError {
    Guard(GuardRejection),
    Auth(AuthError),
    Data(DataError),
    Proxy(ProxyError),
    Vault(VaultError),
    BadRequest(String),
    MethodNotAllowed,
}

impl From<GuardRejection> for ApiError {
    fn from(err: GuardRejection) -> Self {
        ApiError::Guard(err)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl From<DataError> for ApiError {
    fn from(err: DataError) -> Self {
        ApiError::Data(err)
    }
}

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        ApiError::Vault(err)
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        ApiError::Proxy(err)
    }
}

fn auth_status(err: &AuthError) -> (StatusCode, &'static str) {
    match err {
        AuthError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
        AuthError::Expired { .. } => (StatusCode::UNAUTHORIZED, "session_expired"),
        AuthError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut retry_after = None;
        let (status, code, message) = match &self {
            ApiError::Guard(rejection) => match rejection {
                GuardRejection::Unauthenticated(e) => {
                    let (status, code) = auth_status(e);
                    (status, code, rejection.to_string())
                }
                GuardRejection::RateLimited { retry_after_secs } => {
                    retry_after = Some(*retry_after_secs);
                    (StatusCode::TOO_MANY_REQUESTS, "rate_limited", rejection.to_string())
                }
                GuardRejection::UnknownRoute { .. } => (StatusCode::NOT_FOUND, "unknown_route", rejection.to_string()),
                GuardRejection::PayloadTooLarge { .. } => {
                    (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", rejection.to_string())
                }
                GuardRejection::InvalidShape(_) => (StatusCode::BAD_REQUEST, "invalid_shape", rejection.to_string()),
            },
            ApiError::Auth(e) => {
                let (status, code) = auth_status(e);
                (status, code, e.to_string())
            }
            ApiError::Data(e) => match e {
                DataError::ConstraintViolation(_) => (StatusCode::CONFLICT, "constraint_violation", e.to_string()),
                DataError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", e.to_string()),
                DataError::ContextExpired => (StatusCode::UNAUTHORIZED, "session_expired", e.to_string()),
                DataError::DeadlineExceeded => (StatusCode::GATEWAY_TIMEOUT, "deadline_exceeded", e.to_string()),
                DataError::TransientIO(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "transient",
                    "storage temporarily unavailable".to_string(),
                ),
                DataError::ScopeApplicationFailed => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "scope_failed",
                    "request could not be scoped to its tenant".to_string(),
                ),
                DataError::Aborted(_) => (StatusCode::BAD_REQUEST, "aborted", e.to_string()),
                DataError::Storage(_) => {
                    error!("Storage error: {}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "storage", "internal storage error".to_string())
                }
            },
            ApiError::Proxy(e) => match e {
                ProxyError::UnknownProvider(_) => (StatusCode::NOT_FOUND, "unknown_provider", e.to_string()),
                ProxyError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden", e.to_string()),
                ProxyError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request", e.to_string()),
                ProxyError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout", e.to_string()),
                ProxyError::Vault(VaultError::NotFound(_) | VaultError::Revoked(_) | VaultError::Expired(_)) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "credential_unavailable", e.to_string())
                }
                ProxyError::Vault(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "credential_unavailable",
                    "partner credential unavailable".to_string(),
                ),
                _ => (StatusCode::BAD_GATEWAY, "upstream_error", e.to_string()),
            },
            ApiError::Vault(e) => match e {
                VaultError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", e.to_string()),
                VaultError::InvalidProvider(_) => (StatusCode::BAD_REQUEST, "bad_request", e.to_string()),
                VaultError::DecryptionFailed(_) => (StatusCode::CONFLICT, "decryption_failed", e.to_string()),
                _ => {
                    error!("Vault error: {}", e);
                    (StatusCode::SERVICE_UNAVAILABLE, "vault", "vault unavailable".to_string())
                }
            },
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            ApiError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                "method_not_allowed",
                "method not allowed".to_string(),
            ),
        };

        let mut body = json!({ "error": message, "code": code });
        if let ApiError::Proxy(e) = &self {
            if let Some(upstream) = e.upstream_status() {
                body["upstream_status"] = json!(upstream);
            }
            if let ProxyError::Upstream4xx { body: upstream_body, .. } | ProxyError::Upstream5xx { body: upstream_body, .. } = e {
                body["upstream_body"] = upstream_body.clone();
            }
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Framework-neutral copy of the request for the guard.
fn inbound(method: &Method, uri: &Uri, headers: &HeaderMap, body: Bytes) -> Result<InboundRequest, ApiError> {
    let method: HttpMethod = method.as_str().parse().map_err(|_| ApiError::MethodNotAllowed)?;
    let mut request = InboundRequest::new(method, uri.path());
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    request.body = body;
    Ok(request)
}

async fn admit<S: TransactionSource>(
    state: &AppState<S>,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Admission, ApiError> {
    Ok(state.guard.admit(inbound(method, uri, headers, body)?).await?)
}

fn parse_body<T: for<'de> Deserialize<'de>>(admission: &Admission) -> Result<T, ApiError> {
    serde_json::from_slice(&admission.request.body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn parse_account_id(id: &str) -> Result<AccountId, ApiError> {
    uuid::Uuid::parse_str(id)
        .map(AccountId)
        .map_err(|_| ApiError::BadRequest(format!("invalid account id '{}'", id)))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_accounts<S>(
    State(state): State<Arc<AppState<S>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError>
where
    S: TransactionSource + 'static,
    S::Connection: LedgerStatements + 'static,
{
    let admission = admit(&state, &method, &uri, &headers, body).await?;
    admission.context.require("ledger.read")?;

    let accounts = state
        .executor
        .execute(&admission.context, |tx| Box::pin(async move { tx.list_accounts().await }))
        .await?;
    Ok(Json(json!({ "accounts": accounts })))
}

async fn open_account<S>(
    State(state): State<Arc<AppState<S>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError>
where
    S: TransactionSource + 'static,
    S::Connection: LedgerStatements + 'static,
{
    let admission = admit(&state, &method, &uri, &headers, body).await?;
    admission.context.require("ledger.write")?;
    let new_account: NewAccount = parse_body(&admission)?;

    let account = state
        .executor
        .execute(&admission.context, move |tx| {
            Box::pin(async move { tx.open_account(&new_account).await })
        })
        .await?;
    Ok((StatusCode::CREATED, Json(json!(account))))
}

async fn list_entries<S>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError>
where
    S: TransactionSource + 'static,
    S::Connection: LedgerStatements + 'static,
{
    let admission = admit(&state, &method, &uri, &headers, body).await?;
    admission.context.require("ledger.read")?;
    let account_id = parse_account_id(&id)?;

    let entries = state
        .executor
        .execute(&admission.context, move |tx| {
            Box::pin(async move {
                if tx.find_account(account_id).await?.is_none() {
                    return Err(DataError::NotFound(format!("account {}", account_id)));
                }
                tx.list_entries(account_id).await
            })
        })
        .await?;
    Ok(Json(json!({ "entries": entries })))
}

#[derive(Debug, Deserialize)]
struct EntryRequest {
    amount_minor: i64,
    #[serde(default)]
    memo: Option<String>,
}

async fn record_entry<S>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError>
where
    S: TransactionSource + 'static,
    S::Connection: LedgerStatements + 'static,
{
    let admission = admit(&state, &method, &uri, &headers, body).await?;
    admission.context.require("ledger.write")?;
    let account_id = parse_account_id(&id)?;
    let request: EntryRequest = parse_body(&admission)?;
    let entry = NewEntry {
        account_id,
        amount_minor: request.amount_minor,
        memo: request.memo,
    };

    let recorded = state
        .executor
        .execute(&admission.context, move |tx| {
            Box::pin(async move { tx.record_entry(&entry).await })
        })
        .await?;
    Ok((StatusCode::CREATED, Json(json!(recorded))))
}

async fn call_provider<S>(
    State(state): State<Arc<AppState<S>>>,
    Path(provider): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError>
where
    S: TransactionSource + 'static,
    S::Connection: LedgerStatements + 'static,
{
    let admission = admit(&state, &method, &uri, &headers, body).await?;
    let spec: RequestSpec = parse_body(&admission)?;

    let response = state.proxy.call(&admission.context, &provider, spec).await?;
    Ok(Json(json!(response)))
}

/// Lift a decryption quarantine in this process after the stored record was
/// repaired or rotated. Requires `vault.admin`.
async fn release_quarantine<S>(
    State(state): State<Arc<AppState<S>>>,
    Path(provider): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError>
where
    S: TransactionSource + 'static,
    S::Connection: LedgerStatements + 'static,
{
    let admission = admit(&state, &method, &uri, &headers, body).await?;
    admission.context.require("vault.admin")?;
    let provider = ProviderId::new(provider)?;

    let released = state.vault.release_quarantine(&provider).await?;
    Ok(Json(json!({ "provider": provider.as_str(), "released": released })))
}
