use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, patch, post},
    Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::auth::{AuthorizedKey, RequireAdmin};
use crate::config::{AdminCredentials, GatewayConfig};
use crate::database::Database;
use crate::errors::ApiError;
use crate::models::{
    CreateApiKeyRequest, CreateApiKeyResponse, GenerateRequest, KeySummary, SummarizeRequest,
    TicketResolveRequest, UpdateLabelRequest,
};
use crate::proxy::{GatewayProxy, Operation, SummaryLength};
use crate::rate_limit::{rate_limit_middleware, RateLimitManager};
use crate::security::{ApiKeyService, KeyHasher};

#[derive(Clone)]
pub struct AppState {
    pub keys: ApiKeyService,
    pub rate_limits: Arc<RateLimitManager>,
    pub proxy: GatewayProxy,
    pub admin: Arc<AdminCredentials>,
    pub default_ttl: chrono::Duration,
    pub trust_forwarded_for: bool,
}

impl AppState {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ApiError> {
        let db = Database::new(&config.db_path)?;
        let hasher = KeyHasher::new(&config.secret_key)?;
        let keys = ApiKeyService::new(db, hasher, config.key_prefix.clone());
        let proxy = GatewayProxy::new(config.upstream.clone())?;

        Ok(Self {
            keys,
            rate_limits: Arc::new(RateLimitManager::new()),
            proxy,
            admin: Arc::new(config.admin.clone()),
            default_ttl: config.default_ttl,
            trust_forwarded_for: config.trust_forwarded_for,
        })
    }

    pub fn with_rate_limits(mut self, manager: RateLimitManager) -> Self {
        self.rate_limits = Arc::new(manager);
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/admin/keys", post(create_api_key).get(list_api_keys))
        .route("/admin/keys/purge", post(purge_api_keys))
        .route("/admin/keys/:id", patch(update_api_key).delete(revoke_api_key))
        .route("/generate", post(generate))
        .route("/summarize", post(summarize))
        .route("/ticket/resolve", post(ticket_resolve))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn bad_json(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(rejection.body_text())
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("Missing '{}'", field)))
}

/// Accepts an RFC 3339 timestamp or a bare `YYYY-MM-DD`, which expires at
/// 23:59:59 UTC on that day.
pub fn parse_expiry(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|at| at.and_utc())
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "'expires_at' must be YYYY-MM-DD or an RFC 3339 timestamp, got {:?}",
                raw
            ))
        })
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db = state.keys.db.ping();
    let upstream = state.proxy.probe().await;

    let db_ok = db.is_ok();
    let mut body = json!({
        "ok": db_ok && upstream.reachable,
        "db": db_ok,
        "upstream": upstream.reachable,
    });
    if let Some(status) = upstream.status {
        body["upstream_status"] = json!(status);
    }
    if let Some(error) = upstream.error {
        body["upstream_error"] = json!(error);
    }
    if let Err(e) = db {
        tracing::error!(error = %e, "storage health check failed");
        body["db_error"] = json!(e.to_string());
    }

    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn create_api_key(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    payload: Result<Json<CreateApiKeyRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateApiKeyResponse>), ApiError> {
    let Json(req) = payload.map_err(bad_json)?;
    let now = Utc::now();

    let requested_expiry = req.expires_at.as_deref().map(parse_expiry).transpose()?;
    let expires_at = match (req.ttl_seconds, requested_expiry) {
        (Some(_), Some(_)) => {
            return Err(ApiError::BadRequest(
                "Provide either 'ttl_seconds' or 'expires_at', not both".to_string(),
            ))
        }
        (Some(secs), None) if secs <= 0 => {
            return Err(ApiError::BadRequest("'ttl_seconds' must be positive".to_string()))
        }
        (Some(secs), None) => chrono::Duration::try_seconds(secs)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| ApiError::BadRequest("'ttl_seconds' out of range".to_string()))?,
        (None, Some(at)) if at <= now => {
            return Err(ApiError::BadRequest("'expires_at' must be in the future".to_string()))
        }
        (None, Some(at)) => at,
        (None, None) => now
            .checked_add_signed(state.default_ttl)
            .ok_or_else(|| ApiError::Config("default TTL out of range".to_string()))?,
    };

    let label = req
        .label
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty());

    let issued = state.keys.issue_until(label, now, expires_at)?;
    tracing::info!(admin = %admin, key_id = issued.id, "admin issued key");

    Ok((
        StatusCode::CREATED,
        Json(CreateApiKeyResponse {
            id: issued.id,
            api_key: issued.raw_token,
            label: issued.record.label,
            created_at: issued.record.created_at,
            expires_at: issued.record.expires_at,
        }),
    ))
}

async fn list_api_keys(
    State(state): State<AppState>,
    RequireAdmin(_): RequireAdmin,
) -> Result<Json<Vec<KeySummary>>, ApiError> {
    let now = Utc::now();
    let keys = state
        .keys
        .list_all()?
        .iter()
        .map(|record| KeySummary::from_record(record, now))
        .collect();
    Ok(Json(keys))
}

async fn update_api_key(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<i64>,
    payload: Result<Json<UpdateLabelRequest>, JsonRejection>,
) -> Result<Json<KeySummary>, ApiError> {
    let Json(req) = payload.map_err(bad_json)?;
    let label = req.label.as_deref().map(str::trim).filter(|l| !l.is_empty());

    let record = state.keys.relabel(id, label)?;
    tracing::info!(admin = %admin, key_id = id, "admin relabelled key");
    Ok(Json(KeySummary::from_record(&record, Utc::now())))
}

async fn revoke_api_key(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state.keys.revoke(id)?;
    tracing::info!(admin = %admin, key_id = id, "admin revoked key");
    Ok(Json(json!({ "id": id, "revoked": true })))
}

async fn purge_api_keys(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
) -> Result<Json<Value>, ApiError> {
    let purged = state.keys.purge_inactive()?;
    tracing::info!(admin = %admin, purged, "admin purged keys");
    Ok(Json(json!({ "purged": purged })))
}

async fn generate(
    State(state): State<AppState>,
    AuthorizedKey(key): AuthorizedKey,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload.map_err(bad_json)?;
    let operation = Operation::Generate {
        prompt: required(req.prompt, "prompt")?,
    };

    tracing::info!(key_id = key.id, operation = operation.name(), "forwarding to upstream");
    let response = state.proxy.forward(&operation).await?;
    Ok(Json(response))
}

async fn summarize(
    State(state): State<AppState>,
    AuthorizedKey(key): AuthorizedKey,
    payload: Result<Json<SummarizeRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload.map_err(bad_json)?;
    let length = SummaryLength::parse(req.length.as_deref())?;

    let text = match (req.text.filter(|t| !t.trim().is_empty()), req.url) {
        (Some(text), _) => text,
        (None, Some(url)) if !url.trim().is_empty() => state.proxy.fetch_text(url.trim()).await?,
        _ => {
            return Err(ApiError::BadRequest(
                "Either 'text' or 'url' must be provided".to_string(),
            ))
        }
    };

    let operation = Operation::Summarize { text, length };
    tracing::info!(key_id = key.id, operation = operation.name(), "forwarding to upstream");
    let response = state.proxy.forward(&operation).await?;
    Ok(Json(response))
}

async fn ticket_resolve(
    State(state): State<AppState>,
    AuthorizedKey(key): AuthorizedKey,
    payload: Result<Json<TicketResolveRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload.map_err(bad_json)?;
    let ticket_id = required(req.ticket_id, "ticket_id")?;

    let ticket = state.proxy.lookup_ticket(ticket_id.trim()).await?;
    let operation = Operation::ResolveTicket {
        ticket_id: ticket_id.trim().to_string(),
        ticket: ticket.clone(),
    };

    tracing::info!(key_id = key.id, operation = operation.name(), "forwarding to upstream");
    let ai_response = state.proxy.forward(&operation).await?;
    Ok(Json(json!({ "ticket": ticket, "ai_response": ai_response })))
}
