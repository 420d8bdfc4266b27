use std::{env, path::PathBuf, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Form, Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::auth::{self, clean_phone_number, mask_phone_number, now_iso, parse_user_row};
use crate::bot::{BotBackend, BotEngine};
use crate::types::{
    AppState, Config, CreateUserBody, InboundForm, InboundMedia, KycSearchResponse, OcrExtraction,
    SearchParams, UpdateUserBody, DEFAULT_MATCH_PERCENTAGE, UNLIMITED_SEARCHES,
};

/// Upstream calls are abandoned after this long; the dialog reports an
/// outage instead of hanging the conversation.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);
const TEMP_FILE_MAX_AGE: Duration = Duration::from_secs(60 * 60 * 24);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

fn resolve_database_url() -> String {
    if let Ok(url) = env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            return url;
        }
    }
    let host = env::var("POSTGRES_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = env::var("POSTGRES_PORT").unwrap_or_else(|_| "5432".to_string());
    let user = env::var("POSTGRES_USER").unwrap_or_else(|_| "postgres".to_string());
    let password = env::var("POSTGRES_PASSWORD").unwrap_or_else(|_| "postgres".to_string());
    let dbname = env::var("POSTGRES_DB").unwrap_or_else(|_| "kyc_listas".to_string());
    format!("postgres://{user}:{password}@{host}:{port}/{dbname}")
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => !matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "false" | "0" | "no"
        ),
        Err(_) => default,
    }
}

fn load_config() -> Config {
    let port = env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(3000);
    let public_base_url = env::var("SERVER_URL")
        .unwrap_or_else(|_| format!("http://localhost:{port}"))
        .trim_end_matches('/')
        .to_string();
    Config {
        port,
        public_base_url,
        temp_dir: env::var("TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./temp")),
        twilio_account_sid: env_string("TWILIO_ACCOUNT_SID", ""),
        twilio_auth_token: env_string("TWILIO_AUTH_TOKEN", ""),
        twilio_whatsapp_number: env_string("TWILIO_WHATSAPP_NUMBER", "whatsapp:+14155238886"),
        kyc_api_url: env_string("KYC_API_URL", "http://localhost:4001"),
        kyc_api_key: env_string("KYC_API_KEY", ""),
        ocr_api_url: env_string("OCR_API_URL", "http://localhost:4002"),
        ocr_api_key: env_string("OCR_API_KEY", ""),
        admin_user: env_string("ADMIN_USER", "admin"),
        admin_pass: env_string("ADMIN_PASS", ""),
        auth_fail_open: env_flag("AUTH_FAIL_OPEN", true),
        default_percentage: env::var("DEFAULT_MATCH_PERCENTAGE")
            .ok()
            .and_then(|v| v.parse::<u8>().ok())
            .unwrap_or(DEFAULT_MATCH_PERCENTAGE),
        session_max_idle_hours: env::var("SESSION_MAX_IDLE_HOURS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(6),
        file_link_secret: env_string("FILE_LINK_SECRET", ""),
        file_link_ttl_seconds: env::var("FILE_LINK_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(60 * 60 * 24),
    }
}

/// Columns added after the first deployments. Databases provisioned
/// from the original schema get them backfilled on boot.
async fn ensure_column(pool: &PgPool, table: &str, column: &str, definition: &str) {
    let sql = format!("ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} {definition}");
    if let Err(err) = sqlx::query(&sql).execute(pool).await {
        error!("schema evolution failed for {table}.{column}: {err}");
    }
}

/// HTTP adapter over the screening, OCR and report storage services.
#[derive(Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    config: Config,
}

impl HttpBackend {
    pub fn new(http: reqwest::Client, config: Config) -> Self {
        HttpBackend { http, config }
    }
}

impl BotBackend for HttpBackend {
    async fn search(&self, params: &SearchParams) -> Result<KycSearchResponse, String> {
        let url = format!("{}/search", self.config.kyc_api_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .header("X-API-Key", &self.config.kyc_api_key)
            .json(params)
            .timeout(UPSTREAM_TIMEOUT)
            .send()
            .await
            .map_err(|err| format!("kyc api unreachable: {err}"))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| format!("kyc api body read failed: {err}"))?;
        // a 404 with a parseable body is how the service reports a
        // clean zero-match result, not an outage
        if !status.is_success() && status.as_u16() != 404 {
            return Err(format!("kyc api answered {status}"));
        }
        serde_json::from_str::<KycSearchResponse>(&body)
            .map_err(|err| format!("kyc api body unreadable ({status}): {err}"))
    }

    async fn extract_document(
        &self,
        front_b64: &str,
        back_b64: &str,
    ) -> Result<OcrExtraction, String> {
        let url = format!("{}/extract", self.config.ocr_api_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .header("X-API-Key", &self.config.ocr_api_key)
            .json(&json!({ "id": front_b64, "idReverso": back_b64 }))
            .timeout(UPSTREAM_TIMEOUT)
            .send()
            .await
            .map_err(|err| format!("ocr api unreachable: {err}"))?;
        if !response.status().is_success() {
            return Err(format!("ocr api answered {}", response.status()));
        }
        response
            .json::<OcrExtraction>()
            .await
            .map_err(|err| format!("ocr api body unreadable: {err}"))
    }

    async fn fetch_image_base64(&self, url: &str) -> Result<String, String> {
        // channel media URLs require the account credentials
        let mut request = self.http.get(url).timeout(UPSTREAM_TIMEOUT);
        if !self.config.twilio_account_sid.is_empty() {
            request = request.basic_auth(
                &self.config.twilio_account_sid,
                Some(&self.config.twilio_auth_token),
            );
        }
        let response = request
            .send()
            .await
            .map_err(|err| format!("media download failed: {err}"))?;
        if !response.status().is_success() {
            return Err(format!("media download answered {}", response.status()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| format!("media body read failed: {err}"))?;
        Ok(BASE64.encode(&bytes))
    }

    async fn store_pdf(&self, file_name: &str, bytes: &[u8]) -> Result<String, String> {
        if !is_safe_temp_file_name(file_name) {
            return Err(format!("unsafe report file name: {file_name}"));
        }
        tokio::fs::create_dir_all(&self.config.temp_dir)
            .await
            .map_err(|err| format!("temp dir unavailable: {err}"))?;
        let path = self.config.temp_dir.join(file_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|err| format!("report write failed: {err}"))?;
        Ok(resolve_public_url(
            &self.config.public_base_url,
            &signed_temp_file_url(&self.config, file_name),
        ))
    }
}

fn sign_file_token(secret: &str, file_name: &str, exp: i64) -> Option<String> {
    if secret.is_empty() {
        return None;
    }
    let payload = format!("{file_name}:{exp}");
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn verify_file_token(secret: &str, file_name: &str, exp: i64, sig: &str) -> bool {
    if secret.is_empty() {
        return true;
    }
    if exp < Utc::now().timestamp() {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(sig.trim()) else {
        return false;
    };
    let payload = format!("{file_name}:{exp}");
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature_bytes).is_ok()
}

fn signed_temp_file_url(config: &Config, file_name: &str) -> String {
    if config.file_link_secret.is_empty() {
        return format!("/temp/{file_name}");
    }
    let exp = Utc::now().timestamp() + config.file_link_ttl_seconds.max(120);
    let sig = sign_file_token(&config.file_link_secret, file_name, exp).unwrap_or_default();
    format!("/temp/{file_name}?exp={exp}&sig={sig}")
}

fn is_safe_temp_file_name(value: &str) -> bool {
    !value.is_empty()
        && !value.contains('/')
        && !value.contains('\\')
        && !value.contains("..")
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

fn resolve_public_url(base: &str, url: &str) -> String {
    let value = url.trim();
    if value.is_empty() {
        return String::new();
    }
    if value.starts_with("http://") || value.starts_with("https://") {
        return value.to_string();
    }
    let base = base.trim_end_matches('/');
    if value.starts_with('/') {
        format!("{base}{value}")
    } else {
        format!("{base}/{value}")
    }
}

#[derive(Deserialize)]
struct FileLinkQuery {
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    sig: Option<String>,
}

async fn serve_temp_file(
    Path(file_name): Path<String>,
    Query(link): Query<FileLinkQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    if !is_safe_temp_file_name(&file_name) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid file name" })),
        )
            .into_response();
    }
    let secret = &state.config.file_link_secret;
    if !secret.is_empty() {
        let exp = link.exp.unwrap_or(0);
        let sig = link.sig.as_deref().unwrap_or("");
        if !verify_file_token(secret, &file_name, exp, sig) {
            return (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "link expired or invalid" })),
            )
                .into_response();
        }
    }
    let path = state.config.temp_dir.join(&file_name);
    let Ok(bytes) = tokio::fs::read(&path).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "file not found" })),
        )
            .into_response();
    };

    let mut response = axum::response::Response::new(axum::body::Body::from(bytes));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/pdf"),
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=3600"),
    );
    response.into_response()
}

async fn send_whatsapp_message(
    state: &Arc<AppState>,
    to: &str,
    body: &str,
    media_url: Option<&str>,
) {
    if state.config.twilio_account_sid.is_empty() {
        info!(
            "dry-run outbound to {}: {} chars",
            mask_phone_number(&clean_phone_number(to)),
            body.chars().count()
        );
        return;
    }
    let url = format!(
        "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
        state.config.twilio_account_sid
    );
    let mut form = vec![
        ("From", state.config.twilio_whatsapp_number.clone()),
        ("To", to.to_string()),
        ("Body", body.to_string()),
    ];
    if let Some(media) = media_url {
        form.push(("MediaUrl", media.to_string()));
    }
    let result = state
        .http
        .post(&url)
        .basic_auth(
            &state.config.twilio_account_sid,
            Some(&state.config.twilio_auth_token),
        )
        .form(&form)
        .send()
        .await;
    match result {
        Ok(response) if response.status().is_success() => {}
        Ok(response) => warn!(
            "outbound to {} rejected: {}",
            mask_phone_number(&clean_phone_number(to)),
            response.status()
        ),
        Err(err) => warn!(
            "outbound to {} failed: {err}",
            mask_phone_number(&clean_phone_number(to))
        ),
    }
}

fn build_inbound_media(form: &InboundForm) -> Option<InboundMedia> {
    let count = form
        .num_media
        .as_deref()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(0);
    if count == 0 {
        return None;
    }
    Some(InboundMedia {
        url: form.media_url0.clone()?,
        content_type: form.media_content_type0.clone().unwrap_or_default(),
    })
}

/// Channel webhook. Answers 200 immediately; the dialog turn runs in a
/// background task and delivers replies over the REST API.
async fn webhook_inbound(
    State(state): State<Arc<AppState>>,
    Form(form): Form<InboundForm>,
) -> impl IntoResponse {
    tokio::spawn(process_inbound(state, form));
    (StatusCode::OK, "OK")
}

async fn process_inbound(state: Arc<AppState>, form: InboundForm) {
    if form.from.is_empty() {
        return;
    }
    let phone = clean_phone_number(&form.from);
    info!("inbound from {}", mask_phone_number(&phone));

    let check =
        auth::check_authorization(&state.db, &form.from, state.config.auth_fail_open).await;
    if !check.authorized {
        let prior_attempts = auth::recent_attempt_count(&state.db, &phone).await;
        auth::log_blocked_attempt(&state.db, &phone, &form.body).await;
        if auth::should_ignore(prior_attempts) {
            return;
        }
        if let Some(message) = auth::rejection_message_for_attempts(prior_attempts) {
            send_whatsapp_message(&state, &form.from, &message, None).await;
        }
        return;
    }
    let Some(user) = check.user else {
        return;
    };

    let media = build_inbound_media(&form);
    let replies = state
        .engine
        .handle_message(&state.backend, &phone, &form.body, media.as_ref(), &user)
        .await;
    for reply in replies {
        if reply.pause_before_ms > 0 {
            tokio::time::sleep(Duration::from_millis(reply.pause_before_ms)).await;
        }
        send_whatsapp_message(&state, &form.from, &reply.body, reply.media_url.as_deref()).await;
    }
}

#[derive(Deserialize)]
struct StatusCallbackForm {
    #[serde(rename = "MessageSid", default)]
    message_sid: String,
    #[serde(rename = "MessageStatus", default)]
    message_status: String,
    #[serde(rename = "ErrorCode", default)]
    error_code: Option<String>,
}

async fn webhook_status(Form(form): Form<StatusCallbackForm>) -> impl IntoResponse {
    match form.message_status.as_str() {
        "failed" | "undelivered" => warn!(
            "message {} {}: error code {}",
            form.message_sid,
            form.message_status,
            form.error_code.as_deref().unwrap_or("none")
        ),
        _ => {}
    }
    (StatusCode::OK, "OK")
}

fn admin_authorized(headers: &HeaderMap, config: &Config) -> bool {
    // no password configured means the surface stays closed
    if config.admin_pass.is_empty() {
        return false;
    }
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = BASE64.decode(encoded.trim()) else {
        return false;
    };
    let Ok(credentials) = String::from_utf8(decoded) else {
        return false;
    };
    let mut parts = credentials.splitn(2, ':');
    let user = parts.next().unwrap_or("");
    let pass = parts.next().unwrap_or("");
    user == config.admin_user && pass == config.admin_pass
}

fn admin_unauthorized() -> axum::response::Response {
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "unauthorized" })),
    )
        .into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"admin\""),
    );
    response
}

fn parse_search_limit(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let s = s.trim().to_ascii_lowercase();
            if s == "unlimited" || s == "ilimitado" {
                Some(UNLIMITED_SEARCHES)
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    }
}

async fn list_users(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> axum::response::Response {
    if !admin_authorized(&headers, &state.config) {
        return admin_unauthorized();
    }
    let rows = sqlx::query(
        "SELECT id, phone_number, full_name, company, is_active, search_limit, \
         ine_ocr_enabled, total_queries, last_access, created_at \
         FROM authorized_users ORDER BY created_at DESC",
    )
    .fetch_all(&state.db)
    .await;
    match rows {
        Ok(rows) => {
            let users: Vec<_> = rows.into_iter().map(parse_user_row).collect();
            Json(json!({ "users": users })).into_response()
        }
        Err(err) => {
            error!("user listing failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "database error" })),
            )
                .into_response()
        }
    }
}

async fn create_user(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateUserBody>,
) -> axum::response::Response {
    if !admin_authorized(&headers, &state.config) {
        return admin_unauthorized();
    }
    let phone = body
        .phone_number
        .as_deref()
        .map(clean_phone_number)
        .unwrap_or_default();
    let full_name = body.full_name.unwrap_or_default().trim().to_string();
    if phone.is_empty() || full_name.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "phone_number and full_name are required" })),
        )
            .into_response();
    }
    let search_limit = body
        .search_limit
        .as_ref()
        .and_then(parse_search_limit)
        .unwrap_or(100);
    let result = sqlx::query(
        "INSERT INTO authorized_users \
         (phone_number, full_name, company, search_limit, ine_ocr_enabled, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
    )
    .bind(&phone)
    .bind(&full_name)
    .bind(&body.company)
    .bind(search_limit)
    .bind(body.ine_ocr_enabled.unwrap_or(false))
    .bind(now_iso())
    .fetch_one(&state.db)
    .await;
    match result {
        Ok(row) => {
            use sqlx::Row as _;
            let id: i64 = row.get("id");
            info!("authorized {} as user {id}", mask_phone_number(&phone));
            (
                StatusCode::CREATED,
                Json(json!({ "id": id, "phone_number": phone })),
            )
                .into_response()
        }
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "phone number already registered" })),
        )
            .into_response(),
        Err(err) => {
            error!("user creation failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "database error" })),
            )
                .into_response()
        }
    }
}

async fn update_user(
    headers: HeaderMap,
    Path(phone): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<UpdateUserBody>,
) -> axum::response::Response {
    if !admin_authorized(&headers, &state.config) {
        return admin_unauthorized();
    }
    let phone = clean_phone_number(&phone);
    let existing = match auth::lookup_user_any_status(&state.db, &phone).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "user not found" })),
            )
                .into_response();
        }
        Err(err) => {
            error!("user lookup failed: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "database error" })),
            )
                .into_response();
        }
    };

    let full_name = body
        .full_name
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(existing.full_name);
    let company = match body.company {
        Some(value) => Some(value),
        None => existing.company,
    };
    let is_active = body.is_active.unwrap_or(existing.is_active);
    let search_limit = body
        .search_limit
        .as_ref()
        .and_then(parse_search_limit)
        .unwrap_or(existing.search_limit);
    let ine_ocr_enabled = body.ine_ocr_enabled.unwrap_or(existing.ine_ocr_enabled);

    let result = sqlx::query(
        "UPDATE authorized_users SET full_name = $1, company = $2, is_active = $3, \
         search_limit = $4, ine_ocr_enabled = $5 WHERE phone_number = $6",
    )
    .bind(&full_name)
    .bind(&company)
    .bind(is_active)
    .bind(search_limit)
    .bind(ine_ocr_enabled)
    .bind(&phone)
    .execute(&state.db)
    .await;
    match result {
        Ok(_) => Json(json!({ "updated": true, "phone_number": phone })).into_response(),
        Err(err) => {
            error!("user update failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "database error" })),
            )
                .into_response()
        }
    }
}

async fn delete_user(
    headers: HeaderMap,
    Path(phone): Path<String>,
    State(state): State<Arc<AppState>>,
) -> axum::response::Response {
    if !admin_authorized(&headers, &state.config) {
        return admin_unauthorized();
    }
    let phone = clean_phone_number(&phone);
    let result = sqlx::query("DELETE FROM authorized_users WHERE phone_number = $1")
        .bind(&phone)
        .execute(&state.db)
        .await;
    match result {
        Ok(outcome) if outcome.rows_affected() == 0 => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "user not found" })),
        )
            .into_response(),
        Ok(_) => {
            info!("revoked access for {}", mask_phone_number(&phone));
            Json(json!({ "deleted": true })).into_response()
        }
        Err(err) => {
            error!("user deletion failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "database error" })),
            )
                .into_response()
        }
    }
}

async fn admin_stats(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> axum::response::Response {
    if !admin_authorized(&headers, &state.config) {
        return admin_unauthorized();
    }
    use sqlx::Row as _;
    let totals = sqlx::query(
        "SELECT COUNT(*) AS total, \
         COUNT(*) FILTER (WHERE is_active) AS active, \
         COALESCE(SUM(total_queries), 0) AS queries \
         FROM authorized_users",
    )
    .fetch_one(&state.db)
    .await;
    let blocked = sqlx::query("SELECT COUNT(*) AS blocked FROM blocked_attempts")
        .fetch_one(&state.db)
        .await;
    let (total, active, queries) = match totals {
        Ok(row) => (
            row.get::<i64, _>("total"),
            row.get::<i64, _>("active"),
            row.get::<i64, _>("queries"),
        ),
        Err(err) => {
            error!("stats query failed: {err}");
            (0, 0, 0)
        }
    };
    let blocked = blocked.map(|row| row.get::<i64, _>("blocked")).unwrap_or(0);
    Json(json!({
        "users": { "total": total, "active": active },
        "total_queries": queries,
        "blocked_attempts": blocked,
        "active_sessions": state.engine.session_count().await,
    }))
    .into_response()
}

async fn list_blocked(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> axum::response::Response {
    if !admin_authorized(&headers, &state.config) {
        return admin_unauthorized();
    }
    use sqlx::Row as _;
    let cutoff = (Utc::now() - ChronoDuration::days(7)).to_rfc3339();
    let rows = sqlx::query(
        "SELECT phone_number, message_content, attempt_time FROM blocked_attempts \
         WHERE attempt_time > $1 ORDER BY attempt_time DESC LIMIT 50",
    )
    .bind(cutoff)
    .fetch_all(&state.db)
    .await;
    match rows {
        Ok(rows) => {
            let attempts: Vec<Value> = rows
                .into_iter()
                .map(|row| {
                    json!({
                        "phone_number": row.get::<String, _>("phone_number"),
                        "message_content": row.get::<String, _>("message_content"),
                        "attempt_time": row.get::<String, _>("attempt_time"),
                    })
                })
                .collect();
            Json(json!({ "attempts": attempts })).into_response()
        }
        Err(err) => {
            error!("blocked attempt listing failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "database error" })),
            )
                .into_response()
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "service": "kyc-listas-bot",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "active_sessions": state.engine.session_count().await,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

async fn sweep_temp_files(dir: &std::path::Path) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    let mut removed = 0usize;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let expired = metadata
            .modified()
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .map(|age| age > TEMP_FILE_MAX_AGE)
            .unwrap_or(false);
        if expired && tokio::fs::remove_file(entry.path()).await.is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        info!("removed {removed} expired report files");
    }
}

pub async fn run() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config();
    if let Err(err) = tokio::fs::create_dir_all(&config.temp_dir).await {
        panic!(
            "failed to create temp directory {}: {}",
            config.temp_dir.display(),
            err
        );
    }
    let database_url = resolve_database_url();
    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("failed to connect to postgres (set DATABASE_URL or POSTGRES_* env vars)");

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .expect("failed to run sqlx migrations");
    ensure_column(
        &db,
        "authorized_users",
        "search_limit",
        "BIGINT NOT NULL DEFAULT 100",
    )
    .await;
    ensure_column(
        &db,
        "authorized_users",
        "ine_ocr_enabled",
        "BOOLEAN NOT NULL DEFAULT FALSE",
    )
    .await;

    let http = reqwest::Client::new();
    let state = Arc::new(AppState {
        engine: BotEngine::new(config.default_percentage),
        backend: HttpBackend::new(http.clone(), config.clone()),
        http,
        db,
        started_at: std::time::Instant::now(),
        config: config.clone(),
    });

    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let idle = ChronoDuration::hours(state.config.session_max_idle_hours);
                state.engine.evict_stale(idle).await;
                sweep_temp_files(&state.config.temp_dir).await;
            }
        });
    }

    let app = Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/webhook", post(webhook_inbound))
        .route("/webhook/status", post(webhook_status))
        .route("/temp/{file_name}", get(serve_temp_file))
        .route("/api/admin/users", get(list_users).post(create_user))
        .route(
            "/api/admin/users/{phone}",
            patch(update_user).delete(delete_user),
        )
        .route("/api/admin/stats", get(admin_stats))
        .route("/api/admin/blocked", get(list_blocked))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    info!("kyc listas bot running at http://localhost:{}", config.port);
    axum::serve(listener, app)
        .await
        .expect("server runtime failure");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_tokens_round_trip_and_expire() {
        let exp = Utc::now().timestamp() + 600;
        let sig = sign_file_token("secret", "KYC_X.pdf", exp).expect("signature");
        assert!(verify_file_token("secret", "KYC_X.pdf", exp, &sig));
        assert!(!verify_file_token("secret", "KYC_Y.pdf", exp, &sig));
        assert!(!verify_file_token("secret", "KYC_X.pdf", exp - 1200, &sig));
        assert!(!verify_file_token("secret", "KYC_X.pdf", exp, "deadbeef"));
    }

    #[test]
    fn empty_secret_disables_link_signing() {
        assert!(sign_file_token("", "KYC_X.pdf", 0).is_none());
        assert!(verify_file_token("", "KYC_X.pdf", 0, ""));
    }

    #[test]
    fn temp_file_names_reject_traversal() {
        assert!(is_safe_temp_file_name("KYC_EMPRESA_X_abc123.pdf"));
        assert!(!is_safe_temp_file_name("../etc/passwd"));
        assert!(!is_safe_temp_file_name("a/b.pdf"));
        assert!(!is_safe_temp_file_name(""));
    }

    #[test]
    fn public_url_resolution() {
        assert_eq!(
            resolve_public_url("https://bot.example.com/", "/temp/a.pdf"),
            "https://bot.example.com/temp/a.pdf"
        );
        assert_eq!(
            resolve_public_url("https://bot.example.com", "https://cdn/x.pdf"),
            "https://cdn/x.pdf"
        );
    }

    #[test]
    fn search_limit_parsing_accepts_sentinel_spellings() {
        assert_eq!(parse_search_limit(&json!(250)), Some(250));
        assert_eq!(parse_search_limit(&json!("50")), Some(50));
        assert_eq!(
            parse_search_limit(&json!("unlimited")),
            Some(UNLIMITED_SEARCHES)
        );
        assert_eq!(parse_search_limit(&json!("-1")), Some(UNLIMITED_SEARCHES));
        assert_eq!(parse_search_limit(&json!(true)), None);
    }

    #[test]
    fn inbound_media_requires_attachment_count() {
        let mut form = InboundForm {
            from: "whatsapp:+5215512345678".to_string(),
            body: String::new(),
            num_media: Some("0".to_string()),
            media_url0: Some("http://m/0".to_string()),
            media_content_type0: Some("image/jpeg".to_string()),
        };
        assert!(build_inbound_media(&form).is_none());
        form.num_media = Some("1".to_string());
        let media = build_inbound_media(&form).expect("media");
        assert_eq!(media.url, "http://m/0");
        assert_eq!(media.content_type, "image/jpeg");
    }

    #[test]
    fn admin_gate_checks_basic_credentials() {
        let config = Config {
            admin_user: "admin".to_string(),
            admin_pass: "s3cret".to_string(),
            ..test_config()
        };
        let mut headers = HeaderMap::new();
        assert!(!admin_authorized(&headers, &config));

        let token = BASE64.encode(b"admin:s3cret");
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {token}")).expect("header"),
        );
        assert!(admin_authorized(&headers, &config));

        let wrong = BASE64.encode(b"admin:nope");
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {wrong}")).expect("header"),
        );
        assert!(!admin_authorized(&headers, &config));

        // an unset password keeps the surface closed entirely
        let locked = Config {
            admin_pass: String::new(),
            ..config
        };
        let token = BASE64.encode(b"admin:");
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {token}")).expect("header"),
        );
        assert!(!admin_authorized(&headers, &locked));
    }

    fn test_config() -> Config {
        Config {
            port: 3000,
            public_base_url: "http://localhost:3000".to_string(),
            temp_dir: PathBuf::from("./temp"),
            twilio_account_sid: String::new(),
            twilio_auth_token: String::new(),
            twilio_whatsapp_number: "whatsapp:+14155238886".to_string(),
            kyc_api_url: "http://localhost:4001".to_string(),
            kyc_api_key: String::new(),
            ocr_api_url: "http://localhost:4002".to_string(),
            ocr_api_key: String::new(),
            admin_user: "admin".to_string(),
            admin_pass: String::new(),
            auth_fail_open: true,
            default_percentage: DEFAULT_MATCH_PERCENTAGE,
            session_max_idle_hours: 6,
            file_link_secret: String::new(),
            file_link_ttl_seconds: 86400,
        }
    }
}
