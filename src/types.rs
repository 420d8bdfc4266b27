use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

use crate::bot::BotEngine;

pub const UNLIMITED_SEARCHES: i64 = -1;
pub const DEFAULT_MATCH_PERCENTAGE: u8 = 98;
pub const MIN_MATCH_PERCENTAGE: u8 = 50;
pub const MAX_MATCH_PERCENTAGE: u8 = 99;

#[derive(Debug, Clone, Serialize)]
pub struct AuthorizedUser {
    pub id: i64,
    pub phone_number: String,
    pub full_name: String,
    pub company: Option<String>,
    pub is_active: bool,
    pub search_limit: i64,
    pub ine_ocr_enabled: bool,
    pub total_queries: i64,
    pub last_access: Option<String>,
    pub created_at: String,
}

impl AuthorizedUser {
    /// Placeholder identity handed out when the directory store is down
    /// and the gate fails open.
    pub fn anonymous() -> Self {
        AuthorizedUser {
            id: 0,
            phone_number: String::new(),
            full_name: "Usuario".to_string(),
            company: Some("Empresa".to_string()),
            is_active: true,
            search_limit: UNLIMITED_SEARCHES,
            ine_ocr_enabled: false,
            total_queries: 0,
            last_access: None,
            created_at: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthCheck {
    pub authorized: bool,
    pub user: Option<AuthorizedUser>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonKind {
    Fisica,
    Moral,
}

impl PersonKind {
    pub fn code(self) -> &'static str {
        match self {
            PersonKind::Fisica => "1",
            PersonKind::Moral => "2",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PersonKind::Fisica => "Persona Física",
            PersonKind::Moral => "Persona Moral",
        }
    }
}

/// In-progress search parameters collected across the dialog. The draft
/// only lives inside the state variants that actually collect fields.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchDraft {
    pub persona: PersonKind,
    pub nombre: Option<String>,
    pub apaterno: Option<String>,
    pub amaterno: Option<String>,
    pub porcentaje_min: u8,
    /// Física searched by a single full-name entry instead of the
    /// split nombre/apaterno/amaterno path.
    pub full_name_mode: bool,
}

impl SearchDraft {
    pub fn new(porcentaje_min: u8) -> Self {
        SearchDraft {
            persona: PersonKind::Fisica,
            nombre: None,
            apaterno: None,
            amaterno: None,
            porcentaje_min,
            full_name_mode: false,
        }
    }

    pub fn to_params(&self) -> SearchParams {
        SearchParams {
            persona: self.persona.code().to_string(),
            nombre: self.nombre.clone().unwrap_or_default(),
            apaterno: self.apaterno.clone(),
            amaterno: self.amaterno.clone(),
            porcentaje_min: self.porcentaje_min,
            document: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationState {
    Welcome,
    HelpMenu,
    WaitingPersonType { draft: SearchDraft },
    AdvancedSearch { draft: SearchDraft },
    WaitingPercentage { draft: SearchDraft },
    WaitingName { draft: SearchDraft },
    WaitingApaterno { draft: SearchDraft },
    WaitingAmaterno { draft: SearchDraft },
    WaitingIneFront,
    WaitingIneBack { front_image_b64: String },
    ProcessingOcr,
    IneErrorRetry,
    Processing,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub state: ConversationState,
    pub user: AuthorizedUser,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct QuotaCheck {
    pub can_search: bool,
    pub current: i64,
    pub max: i64,
}

/// One outbound message produced by a conversation turn. Delivery is
/// the caller's job; `pause_before_ms` reproduces the progressive
/// disclosure pacing between confirmation and status messages.
#[derive(Debug, Clone, PartialEq)]
pub struct BotReply {
    pub body: String,
    pub media_url: Option<String>,
    pub pause_before_ms: u64,
}

impl BotReply {
    pub fn text(body: impl Into<String>) -> Self {
        BotReply {
            body: body.into(),
            media_url: None,
            pause_before_ms: 0,
        }
    }

    pub fn with_media(body: impl Into<String>, media_url: impl Into<String>) -> Self {
        BotReply {
            body: body.into(),
            media_url: Some(media_url.into()),
            pause_before_ms: 0,
        }
    }

    pub fn after_pause(mut self, ms: u64) -> Self {
        self.pause_before_ms = ms;
        self
    }
}

#[derive(Debug, Clone)]
pub struct InboundMedia {
    pub url: String,
    pub content_type: String,
}

/// Twilio-style webhook form payload. Only the first attachment is
/// consumed; the channel delivers one media item per image message.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundForm {
    #[serde(rename = "From", default)]
    pub from: String,
    #[serde(rename = "Body", default)]
    pub body: String,
    #[serde(rename = "NumMedia", default)]
    pub num_media: Option<String>,
    #[serde(rename = "MediaUrl0", default)]
    pub media_url0: Option<String>,
    #[serde(rename = "MediaContentType0", default)]
    pub media_content_type0: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchParams {
    pub persona: String,
    pub nombre: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apaterno: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amaterno: Option<String>,
    pub porcentaje_min: u8,
    pub document: u8,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KycMatch {
    #[serde(default)]
    pub nombre: String,
    #[serde(default)]
    pub tipo: String,
    #[serde(default)]
    pub porcentaje_coincidencia: f64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub observaciones: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KycPerformance {
    #[serde(default)]
    pub processing_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KycPdf {
    #[serde(default)]
    pub base64: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KycSearchResponse {
    #[serde(default)]
    pub err: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub coincidences: i64,
    #[serde(default)]
    pub person: Vec<KycMatch>,
    #[serde(default)]
    pub performance: Option<KycPerformance>,
    #[serde(default)]
    pub pdf: Option<KycPdf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OcrExtraction {
    #[serde(default)]
    pub err: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub nombre_completo: Option<String>,
    #[serde(default)]
    pub nombre: Option<String>,
    #[serde(default)]
    pub apellido_paterno: Option<String>,
    #[serde(default)]
    pub apellido_materno: Option<String>,
}

impl OcrExtraction {
    /// Extracted full name, preferring the combined field when the OCR
    /// backend provides it.
    pub fn full_name(&self) -> Option<String> {
        if let Some(full) = self
            .nombre_completo
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return Some(full.to_string());
        }
        let joined = [
            self.nombre.as_deref(),
            self.apellido_paterno.as_deref(),
            self.apellido_materno.as_deref(),
        ]
        .iter()
        .filter_map(|p| p.map(str::trim))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
        if joined.is_empty() {
            None
        } else {
            Some(joined)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserBody {
    pub phone_number: Option<String>,
    pub full_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub search_limit: Option<Value>,
    #[serde(default)]
    pub ine_ocr_enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserBody {
    pub full_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub search_limit: Option<Value>,
    #[serde(default)]
    pub ine_ocr_enabled: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub public_base_url: String,
    pub temp_dir: PathBuf,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_whatsapp_number: String,
    pub kyc_api_url: String,
    pub kyc_api_key: String,
    pub ocr_api_url: String,
    pub ocr_api_key: String,
    pub admin_user: String,
    pub admin_pass: String,
    /// Named policy flag: when the directory store is unreachable the
    /// gate answers as authorized with a placeholder identity.
    pub auth_fail_open: bool,
    pub default_percentage: u8,
    pub session_max_idle_hours: i64,
    pub file_link_secret: String,
    pub file_link_ttl_seconds: i64,
}

pub struct AppState {
    pub db: PgPool,
    pub engine: BotEngine,
    pub backend: crate::app::HttpBackend,
    pub http: reqwest::Client,
    pub config: Config,
    pub started_at: std::time::Instant,
}
