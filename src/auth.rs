use chrono::{Duration, Utc};
use regex::Regex;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{error, warn};

use crate::types::{AuthCheck, AuthorizedUser};

/// Blocked attempts inside the trailing window after which the sender
/// is dropped without a reply.
pub const SPAM_IGNORE_THRESHOLD: i64 = 5;
const ATTEMPT_WINDOW_MINUTES: i64 = 60;

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Normalizes a channel identifier to the directory key format:
/// strips the `whatsapp:` prefix and whitespace, ensures a leading `+`.
pub fn clean_phone_number(raw: &str) -> String {
    let mut cleaned = raw
        .trim()
        .strip_prefix("whatsapp:")
        .unwrap_or(raw.trim())
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>();
    if !cleaned.is_empty() && !cleaned.starts_with('+') {
        cleaned = format!("+{cleaned}");
    }
    cleaned
}

pub fn mask_phone_number(phone: &str) -> String {
    // The sender field arrives unvalidated, so slice on characters
    // rather than bytes.
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() < 6 {
        return phone.to_string();
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{head}***{tail}")
}

/// Masks any `whatsapp:+NNNNNNN...` identifiers embedded in free text
/// before it reaches the logs.
pub fn mask_phones_in(text: &str) -> String {
    let Ok(re) = Regex::new(r"whatsapp:\+?\d{7,}") else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &regex::Captures<'_>| {
        let number = caps[0].trim_start_matches("whatsapp:");
        format!("whatsapp:{}", mask_phone_number(number))
    })
    .into_owned()
}

pub(crate) fn parse_user_row(row: PgRow) -> AuthorizedUser {
    AuthorizedUser {
        id: row.get("id"),
        phone_number: row.get("phone_number"),
        full_name: row.get("full_name"),
        company: row.get("company"),
        is_active: row.get("is_active"),
        search_limit: row.get("search_limit"),
        ine_ocr_enabled: row.get("ine_ocr_enabled"),
        total_queries: row.get("total_queries"),
        last_access: row.get("last_access"),
        created_at: row.get("created_at"),
    }
}

pub async fn lookup_active_user(
    pool: &PgPool,
    phone: &str,
) -> Result<Option<AuthorizedUser>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT id, phone_number, full_name, company, is_active, search_limit, \
         ine_ocr_enabled, total_queries, last_access, created_at \
         FROM authorized_users WHERE phone_number = $1 AND is_active = TRUE LIMIT 1",
    )
    .bind(phone)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(parse_user_row))
}

/// Admin-side lookup that also returns deactivated users.
pub async fn lookup_user_any_status(
    pool: &PgPool,
    phone: &str,
) -> Result<Option<AuthorizedUser>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT id, phone_number, full_name, company, is_active, search_limit, \
         ine_ocr_enabled, total_queries, last_access, created_at \
         FROM authorized_users WHERE phone_number = $1 LIMIT 1",
    )
    .bind(phone)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(parse_user_row))
}

async fn touch_user_access(pool: &PgPool, user_id: i64) {
    let result = sqlx::query(
        "UPDATE authorized_users SET last_access = $1, total_queries = total_queries + 1 \
         WHERE id = $2",
    )
    .bind(now_iso())
    .bind(user_id)
    .execute(pool)
    .await;
    if let Err(err) = result {
        error!("failed to touch last_access for user {user_id}: {err}");
    }
}

/// Pure authorization decision. Factored out of the store access so the
/// fail-open law is testable without a database.
pub fn auth_decision(
    lookup: Result<Option<AuthorizedUser>, sqlx::Error>,
    fail_open: bool,
) -> AuthCheck {
    match lookup {
        Ok(Some(user)) => AuthCheck {
            authorized: true,
            user: Some(user),
        },
        Ok(None) => AuthCheck {
            authorized: false,
            user: None,
        },
        Err(err) => {
            error!("authorization lookup failed: {err}");
            if fail_open {
                // Availability over strictness while the directory is
                // down. Controlled by AUTH_FAIL_OPEN.
                AuthCheck {
                    authorized: true,
                    user: Some(AuthorizedUser::anonymous()),
                }
            } else {
                AuthCheck {
                    authorized: false,
                    user: None,
                }
            }
        }
    }
}

pub async fn check_authorization(pool: &PgPool, raw_phone: &str, fail_open: bool) -> AuthCheck {
    let phone = clean_phone_number(raw_phone);
    let check = auth_decision(lookup_active_user(pool, &phone).await, fail_open);
    if let Some(user) = check.user.as_ref() {
        if user.id > 0 {
            touch_user_access(pool, user.id).await;
        }
    }
    check
}

pub async fn log_blocked_attempt(pool: &PgPool, raw_phone: &str, message: &str) {
    let phone = clean_phone_number(raw_phone);
    let result = sqlx::query(
        "INSERT INTO blocked_attempts (phone_number, message_content, attempt_time) \
         VALUES ($1, $2, $3)",
    )
    .bind(&phone)
    .bind(message)
    .bind(now_iso())
    .execute(pool)
    .await;
    match result {
        Ok(_) => warn!("blocked attempt from {}", mask_phone_number(&phone)),
        Err(err) => error!("failed to record blocked attempt: {err}"),
    }
}

/// Blocked attempts from this number inside the trailing 1-hour window.
/// A store error counts as zero so a directory outage never escalates
/// into silent throttling.
pub async fn recent_attempt_count(pool: &PgPool, raw_phone: &str) -> i64 {
    let phone = clean_phone_number(raw_phone);
    let cutoff = (Utc::now() - Duration::minutes(ATTEMPT_WINDOW_MINUTES)).to_rfc3339();
    let result = sqlx::query(
        "SELECT COUNT(*) AS attempts FROM blocked_attempts \
         WHERE phone_number = $1 AND attempt_time > $2",
    )
    .bind(&phone)
    .bind(cutoff)
    .fetch_one(pool)
    .await;
    match result {
        Ok(row) => row.get::<i64, _>("attempts"),
        Err(err) => {
            error!("failed to count blocked attempts: {err}");
            0
        }
    }
}

pub fn should_ignore(recent_attempts: i64) -> bool {
    recent_attempts >= SPAM_IGNORE_THRESHOLD
}

/// Tiered rejection copy for unauthorized senders. `None` means stay
/// silent (spam throttling).
pub fn rejection_message_for_attempts(attempts: i64) -> Option<String> {
    if attempts == 0 {
        Some(
            "❌ *Acceso Restringido*\n\n\
             Su número no está autorizado para usar este servicio.\n\n\
             📞 *Para solicitar acceso contacte:*\n\
             • Email: acceso@kyc-listas.com\n\
             • WhatsApp: +52 55 1234-5678\n\
             • Web: www.kyc-listas.com/acceso\n\n\
             ⏰ *Horario:* Lunes a Viernes 9:00-18:00\n\n\
             _Este es un sistema privado de consultas KYC._"
                .to_string(),
        )
    } else if attempts < 3 {
        Some(
            "🚫 *Servicio No Disponible*\n\n\
             Su número no tiene autorización.\n\
             No insista con mensajes adicionales.\n\n\
             Para acceso legítimo contacte:\n\
             📧 acceso@kyc-listas.com\n\n\
             _Intentos repetidos serán registrados._"
                .to_string(),
        )
    } else if attempts < SPAM_IGNORE_THRESHOLD {
        Some(
            "⛔ *ACCESO DENEGADO*\n\n\
             Sus intentos están siendo registrados.\n\
             Detenga el envío de mensajes.\n\n\
             _Sistema de seguridad activo._"
                .to_string(),
        )
    } else {
        None
    }
}
