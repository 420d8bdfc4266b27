use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{Duration, Local, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::mask_phone_number;
use crate::menus::{self, WelcomeContext};
use crate::types::{
    AuthorizedUser, BotReply, ConversationState, InboundMedia, KycSearchResponse, OcrExtraction,
    PersonKind, QuotaCheck, SearchDraft, SearchParams, Session, MAX_MATCH_PERCENTAGE,
    MIN_MATCH_PERCENTAGE, UNLIMITED_SEARCHES,
};

/// Pause between the confirmation summary and the processing status,
/// so the two messages land as distinct bubbles.
const SEARCH_PAUSE_MS: u64 = 2000;

/// External services the dialog depends on. Implemented over HTTP in
/// production and faked in tests.
#[allow(async_fn_in_trait)]
pub trait BotBackend {
    async fn search(&self, params: &SearchParams) -> Result<KycSearchResponse, String>;
    async fn extract_document(
        &self,
        front_b64: &str,
        back_b64: &str,
    ) -> Result<OcrExtraction, String>;
    async fn fetch_image_base64(&self, url: &str) -> Result<String, String>;
    /// Persists report bytes and returns a time-limited public URL.
    async fn store_pdf(&self, file_name: &str, bytes: &[u8]) -> Result<String, String>;
}

/// Volatile per-phone dialog state plus the daily search counters.
/// Everything here is lost on restart by design.
pub struct BotEngine {
    sessions: RwLock<HashMap<String, Session>>,
    quota: Mutex<HashMap<(String, String), i64>>,
    default_percentage: u8,
}

impl BotEngine {
    pub fn new(default_percentage: u8) -> Self {
        BotEngine {
            sessions: RwLock::new(HashMap::new()),
            quota: Mutex::new(HashMap::new()),
            default_percentage,
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drops sessions idle longer than `max_idle` and quota counters
    /// from past days. Returns how many sessions were evicted.
    pub async fn evict_stale(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now() - max_idle;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.last_activity > cutoff);
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!("evicted {evicted} idle sessions");
        }
        drop(sessions);

        let today = Self::today_key();
        self.quota.lock().await.retain(|(_, day), _| *day == today);

        evicted
    }

    fn today_key() -> String {
        Local::now().format("%Y-%m-%d").to_string()
    }

    /// Daily quota check. Counters key on (phone, calendar day) so the
    /// allowance renews at local midnight without a sweep.
    pub async fn can_user_search(&self, phone: &str, limit: i64) -> QuotaCheck {
        let current = *self
            .quota
            .lock()
            .await
            .get(&(phone.to_string(), Self::today_key()))
            .unwrap_or(&0);
        QuotaCheck {
            can_search: limit == UNLIMITED_SEARCHES || current < limit,
            current,
            max: limit,
        }
    }

    /// Counted only after the external search succeeds, so failed
    /// attempts never burn quota.
    pub async fn record_completed_search(&self, phone: &str) {
        let mut quota = self.quota.lock().await;
        *quota
            .entry((phone.to_string(), Self::today_key()))
            .or_insert(0) += 1;
    }

    pub async fn searches_today(&self, phone: &str) -> i64 {
        self.can_user_search(phone, UNLIMITED_SEARCHES).await.current
    }

    async fn snapshot_session(&self, phone: &str, user: &AuthorizedUser) -> Session {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(phone.to_string()).or_insert_with(|| {
            info!("new session for {}", mask_phone_number(phone));
            Session {
                state: ConversationState::Welcome,
                user: user.clone(),
                last_activity: Utc::now(),
            }
        });
        // the directory row may have changed since the session started
        session.user = user.clone();
        session.last_activity = Utc::now();
        session.clone()
    }

    async fn store_session(&self, phone: &str, session: Session) {
        self.sessions.write().await.insert(phone.to_string(), session);
    }

    /// Makes a state transition visible to concurrent turns before an
    /// external call is awaited.
    async fn publish_state(&self, phone: &str, state: ConversationState) {
        if let Some(session) = self.sessions.write().await.get_mut(phone) {
            session.state = state;
        }
    }

    fn welcome_message(user: &AuthorizedUser) -> String {
        menus::render_welcome(&WelcomeContext {
            user_name: &user.full_name,
            company: user.company.as_deref().unwrap_or("Tu Empresa"),
            is_first_time: user.total_queries == 0,
        })
    }

    /// One conversation turn: resolves the session, applies the global
    /// reset keywords, then dispatches on the current state. Replies
    /// come back as an ordered effect list for the transport to send.
    pub async fn handle_message<B: BotBackend>(
        &self,
        backend: &B,
        phone: &str,
        body: &str,
        media: Option<&InboundMedia>,
        user: &AuthorizedUser,
    ) -> Vec<BotReply> {
        let mut session = self.snapshot_session(phone, user).await;
        let text = body.trim();
        let lower = text.to_lowercase();

        // reset keywords work from any state, including mid-search
        if lower == "menu" || lower == "inicio" {
            session.state = ConversationState::Welcome;
            let reply = BotReply::text(Self::welcome_message(&session.user));
            self.store_session(phone, session).await;
            return vec![reply];
        }

        let replies = match session.state.clone() {
            ConversationState::Welcome => self.handle_welcome(&mut session, text, &lower),
            ConversationState::HelpMenu => Self::handle_help(&mut session, text),
            ConversationState::WaitingPersonType { draft } => {
                Self::handle_person_type(&mut session, text, draft)
            }
            ConversationState::AdvancedSearch { draft } => {
                Self::handle_advanced(&mut session, text, draft)
            }
            ConversationState::WaitingPercentage { draft } => {
                Self::handle_percentage(&mut session, text, draft)
            }
            ConversationState::WaitingName { draft } => {
                self.handle_name(backend, phone, &mut session, text, draft)
                    .await
            }
            ConversationState::WaitingApaterno { draft } => {
                Self::handle_apaterno(&mut session, text, &lower, draft)
            }
            ConversationState::WaitingAmaterno { draft } => {
                self.handle_amaterno(backend, phone, &mut session, text, &lower, draft)
                    .await
            }
            ConversationState::WaitingIneFront => {
                self.handle_ine_front(backend, &mut session, media).await
            }
            ConversationState::WaitingIneBack { front_image_b64 } => {
                self.handle_ine_back(backend, phone, &mut session, media, front_image_b64)
                    .await
            }
            ConversationState::IneErrorRetry => Self::handle_ine_retry(&mut session, text),
            ConversationState::Processing | ConversationState::ProcessingOcr => {
                vec![BotReply::text(menus::still_processing())]
            }
        };

        self.store_session(phone, session).await;
        replies
    }

    fn handle_welcome(&self, session: &mut Session, text: &str, lower: &str) -> Vec<BotReply> {
        const GREETINGS: [&str; 6] = ["hola", "hi", "hello", "empezar", "comenzar", "buenos dias"];
        if text.is_empty() || GREETINGS.contains(&lower) {
            return vec![BotReply::text(Self::welcome_message(&session.user))];
        }
        match text {
            "1" => {
                session.state = ConversationState::WaitingPersonType {
                    draft: SearchDraft::new(self.default_percentage),
                };
                vec![BotReply::text(menus::search_type_menu(
                    session.user.ine_ocr_enabled,
                ))]
            }
            "2" => vec![BotReply::text(menus::recent_searches_stub())],
            "3" => {
                session.state = ConversationState::HelpMenu;
                vec![BotReply::text(menus::help_menu())]
            }
            _ if lower == "ayuda" => {
                session.state = ConversationState::HelpMenu;
                vec![BotReply::text(menus::help_menu())]
            }
            _ if lower.contains("info") || lower.contains("listas") => {
                vec![BotReply::text(menus::lists_info())]
            }
            _ => vec![BotReply::text(menus::invalid_welcome_option())],
        }
    }

    fn handle_help(session: &mut Session, text: &str) -> Vec<BotReply> {
        if text == "0" {
            session.state = ConversationState::Welcome;
            return vec![BotReply::text(Self::welcome_message(&session.user))];
        }
        match menus::help_topic(text) {
            Some(topic) => vec![BotReply::text(topic)],
            None => vec![BotReply::text(menus::help_invalid_option())],
        }
    }

    fn handle_person_type(
        session: &mut Session,
        text: &str,
        mut draft: SearchDraft,
    ) -> Vec<BotReply> {
        match text {
            "1" => {
                draft.persona = PersonKind::Fisica;
                draft.full_name_mode = false;
                let prompt = menus::name_prompt(PersonKind::Fisica, false, draft.porcentaje_min);
                session.state = ConversationState::WaitingName { draft };
                vec![BotReply::text(prompt)]
            }
            "2" => {
                draft.persona = PersonKind::Moral;
                draft.full_name_mode = false;
                let prompt = menus::name_prompt(PersonKind::Moral, false, draft.porcentaje_min);
                session.state = ConversationState::WaitingName { draft };
                vec![BotReply::text(prompt)]
            }
            "3" => {
                draft.persona = PersonKind::Fisica;
                draft.full_name_mode = true;
                let prompt = menus::name_prompt(PersonKind::Fisica, true, draft.porcentaje_min);
                session.state = ConversationState::WaitingName { draft };
                vec![BotReply::text(prompt)]
            }
            "4" => {
                let menu = menus::advanced_search_menu(draft.porcentaje_min);
                session.state = ConversationState::AdvancedSearch { draft };
                vec![BotReply::text(menu)]
            }
            "5" if session.user.ine_ocr_enabled => {
                session.state = ConversationState::WaitingIneFront;
                vec![BotReply::text(menus::ine_front_prompt())]
            }
            "5" => vec![BotReply::text(menus::ocr_not_entitled())],
            _ => vec![BotReply::text(menus::invalid_person_type(
                session.user.ine_ocr_enabled,
            ))],
        }
    }

    fn handle_advanced(session: &mut Session, text: &str, mut draft: SearchDraft) -> Vec<BotReply> {
        match text {
            "1" => {
                draft.persona = PersonKind::Fisica;
                draft.full_name_mode = false;
                let prompt = menus::name_prompt(PersonKind::Fisica, false, draft.porcentaje_min);
                session.state = ConversationState::WaitingName { draft };
                vec![BotReply::text(prompt)]
            }
            "2" => {
                draft.persona = PersonKind::Moral;
                draft.full_name_mode = false;
                let prompt = menus::name_prompt(PersonKind::Moral, false, draft.porcentaje_min);
                session.state = ConversationState::WaitingName { draft };
                vec![BotReply::text(prompt)]
            }
            "3" => {
                let prompt = menus::percentage_prompt(draft.porcentaje_min);
                session.state = ConversationState::WaitingPercentage { draft };
                vec![BotReply::text(prompt)]
            }
            _ => vec![BotReply::text(menus::invalid_advanced_option())],
        }
    }

    fn handle_percentage(
        session: &mut Session,
        text: &str,
        mut draft: SearchDraft,
    ) -> Vec<BotReply> {
        let parsed = text.trim_end_matches('%').trim().parse::<i64>();
        match parsed {
            Ok(value)
                if (MIN_MATCH_PERCENTAGE as i64..=MAX_MATCH_PERCENTAGE as i64)
                    .contains(&value) =>
            {
                draft.porcentaje_min = value as u8;
                let menu = menus::advanced_search_menu(draft.porcentaje_min);
                let confirmed = menus::percentage_configured(draft.porcentaje_min);
                session.state = ConversationState::AdvancedSearch { draft };
                vec![BotReply::text(confirmed), BotReply::text(menu)]
            }
            _ => vec![BotReply::text(menus::invalid_percentage())],
        }
    }

    async fn handle_name<B: BotBackend>(
        &self,
        backend: &B,
        phone: &str,
        session: &mut Session,
        text: &str,
        mut draft: SearchDraft,
    ) -> Vec<BotReply> {
        if text.chars().count() < 2 {
            return vec![BotReply::text(menus::invalid_name())];
        }
        draft.nombre = Some(text.to_uppercase());
        if draft.persona == PersonKind::Moral || draft.full_name_mode {
            return self.run_search(backend, phone, session, draft).await;
        }
        session.state = ConversationState::WaitingApaterno { draft };
        vec![BotReply::text(menus::apaterno_prompt())]
    }

    fn handle_apaterno(
        session: &mut Session,
        text: &str,
        lower: &str,
        mut draft: SearchDraft,
    ) -> Vec<BotReply> {
        if lower != "skip" && !text.is_empty() {
            draft.apaterno = Some(text.to_uppercase());
        }
        session.state = ConversationState::WaitingAmaterno { draft };
        vec![BotReply::text(menus::amaterno_prompt())]
    }

    async fn handle_amaterno<B: BotBackend>(
        &self,
        backend: &B,
        phone: &str,
        session: &mut Session,
        text: &str,
        lower: &str,
        mut draft: SearchDraft,
    ) -> Vec<BotReply> {
        if lower != "skip" && !text.is_empty() {
            draft.amaterno = Some(text.to_uppercase());
        }
        self.run_search(backend, phone, session, draft).await
    }

    /// Shared search tail: quota gate, confirmation summary, paced
    /// status message, external call, result rendering and report
    /// delivery. Always lands back on the welcome state.
    async fn run_search<B: BotBackend>(
        &self,
        backend: &B,
        phone: &str,
        session: &mut Session,
        draft: SearchDraft,
    ) -> Vec<BotReply> {
        let quota = self.can_user_search(phone, session.user.search_limit).await;
        if !quota.can_search {
            session.state = ConversationState::Welcome;
            return vec![BotReply::text(menus::quota_exceeded_message(
                quota.current,
                quota.max,
            ))];
        }

        self.publish_state(phone, ConversationState::Processing).await;
        session.state = ConversationState::Processing;

        let mut replies = vec![
            BotReply::text(menus::confirmation_message(&draft)),
            BotReply::text(menus::processing_status()).after_pause(SEARCH_PAUSE_MS),
        ];

        let params = draft.to_params();
        info!(
            persona = %params.persona,
            porcentaje = params.porcentaje_min,
            "search dispatched for {}",
            mask_phone_number(phone)
        );
        match backend.search(&params).await {
            Ok(result) if !result.err => {
                self.record_completed_search(phone).await;
                let report_id = format!("KYC-{}", Utc::now().timestamp_millis());
                replies.push(BotReply::text(menus::results_message(&result, &report_id)));
                if let Some(pdf) = result.pdf.as_ref().filter(|p| !p.base64.is_empty()) {
                    replies.push(Self::deliver_pdf(backend, &params.nombre, &pdf.base64).await);
                }
            }
            Ok(result) => {
                warn!("search answered with error flag: {:?}", result.message);
                replies.push(BotReply::text(menus::api_error_message()));
            }
            Err(err) => {
                warn!("search call failed: {err}");
                replies.push(BotReply::text(menus::api_error_message()));
            }
        }

        session.state = ConversationState::Welcome;
        replies
    }

    async fn deliver_pdf<B: BotBackend>(backend: &B, nombre: &str, b64: &str) -> BotReply {
        let bytes = match decode_pdf_base64(b64) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("report decode failed: {err}");
                return BotReply::text(menus::pdf_failed_message());
            }
        };
        let file_name = report_file_name(nombre);
        match backend.store_pdf(&file_name, &bytes).await {
            Ok(url) => {
                let body = menus::pdf_ready_message(&url);
                BotReply::with_media(body, url)
            }
            Err(err) => {
                warn!("report store failed: {err}");
                BotReply::text(menus::pdf_failed_message())
            }
        }
    }

    async fn handle_ine_front<B: BotBackend>(
        &self,
        backend: &B,
        session: &mut Session,
        media: Option<&InboundMedia>,
    ) -> Vec<BotReply> {
        let Some(image) = media.filter(|m| m.content_type.starts_with("image/")) else {
            return vec![BotReply::text(menus::ine_not_image())];
        };
        match backend.fetch_image_base64(&image.url).await {
            Ok(front_image_b64) => {
                session.state = ConversationState::WaitingIneBack { front_image_b64 };
                vec![BotReply::text(menus::ine_back_prompt())]
            }
            Err(err) => {
                warn!("front image fetch failed: {err}");
                vec![BotReply::text(menus::internal_error_message())]
            }
        }
    }

    async fn handle_ine_back<B: BotBackend>(
        &self,
        backend: &B,
        phone: &str,
        session: &mut Session,
        media: Option<&InboundMedia>,
        front_image_b64: String,
    ) -> Vec<BotReply> {
        let Some(image) = media.filter(|m| m.content_type.starts_with("image/")) else {
            return vec![BotReply::text(menus::ine_not_image())];
        };
        let back_b64 = match backend.fetch_image_base64(&image.url).await {
            Ok(b64) => b64,
            Err(err) => {
                warn!("back image fetch failed: {err}");
                return vec![BotReply::text(menus::internal_error_message())];
            }
        };

        self.publish_state(phone, ConversationState::ProcessingOcr)
            .await;
        session.state = ConversationState::ProcessingOcr;

        let mut replies = vec![BotReply::text(menus::ocr_processing())];
        let outcome = backend.extract_document(&front_image_b64, &back_b64).await;
        // image payloads are dropped here; only the extracted name survives
        drop(front_image_b64);
        drop(back_b64);

        let extracted = match outcome {
            Ok(extraction) if !extraction.err => extraction.full_name(),
            Ok(extraction) => {
                warn!("document extraction answered with error flag: {:?}", extraction.message);
                None
            }
            Err(err) => {
                warn!("document extraction failed: {err}");
                None
            }
        };

        match extracted {
            Some(name) => {
                let name = name.to_uppercase();
                replies.push(BotReply::text(menus::ocr_extracted(&name)));
                let mut draft = SearchDraft::new(self.default_percentage);
                // extracted names go out under persona 2; the upstream
                // matcher expects document-derived names on that path
                draft.persona = PersonKind::Moral;
                draft.full_name_mode = true;
                draft.nombre = Some(name);
                replies.extend(self.run_search(backend, phone, session, draft).await);
            }
            None => {
                session.state = ConversationState::IneErrorRetry;
                replies.push(BotReply::text(menus::ine_error_retry_menu()));
            }
        }
        replies
    }

    fn handle_ine_retry(session: &mut Session, text: &str) -> Vec<BotReply> {
        match text {
            "1" => {
                session.state = ConversationState::WaitingIneFront;
                vec![BotReply::text(menus::ine_front_prompt())]
            }
            "2" => {
                session.state = ConversationState::Welcome;
                vec![BotReply::text(Self::welcome_message(&session.user))]
            }
            _ => vec![BotReply::text(menus::ine_error_retry_menu())],
        }
    }
}

#[cfg(test)]
impl BotEngine {
    pub async fn state_of(&self, phone: &str) -> Option<ConversationState> {
        self.sessions
            .read()
            .await
            .get(phone)
            .map(|s| s.state.clone())
    }

    pub async fn set_last_activity(&self, phone: &str, at: chrono::DateTime<Utc>) {
        if let Some(session) = self.sessions.write().await.get_mut(phone) {
            session.last_activity = at;
        }
    }

    pub async fn force_state(&self, phone: &str, state: ConversationState) {
        self.publish_state(phone, state).await;
    }

    pub async fn set_quota_entry(&self, phone: &str, day: &str, count: i64) {
        self.quota
            .lock()
            .await
            .insert((phone.to_string(), day.to_string()), count);
    }

    pub async fn quota_entry_count(&self) -> usize {
        self.quota.lock().await.len()
    }
}

/// Decodes a base64 PDF payload, tolerating an optional data-URL
/// prefix from the upstream service.
fn decode_pdf_base64(b64: &str) -> Result<Vec<u8>, String> {
    let raw = b64
        .strip_prefix("data:application/pdf;base64,")
        .unwrap_or(b64)
        .trim();
    BASE64.decode(raw).map_err(|err| err.to_string())
}

fn report_file_name(nombre: &str) -> String {
    let slug: String = nombre
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("KYC_{}_{}.pdf", slug, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use crate::types::{KycMatch, KycPdf, DEFAULT_MATCH_PERCENTAGE};

    const PHONE: &str = "+5215512345678";

    #[derive(Default)]
    struct FakeBackend {
        search_calls: StdMutex<Vec<SearchParams>>,
        search_result: StdMutex<Option<Result<KycSearchResponse, String>>>,
        ocr_calls: StdMutex<Vec<(String, String)>>,
        ocr_result: StdMutex<Option<Result<OcrExtraction, String>>>,
        stored_files: StdMutex<Vec<String>>,
    }

    impl FakeBackend {
        fn set_search(&self, result: Result<KycSearchResponse, String>) {
            *self.search_result.lock().unwrap() = Some(result);
        }

        fn set_ocr(&self, result: Result<OcrExtraction, String>) {
            *self.ocr_result.lock().unwrap() = Some(result);
        }

        fn search_count(&self) -> usize {
            self.search_calls.lock().unwrap().len()
        }
    }

    impl BotBackend for FakeBackend {
        async fn search(&self, params: &SearchParams) -> Result<KycSearchResponse, String> {
            self.search_calls.lock().unwrap().push(params.clone());
            self.search_result
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Ok(KycSearchResponse::default()))
        }

        async fn extract_document(
            &self,
            front_b64: &str,
            back_b64: &str,
        ) -> Result<OcrExtraction, String> {
            self.ocr_calls
                .lock()
                .unwrap()
                .push((front_b64.to_string(), back_b64.to_string()));
            self.ocr_result
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Ok(OcrExtraction::default()))
        }

        async fn fetch_image_base64(&self, url: &str) -> Result<String, String> {
            Ok(format!("B64:{url}"))
        }

        async fn store_pdf(&self, file_name: &str, _bytes: &[u8]) -> Result<String, String> {
            self.stored_files.lock().unwrap().push(file_name.to_string());
            Ok(format!("https://files.test/{file_name}"))
        }
    }

    fn user(search_limit: i64) -> AuthorizedUser {
        AuthorizedUser {
            id: 7,
            phone_number: PHONE.to_string(),
            full_name: "Juan Pérez".to_string(),
            company: Some("Constructora ABC".to_string()),
            is_active: true,
            search_limit,
            ine_ocr_enabled: false,
            total_queries: 3,
            last_access: None,
            created_at: String::new(),
        }
    }

    fn ocr_user() -> AuthorizedUser {
        AuthorizedUser {
            ine_ocr_enabled: true,
            ..user(100)
        }
    }

    fn engine() -> BotEngine {
        BotEngine::new(DEFAULT_MATCH_PERCENTAGE)
    }

    async fn say(
        engine: &BotEngine,
        backend: &FakeBackend,
        user: &AuthorizedUser,
        msg: &str,
    ) -> Vec<BotReply> {
        engine.handle_message(backend, PHONE, msg, None, user).await
    }

    async fn send_image(
        engine: &BotEngine,
        backend: &FakeBackend,
        user: &AuthorizedUser,
        url: &str,
        content_type: &str,
    ) -> Vec<BotReply> {
        let media = InboundMedia {
            url: url.to_string(),
            content_type: content_type.to_string(),
        };
        engine
            .handle_message(backend, PHONE, "", Some(&media), user)
            .await
    }

    #[tokio::test]
    async fn greeting_renders_main_menu() {
        let engine = engine();
        let backend = FakeBackend::default();
        let user = user(100);
        let replies = say(&engine, &backend, &user, "hola").await;
        assert_eq!(replies.len(), 1);
        assert!(replies[0].body.contains("Juan Pérez"));
        assert!(replies[0].body.contains("Buscar en Listas"));
    }

    #[tokio::test]
    async fn first_contact_gets_onboarding_variant() {
        let engine = engine();
        let backend = FakeBackend::default();
        let fresh = AuthorizedUser {
            total_queries: 0,
            ..user(100)
        };
        let replies = say(&engine, &backend, &fresh, "hola").await;
        assert!(replies[0].body.contains("primera vez"));
    }

    #[tokio::test]
    async fn split_name_flow_builds_expected_params() {
        let engine = engine();
        let backend = FakeBackend::default();
        let user = user(100);
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "Juan carlos").await;
        say(&engine, &backend, &user, "garcia").await;
        let replies = say(&engine, &backend, &user, "lopez").await;

        let calls = backend.search_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            SearchParams {
                persona: "1".to_string(),
                nombre: "JUAN CARLOS".to_string(),
                apaterno: Some("GARCIA".to_string()),
                amaterno: Some("LOPEZ".to_string()),
                porcentaje_min: 98,
                document: 1,
            }
        );
        drop(calls);

        assert!(replies.iter().any(|r| r.body.contains("Confirmar Datos")));
        assert!(replies.iter().any(|r| r.pause_before_ms == SEARCH_PAUSE_MS));
        assert_eq!(
            engine.state_of(PHONE).await,
            Some(ConversationState::Welcome)
        );
    }

    #[tokio::test]
    async fn skip_omits_optional_surnames() {
        let engine = engine();
        let backend = FakeBackend::default();
        let user = user(100);
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "MARIA").await;
        say(&engine, &backend, &user, "skip").await;
        say(&engine, &backend, &user, "skip").await;

        let calls = backend.search_calls.lock().unwrap();
        assert_eq!(calls[0].apaterno, None);
        assert_eq!(calls[0].amaterno, None);
    }

    #[tokio::test]
    async fn moral_search_goes_straight_from_name() {
        let engine = engine();
        let backend = FakeBackend::default();
        let user = user(100);
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "2").await;
        say(&engine, &backend, &user, "Constructora Ejemplo SA de CV").await;

        let calls = backend.search_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].persona, "2");
        assert_eq!(calls[0].nombre, "CONSTRUCTORA EJEMPLO SA DE CV");
        assert_eq!(calls[0].apaterno, None);
    }

    #[tokio::test]
    async fn full_name_mode_skips_surname_prompts() {
        let engine = engine();
        let backend = FakeBackend::default();
        let user = user(100);
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "3").await;
        let replies = say(&engine, &backend, &user, "Juan Carlos Garcia Lopez").await;

        let calls = backend.search_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].persona, "1");
        assert_eq!(calls[0].nombre, "JUAN CARLOS GARCIA LOPEZ");
        drop(calls);
        assert!(replies
            .iter()
            .any(|r| r.body.contains("Nombre Completo")));
    }

    #[tokio::test]
    async fn short_name_is_rejected_and_state_kept() {
        let engine = engine();
        let backend = FakeBackend::default();
        let user = user(100);
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "1").await;
        let replies = say(&engine, &backend, &user, "J").await;
        assert!(replies[0].body.contains("Nombre Inválido"));
        assert!(matches!(
            engine.state_of(PHONE).await,
            Some(ConversationState::WaitingName { .. })
        ));

        let replies = say(&engine, &backend, &user, "Jo").await;
        assert!(replies[0].body.contains("Apellido Paterno"));
    }

    #[tokio::test]
    async fn menu_keyword_resets_from_any_state() {
        let engine = engine();
        let backend = FakeBackend::default();
        let user = user(100);
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "JUAN").await;
        let replies = say(&engine, &backend, &user, "MENU").await;
        assert!(replies[0].body.contains("Buscar en Listas"));
        assert_eq!(
            engine.state_of(PHONE).await,
            Some(ConversationState::Welcome)
        );
        assert_eq!(backend.search_count(), 0);

        // a fresh flow starts from a clean draft
        say(&engine, &backend, &user, "1").await;
        assert!(matches!(
            engine.state_of(PHONE).await,
            Some(ConversationState::WaitingPersonType { ref draft }) if draft.nombre.is_none()
        ));
    }

    #[tokio::test]
    async fn zero_matches_reports_clean_result() {
        let engine = engine();
        let backend = FakeBackend::default();
        let user = user(100);
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "2").await;
        let replies = say(&engine, &backend, &user, "EMPRESA LIMPIA").await;
        assert!(replies.iter().any(|r| r.body.contains("SIN COINCIDENCIAS")));
        assert_eq!(engine.searches_today(PHONE).await, 1);
    }

    #[tokio::test]
    async fn matches_render_top_hits() {
        let engine = engine();
        let backend = FakeBackend::default();
        backend.set_search(Ok(KycSearchResponse {
            coincidences: 2,
            person: vec![
                KycMatch {
                    nombre: "JUAN GARCIA".to_string(),
                    tipo: "OFAC".to_string(),
                    porcentaje_coincidencia: 99.0,
                    ..KycMatch::default()
                },
                KycMatch {
                    nombre: "JUAN C GARCIA".to_string(),
                    tipo: "PEP".to_string(),
                    porcentaje_coincidencia: 98.2,
                    ..KycMatch::default()
                },
            ],
            ..KycSearchResponse::default()
        }));
        let user = user(100);
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "3").await;
        let replies = say(&engine, &backend, &user, "Juan Garcia").await;
        let results = replies
            .iter()
            .find(|r| r.body.contains("COINCIDENCIAS"))
            .expect("results message");
        assert!(results.body.contains("JUAN GARCIA"));
        assert!(results.body.contains("OFAC"));
    }

    #[tokio::test]
    async fn report_pdf_is_stored_and_linked() {
        let engine = engine();
        let backend = FakeBackend::default();
        backend.set_search(Ok(KycSearchResponse {
            pdf: Some(KycPdf {
                base64: BASE64.encode(b"%PDF-1.4 test"),
            }),
            ..KycSearchResponse::default()
        }));
        let user = user(100);
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "2").await;
        let replies = say(&engine, &backend, &user, "EMPRESA X").await;

        let media = replies
            .iter()
            .find(|r| r.media_url.is_some())
            .expect("media reply");
        assert!(media
            .media_url
            .as_deref()
            .unwrap()
            .starts_with("https://files.test/KYC_EMPRESA_X_"));
        assert_eq!(backend.stored_files.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn broken_report_payload_keeps_search_result() {
        let engine = engine();
        let backend = FakeBackend::default();
        backend.set_search(Ok(KycSearchResponse {
            pdf: Some(KycPdf {
                base64: "!!! not base64 !!!".to_string(),
            }),
            ..KycSearchResponse::default()
        }));
        let user = user(100);
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "2").await;
        let replies = say(&engine, &backend, &user, "EMPRESA X").await;
        assert!(replies.iter().any(|r| r.body.contains("COINCIDENCIAS")));
        assert!(replies
            .iter()
            .any(|r| r.body.contains("Error al procesar el PDF")));
        // the search itself succeeded, so it still counts
        assert_eq!(engine.searches_today(PHONE).await, 1);
    }

    #[tokio::test]
    async fn backend_failure_reports_outage_and_resets() {
        let engine = engine();
        let backend = FakeBackend::default();
        backend.set_search(Err("connect timeout".to_string()));
        let user = user(100);
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "2").await;
        let replies = say(&engine, &backend, &user, "EMPRESA X").await;
        assert!(replies
            .iter()
            .any(|r| r.body.contains("Temporalmente No Disponible")));
        assert_eq!(
            engine.state_of(PHONE).await,
            Some(ConversationState::Welcome)
        );
        assert_eq!(engine.searches_today(PHONE).await, 0);
    }

    #[tokio::test]
    async fn error_flag_in_response_counts_as_failure() {
        let engine = engine();
        let backend = FakeBackend::default();
        backend.set_search(Ok(KycSearchResponse {
            err: true,
            message: Some("bad request".to_string()),
            ..KycSearchResponse::default()
        }));
        let user = user(100);
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "2").await;
        let replies = say(&engine, &backend, &user, "EMPRESA X").await;
        assert!(replies
            .iter()
            .any(|r| r.body.contains("Temporalmente No Disponible")));
        assert_eq!(engine.searches_today(PHONE).await, 0);
    }

    #[tokio::test]
    async fn exhausted_quota_blocks_before_dispatch() {
        let engine = engine();
        let backend = FakeBackend::default();
        let user = user(2);
        for _ in 0..2 {
            say(&engine, &backend, &user, "1").await;
            say(&engine, &backend, &user, "2").await;
            say(&engine, &backend, &user, "EMPRESA X").await;
        }
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "2").await;
        let replies = say(&engine, &backend, &user, "EMPRESA X").await;
        assert!(replies[0].body.contains("Límite Diario Alcanzado"));
        assert_eq!(backend.search_count(), 2);
        assert_eq!(
            engine.state_of(PHONE).await,
            Some(ConversationState::Welcome)
        );
    }

    #[tokio::test]
    async fn zero_limit_blocks_every_search() {
        let engine = engine();
        let backend = FakeBackend::default();
        let user = user(0);
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "2").await;
        let replies = say(&engine, &backend, &user, "EMPRESA X").await;
        assert!(replies[0].body.contains("Límite Diario Alcanzado"));
        assert_eq!(backend.search_count(), 0);
    }

    #[tokio::test]
    async fn unlimited_sentinel_never_blocks() {
        let engine = engine();
        let backend = FakeBackend::default();
        let user = user(UNLIMITED_SEARCHES);
        for _ in 0..4 {
            say(&engine, &backend, &user, "1").await;
            say(&engine, &backend, &user, "2").await;
            say(&engine, &backend, &user, "EMPRESA X").await;
        }
        assert_eq!(backend.search_count(), 4);
    }

    #[tokio::test]
    async fn percentage_configuration_applies_to_search() {
        let engine = engine();
        let backend = FakeBackend::default();
        let user = user(100);
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "4").await;
        say(&engine, &backend, &user, "3").await;

        let replies = say(&engine, &backend, &user, "150").await;
        assert!(replies[0].body.contains("Porcentaje Inválido"));
        assert!(matches!(
            engine.state_of(PHONE).await,
            Some(ConversationState::WaitingPercentage { .. })
        ));
        let replies = say(&engine, &backend, &user, "abc").await;
        assert!(replies[0].body.contains("Porcentaje Inválido"));

        let replies = say(&engine, &backend, &user, "75%").await;
        assert!(replies[0].body.contains("75"));
        say(&engine, &backend, &user, "2").await;
        say(&engine, &backend, &user, "EMPRESA X").await;

        let calls = backend.search_calls.lock().unwrap();
        assert_eq!(calls[0].porcentaje_min, 75);
    }

    #[tokio::test]
    async fn help_menu_navigation() {
        let engine = engine();
        let backend = FakeBackend::default();
        let user = user(100);
        say(&engine, &backend, &user, "3").await;
        assert_eq!(
            engine.state_of(PHONE).await,
            Some(ConversationState::HelpMenu)
        );
        let replies = say(&engine, &backend, &user, "2").await;
        assert!(!replies[0].body.contains("Opción de ayuda no válida"));
        let replies = say(&engine, &backend, &user, "42").await;
        assert!(replies[0].body.contains("no válida"));
        let replies = say(&engine, &backend, &user, "0").await;
        assert!(replies[0].body.contains("Buscar en Listas"));
        assert_eq!(
            engine.state_of(PHONE).await,
            Some(ConversationState::Welcome)
        );
    }

    #[tokio::test]
    async fn ine_option_requires_entitlement() {
        let engine = engine();
        let backend = FakeBackend::default();
        let user = user(100);
        say(&engine, &backend, &user, "1").await;
        let replies = say(&engine, &backend, &user, "5").await;
        assert!(replies[0].body.contains("no habilitada"));
        assert!(matches!(
            engine.state_of(PHONE).await,
            Some(ConversationState::WaitingPersonType { .. })
        ));
    }

    #[tokio::test]
    async fn ine_flow_extracts_name_and_searches() {
        let engine = engine();
        let backend = FakeBackend::default();
        backend.set_ocr(Ok(OcrExtraction {
            nombre_completo: Some("Juan Perez Garcia".to_string()),
            ..OcrExtraction::default()
        }));
        let user = ocr_user();
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "5").await;

        // non-image attachment is refused
        let replies = send_image(&engine, &backend, &user, "http://m/doc", "application/pdf").await;
        assert!(replies[0].body.contains("Imagen no válida"));

        send_image(&engine, &backend, &user, "http://m/front", "image/jpeg").await;
        assert!(matches!(
            engine.state_of(PHONE).await,
            Some(ConversationState::WaitingIneBack { .. })
        ));
        let replies = send_image(&engine, &backend, &user, "http://m/back", "image/jpeg").await;

        let ocr_calls = backend.ocr_calls.lock().unwrap();
        assert_eq!(
            ocr_calls[0],
            ("B64:http://m/front".to_string(), "B64:http://m/back".to_string())
        );
        drop(ocr_calls);

        assert!(replies.iter().any(|r| r.body.contains("JUAN PEREZ GARCIA")));
        let calls = backend.search_calls.lock().unwrap();
        assert_eq!(calls[0].persona, "2");
        assert_eq!(calls[0].nombre, "JUAN PEREZ GARCIA");
        drop(calls);
        assert_eq!(
            engine.state_of(PHONE).await,
            Some(ConversationState::Welcome)
        );
    }

    #[tokio::test]
    async fn ocr_failure_offers_retry() {
        let engine = engine();
        let backend = FakeBackend::default();
        backend.set_ocr(Err("service down".to_string()));
        let user = ocr_user();
        say(&engine, &backend, &user, "1").await;
        say(&engine, &backend, &user, "5").await;
        send_image(&engine, &backend, &user, "http://m/front", "image/jpeg").await;
        let replies = send_image(&engine, &backend, &user, "http://m/back", "image/jpeg").await;
        assert!(replies.iter().any(|r| r.body.contains("No pude leer")));
        assert_eq!(
            engine.state_of(PHONE).await,
            Some(ConversationState::IneErrorRetry)
        );

        // option 1 restarts the capture from the front side
        let replies = say(&engine, &backend, &user, "1").await;
        assert!(replies[0].body.contains("frente"));
        assert_eq!(
            engine.state_of(PHONE).await,
            Some(ConversationState::WaitingIneFront)
        );
    }

    #[tokio::test]
    async fn processing_state_answers_busy() {
        let engine = engine();
        let backend = FakeBackend::default();
        let user = user(100);
        say(&engine, &backend, &user, "hola").await;
        engine.force_state(PHONE, ConversationState::Processing).await;
        let replies = say(&engine, &backend, &user, "hola").await;
        assert!(replies[0].body.contains("sigue en proceso"));
        assert_eq!(
            engine.state_of(PHONE).await,
            Some(ConversationState::Processing)
        );
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted() {
        let engine = engine();
        let backend = FakeBackend::default();
        let user = user(100);
        say(&engine, &backend, &user, "hola").await;
        assert_eq!(engine.session_count().await, 1);

        engine
            .set_last_activity(PHONE, Utc::now() - Duration::hours(7))
            .await;
        assert_eq!(engine.evict_stale(Duration::hours(6)).await, 1);
        assert_eq!(engine.session_count().await, 0);
    }

    #[tokio::test]
    async fn past_day_quota_counters_are_swept() {
        let engine = engine();
        engine.record_completed_search(PHONE).await;
        engine.set_quota_entry("+5215598765432", "2020-01-01", 7).await;
        assert_eq!(engine.quota_entry_count().await, 2);

        engine.evict_stale(Duration::hours(6)).await;
        assert_eq!(engine.quota_entry_count().await, 1);
        // today's counter survives the sweep
        assert_eq!(engine.searches_today(PHONE).await, 1);
    }

    #[test]
    fn report_file_names_are_sanitized() {
        let name = report_file_name("EMPRESA X / S.A.");
        assert!(name.starts_with("KYC_EMPRESA_X___S_A__"));
        assert!(name.ends_with(".pdf"));
        assert!(!name.contains('/'));
    }

    #[test]
    fn pdf_decode_accepts_data_url_prefix() {
        let encoded = format!("data:application/pdf;base64,{}", BASE64.encode(b"hello"));
        assert_eq!(decode_pdf_base64(&encoded).unwrap(), b"hello");
        assert!(decode_pdf_base64("%%%").is_err());
    }
}
