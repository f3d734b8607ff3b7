use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chopbot_config::Config;
use chopbot_contracts::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, CompleteOrderRequest, CompleteOrderResponse,
    CompletedOrder, ErrorBody, ErrorResponse, MenuResponse, Order, Session, SessionView,
    StartSessionResponse, UpdateItemRequest,
};
use chopbot_kernel::prompt::{self, ModelMessage, Protocol};
use chopbot_kernel::{directive, menu, order, structured};
use chrono::{DateTime, Utc};
use reqwest::Client;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const GREETING: &str =
    "Welcome to ChopBot! Tell me what you're craving, or ask to see the menu.";

pub async fn serve(cfg: Config) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let app = build_app(cfg).await?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    info!(%addr, "chopbot listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

/// Builds the router. Store initialization happens here; a store that cannot
/// be opened keeps the process from serving at all.
pub async fn build_app(cfg: Config) -> Result<Router, String> {
    let state = AppState::new(cfg)?;
    Ok(Router::new()
        .route("/health", get(health))
        .route("/menu", get(menu_catalog))
        .route("/session/start", post(session_start))
        .route("/session/{session_id}", delete(reset_session))
        .route("/get-session", get(get_session))
        .route("/chat", post(chat))
        .route("/order/{session_id}/item/{item_id}", put(update_item))
        .route("/order/{session_id}/complete", post(complete_order))
        .route("/order/completed/{order_id}", get(completed_order))
        .with_state(state))
}

#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<StoreBackend>>,
    model: Arc<ModelClient>,
    protocol: Protocol,
    session_ttl: Duration,
}

impl AppState {
    fn new(cfg: Config) -> Result<Self, String> {
        let store = if cfg.store.kind == "sqlite" {
            let sqlite_path = cfg
                .store
                .sqlite_path
                .clone()
                .ok_or_else(|| "store.sqlite_path is required for sqlite store".to_string())?;
            StoreBackend::Sqlite(SqliteStore::new(&sqlite_path)?)
        } else {
            StoreBackend::Memory(MemoryStore::default())
        };
        let protocol = Protocol::from_name(&cfg.model.protocol)
            .ok_or_else(|| format!("unsupported model.protocol: {}", cfg.model.protocol))?;
        Ok(Self {
            model: Arc::new(ModelClient::new(&cfg)?),
            session_ttl: Duration::from_secs(cfg.session.ttl_seconds),
            protocol,
            store: Arc::new(Mutex::new(store)),
        })
    }

    /// One chat turn: load session, call the model, apply its reply, persist,
    /// respond. The store lock is never held across the model call, so two
    /// concurrent turns for one session race and the later write wins.
    async fn process_chat(&self, req: ChatRequest) -> Result<ChatResponse, ApiError> {
        if req.message.trim().is_empty() {
            return Err(ApiError::Validation("message is required".to_string()));
        }
        let (key, session_id) = match (&req.session_id, &req.user_id) {
            (Some(id), _) if !id.trim().is_empty() => (session_key(id), id.clone()),
            (_, Some(id)) if !id.trim().is_empty() => (user_key(id), id.clone()),
            _ => {
                return Err(ApiError::Validation(
                    "sessionId or userId is required".to_string(),
                ))
            }
        };

        let mut session = self
            .load_or_create(&key, &session_id)
            .await
            .map_err(store_failure)?;
        if !req.history.is_empty() {
            // The UI owns the displayed transcript; when it sends one, it
            // replaces whatever was persisted.
            session.chat_history = req.history.clone();
        }

        let messages = prompt::build_messages(
            self.protocol,
            &session.order,
            &session.chat_history,
            &req.message,
        );
        let raw = self.model.complete(&messages).await?;

        let (display, user_intent) = match self.protocol {
            Protocol::Directive => {
                let extraction = directive::extract(&raw);
                directive::apply(&mut session.order, &extraction.directives);
                (extraction.message.trim().to_string(), None)
            }
            Protocol::Structured => {
                let turn = structured::parse_model_turn(&raw).map_err(|err| {
                    warn!(%err, "model reply failed turn validation");
                    ApiError::MalformedUpstream
                })?;
                // Replace semantics: the model's cart and context win wholesale.
                session.order = turn.current_order;
                session.context = turn.context;
                (turn.response, Some(turn.user_intent))
            }
        };

        session.chat_history.push(ChatMessage {
            role: ChatRole::User,
            content: req.message.clone(),
        });
        session.chat_history.push(ChatMessage {
            role: ChatRole::Assistant,
            content: display.clone(),
        });

        self.persist(&key, &session).await.map_err(store_failure)?;

        Ok(ChatResponse {
            response: display,
            user_intent,
            current_order: session.order,
            context: session.context,
            session_id,
        })
    }

    /// Materializes a fresh empty session on a miss; absence is a valid state
    /// the caller never observes.
    async fn load_or_create(&self, key: &str, session_id: &str) -> Result<Session, String> {
        let now = Utc::now();
        let mut store = self.store.lock().await;
        match store.get_session(key, now)? {
            Some(session) => Ok(session),
            None => {
                let session = Session::empty(session_id);
                store.put_session(key, &session, now, self.session_ttl)?;
                Ok(session)
            }
        }
    }

    /// Full-snapshot write; every write resets the TTL window.
    async fn persist(&self, key: &str, session: &Session) -> Result<(), String> {
        let mut store = self.store.lock().await;
        store.put_session(key, session, Utc::now(), self.session_ttl)
    }
}

fn store_failure(err: String) -> ApiError {
    error!(%err, "session store failure");
    ApiError::Store
}

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

fn user_key(user_id: &str) -> String {
    format!("user:{user_id}")
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("cannot complete an empty order")]
    EmptyOrder,
    #[error("the assistant is unavailable right now, please try again shortly")]
    Upstream(StatusCode),
    #[error("the assistant returned a reply we could not process")]
    MalformedUpstream,
    #[error("session storage is unavailable")]
    Store,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::EmptyOrder => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(status) => *status,
            ApiError::MalformedUpstream | ApiError::Store => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::EmptyOrder => "empty_order",
            ApiError::Upstream(_) => "upstream_error",
            ApiError::MalformedUpstream => "malformed_upstream_response",
            ApiError::Store => "store_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.to_string(),
                details: None,
            },
        };
        (self.status(), Json(body)).into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn menu_catalog() -> Json<MenuResponse> {
    Json(MenuResponse {
        categories: menu::catalog().to_vec(),
    })
}

async fn session_start(
    State(state): State<AppState>,
) -> Result<Json<StartSessionResponse>, ApiError> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let session = Session::empty(&session_id);
    state
        .persist(&session_key(&session_id), &session)
        .await
        .map_err(store_failure)?;
    Ok(Json(StartSessionResponse {
        session_id,
        message: GREETING.to_string(),
        current_order: session.order,
    }))
}

/// Manual session reset: the next contact under this id starts from an
/// empty cart and history.
async fn reset_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let mut store = state.store.lock().await;
    store
        .delete_session(&session_key(&session_id))
        .map_err(store_failure)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetSessionQuery {
    #[serde(default)]
    user_id: Option<String>,
}

async fn get_session(
    State(state): State<AppState>,
    Query(query): Query<GetSessionQuery>,
) -> Result<Json<SessionView>, ApiError> {
    let user_id = match query.user_id.as_deref() {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => return Err(ApiError::Validation("userId is required".to_string())),
    };
    let session = state
        .load_or_create(&user_key(&user_id), &user_id)
        .await
        .map_err(store_failure)?;
    Ok(Json(SessionView {
        order: session.order,
        context: session.context,
    }))
}

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    state.process_chat(req).await.map(Json)
}

/// Direct cart mutation bypassing the model, for the UI's quantity controls.
async fn update_item(
    State(state): State<AppState>,
    Path((session_id, item_id)): Path<(String, String)>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Json<Order>, ApiError> {
    let item = menu::find_by_id(&item_id)
        .ok_or_else(|| ApiError::NotFound(format!("no menu item with id {item_id:?}")))?;

    let key = session_key(&session_id);
    let mut session = state
        .load_or_create(&key, &session_id)
        .await
        .map_err(store_failure)?;

    if req.quantity <= 0 {
        order::remove_item(&mut session.order, &item.id);
    } else if session
        .order
        .items
        .iter()
        .any(|line| line.item_id == item.id)
    {
        order::update_quantity(&mut session.order, &item.id, req.quantity);
    } else {
        order::add_item(&mut session.order, item, req.quantity);
    }

    state.persist(&key, &session).await.map_err(store_failure)?;
    Ok(Json(session.order))
}

async fn complete_order(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<CompleteOrderRequest>,
) -> Result<Json<CompleteOrderResponse>, ApiError> {
    let key = session_key(&session_id);
    let mut session = state
        .load_or_create(&key, &session_id)
        .await
        .map_err(store_failure)?;

    let order_id = format!("ord_{}", uuid::Uuid::new_v4().as_simple());
    let placed_at = Utc::now().to_rfc3339();
    let completed = order::finalize(&mut session.order, &order_id, &placed_at, req.customer_info)
        .map_err(|_| ApiError::EmptyOrder)?;

    {
        let mut store = state.store.lock().await;
        store.put_completed(&completed).map_err(store_failure)?;
    }
    // The session lives on with an empty draft cart.
    state.persist(&key, &session).await.map_err(store_failure)?;

    info!(order_id = %completed.id, total = completed.total_cost, "order completed");
    Ok(Json(CompleteOrderResponse {
        message: "Your order has been placed. Thank you!".to_string(),
        order: completed,
    }))
}

async fn completed_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<CompletedOrder>, ApiError> {
    let store = state.store.lock().await;
    match store.get_completed(&order_id).map_err(store_failure)? {
        Some(completed) => Ok(Json(completed)),
        None => Err(ApiError::NotFound(format!(
            "no completed order with id {order_id:?}"
        ))),
    }
}

#[derive(Debug, Clone)]
struct StoredSession {
    session: Session,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryStore {
    sessions: HashMap<String, StoredSession>,
    completed: HashMap<String, CompletedOrder>,
}

enum StoreBackend {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl StoreBackend {
    /// Expired entries count as absent; sqlite deletes them lazily on read.
    fn get_session(&mut self, key: &str, now: DateTime<Utc>) -> Result<Option<Session>, String> {
        match self {
            StoreBackend::Memory(store) => {
                if let Some(stored) = store.sessions.get(key) {
                    if stored.expires_at > now {
                        return Ok(Some(stored.session.clone()));
                    }
                    store.sessions.remove(key);
                }
                Ok(None)
            }
            StoreBackend::Sqlite(store) => store.get_session(key, now),
        }
    }

    fn put_session(
        &mut self,
        key: &str,
        session: &Session,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(), String> {
        let expires_at = now
            + chrono::Duration::from_std(ttl).map_err(|e| format!("ttl out of range: {e}"))?;
        match self {
            StoreBackend::Memory(store) => {
                store.sessions.insert(
                    key.to_string(),
                    StoredSession {
                        session: session.clone(),
                        expires_at,
                    },
                );
                Ok(())
            }
            StoreBackend::Sqlite(store) => store.put_session(key, session, expires_at),
        }
    }

    fn delete_session(&mut self, key: &str) -> Result<(), String> {
        match self {
            StoreBackend::Memory(store) => {
                store.sessions.remove(key);
                Ok(())
            }
            StoreBackend::Sqlite(store) => store.delete_session(key),
        }
    }

    fn put_completed(&mut self, completed: &CompletedOrder) -> Result<(), String> {
        match self {
            StoreBackend::Memory(store) => {
                store
                    .completed
                    .insert(completed.id.clone(), completed.clone());
                Ok(())
            }
            StoreBackend::Sqlite(store) => store.put_completed(completed),
        }
    }

    fn get_completed(&self, order_id: &str) -> Result<Option<CompletedOrder>, String> {
        match self {
            StoreBackend::Memory(store) => Ok(store.completed.get(order_id).cloned()),
            StoreBackend::Sqlite(store) => store.get_completed(order_id),
        }
    }
}

struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    fn new(path: &str) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| e.to_string())?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                session_key TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS completed_orders (
                order_id TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                placed_at TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| e.to_string())?;
        Ok(Self { conn })
    }

    fn get_session(&mut self, key: &str, now: DateTime<Utc>) -> Result<Option<Session>, String> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT body, expires_at FROM sessions WHERE session_key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| e.to_string())?;

        let Some((body, expires_at)) = row else {
            return Ok(None);
        };
        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .map_err(|e| format!("corrupt expires_at: {e}"))?
            .with_timezone(&Utc);
        if expires_at <= now {
            self.conn
                .execute("DELETE FROM sessions WHERE session_key = ?1", params![key])
                .map_err(|e| e.to_string())?;
            return Ok(None);
        }
        let session: Session = serde_json::from_str(&body).map_err(|e| e.to_string())?;
        Ok(Some(session))
    }

    fn put_session(
        &mut self,
        key: &str,
        session: &Session,
        expires_at: DateTime<Utc>,
    ) -> Result<(), String> {
        let body = serde_json::to_string(session).map_err(|e| e.to_string())?;
        self.conn
            .execute(
                "
                INSERT INTO sessions(session_key, body, expires_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(session_key) DO UPDATE SET
                    body=excluded.body,
                    expires_at=excluded.expires_at
                ",
                params![key, body, expires_at.to_rfc3339()],
            )
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn delete_session(&mut self, key: &str) -> Result<(), String> {
        self.conn
            .execute("DELETE FROM sessions WHERE session_key = ?1", params![key])
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn put_completed(&mut self, completed: &CompletedOrder) -> Result<(), String> {
        let body = serde_json::to_string(completed).map_err(|e| e.to_string())?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO completed_orders(order_id, body, placed_at) VALUES (?1, ?2, ?3)",
                params![completed.id, body, completed.placed_at],
            )
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn get_completed(&self, order_id: &str) -> Result<Option<CompletedOrder>, String> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM completed_orders WHERE order_id = ?1",
                params![order_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| e.to_string())?;
        match body {
            Some(body) => {
                let completed = serde_json::from_str(&body).map_err(|e| e.to_string())?;
                Ok(Some(completed))
            }
            None => Ok(None),
        }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: String,
}

/// Client for the external model API (OpenAI-style chat completions). The
/// model is untrusted input and an unreliable collaborator: failures map to
/// a generic user-safe error, the original cause is only logged, and nothing
/// is retried.
struct ModelClient {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl ModelClient {
    fn new(cfg: &Config) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.model.timeout_ms))
            .build()
            .map_err(|e| e.to_string())?;
        let api_key = match cfg.model.api_key_env.as_deref() {
            Some(var) => match std::env::var(var) {
                Ok(key) => Some(key),
                Err(_) => {
                    warn!(var, "model.api_key_env is set but the variable is unset");
                    None
                }
            },
            None => None,
        };
        Ok(Self {
            endpoint: cfg.model.endpoint.clone(),
            model: cfg.model.model.clone(),
            api_key,
            client,
        })
    }

    async fn complete(&self, messages: &[ModelMessage]) -> Result<String, ApiError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role,
                    content: &m.content,
                })
                .collect(),
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|err| {
            error!(%err, "model request failed");
            ApiError::Upstream(StatusCode::INTERNAL_SERVER_ERROR)
        })?;

        let status = response.status();
        if !status.is_success() {
            error!(%status, "model API returned an error status");
            let mapped = match status.as_u16() {
                429 => StatusCode::TOO_MANY_REQUESTS,
                401 | 403 => StatusCode::UNAUTHORIZED,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            return Err(ApiError::Upstream(mapped));
        }

        let completion: CompletionResponse = response.json().await.map_err(|err| {
            warn!(%err, "model response did not match the completion shape");
            ApiError::MalformedUpstream
        })?;
        match completion.choices.into_iter().next() {
            Some(choice) => Ok(choice.message.content),
            None => {
                warn!("model response carried no choices");
                Err(ApiError::MalformedUpstream)
            }
        }
    }
}
