use crate::canonical::{Request, Usage};
use crate::dispatch::{Generation, SseStream};
use crate::error::BridgeError;
use crate::host::{HostError, HostErrorKind, HostModel};
use crate::journal::{PendingRecord, RequestRecord, SharedJournal};
use crate::models::{self, ModelSelector};
use crate::taxonomy::map_error;
use crate::tokens::TokenAccountant;
use crate::translate::anthropic::types::{CountTokensResponse, MessagesRequest};
use crate::translate::anthropic::{self, AnthropicStreamSynthesizer};
use crate::translate::chat::types::ChatCompletionRequest;
use crate::translate::chat::{self, ChatStreamSynthesizer};
use crate::translate::responses::types::ResponsesRequest;
use crate::translate::responses::{self, ResponsesStreamSynthesizer};
use crate::translate::{Completion, Dialect, SseEvent, StreamSynthesizer};

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const DEFAULT_JOURNAL_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub host: Arc<dyn HostModel>,
    pub accountant: TokenAccountant,
    pub selector: ModelSelector,
    pub journal: SharedJournal,
    /// Cancelled on shutdown; every generation runs under a child of this token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(host: Arc<dyn HostModel>, selector: ModelSelector, journal: SharedJournal) -> Self {
        Self {
            accountant: TokenAccountant::new(host.clone()),
            host,
            selector,
            journal,
            shutdown: CancellationToken::new(),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/responses", post(handle_responses))
        .route("/v1/messages", post(handle_messages))
        .route("/v1/messages/count_tokens", post(handle_count_tokens))
        .route("/claude-code/v1/messages", post(handle_claude_code_messages))
        .route("/claude-code/v1/messages/count_tokens", post(handle_count_tokens))
        .route("/v1/models", get(handle_models))
        .route("/v1/models/*id", get(handle_model))
        .route("/health", get(handle_health))
        .route("/journal", get(handle_journal))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A normalized request with its backend model resolved.
struct Prepared {
    dialect: Dialect,
    requested_model: String,
    request: Request,
    input_tokens: u64,
    stream: bool,
}

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let dialect = Dialect::OpenAiChat;
    let req: ChatCompletionRequest = match parse_body(&body) {
        Ok(r) => r,
        Err(e) => return reject(&state, dialect, "", &e),
    };
    let requested = req.model.clone().unwrap_or_default();
    let (mut request, input_tokens) = match chat::normalize(&req, &state.accountant).await {
        Ok(v) => v,
        Err(e) => return reject(&state, dialect, &requested, &e),
    };
    request.model = state.selector.resolve(&requested);

    let include_usage = req
        .stream_options
        .as_ref()
        .is_some_and(|o| o.include_usage);
    let prepared = Prepared {
        dialect,
        requested_model: requested,
        request,
        input_tokens,
        stream: req.stream.unwrap_or(false),
    };
    generate(
        &state,
        prepared,
        |model, input| ChatStreamSynthesizer::new(model, input, include_usage),
        chat::to_chat_response,
    )
    .await
}

async fn handle_responses(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let dialect = Dialect::OpenAiResponses;
    let req: ResponsesRequest = match parse_body(&body) {
        Ok(r) => r,
        Err(e) => return reject(&state, dialect, "", &e),
    };
    let requested = req.model.clone().unwrap_or_default();
    let (mut request, input_tokens) = match responses::normalize(&req, &state.accountant).await {
        Ok(v) => v,
        Err(e) => return reject(&state, dialect, &requested, &e),
    };
    request.model = state.selector.resolve(&requested);

    let prepared = Prepared {
        dialect,
        requested_model: requested,
        request,
        input_tokens,
        stream: req.stream.unwrap_or(false),
    };
    generate(
        &state,
        prepared,
        ResponsesStreamSynthesizer::new,
        responses::to_response_object,
    )
    .await
}

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    anthropic_messages(&state, &body, false).await
}

async fn handle_claude_code_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    anthropic_messages(&state, &body, true).await
}

/// Anthropic Messages, with Claude Code family mapping when `claude_code` is set.
async fn anthropic_messages(state: &AppState, body: &Bytes, claude_code: bool) -> Response {
    let dialect = Dialect::Anthropic;
    let req: MessagesRequest = match parse_body(body) {
        Ok(r) => r,
        Err(e) => return reject(state, dialect, "", &e),
    };
    let requested = req.model.clone().unwrap_or_default();
    let (mut request, input_tokens) = match anthropic::normalize(&req, &state.accountant).await {
        Ok(v) => v,
        Err(e) => return reject(state, dialect, &requested, &e),
    };
    request.model = if claude_code {
        state.selector.resolve_claude_code(&requested)
    } else {
        state.selector.resolve(&requested)
    };

    let prepared = Prepared {
        dialect,
        requested_model: requested,
        request,
        input_tokens,
        stream: req.stream.unwrap_or(false),
    };
    generate(
        state,
        prepared,
        AnthropicStreamSynthesizer::new,
        anthropic::to_messages_response,
    )
    .await
}

async fn handle_count_tokens(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let dialect = Dialect::Anthropic;
    let req: MessagesRequest = match parse_body(&body) {
        Ok(r) => r,
        Err(e) => return error_response(&e, dialect),
    };
    match anthropic::normalize(&req, &state.accountant).await {
        Ok((_, input_tokens)) => Json(CountTokensResponse { input_tokens }).into_response(),
        Err(e) => error_response(&e, dialect),
    }
}

/// Open the host generation, then answer as an SSE stream or one aggregate object.
async fn generate<S, A, R>(
    state: &AppState,
    prepared: Prepared,
    synthesizer: impl FnOnce(&str, u64) -> S,
    aggregate: A,
) -> Response
where
    S: StreamSynthesizer,
    A: FnOnce(&Completion, &str) -> R,
    R: Serialize,
{
    let Prepared {
        dialect,
        requested_model,
        request,
        input_tokens,
        stream,
    } = prepared;

    tracing::info!(
        %dialect,
        requested = %requested_model,
        resolved = %request.model,
        stream,
        messages = request.messages.len(),
        tools = request.tools.len(),
        "Request"
    );

    let mut pending = state.journal.begin(RequestRecord::new(
        dialect,
        &requested_model,
        &request.model,
        stream,
    ));
    let usage = Usage {
        input_tokens,
        output_tokens: 0,
    };
    pending.observe(usage);

    let generation = match Generation::open(
        state.host.as_ref(),
        &state.accountant,
        &request,
        input_tokens,
        &state.shutdown,
    )
    .await
    {
        Ok(g) => g,
        Err(e) => return fail(pending, usage, &e, dialect),
    };

    if stream {
        let synth = synthesizer(&requested_model, input_tokens);
        return sse_response(generation.drive(synth, pending));
    }

    match generation.collect().await {
        Ok(completion) => {
            pending.completed(completion.usage);
            Json(aggregate(&completion, &requested_model)).into_response()
        }
        Err(e) => fail(pending, usage, &e, dialect),
    }
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, BridgeError> {
    serde_json::from_slice(body)
        .map_err(|e| BridgeError::validation(format!("Invalid request body: {e}")))
}

fn error_response(err: &BridgeError, dialect: Dialect) -> Response {
    let mapped = map_error(err, dialect);
    (mapped.status, Json(mapped.body())).into_response()
}

/// A request refused before any host call.
fn reject(state: &AppState, dialect: Dialect, requested_model: &str, err: &BridgeError) -> Response {
    tracing::warn!(%dialect, "Rejected request: {}", err);
    let mapped = map_error(err, dialect);
    state.journal.record(
        RequestRecord::new(dialect, requested_model, "", false)
            .failed(mapped.status.as_u16(), mapped.error_type.clone()),
    );
    (mapped.status, Json(mapped.body())).into_response()
}

fn fail(pending: PendingRecord, usage: Usage, err: &BridgeError, dialect: Dialect) -> Response {
    tracing::error!(%dialect, "Generation failed: {}", err);
    let mapped = map_error(err, dialect);
    pending.failed(usage, mapped.status.as_u16(), &mapped.error_type);
    (mapped.status, Json(mapped.body())).into_response()
}

fn sse_response(events: SseStream) -> Response {
    let stream = events.map(|e| -> Result<Event, Infallible> { Ok(to_event(e)) });
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn to_event(sse: SseEvent) -> Event {
    let event = Event::default().data(sse.data);
    match sse.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// Anthropic clients always send `anthropic-version`; everyone else gets OpenAI shapes.
fn model_dialect(headers: &HeaderMap) -> Dialect {
    if headers.contains_key("anthropic-version") {
        Dialect::Anthropic
    } else {
        Dialect::OpenAiChat
    }
}

async fn handle_models(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let dialect = model_dialect(&headers);
    let catalog = match state.host.list_models().await {
        Ok(host_models) => state.selector.catalog(host_models),
        Err(e) => return error_response(&BridgeError::from(e), dialect),
    };
    match dialect {
        Dialect::Anthropic => Json(models::anthropic_model_list(&catalog)).into_response(),
        _ => Json(models::openai_model_list(&catalog)).into_response(),
    }
}

async fn handle_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let dialect = model_dialect(&headers);
    let catalog = match state.host.list_models().await {
        Ok(host_models) => state.selector.catalog(host_models),
        Err(e) => return error_response(&BridgeError::from(e), dialect),
    };
    let id = id.trim_start_matches('/');
    let Some(info) = catalog.iter().find(|m| m.id == id) else {
        let err = HostError::new(
            HostErrorKind::NotFound,
            format!("The model '{id}' does not exist"),
        );
        return error_response(&BridgeError::from(err), dialect);
    };
    match dialect {
        Dialect::Anthropic => Json(models::anthropic_model(info)).into_response(),
        _ => Json(models::openai_model(info)).into_response(),
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "default_model": state.selector.default_model(),
    }))
}

#[derive(Debug, Deserialize)]
struct JournalQuery {
    limit: Option<usize>,
}

async fn handle_journal(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JournalQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_JOURNAL_LIMIT);
    Json(state.journal.recent(limit)).into_response()
}
