use std::convert::Infallible;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use brook_common::MessageRole;
use brook_core::{ClientRelay, GenerationRequest, run_generation};

use crate::state::RelayState;

pub fn relay_router(state: RelayState) -> Router {
    Router::new()
        .route("/v1/generate", post(generate))
        .route("/v1/cancel", post(cancel))
        .route("/v1/conversations", post(create_conversation))
        .route("/v1/messages", post(create_message))
        .route("/v1/messages/{id}", get(get_message))
        .route("/healthz", get(healthz))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct GenerateBody {
    conversation_id: Uuid,
    message_id: Uuid,
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    attachments: Vec<String>,
    #[serde(default)]
    tools: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: &'static str,
}

fn api_error(status: StatusCode, error: &'static str) -> Response {
    (status, Json(ApiError { error })).into_response()
}

/// Starts a generation against a pre-created assistant placeholder and
/// streams frames back over SSE. The generation task is spawned detached:
/// dropping the response stream does not stop it.
async fn generate(State(state): State<RelayState>, Json(body): Json<GenerateBody>) -> Response {
    let mut request = GenerationRequest::new(body.conversation_id, body.message_id, body.prompt);
    request.attachments = body.attachments;
    request.tools = body.tools;
    if !request.validate() {
        return api_error(StatusCode::BAD_REQUEST, "empty_prompt");
    }

    let record = match state.store.message(body.message_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "unknown_message"),
        Err(err) => {
            tracing::error!(message_id = %body.message_id, error = %err, "placeholder lookup failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "store_unavailable");
        }
    };
    if record.conversation_id != body.conversation_id {
        return api_error(StatusCode::BAD_REQUEST, "conversation_mismatch");
    }
    if record.status.is_terminal() {
        return api_error(StatusCode::CONFLICT, "message_already_final");
    }

    // One live generation per conversation.
    let Ok((token, guard)) = state.registry.register(body.conversation_id) else {
        return api_error(StatusCode::CONFLICT, "generation_in_progress");
    };

    let (relay, rx) = ClientRelay::channel(&state.settings.relay);
    tokio::spawn(run_generation(
        state.store.clone(),
        state.source.clone(),
        state.settings.clone(),
        request,
        relay,
        token,
        guard,
    ));

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    // Hint common reverse proxies to avoid buffering SSE responses.
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

#[derive(Debug, Deserialize)]
struct CancelBody {
    conversation_id: Uuid,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    success: bool,
}

/// Requests cancellation of the live generation for a conversation.
/// `success: false` means there was nothing left to cancel; repeat calls
/// and unknown conversations are not errors.
async fn cancel(State(state): State<RelayState>, Json(body): Json<CancelBody>) -> Response {
    let success = state.registry.cancel(body.conversation_id);
    Json(CancelResponse { success }).into_response()
}

#[derive(Debug, Deserialize)]
struct CreateConversationBody {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConversationCreated {
    id: Uuid,
}

/// Conversations must exist before messages reference them; the message
/// table carries a foreign key to this row.
async fn create_conversation(
    State(state): State<RelayState>,
    Json(body): Json<CreateConversationBody>,
) -> Response {
    match state.store.insert_conversation(body.title.as_deref()).await {
        Ok(id) => (StatusCode::CREATED, Json(ConversationCreated { id })).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "conversation insert failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "store_unavailable")
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateMessageBody {
    conversation_id: Uuid,
    role: MessageRole,
}

async fn create_message(
    State(state): State<RelayState>,
    Json(body): Json<CreateMessageBody>,
) -> Response {
    match state
        .store
        .insert_message(body.conversation_id, body.role)
        .await
    {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(err) => {
            tracing::error!(conversation_id = %body.conversation_id, error = %err, "message insert failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "store_unavailable")
        }
    }
}

/// Resync read: after a disconnect the client reconciles from the durable
/// record instead of replaying the stream.
async fn get_message(State(state): State<RelayState>, Path(id): Path<Uuid>) -> Response {
    match state.store.message(id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "unknown_message"),
        Err(err) => {
            tracing::error!(message_id = %id, error = %err, "message lookup failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "store_unavailable")
        }
    }
}

async fn healthz() -> Response {
    (StatusCode::OK, "ok").into_response()
}
