//! HTTP transport for the message workflow.
//!
//! All payloads are JSON. `is_palindrome` is `null` while the answer is
//! pending, when the text is empty, or when the computation failed.

use std::future::Future;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::Error;
use crate::model::MessageId;
use crate::service::{MessageView, Messages};

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Body of `POST /messages` and `PUT /messages/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessageResponse {
    pub id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetMessageResponse {
    pub text: String,
    pub is_palindrome: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageItem {
    pub id: MessageId,
    pub text: String,
    pub is_palindrome: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMessagesResponse {
    pub messages: Vec<MessageItem>,
}

impl From<MessageView> for MessageItem {
    fn from(view: MessageView) -> Self {
        Self {
            id: view.id,
            is_palindrome: view.outcome.as_option(),
            text: view.text,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(msg) => Self::not_found(msg),
            other => Self::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// Build the application router.
pub fn router(messages: Messages) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/messages",
            get(list_messages)
                .post(create_message)
                .delete(delete_all_messages),
        )
        .route(
            "/messages/{id}",
            get(get_message).put(update_message).delete(delete_message),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(messages)
}

/// Serve `messages` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    messages: Messages,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> crate::error::Result<()> {
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(messages))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn create_message(
    State(messages): State<Messages>,
    Json(payload): Json<MessageRequest>,
) -> (StatusCode, Json<CreateMessageResponse>) {
    let message = messages.create(payload.text);
    (
        StatusCode::CREATED,
        Json(CreateMessageResponse { id: message.id }),
    )
}

async fn list_messages(State(messages): State<Messages>) -> Json<ListMessagesResponse> {
    Json(ListMessagesResponse {
        messages: messages.list().into_iter().map(MessageItem::from).collect(),
    })
}

async fn delete_all_messages(State(messages): State<Messages>) -> ApiResult<StatusCode> {
    messages.delete_all()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_message(
    State(messages): State<Messages>,
    Path(id): Path<u64>,
) -> ApiResult<Json<GetMessageResponse>> {
    let view = messages
        .get(MessageId(id))
        .ok_or_else(|| ApiError::not_found(format!("message {id} not found")))?;
    Ok(Json(GetMessageResponse {
        is_palindrome: view.outcome.as_option(),
        text: view.text,
    }))
}

async fn update_message(
    State(messages): State<Messages>,
    Path(id): Path<u64>,
    Json(payload): Json<MessageRequest>,
) -> ApiResult<StatusCode> {
    messages.update(MessageId(id), payload.text)?;
    Ok(StatusCode::OK)
}

async fn delete_message(
    State(messages): State<Messages>,
    Path(id): Path<u64>,
) -> ApiResult<StatusCode> {
    messages.delete(MessageId(id))?;
    Ok(StatusCode::NO_CONTENT)
}
