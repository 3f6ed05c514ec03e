//! Protocol translation core: Anthropic and OpenAI dialects in front, the
//! CodeWhisperer binary event stream behind.
//!
//! Data flows one way per request: handler → request builder → credential
//! pool → upstream HTTP → frame decoder → message router → SSE state machine
//! → client. Each layer depends only on the layer below plus the shared
//! [`context::ResponseContext`]; there are no back-pointers.

pub mod protocol;

mod aggregate;
mod builder;
mod context;
mod convert;
mod error;
mod estimate;
mod handlers;
mod http_client;
mod model;
mod orchestrate;
mod route;
mod semantic;
mod sse;
mod tool;

pub use error::{AnthropicResult, GatewayError, Result};
pub use http_client::http_client;
pub use orchestrate::{CODEWHISPERER_URL, Orchestrator, Settings};

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

/// Build the dialect routes backed by one orchestrator.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = orchestrator;

    Router::new()
        .route("/v1/messages", post(handlers::anthropic_messages))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/models", get(handlers::list_models))
        .with_state(state)
}
