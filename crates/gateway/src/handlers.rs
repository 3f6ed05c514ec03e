//! Axum handlers for the two client dialects.
//!
//! Both endpoints support streaming and non-streaming responses. With
//! `stream: true` the response is Server-Sent Events, each event a
//! `data: <json>` line flushed immediately; otherwise a single JSON body.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Json,
    extract::State,
    http::{HeaderValue, header},
    response::{IntoResponse, Response, Sse, sse::Event},
};
use futures::StreamExt;

use crate::{
    convert,
    error::{AnthropicErrorResponse, AnthropicResult},
    model,
    orchestrate::Orchestrator,
    protocol::{anthropic::MessagesRequest, openai::ChatCompletionRequest},
};

/// `POST /v1/messages`, the Anthropic dialect.
pub(crate) async fn anthropic_messages(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<MessagesRequest>,
) -> AnthropicResult<Response> {
    log::debug!(
        "messages request for {} ({} turns, stream={})",
        request.model,
        request.messages.len(),
        request.wants_stream()
    );

    if request.wants_stream() && !orchestrator.settings().disable_stream {
        let stream = orchestrator.stream(request).await.map_err(AnthropicErrorResponse::from)?;

        let events = stream.map(|event| {
            let json = sonic_rs::to_string(&event).unwrap_or_else(|err| {
                log::error!("failed to serialize stream event: {err}");
                r#"{"type":"error","error":{"type":"internal_error","message":"serialization failed"}}"#.to_owned()
            });

            Ok::<_, Infallible>(Event::default().data(json))
        });

        // No [DONE] marker in the Anthropic dialect; the stream just ends.
        Ok(sse_response(Sse::new(events).into_response()))
    } else {
        let response = orchestrator.collect(&request).await.map_err(AnthropicErrorResponse::from)?;
        Ok(Json(response).into_response())
    }
}

/// `POST /v1/chat/completions`, the OpenAI dialect.
pub(crate) async fn chat_completions(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<ChatCompletionRequest>,
) -> crate::Result<Response> {
    log::debug!(
        "chat completions request for {} ({} messages, stream={})",
        request.model,
        request.messages.len(),
        request.stream.unwrap_or(false)
    );

    let model = request.model.clone();
    let converted = convert::to_messages_request(request)?;

    if converted.wants_stream() && !orchestrator.settings().disable_stream {
        let stream = orchestrator.stream(converted).await?;

        let mut adapter = convert::ChunkAdapter::new(&model);
        let chunks = stream.filter_map(move |event| {
            let chunk = adapter.adapt(&event).map(|chunk| {
                let json = sonic_rs::to_string(&chunk).unwrap_or_else(|err| {
                    log::error!("failed to serialize chunk: {err}");
                    r#"{"error":"serialization failed"}"#.to_owned()
                });

                Ok::<_, Infallible>(Event::default().data(json))
            });

            futures::future::ready(chunk)
        });

        let with_done = chunks.chain(futures::stream::once(async {
            Ok::<_, Infallible>(Event::default().data("[DONE]"))
        }));

        Ok(sse_response(Sse::new(with_done).into_response()))
    } else {
        let response = orchestrator.collect(&converted).await?;
        Ok(Json(convert::to_chat_response(&response, &model)).into_response())
    }
}

/// `GET /v1/models`: the static list derived from the model map.
pub(crate) async fn list_models() -> Response {
    Json(model::listing()).into_response()
}

/// Streaming headers: proxies must not buffer, clients must not cache.
fn sse_response(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}
