//! Drives one client request end to end: acquire a credential, POST the
//! CodeWhisperer body, decode the binary response, and feed the SSE state
//! machine (streaming) or aggregate a single JSON body (non-streaming).

use std::{sync::Arc, time::Duration};

use credentials::{CredentialPool, FailureKind, Lease};
use eventstream::{BufferPool, DecodeMode, FrameDecoder};
use futures::StreamExt;
use secrecy::ExposeSecret;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    aggregate::TextAggregator,
    builder,
    context::ResponseContext,
    error::GatewayError,
    estimate,
    protocol::anthropic::{ErrorDetails, MessagesRequest, MessagesResponse, ResponseBlock, Role, StopReason, StreamEvent, Usage},
    route::route,
    semantic::SemanticEvent,
    sse::SseStateMachine,
};

/// The upstream `generateAssistantResponse` endpoint.
pub const CODEWHISPERER_URL: &str = "https://codewhisperer.us-east-1.amazonaws.com/generateAssistantResponse";

/// Client-facing event stream for one request.
pub type EventStream = std::pin::Pin<Box<dyn futures::Stream<Item = StreamEvent> + Send>>;

/// Runtime knobs for request processing.
#[derive(Debug, Clone)]
pub struct Settings {
    pub upstream_url: String,
    pub disable_stream: bool,
    /// Fail loudly on decoder and ordering violations instead of correcting.
    pub strict: bool,
    pub request_timeout: Duration,
    pub simple_request_timeout: Duration,
    pub stream_idle_timeout: Duration,
    /// Coalesce text deltas before emission; `false` is the passthrough path.
    pub aggregate_text: bool,
}

impl Settings {
    pub fn from_config(config: &config::GatewayConfig) -> Self {
        Self {
            upstream_url: CODEWHISPERER_URL.to_owned(),
            disable_stream: config.disable_stream,
            strict: config.strict,
            request_timeout: config.request_timeout,
            simple_request_timeout: config.simple_request_timeout,
            stream_idle_timeout: config.stream_idle_timeout,
            aggregate_text: true,
        }
    }
}

/// Why the pump stopped before a normal finalization.
enum PumpEnd {
    /// The client hung up; no further events may be emitted.
    ClientGone,
    /// Strict-mode ordering violation.
    Violation(String),
}

/// What the read loop observed, for stop-reason arithmetic.
#[derive(Default)]
struct ReadOutcome {
    length_exceeded: bool,
    transport_failed: bool,
}

pub struct Orchestrator {
    pool: Arc<CredentialPool>,
    client: reqwest::Client,
    settings: Settings,
    buffers: BufferPool,
}

impl Orchestrator {
    pub fn new(pool: Arc<CredentialPool>, client: reqwest::Client, settings: Settings) -> Self {
        Self {
            pool,
            client,
            settings,
            buffers: BufferPool::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn decode_mode(&self) -> DecodeMode {
        if self.settings.strict {
            DecodeMode::Strict
        } else {
            DecodeMode::Lenient
        }
    }

    fn deadline(&self, request: &MessagesRequest) -> Duration {
        if estimate::is_complex(request) {
            self.settings.request_timeout
        } else {
            self.settings.simple_request_timeout
        }
    }

    /// POST upstream with a pooled credential. A 401/403 invalidates the
    /// cached access token and retries exactly once with a fresh acquire.
    async fn dial(&self, request: &MessagesRequest) -> Result<(reqwest::Response, Lease), GatewayError> {
        for attempt in 0..2 {
            let lease = self.pool.acquire().await?;
            let body = builder::build(request, lease.profile_arn())?;

            let sent = self
                .client
                .post(&self.settings.upstream_url)
                .bearer_auth(lease.access_token().expose_secret())
                .header(http::header::ACCEPT, "application/vnd.amazon.eventstream")
                .json(&body)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(err) => {
                    self.pool.report_failure(&lease, FailureKind::Transport);
                    return Err(GatewayError::ConnectionError(err.to_string()));
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok((response, lease));
            }

            let message = response.text().await.unwrap_or_default();

            match status.as_u16() {
                401 | 403 => {
                    log::warn!("upstream rejected credential {} ({status}), rotating", lease.entry_id());
                    self.pool.invalidate_access_token(&lease);
                    self.pool.report_failure(&lease, FailureKind::Unauthorized);

                    if attempt == 0 {
                        continue;
                    }
                    return Err(GatewayError::UpstreamAuth(message));
                }
                500..=599 => {
                    self.pool.report_failure(&lease, FailureKind::Server);
                    return Err(GatewayError::UpstreamStatus {
                        status: status.as_u16(),
                        message,
                    });
                }
                _ => {
                    return Err(GatewayError::UpstreamStatus {
                        status: status.as_u16(),
                        message,
                    });
                }
            }
        }

        Err(GatewayError::UpstreamAuth("credential rotation exhausted".to_owned()))
    }

    /// Streaming path: dial upstream, then pump decoded events into a
    /// channel the SSE handler drains. Errors before the first byte surface
    /// as plain HTTP errors; later failures finalize the stream gracefully.
    pub async fn stream(self: &Arc<Self>, request: MessagesRequest) -> Result<EventStream, GatewayError> {
        let (response, lease) = self.dial(&request).await?;

        let (tx, rx) = mpsc::channel::<StreamEvent>(64);
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.pump(request, response, lease, tx).await;
        });

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })))
    }

    async fn pump(&self, request: MessagesRequest, response: reqwest::Response, lease: Lease, tx: mpsc::Sender<StreamEvent>) {
        let mut ctx = ResponseContext::new(&request.model, estimate::input_tokens(&request), request.max_tokens);
        let mut machine = SseStateMachine::new(self.settings.strict);
        let mut aggregator = self.settings.aggregate_text.then(TextAggregator::new);

        for event in machine.open(&ctx) {
            if tx.send(event).await.is_err() {
                self.pool.report_success(&lease);
                return;
            }
        }

        let outcome = self
            .read_loop(&request, response, &mut ctx, &mut machine, &mut aggregator, &tx)
            .await;

        match outcome {
            Err(PumpEnd::ClientGone) => {
                // Client cancellation is not an upstream fault: the body and
                // pooled buffers are released on drop, the credential stays
                // healthy, and nothing further is emitted.
                log::debug!("client disconnected mid-stream");
                self.pool.report_success(&lease);
            }
            Err(PumpEnd::Violation(message)) => {
                log::error!("stream ordering violation: {message}");
                let _ = tx
                    .send(StreamEvent::Error {
                        error: ErrorDetails {
                            error_type: "internal_error".to_owned(),
                            message,
                        },
                    })
                    .await;
                self.pool.report_success(&lease);
            }
            Ok(read) => {
                // Flush any text still sitting in the aggregator before the
                // terminal events.
                if let Some(aggregator) = aggregator.as_mut()
                    && let Some((index, text)) = aggregator.flush()
                    && let Ok(events) = machine.emit(&mut ctx, SemanticEvent::TextDelta { index, text })
                {
                    for event in events {
                        if tx.send(event).await.is_err() {
                            self.pool.report_success(&lease);
                            return;
                        }
                    }
                }

                ctx.tools.stop_all();

                let stop_reason = if read.transport_failed {
                    StopReason::EndTurn
                } else {
                    final_stop_reason(&ctx, read.length_exceeded)
                };

                let usage = Usage {
                    input_tokens: ctx.input_tokens,
                    output_tokens: estimate::output_tokens(ctx.output_chars(), ctx.tools.any_started()),
                };

                for event in machine.finalize(&mut ctx, stop_reason, usage) {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }

                if read.transport_failed {
                    self.pool.report_failure(&lease, FailureKind::Transport);
                } else {
                    self.pool.report_success(&lease);
                }
            }
        }
    }

    async fn read_loop(
        &self,
        request: &MessagesRequest,
        response: reqwest::Response,
        ctx: &mut ResponseContext,
        machine: &mut SseStateMachine,
        aggregator: &mut Option<TextAggregator>,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<ReadOutcome, PumpEnd> {
        let mut decoder = FrameDecoder::with_pool(self.decode_mode(), self.buffers.clone());
        let mut outcome = ReadOutcome::default();

        let deadline = tokio::time::Instant::now() + self.deadline(request);
        let mut body = response.bytes_stream();

        loop {
            let next = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    log::warn!("request deadline elapsed mid-stream, finalizing");
                    break;
                }
                read = tokio::time::timeout(self.settings.stream_idle_timeout, body.next()) => read,
            };

            let Ok(next) = next else {
                log::warn!("upstream went idle, finalizing");
                break;
            };

            let Some(chunk) = next else {
                break;
            };

            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    log::warn!("upstream body error mid-stream: {err}");
                    outcome.transport_failed = true;
                    break;
                }
            };

            let messages = match decoder.feed(&chunk) {
                Ok(messages) => messages,
                Err(err) => {
                    log::error!("event stream corrupt: {err}");
                    if self.settings.strict {
                        tx.send(StreamEvent::Error {
                            error: ErrorDetails {
                                error_type: "api_error".to_owned(),
                                message: err.to_string(),
                            },
                        })
                        .await
                        .map_err(|_| PumpEnd::ClientGone)?;
                    }
                    break;
                }
            };

            for message in messages {
                for event in route(&message, ctx) {
                    self.handle_event(event, ctx, machine, aggregator, tx, &mut outcome).await?;
                }
            }
        }

        Ok(outcome)
    }

    async fn handle_event(
        &self,
        event: SemanticEvent,
        ctx: &mut ResponseContext,
        machine: &mut SseStateMachine,
        aggregator: &mut Option<TextAggregator>,
        tx: &mpsc::Sender<StreamEvent>,
        outcome: &mut ReadOutcome,
    ) -> Result<(), PumpEnd> {
        match event {
            SemanticEvent::TextDelta { index, text } => {
                ctx.add_output_chars(text.chars().count());

                let Some(agg) = aggregator.as_mut() else {
                    return self.deliver(machine, ctx, SemanticEvent::TextDelta { index, text }, tx).await;
                };

                if let Some((flushed_index, flushed)) = agg.add(index, &text) {
                    self.deliver(
                        machine,
                        ctx,
                        SemanticEvent::TextDelta {
                            index: flushed_index,
                            text: flushed,
                        },
                        tx,
                    )
                    .await?;
                }

                if agg.should_flush()
                    && let Some((flushed_index, flushed)) = agg.flush()
                {
                    self.deliver(
                        machine,
                        ctx,
                        SemanticEvent::TextDelta {
                            index: flushed_index,
                            text: flushed,
                        },
                        tx,
                    )
                    .await?;
                }

                Ok(())
            }

            SemanticEvent::ToolUseStart { .. } | SemanticEvent::ToolInputDelta { .. } | SemanticEvent::ContentBlockStop { .. } => {
                if let SemanticEvent::ToolInputDelta { partial_json, .. } = &event {
                    ctx.add_output_chars(partial_json.chars().count());
                }

                // Tool activity is a text boundary.
                if let Some(agg) = aggregator.as_mut()
                    && let Some((index, text)) = agg.flush()
                {
                    self.deliver(machine, ctx, SemanticEvent::TextDelta { index, text }, tx).await?;
                }

                self.deliver(machine, ctx, event, tx).await
            }

            SemanticEvent::UpstreamException { kind, detail } => {
                log::warn!("upstream exception {kind}: {detail}");

                if is_length_exception(&kind, &detail) {
                    outcome.length_exceeded = true;
                    return Ok(());
                }

                tx.send(StreamEvent::Error {
                    error: ErrorDetails {
                        error_type: "api_error".to_owned(),
                        message: if detail.is_empty() { kind } else { detail },
                    },
                })
                .await
                .map_err(|_| PumpEnd::ClientGone)
            }

            SemanticEvent::MessageDelta { .. } | SemanticEvent::MessageStop => Ok(()),
        }
    }

    async fn deliver(
        &self,
        machine: &mut SseStateMachine,
        ctx: &mut ResponseContext,
        event: SemanticEvent,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<(), PumpEnd> {
        let events = machine
            .emit(ctx, event)
            .map_err(|err| PumpEnd::Violation(err.to_string()))?;

        for event in events {
            tx.send(event).await.map_err(|_| PumpEnd::ClientGone)?;
        }

        Ok(())
    }

    /// Non-streaming path: decode the whole body and aggregate one response.
    pub async fn collect(&self, request: &MessagesRequest) -> Result<MessagesResponse, GatewayError> {
        match tokio::time::timeout(self.deadline(request), self.collect_inner(request)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout),
        }
    }

    async fn collect_inner(&self, request: &MessagesRequest) -> Result<MessagesResponse, GatewayError> {
        let (response, lease) = self.dial(request).await?;

        let mut decoder = FrameDecoder::with_pool(self.decode_mode(), self.buffers.clone());
        let mut ctx = ResponseContext::new(&request.model, estimate::input_tokens(request), request.max_tokens);
        let mut text = String::new();
        let mut length_exceeded = false;

        let mut body = response.bytes_stream();

        loop {
            let next = match tokio::time::timeout(self.settings.stream_idle_timeout, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    self.pool.report_failure(&lease, FailureKind::Transport);
                    return Err(GatewayError::ConnectionError("upstream went idle".to_owned()));
                }
            };

            let Some(chunk) = next else {
                break;
            };

            let chunk = chunk.map_err(|err| {
                self.pool.report_failure(&lease, FailureKind::Transport);
                GatewayError::ConnectionError(err.to_string())
            })?;

            let messages = decoder.feed(&chunk).map_err(|err| {
                log::error!("event stream corrupt: {err}");
                GatewayError::Decode(err.to_string())
            })?;

            for message in messages {
                for event in route(&message, &mut ctx) {
                    match event {
                        SemanticEvent::TextDelta { text: delta, .. } => {
                            ctx.add_output_chars(delta.chars().count());
                            text.push_str(&delta);
                        }
                        SemanticEvent::ToolInputDelta { partial_json, .. } => {
                            ctx.add_output_chars(partial_json.chars().count());
                        }
                        SemanticEvent::UpstreamException { kind, detail } => {
                            log::warn!("upstream exception {kind}: {detail}");
                            if is_length_exception(&kind, &detail) {
                                length_exceeded = true;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        ctx.tools.stop_all();

        let stop_reason = final_stop_reason(&ctx, length_exceeded);
        let usage = Usage {
            input_tokens: ctx.input_tokens,
            output_tokens: estimate::output_tokens(ctx.output_chars(), ctx.tools.any_started()),
        };

        let mut content = Vec::new();
        if !text.is_empty() {
            content.push(ResponseBlock::Text { text });
        }

        for call in ctx.tools.finished() {
            let input: Value = if call.arg_buffer.is_empty() {
                Value::Object(serde_json::Map::new())
            } else {
                serde_json::from_str(&call.arg_buffer).unwrap_or_else(|err| {
                    log::warn!("tool call {} accumulated invalid JSON: {err}", call.tool_use_id);
                    Value::Object(serde_json::Map::new())
                })
            };

            content.push(ResponseBlock::ToolUse {
                id: call.tool_use_id.clone(),
                name: call.name.clone(),
                input,
            });
        }

        self.pool.report_success(&lease);

        Ok(MessagesResponse {
            id: ctx.message_id.clone(),
            r#type: "message".to_owned(),
            role: Role::Assistant,
            content,
            model: request.model.clone(),
            stop_reason: Some(stop_reason),
            stop_sequence: None,
            usage,
        })
    }
}

fn final_stop_reason(ctx: &ResponseContext, length_exceeded: bool) -> StopReason {
    let output_tokens = estimate::output_tokens(ctx.output_chars(), ctx.tools.any_started());

    if length_exceeded || (ctx.max_tokens > 0 && output_tokens >= ctx.max_tokens) {
        StopReason::MaxTokens
    } else if ctx.tools.any_started() {
        StopReason::ToolUse
    } else {
        StopReason::EndTurn
    }
}

fn is_length_exception(kind: &str, detail: &str) -> bool {
    kind == "ContentLengthExceededException"
        || kind.contains("CONTENT_LENGTH_EXCEEDS")
        || detail.contains("CONTENT_LENGTH_EXCEEDS")
}
