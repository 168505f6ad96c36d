use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::language::{detect_language, Language};
use crate::models::{ActionTask, ChatMessage, Sender};
use crate::outcome::{parse_outcome, parse_portrait_delta, SessionOutcome};
use crate::portrait::{PortraitDelta, UserPortrait};
use crate::prompts;
use crate::reconcile::localize_strategy;

/// The LLM backend seam. Everything the session controller needs from the
/// model goes through this trait, so tests can script it.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// One chat turn. The reply is already trimmed.
    async fn send_message(
        &self,
        text: &str,
        history: &[ChatMessage],
        portrait: &UserPortrait,
    ) -> Result<ChatMessage>;

    /// Summarize the session and propose tasks.
    async fn finalize_session(
        &self,
        history: &[ChatMessage],
        portrait: &UserPortrait,
    ) -> Result<SessionOutcome>;

    /// Re-derive a portrait delta from the full transcript. The result is
    /// merged, never substituted.
    async fn regenerate_portrait(
        &self,
        history: &[ChatMessage],
        old_portrait: &UserPortrait,
        last_summary: &str,
        flags: &[String],
        task_feedback: &[ActionTask],
    ) -> Result<PortraitDelta>;

    /// Incremental chat stream. Must be called inside a tokio runtime.
    fn stream_chat(&self, history: &[ChatMessage], fast_mode: bool) -> ChatStream;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP-level failure carrying the status so callers can decide whether the
/// fallback model is worth a retry.
#[derive(Debug)]
pub struct HttpError {
    pub status: u16,
    pub body: String,
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LLM API returned error {}: {}", self.status, self.body)
    }
}

impl std::error::Error for HttpError {}

fn is_fallback_worthy(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<HttpError>(),
        Some(HttpError {
            status: 401 | 404,
            ..
        })
    )
}

/// A cancellable incremental text stream.
///
/// Dropping the handle aborts the underlying request; nothing is leaked if
/// the consumer walks away mid-stream.
pub struct ChatStream {
    rx: flume::Receiver<Result<String>>,
    task: tokio::task::JoinHandle<()>,
}

impl ChatStream {
    /// Next chunk of assistant text; `None` once the stream is finished.
    pub async fn next_chunk(&mut self) -> Option<Result<String>> {
        self.rx.recv_async().await.ok()
    }

    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// What one SSE line contributes to the stream.
#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseEvent {
    let line = line.trim();
    let Some(payload) = line.strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return SseEvent::Done;
    }

    let Ok(chunk) = serde_json::from_str::<StreamChunk>(payload) else {
        return SseEvent::Skip;
    };
    for choice in &chunk.choices {
        if let Some(content) = &choice.delta.content {
            if !content.is_empty() {
                return SseEvent::Delta(content.clone());
            }
        }
        if choice.finish_reason.is_some() {
            return SseEvent::Done;
        }
    }
    SseEvent::Skip
}

/// OpenAI-compatible implementation of [`LlmGateway`].
#[derive(Clone)]
pub struct OpenAiGateway {
    api_url: String,
    api_key: String,
    model: String,
    fallback_model: String,
    app_language: Language,
    client: reqwest::Client,
}

impl OpenAiGateway {
    pub fn new(
        api_url: String,
        api_key: String,
        model: String,
        fallback_model: String,
        app_language: Language,
    ) -> Self {
        Self {
            api_url,
            api_key,
            model,
            fallback_model,
            app_language,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self::new(
            config.llm_api_url.clone(),
            config.llm_api_key.clone().unwrap_or_default(),
            config.llm_model.clone(),
            config.llm_fallback_model.clone(),
            Language::from_tag(&config.app_language),
        )
    }

    async fn chat_completion(
        &self,
        model: &str,
        messages: Vec<WireMessage>,
        temperature: f32,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_url);
        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages,
            temperature: Some(temperature),
            max_tokens: Some(2000),
            stream: None,
        };

        let mut req = self.client.post(&url).json(&request);
        // No API key header for local models
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = req.send().await.context("Failed to send LLM request")?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            return Err(HttpError { status, body }.into());
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        completion
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))
    }

    /// Primary model first; one retry on the fallback model when the
    /// primary is unknown or unauthorized.
    async fn request_text(&self, messages: Vec<WireMessage>, temperature: f32) -> Result<String> {
        match self
            .chat_completion(&self.model, messages.clone(), temperature)
            .await
        {
            Ok(text) => Ok(text),
            Err(error) if is_fallback_worthy(&error) => {
                tracing::warn!(
                    "Model {} unavailable ({}), retrying with {}",
                    self.model,
                    error,
                    self.fallback_model
                );
                self.chat_completion(&self.fallback_model, messages, temperature)
                    .await
            }
            Err(error) => Err(error),
        }
    }

    fn wire_history(system_prompt: String, history: &[ChatMessage]) -> Vec<WireMessage> {
        let mut messages = vec![WireMessage {
            role: "system".to_string(),
            content: system_prompt,
        }];
        messages.extend(history.iter().map(|m| WireMessage {
            role: m.sender.as_role().to_string(),
            content: m.text.clone(),
        }));
        messages
    }
}

#[async_trait]
impl LlmGateway for OpenAiGateway {
    async fn send_message(
        &self,
        text: &str,
        history: &[ChatMessage],
        portrait: &UserPortrait,
    ) -> Result<ChatMessage> {
        let language = detect_language(text, history, self.app_language);
        let mut messages =
            Self::wire_history(prompts::chat_system_prompt(language, portrait), history);
        if history.last().map(|m| m.text.as_str()) != Some(text) {
            messages.push(WireMessage {
                role: "user".to_string(),
                content: text.to_string(),
            });
        }

        let reply = self.request_text(messages, 0.7).await?;
        Ok(ChatMessage::assistant(reply.trim()))
    }

    async fn finalize_session(
        &self,
        history: &[ChatMessage],
        portrait: &UserPortrait,
    ) -> Result<SessionOutcome> {
        let language = detect_language("", history, self.app_language);
        let transcript = prompts::format_transcript(history);
        let messages = vec![
            WireMessage {
                role: "system".to_string(),
                content: prompts::finalize_system_prompt(language),
            },
            WireMessage {
                role: "user".to_string(),
                content: prompts::finalize_prompt(language, portrait, &transcript),
            },
        ];

        let content = self.request_text(messages, 0.5).await?;
        let mut outcome = parse_outcome(&content);
        if outcome.summary.is_empty() {
            // No marker; the whole response is the best summary we have.
            outcome.summary = content.trim().to_string();
        }
        Ok(outcome)
    }

    async fn regenerate_portrait(
        &self,
        history: &[ChatMessage],
        old_portrait: &UserPortrait,
        last_summary: &str,
        flags: &[String],
        task_feedback: &[ActionTask],
    ) -> Result<PortraitDelta> {
        let language = detect_language("", history, self.app_language);
        let transcript = prompts::format_transcript(history);
        let messages = vec![
            WireMessage {
                role: "system".to_string(),
                content: prompts::regenerate_system_prompt(language),
            },
            WireMessage {
                role: "user".to_string(),
                content: prompts::regenerate_prompt(
                    language,
                    old_portrait,
                    last_summary,
                    flags,
                    task_feedback,
                    &transcript,
                ),
            },
        ];

        let content = self.request_text(messages, 0.5).await?;
        let mut delta = parse_portrait_delta(&content);
        if language == Language::Ukrainian {
            delta.new_strategies = delta
                .new_strategies
                .iter()
                .map(|s| localize_strategy(s))
                .collect();
        }
        Ok(delta)
    }

    fn stream_chat(&self, history: &[ChatMessage], fast_mode: bool) -> ChatStream {
        let model = if fast_mode {
            self.fallback_model.clone()
        } else {
            self.model.clone()
        };
        let request = ChatCompletionRequest {
            model,
            messages: history
                .iter()
                .filter(|m| m.sender != Sender::System)
                .map(|m| WireMessage {
                    role: m.sender.as_role().to_string(),
                    content: m.text.clone(),
                })
                .collect(),
            temperature: Some(if fast_mode { 0.3 } else { 0.7 }),
            max_tokens: Some(if fast_mode { 160 } else { 512 }),
            stream: Some(true),
        };

        let url = format!("{}/chat/completions", self.api_url);
        let api_key = self.api_key.clone();
        let client = self.client.clone();
        let (tx, rx) = flume::bounded(64);

        let task = tokio::spawn(async move {
            let mut req = client.post(&url).json(&request);
            if !api_key.is_empty() {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            let response = match req.send().await {
                Ok(response) => response,
                Err(error) => {
                    let _ = tx
                        .send_async(Err(anyhow::Error::from(error)
                            .context("Failed to open chat stream")))
                        .await;
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read body".to_string());
                let _ = tx.send_async(Err(HttpError { status, body }.into())).await;
                return;
            }

            let mut body = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(error) => {
                        let _ = tx
                            .send_async(Err(anyhow::Error::from(error)
                                .context("Chat stream interrupted")))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE events arrive line by line; keep the trailing partial.
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].to_string();
                    buffer.drain(..=newline);
                    match parse_sse_line(&line) {
                        SseEvent::Delta(text) => {
                            if tx.send_async(Ok(text)).await.is_err() {
                                return; // consumer walked away
                            }
                        }
                        SseEvent::Done => return,
                        SseEvent::Skip => {}
                    }
                }
            }
        });

        ChatStream { rx, task }
    }
}
