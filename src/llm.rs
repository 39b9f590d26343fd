use crate::error::LlmError;
use async_trait::async_trait;
use futures::StreamExt;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};

/// A structured-output generation: the model must answer with JSON matching
/// `schema`.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub schema_name: &'static str,
    pub schema: Value,
    pub input: String,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<Value, LlmError>;

    /// Starts a generation that reports partial objects as they form.
    fn stream(&self, request: GenerationRequest) -> GenerationStream;
}

/// Consumer side of a streaming generation.
///
/// Partial objects arrive one at a time through a channel holding at most
/// one item. The final value arrives once the partial channel is closed.
#[derive(Debug)]
pub struct GenerationStream {
    partials: mpsc::Receiver<Value>,
    result: oneshot::Receiver<Result<Value, LlmError>>,
    cancel: CancellationToken,
}

/// Producer side of a [`GenerationStream`].
#[derive(Debug)]
pub struct GenerationSink {
    partials: mpsc::Sender<Value>,
    result: oneshot::Sender<Result<Value, LlmError>>,
    cancel: CancellationToken,
}

impl GenerationStream {
    pub fn channel() -> (GenerationSink, GenerationStream) {
        let (partial_tx, partial_rx) = mpsc::channel(1);
        let (result_tx, result_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        (
            GenerationSink {
                partials: partial_tx,
                result: result_tx,
                cancel: cancel.clone(),
            },
            GenerationStream {
                partials: partial_rx,
                result: result_rx,
                cancel,
            },
        )
    }

    /// Next partial object, or `None` once the producer is done.
    pub async fn next_partial(&mut self) -> Option<Value> {
        self.partials.recv().await
    }

    /// The final value. A producer that went away without answering counts
    /// as an interrupted generation.
    pub async fn result(self) -> Result<Value, LlmError> {
        self.result.await.unwrap_or(Err(LlmError::Interrupted))
    }

    /// Asks the producer to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl GenerationSink {
    /// Hands a partial object to the consumer, waiting while the previous one
    /// is still unread. Returns `false` when nobody is listening anymore.
    pub async fn send_partial(&self, partial: Value) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = self.partials.send(partial) => sent.is_ok(),
        }
    }

    pub fn finish(self, result: Result<Value, LlmError>) {
        // The consumer may already be gone.
        let _ = self.result.send(result);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client (OpenRouter by default).
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    pub fn new(api_url: String, api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url,
            api_key,
            model,
        }
    }

    fn request_body(&self, request: &GenerationRequest, stream: bool) -> Value {
        json!({
            "model": self.model,
            "stream": stream,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.input }
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "strict": true,
                    "schema": request.schema
                }
            }
        })
    }

    async fn send(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request, stream))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn produce(
        &self,
        request: GenerationRequest,
        sink: &GenerationSink,
    ) -> Result<Value, LlmError> {
        let response = tokio::select! {
            _ = sink.cancelled() => return Err(LlmError::Interrupted),
            response = self.send(&request, true) => response?,
        };

        let mut body = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();
        let mut content = String::new();
        let mut last_partial: Option<Value> = None;

        'read: loop {
            let chunk = tokio::select! {
                _ = sink.cancelled() => return Err(LlmError::Interrupted),
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            pending.extend_from_slice(&chunk?);

            while let Some(end) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=end).collect();
                let line = String::from_utf8_lossy(&line);

                match parse_sse_line(line.trim())? {
                    SseLine::Done => break 'read,
                    SseLine::Skip => {}
                    SseLine::Delta(text) => {
                        content.push_str(&text);
                        let Some(partial) = complete_partial_json(&content) else {
                            continue;
                        };
                        if last_partial.as_ref() == Some(&partial) {
                            continue;
                        }
                        if !sink.send_partial(partial.clone()).await {
                            return Err(LlmError::Interrupted);
                        }
                        last_partial = Some(partial);
                    }
                }
            }
        }

        debug!("Generation finished with {} bytes of content", content.len());
        serde_json::from_str(&content).map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl LanguageModel for OpenRouterClient {
    async fn generate(&self, request: GenerationRequest) -> Result<Value, LlmError> {
        let completion: ChatCompletion = self
            .send(&request, false)
            .await?
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("completion has no content".to_string()))?;

        serde_json::from_str(&content).map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    fn stream(&self, request: GenerationRequest) -> GenerationStream {
        let (sink, stream) = GenerationStream::channel();
        let client = self.clone();

        tokio::spawn(async move {
            let result = client.produce(request, &sink).await;
            if let Err(e) = &result {
                if !sink.is_cancelled() {
                    warn!("Streaming generation failed: {}", e);
                }
            }
            sink.finish(result);
        });

        stream
    }
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, LlmError> {
    // Comments (": OPENROUTER PROCESSING"), blank keep-alives and other fields.
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let chunk: ChatChunk =
        serde_json::from_str(payload).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
    if let Some(error) = chunk.error {
        return Err(LlmError::InvalidResponse(error.to_string()));
    }

    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect();
    if text.is_empty() {
        Ok(SseLine::Skip)
    } else {
        Ok(SseLine::Delta(text))
    }
}

/// Best-effort parse of an unfinished JSON document.
///
/// Open strings and containers are closed. When that alone does not parse,
/// the text is cut back to the last member separator or container opener
/// until it does.
pub fn complete_partial_json(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }

    let mut cuts = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            ',' => cuts.push(i),
            '{' | '[' => cuts.push(i + 1),
            _ => {}
        }
    }

    std::iter::once(text.len())
        .chain(cuts.into_iter().rev())
        .filter_map(|end| close_json(&text[..end]))
        .find_map(|candidate| serde_json::from_str(&candidate).ok())
}

/// Appends whatever closes the open string and containers of `text`.
fn close_json(text: &str) -> Option<String> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
            }
            _ => {}
        }
    }

    let mut closed = text.to_string();
    if in_string {
        if escaped {
            closed.pop();
        }
        closed.push('"');
    }
    closed.extend(stack.iter().rev());
    Some(closed)
}
