//! Google Gemini provider (`streamGenerateContent` over server-sent events).

use crate::error::ProviderError;
use crate::prompt;
use crate::provider::{GenerativeProvider, ProviderEvent, ProviderStream};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use sonoshade_core::{GenerationInput, GenerationRequest, GenerationResult, ProviderConfig};
use std::collections::VecDeque;
use tracing::{debug, info, trace};

const API_KEY_HEADER: &str = "x-goog-api-key";

// --- Request body ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: serde_json::Value,
}

// --- Streamed response chunks ---

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ResponseChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

/// Gemini over HTTPS
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiProvider {
    /// Build from configuration, reading the key from the configured
    /// environment variable.
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key()
            .ok_or_else(|| ProviderError::MissingCredential(config.api_key_env.clone()))?;
        Self::with_api_key(config, api_key)
    }

    /// Build with an explicit key
    pub fn with_api_key(config: &ProviderConfig, api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self, model_id: &str) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model_id
        )
    }
}

fn build_request(request: &GenerationRequest) -> GenerateContentRequest {
    let mut parts = vec![Part {
        text: Some(prompt::user_text(request)),
        ..Default::default()
    }];
    if let GenerationInput::AudioClip { bytes, mime_type } = &request.input {
        parts.push(Part {
            inline_data: Some(InlineData {
                mime_type: mime_type.clone(),
                data: STANDARD.encode(bytes),
            }),
            ..Default::default()
        });
    }

    GenerateContentRequest {
        system_instruction: Content {
            role: None,
            parts: vec![Part {
                text: Some(prompt::system_instruction()),
                ..Default::default()
            }],
        },
        contents: vec![Content {
            role: Some("user".to_string()),
            parts,
        }],
        generation_config: GenerationConfig {
            response_mime_type: "application/json",
            response_schema: serde_json::json!({
                "type": "OBJECT",
                "properties": {
                    "code": { "type": "STRING" },
                    "description": { "type": "STRING" }
                },
                "required": ["code", "description"]
            }),
        },
    }
}

/// Map a non-success HTTP status to the matching error
fn status_error(status: u16, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    match status {
        401 | 403 => ProviderError::Unauthorized(message),
        429 => ProviderError::QuotaExceeded(message),
        _ => ProviderError::Rejected { status, message },
    }
}

#[async_trait]
impl GenerativeProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate_program(
        &self,
        request: &GenerationRequest,
    ) -> Result<ProviderStream, ProviderError> {
        let body = build_request(request);
        info!(
            "Requesting program from {} ({} input)",
            request.model_id,
            if request.is_audio() { "audio" } else { "prompt" }
        );

        let response = self
            .client
            .post(self.endpoint(&request.model_id))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), &text));
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(ProviderError::from))
            .boxed();
        Ok(event_stream(bytes))
    }
}

// --- SSE handling ---

/// Splits a byte stream into SSE `data` payloads
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.line(line.trim_end_matches(['\r', '\n']), &mut events);
        }
        events
    }

    fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let rest = String::from_utf8_lossy(&rest).into_owned();
            self.line(rest.trim_end_matches('\r'), &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    fn line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            self.dispatch(events);
        } else if let Some(data) = line.strip_prefix("data:") {
            self.data.push(data.strip_prefix(' ').unwrap_or(data).to_string());
        }
        // Comments, `event:` and `id:` lines carry nothing we use
    }

    fn dispatch(&mut self, events: &mut Vec<String>) {
        if !self.data.is_empty() {
            events.push(self.data.join("\n"));
            self.data.clear();
        }
    }
}

/// Accumulates streamed model text and turns it into provider events
#[derive(Default)]
struct Accumulator {
    text: String,
    last_partial: Option<String>,
    pending: VecDeque<Result<ProviderEvent, ProviderError>>,
    failed: bool,
}

impl Accumulator {
    fn data(&mut self, payload: &str) {
        if self.failed || payload.trim() == "[DONE]" {
            return;
        }

        let chunk: ResponseChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                // Keep it as model text; code extraction may still find a program
                debug!("Non-JSON stream payload ({}), kept as text", e);
                self.text.push_str(payload);
                return;
            }
        };

        if let Some(error) = chunk.error {
            return self.fail(status_error(error.code, &error.message));
        }
        if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
            return self.fail(ProviderError::Rejected {
                status: 200,
                message: format!("prompt blocked: {}", reason),
            });
        }

        for candidate in chunk.candidates {
            if let Some(reason) = &candidate.finish_reason {
                trace!("Candidate finished: {}", reason);
            }
            let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
            for text in parts.into_iter().filter_map(|p| p.text) {
                self.text.push_str(&text);
            }
        }

        if let Some(code) = partial_string_field(&self.text, "code") {
            if !code.is_empty() && self.last_partial.as_deref() != Some(code.as_str()) {
                self.last_partial = Some(code.clone());
                self.pending.push_back(Ok(ProviderEvent::Partial(code)));
            }
        }
    }

    fn finish(&mut self) {
        if self.failed {
            return;
        }
        let text = self.text.trim();
        if text.is_empty() {
            // No text is not a transport failure; the stream just ends
            debug!("Response carried no text");
            return;
        }
        match serde_json::from_str::<GenerationResult>(text) {
            Ok(result) => {
                debug!("Structured result received ({} bytes of code)", result.code.len());
                self.pending.push_back(Ok(ProviderEvent::Completed(result)));
            }
            Err(_) => {
                debug!("Unstructured response ({} bytes)", text.len());
                self.pending.push_back(Ok(ProviderEvent::Text(text.to_string())));
            }
        }
    }

    fn fail(&mut self, err: ProviderError) {
        self.failed = true;
        self.pending.push_back(Err(err));
    }
}

struct StreamState {
    body: BoxStream<'static, Result<Vec<u8>, ProviderError>>,
    decoder: SseDecoder,
    acc: Accumulator,
    done: bool,
}

/// Turn the raw SSE body into provider events
fn event_stream(body: BoxStream<'static, Result<Vec<u8>, ProviderError>>) -> ProviderStream {
    let state = StreamState {
        body,
        decoder: SseDecoder::default(),
        acc: Accumulator::default(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.acc.pending.pop_front() {
                return Some((event, st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    for payload in st.decoder.push(&bytes) {
                        st.acc.data(&payload);
                    }
                }
                Some(Err(e)) => {
                    st.acc.fail(e);
                    st.done = true;
                }
                None => {
                    for payload in st.decoder.finish() {
                        st.acc.data(&payload);
                    }
                    st.acc.finish();
                    st.done = true;
                }
            }
            if st.acc.failed {
                st.done = true;
            }
        }
    })
    .boxed()
}

/// Decode the (possibly unterminated) JSON string value of `field` from an
/// incomplete JSON object.
fn partial_string_field(text: &str, field: &str) -> Option<String> {
    let key = format!("\"{}\"", field);
    let after_key = &text[text.find(&key)? + key.len()..];
    let after_colon = after_key.trim_start().strip_prefix(':')?;
    let body = after_colon.trim_start().strip_prefix('"')?;

    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Some(out),
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('b') => out.push('\u{8}'),
                Some('f') => out.push('\u{c}'),
                Some('u') => {
                    let hex: String = chars.by_ref().take(4).collect();
                    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        Some(decoded) if hex.len() == 4 => out.push(decoded),
                        // Escape cut off by the chunk boundary
                        _ => return Some(out),
                    }
                }
                Some(other) => out.push(other),
                None => return Some(out),
            },
            _ => out.push(c),
        }
    }
    Some(out)
}
