//! Gemini streaming client (`streamGenerateContent` over SSE)

use std::collections::VecDeque;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::infrastructure::config::GeminiConfig;
use crate::infrastructure::ports::{
    GenerationError, GenerationPart, GenerationRequest, GenerativePort, PartStream,
};

/// Client for the Gemini `generateContent` family, directly or through an AI gateway.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
    gateway_token: Option<String>,
    model: String,
    include_thoughts: bool,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GenerationError::RequestFailed(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            gateway_token: config.gateway_token.clone(),
            model: config.model.clone(),
            include_thoughts: config.include_thoughts,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }

    fn build_body(&self, request: &GenerationRequest) -> GenerateContentRequest {
        let mut parts = vec![RequestPart::Text {
            text: request.prompt.clone(),
        }];
        parts.extend(request.references.iter().map(|reference| RequestPart::InlineData {
            inline_data: InlineData {
                mime_type: reference.mime_type.clone(),
                data: BASE64.encode(&reference.data),
            },
        }));

        GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
                thinking_config: ThinkingConfig {
                    include_thoughts: self.include_thoughts,
                },
                image_config: ImageConfig {
                    aspect_ratio: request.aspect_ratio.map(|r| r.as_str().to_string()),
                    image_size: request.image_size.map(|s| s.as_str().to_string()),
                },
            },
        }
    }
}

#[async_trait]
impl GenerativePort for GeminiClient {
    async fn stream(&self, request: GenerationRequest) -> Result<PartStream, GenerationError> {
        let body = self.build_body(&request);

        let mut builder = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        if let Some(token) = &self.gateway_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GenerationError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|e| format!("unreadable error body: {e}"));
            return Err(GenerationError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        tracing::debug!(model = %self.model, "Gemini stream opened");

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| GenerationError::RequestFailed(e.to_string())))
            .boxed();
        Ok(decode_part_stream(bytes))
    }
}

/// Turn a raw SSE byte stream into generation parts, in arrival order.
fn decode_part_stream(
    bytes: BoxStream<'static, Result<bytes::Bytes, GenerationError>>,
) -> PartStream {
    struct State {
        bytes: BoxStream<'static, Result<bytes::Bytes, GenerationError>>,
        decoder: SseLineDecoder,
        pending: VecDeque<Result<GenerationPart, GenerationError>>,
        finished: bool,
    }

    let state = State {
        bytes,
        decoder: SseLineDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(next) = state.pending.pop_front() {
                if next.is_err() {
                    // Nothing after an error is meaningful
                    state.pending.clear();
                    state.finished = true;
                }
                return Some((next, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for payload in state.decoder.feed(&chunk) {
                        state.pending.extend(parts_from_decoded(payload));
                    }
                }
                Some(Err(e)) => {
                    state.pending.push_back(Err(e));
                }
                None => {
                    if let Some(payload) = state.decoder.finish() {
                        state.pending.extend(parts_from_decoded(payload));
                    }
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

fn parts_from_decoded(
    payload: Result<String, GenerationError>,
) -> Vec<Result<GenerationPart, GenerationError>> {
    match payload {
        Ok(payload) => parts_from_payload(&payload),
        Err(e) => vec![Err(e)],
    }
}

/// Parse one `data:` payload into the parts it carries.
fn parts_from_payload(payload: &str) -> Vec<Result<GenerationPart, GenerationError>> {
    let chunk: GenerateContentChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            return vec![Err(GenerationError::InvalidResponse(format!(
                "malformed stream chunk: {e}"
            )))]
        }
    };

    if let Some(error) = chunk.error {
        return vec![Err(GenerationError::Backend {
            status: error.code.unwrap_or(500),
            message: error.message.unwrap_or_default(),
        })];
    }

    chunk
        .candidates
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .flat_map(|content| content.parts)
        .filter_map(|part| {
            if let Some(text) = part.text {
                return Some(Ok(GenerationPart::Text(text)));
            }
            let inline = part.inline_data?;
            let data = inline.data.filter(|d| !d.is_empty())?;
            Some(
                BASE64
                    .decode(data.as_bytes())
                    .map(|data| GenerationPart::InlineAsset {
                        mime_type: inline
                            .mime_type
                            .unwrap_or_else(|| "application/octet-stream".to_string()),
                        data,
                    })
                    .map_err(|e| {
                        GenerationError::InvalidResponse(format!("invalid inline data: {e}"))
                    }),
            )
        })
        .collect()
}

/// Incremental SSE decoder yielding the joined `data:` lines of each event.
///
/// Bytes are buffered until a full line arrives, so a multi-byte character
/// split across network chunks is decoded intact.
#[derive(Debug, Default)]
struct SseLineDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseLineDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Vec<Result<String, GenerationError>> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline_idx) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline_idx).collect();
            match decode_line(&raw[..newline_idx]) {
                Ok(line) if line.is_empty() => {
                    if let Some(event) = self.take_event() {
                        events.push(Ok(event));
                    }
                }
                Ok(line) => self.push_line(line),
                Err(e) => events.push(Err(e)),
            }
        }
        events
    }

    /// Flush whatever is left once the body ends.
    fn finish(&mut self) -> Option<Result<String, GenerationError>> {
        let rest = std::mem::take(&mut self.buffer);
        match decode_line(&rest) {
            Ok(line) => self.push_line(line),
            Err(e) => return Some(Err(e)),
        }
        self.take_event().map(Ok)
    }

    fn push_line(&mut self, line: &str) {
        // `event:`, `id:` and comment lines carry nothing we use
        if let Some(rest) = line.strip_prefix("data:") {
            self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
    }

    fn take_event(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let event = self.data.join("\n");
        self.data.clear();
        (!event.trim().is_empty()).then_some(event)
    }
}

fn decode_line(raw: &[u8]) -> Result<&str, GenerationError> {
    let line = std::str::from_utf8(raw)
        .map_err(|e| GenerationError::InvalidResponse(format!("stream line is not UTF-8: {e}")))?;
    Ok(line.strip_suffix('\r').unwrap_or(line))
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    thinking_config: ThinkingConfig,
    image_config: ImageConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    include_thoughts: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<ResponseInlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseInlineData {
    mime_type: Option<String>,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<u16>,
    message: Option<String>,
}
