use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::pricing::{ModelPricing, PricingCache};
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest, MessagesResponse};
use crate::translate::openai_types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatErrorResponse,
};
use crate::translate::request::{anthropic_to_openai, TranslateOptions};
use crate::translate::response::{openai_error_to_anthropic, openai_to_anthropic};
use crate::translate::streaming::{encode_events, StreamTranscoder};

use bytes::Bytes;
use futures::stream::{self, Stream};
use futures::StreamExt;
use std::pin::Pin;
use tracing::{debug, info, warn};

/// Outcome of proxying a non-streaming request
pub enum ProxyResult {
    Success(MessagesResponse),
    Error(ErrorResponse, u16),
}

/// Outcome of proxying a streaming request: encoded Anthropic SSE frames
pub type SseStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send>>;

/// Everything needed to reach the backend for one request.
pub struct Upstream<'a> {
    pub config: &'a ProxyConfig,
    pub client: &'a reqwest::Client,
    pub pricing: &'a PricingCache,
    pub credential: &'a str,
}

impl Upstream<'_> {
    fn translate(&self, req: &MessagesRequest) -> ChatCompletionRequest {
        anthropic_to_openai(
            req,
            &self.config.models,
            TranslateOptions {
                request_cost: self.config.accounting.request_cost,
            },
        )
    }

    fn post(&self, url: &str) -> Result<reqwest::RequestBuilder> {
        let auth = self.config.auth_scheme()?.header_value(self.credential);
        Ok(self
            .client
            .post(url)
            .header("Authorization", auth)
            .header("Content-Type", "application/json"))
    }

    async fn pricing_for(&self, model: &str) -> Option<ModelPricing> {
        if !self.config.pricing.enabled {
            return None;
        }
        self.pricing.resolve(self.client, model).await
    }
}

/// Forward a non-streaming Anthropic request through the configured backend.
pub async fn proxy_non_streaming(req: &MessagesRequest, upstream: &Upstream<'_>) -> Result<ProxyResult> {
    let url = upstream.config.chat_completions_url()?;
    let openai_req = upstream.translate(req);

    info!(url = %url, model = %openai_req.model, "Forwarding request");

    let response = upstream
        .post(&url)?
        .json(&openai_req)
        .send()
        .await
        .map_err(|e| ProxyError::provider(format!("Request failed: {e}")))?;

    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| ProxyError::provider(format!("Failed to read response body: {e}")))?;

    debug!(status, body_len = body.len(), "Backend responded");

    if status >= 400 {
        return Ok(ProxyResult::Error(backend_error(status, &body), status));
    }

    let openai_resp: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
        ProxyError::translation(format!(
            "Failed to parse backend response: {}. Body: {}",
            e,
            truncate(&body, 300)
        ))
    })?;

    let pricing = upstream.pricing_for(&openai_req.model).await;

    match openai_to_anthropic(&openai_resp, &req.model, pricing.as_ref()) {
        Ok(anthropic_resp) => {
            info!(
                input = anthropic_resp.usage.input_tokens,
                output = anthropic_resp.usage.output_tokens,
                cache_read = anthropic_resp.usage.cache_read_input_tokens,
                cache_write = anthropic_resp.usage.cache_creation_input_tokens,
                "Completed"
            );
            Ok(ProxyResult::Success(anthropic_resp))
        }
        Err(err) => {
            warn!(message = %err.error.message, "Unusable backend response");
            Ok(ProxyResult::Error(err, 502))
        }
    }
}

/// Forward a streaming Anthropic request, returning a stream of Anthropic SSE frames.
///
/// Pricing is resolved alongside the backend call so the transcoder never
/// waits on the network once deltas start flowing.
pub async fn proxy_streaming(req: &MessagesRequest, upstream: &Upstream<'_>) -> Result<SseStream> {
    let url = upstream.config.chat_completions_url()?;
    let openai_req = upstream.translate(req);

    info!(url = %url, model = %openai_req.model, "Forwarding request (streaming)");

    let send = upstream.post(&url)?.json(&openai_req).send();
    let (response, pricing) = tokio::join!(send, upstream.pricing_for(&openai_req.model));
    let response =
        response.map_err(|e| ProxyError::provider(format!("Streaming request failed: {e}")))?;

    let status = response.status().as_u16();
    let is_event_stream = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/event-stream"));

    if status >= 400 || !is_event_stream {
        let body = response.text().await.unwrap_or_default();
        warn!(status, body = %truncate(&body, 300), "Backend did not return an event stream");

        let err = if status >= 400 {
            backend_error(status, &body)
        } else {
            match serde_json::from_str::<ChatErrorResponse>(&body) {
                Ok(err) => openai_error_to_anthropic(&err, 502),
                Err(_) => ErrorResponse::api_error(format!(
                    "Backend returned a non-streaming response: {}",
                    truncate(&body, 200)
                )),
            }
        };

        let frame = encode_events(&[err.into_stream_event()]);
        return Ok(Box::pin(stream::once(async move { Ok(frame) })));
    }

    let event_stream = sse_translate_stream(response.bytes_stream(), req.model.clone(), pricing);
    Ok(Box::pin(event_stream))
}

/// Run backend SSE bytes through a [`StreamTranscoder`], yielding encoded frames.
pub fn sse_translate_stream<E: std::fmt::Display + Send + 'static>(
    byte_stream: impl Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    model: String,
    pricing: Option<ModelPricing>,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static {
    async_stream::stream! {
        let mut transcoder = StreamTranscoder::new(&model, pricing);

        futures::pin_mut!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "Backend stream error");
                    let events = transcoder.fail(ErrorResponse::api_error(format!(
                        "Backend stream interrupted: {e}"
                    )));
                    if !events.is_empty() {
                        yield Ok(encode_events(&events));
                    }
                    return;
                }
            };

            let events = transcoder.transform(&chunk);
            if !events.is_empty() {
                yield Ok(encode_events(&events));
            }
            if transcoder.is_finished() {
                break;
            }
        }

        // Ensure the client sees a complete sequence even if [DONE] was missing
        let events = transcoder.end_of_input();
        if !events.is_empty() {
            yield Ok(encode_events(&events));
        }

        info!("Stream completed");
    }
}

/// Forward an OpenAI-format chat completion request unchanged.
///
/// The caller streams the returned response back as-is, whatever its status.
pub async fn proxy_passthrough(body: Bytes, upstream: &Upstream<'_>) -> Result<reqwest::Response> {
    let url = upstream.config.chat_completions_url()?;

    info!(url = %url, len = body.len(), "Passthrough");

    upstream
        .post(&url)?
        .body(body)
        .send()
        .await
        .map_err(|e| ProxyError::provider(format!("Passthrough request failed: {e}")))
}

fn backend_error(status: u16, body: &str) -> ErrorResponse {
    if let Ok(err) = serde_json::from_str::<ChatErrorResponse>(body) {
        warn!(status, message = %err.error.message, "Backend error");
        return openai_error_to_anthropic(&err, status);
    }

    ErrorResponse::new(
        ErrorResponse::type_for_status(status),
        format!("Backend returned status {}: {}", status, truncate(body, 500)),
    )
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn test_backend_error_without_json_body() {
        let err = backend_error(503, "<html>down</html>");
        assert_eq!(err.error.error_type, "overloaded_error");
        assert!(err.error.message.contains("503"));
    }

    #[tokio::test]
    async fn test_translate_stream_from_byte_chunks() {
        let chunks: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"id\":\"chatcmpl-7\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel")),
            Ok(Bytes::from_static(b"lo\"},\"finish_reason\":null}]}\n\ndata: [DONE]\n\n")),
            Ok(Bytes::from_static(b"data: {\"garbage after done\n\n")),
        ];

        let frames: Vec<Bytes> = sse_translate_stream(stream::iter(chunks), "m".to_string(), None)
            .filter_map(|r| async move { r.ok() })
            .collect()
            .await;
        let text: String = frames
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect();

        assert!(text.starts_with("event: message_start\n"));
        assert!(text.contains("\"text\":\"Hello\""));
        assert!(text.ends_with("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n"));
        assert_eq!(text.matches("event: message_stop").count(), 1);
    }

    #[tokio::test]
    async fn test_interrupted_stream_ends_with_error_event() {
        let chunks: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"id\":\"chatcmpl-8\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer")),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ];

        let frames: Vec<Bytes> = sse_translate_stream(stream::iter(chunks), "m".to_string(), None)
            .filter_map(|r| async move { r.ok() })
            .collect()
            .await;
        let text: String = frames
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect();

        assert!(text.contains("\"text\":\"Hel\""));
        assert!(text.contains("event: content_block_stop\n"));
        assert!(text.ends_with("\n\n"));
        assert!(text.contains("event: error\n"));
        assert!(text.contains("reset by peer"));
        assert!(!text.contains("end_turn"));
        assert!(!text.contains("event: message_stop"));
        assert!(text.rfind("event: error").unwrap() > text.rfind("event: content_block_stop").unwrap());
    }
}
