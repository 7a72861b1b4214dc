use super::anthropic_types::{ErrorResponse, MessagesResponse, ResponseContentBlock};
use super::openai_types::{ChatCompletionResponse, ChatErrorResponse};
use crate::pricing::ModelPricing;
use crate::usage::UsageTally;

/// Translate an OpenAI Chat Completion response into an Anthropic Messages response.
///
/// `original_model` is the model id the client asked for; `pricing` is the price
/// of the backend model, used to infer cache tokens from the billed cost.
/// A response without choices is reported as an Anthropic `api_error`.
pub fn openai_to_anthropic(
    resp: &ChatCompletionResponse,
    original_model: &str,
    pricing: Option<&ModelPricing>,
) -> Result<MessagesResponse, ErrorResponse> {
    let choice = resp
        .choices
        .first()
        .ok_or_else(|| ErrorResponse::api_error("Backend response contained no choices"))?;

    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(ref text) = choice.message.content {
        if !text.is_empty() {
            content.push(ResponseContentBlock::Text { text: text.clone() });
        }
    }

    if let Some(ref tool_calls) = choice.message.tool_calls {
        for tc in tool_calls {
            let input = serde_json::from_str(&tc.function.arguments)
                .unwrap_or_else(|_| serde_json::Value::String(tc.function.arguments.clone()));

            content.push(ResponseContentBlock::ToolUse {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                input,
            });
        }
    }

    // The Anthropic shape requires at least one content block
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = map_finish_reason(choice.finish_reason.as_deref());

    let usage = resp
        .usage
        .as_ref()
        .map(UsageTally::from_chat_usage)
        .unwrap_or_default()
        .finalize(pricing);

    Ok(MessagesResponse {
        id: message_id(&resp.id),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: original_model.to_string(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage,
    })
}

/// Backend completion id reshaped to look like an Anthropic message id.
pub fn message_id(backend_id: &str) -> String {
    let trimmed = backend_id.trim_start_matches("chatcmpl-");
    if trimmed.is_empty() {
        format!("msg_{}", uuid::Uuid::new_v4().simple())
    } else {
        format!("msg_{trimmed}")
    }
}

/// Map OpenAI finish_reason to Anthropic stop_reason
pub fn map_finish_reason(reason: Option<&str>) -> &'static str {
    match reason {
        Some("tool_calls" | "function_call") => "tool_use",
        Some("length") => "max_tokens",
        _ => "end_turn",
    }
}

/// Translate an OpenAI error into an Anthropic error response
pub fn openai_error_to_anthropic(err: &ChatErrorResponse, status: u16) -> ErrorResponse {
    let error_type = match err.error.error_type.as_str() {
        "invalid_request_error" => "invalid_request_error",
        "authentication_error" => "authentication_error",
        "rate_limit_error" | "rate_limit_exceeded" => "rate_limit_error",
        _ => ErrorResponse::type_for_status(status),
    };

    ErrorResponse::new(error_type, &err.error.message)
}
