//! Translate Anthropic Messages API requests into `OpenAI` Chat Completions requests.
//!
//! Handles system prompts (keeping cache markers on array-form prompts), multi-part
//! content (text, images), tool use, tool results, and tool choice mapping. A single
//! Anthropic message can expand into multiple `OpenAI` messages: a user message with
//! `tool_result` blocks becomes separate `tool`-role messages followed by whatever
//! user content remains.

use std::collections::HashMap;
use std::hash::BuildHasher;

use super::anthropic_types::{
    ContentBlock, ImageSource, Message, MessageContent, MessagesRequest, Role, SystemBlock,
    SystemContent, Tool, ToolChoice, ToolResultContent,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatTool, ChatToolCall,
    ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction, ChatToolChoiceSpecific,
    ContentPart, ImageUrlDetail, StreamOptions, UsageOptions,
};

const TOOL_ERROR_PREFIX: &str = "Error: ";

/// Options that shape the outbound request but are not part of the inbound one.
#[derive(Debug, Clone, Copy, Default)]
pub struct TranslateOptions {
    /// Ask the router to report the billed cost in `usage.cost`.
    pub request_cost: bool,
}

/// Translate an Anthropic Messages API request into an `OpenAI` Chat Completions request.
/// Pure function: the model alias map is applied after the shape conversion.
pub fn anthropic_to_openai<S: BuildHasher>(
    req: &MessagesRequest,
    model_map: &HashMap<String, String, S>,
    options: TranslateOptions,
) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(ref system) = req.system {
        messages.push(translate_system(system));
    }

    for msg in &req.messages {
        messages.append(&mut translate_message(msg));
    }

    let tools = req
        .tools
        .as_ref()
        .map(|tools| tools.iter().map(translate_tool).collect());

    let tool_choice = req.tool_choice.as_ref().map(translate_tool_choice);

    let streaming = req.is_streaming();
    let stream_options = streaming.then_some(StreamOptions {
        include_usage: true,
    });

    let mut translated = ChatCompletionRequest {
        model: req.model.clone(),
        messages,
        max_tokens: Some(req.max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        stream: req.stream,
        stream_options,
        usage: options
            .request_cost
            .then_some(UsageOptions { include: true }),
        tools,
        tool_choice,
        stop: req.stop_sequences.clone(),
        user: req.metadata.as_ref().and_then(|m| m.user_id.clone()),
    };

    apply_model_alias(&mut translated, model_map);
    translated
}

/// Route the model id through the configured alias map.
pub fn apply_model_alias<S: BuildHasher>(
    req: &mut ChatCompletionRequest,
    model_map: &HashMap<String, String, S>,
) {
    if let Some(target) = model_map.get(&req.model) {
        req.model = target.clone();
    }
}

fn translate_system(system: &SystemContent) -> ChatMessage {
    match system {
        SystemContent::Text(text) => ChatMessage::text("system", text.clone()),
        // Array form is kept so cache markers survive.
        SystemContent::Blocks(blocks) => ChatMessage {
            role: "system".to_string(),
            content: Some(ChatContent::Parts(
                blocks
                    .iter()
                    .map(|SystemBlock::Text { text, cache_control }| ContentPart::Text {
                        text: text.clone(),
                        cache_control: cache_control.clone(),
                    })
                    .collect(),
            )),
            tool_calls: None,
            tool_call_id: None,
        },
    }
}

fn translate_message(msg: &Message) -> Vec<ChatMessage> {
    match (&msg.content, msg.role) {
        (MessageContent::Text(text), Role::User) => vec![ChatMessage::text("user", text.clone())],
        (MessageContent::Text(text), Role::Assistant) => {
            vec![ChatMessage::text("assistant", text.clone())]
        }
        (MessageContent::Blocks(blocks), Role::User) => translate_user_blocks(blocks),
        (MessageContent::Blocks(blocks), Role::Assistant) => {
            vec![translate_assistant_blocks(blocks)]
        }
    }
}

fn translate_user_blocks(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut remaining: Vec<&ContentBlock> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => messages.push(ChatMessage {
                role: "tool".to_string(),
                content: Some(ChatContent::Text(tool_result_to_string(
                    content.as_ref(),
                    *is_error,
                ))),
                tool_calls: None,
                tool_call_id: Some(tool_use_id.clone()),
            }),
            ContentBlock::Thinking { .. } | ContentBlock::Unsupported => {}
            other => remaining.push(other),
        }
    }

    let had_tool_results = !messages.is_empty();
    if let Some(content) = user_content(&remaining) {
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        });
    } else if !had_tool_results {
        messages.push(ChatMessage::text("user", String::new()));
    }

    messages
}

/// Content for a user turn, or `None` when no translatable block remains.
fn user_content(blocks: &[&ContentBlock]) -> Option<ChatContent> {
    let all_plain_text = blocks.iter().all(|b| b.is_plain_text());
    if all_plain_text {
        if blocks.is_empty() {
            return None;
        }
        let text = blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        return Some(ChatContent::Text(text));
    }

    let parts: Vec<ContentPart> = blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text {
                text,
                cache_control,
            } => Some(ContentPart::Text {
                text: text.clone(),
                cache_control: cache_control.clone(),
            }),
            ContentBlock::Image { source } => Some(ContentPart::ImageUrl {
                image_url: ImageUrlDetail {
                    url: image_url(source),
                    detail: None,
                },
            }),
            ContentBlock::ToolUse { .. }
            | ContentBlock::ToolResult { .. }
            | ContentBlock::Thinking { .. }
            | ContentBlock::Unsupported => None,
        })
        .collect();

    (!parts.is_empty()).then_some(ChatContent::Parts(parts))
}

fn image_url(source: &ImageSource) -> String {
    match source {
        ImageSource::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
        ImageSource::Url { url } => url.clone(),
    }
}

fn translate_assistant_blocks(blocks: &[ContentBlock]) -> ChatMessage {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text, .. } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ChatToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_default(),
                    },
                });
            }
            ContentBlock::Thinking { .. }
            | ContentBlock::Image { .. }
            | ContentBlock::ToolResult { .. }
            | ContentBlock::Unsupported => {}
        }
    }

    ChatMessage {
        role: "assistant".to_string(),
        content: (!text_parts.is_empty()).then(|| ChatContent::Text(text_parts.join("\n"))),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    }
}

fn tool_result_to_string(content: Option<&ToolResultContent>, is_error: Option<bool>) -> String {
    let prefix = if is_error == Some(true) {
        TOOL_ERROR_PREFIX
    } else {
        ""
    };

    let text = match content {
        Some(ToolResultContent::Text(t)) => t.clone(),
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => String::new(),
    };

    format!("{prefix}{text}")
}

fn translate_tool(tool: &Tool) -> ChatTool {
    ChatTool {
        tool_type: "function".to_string(),
        function: ChatFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.input_schema.clone(),
        },
        cache_control: tool.cache_control.clone(),
    }
}

fn translate_tool_choice(tc: &ToolChoice) -> ChatToolChoice {
    match tc {
        ToolChoice::Auto => ChatToolChoice::String("auto".to_string()),
        ToolChoice::Any => ChatToolChoice::String("required".to_string()),
        ToolChoice::None => ChatToolChoice::String("none".to_string()),
        ToolChoice::Tool { name } => ChatToolChoice::Specific(ChatToolChoiceSpecific {
            choice_type: "function".to_string(),
            function: ChatToolChoiceFunction { name: name.clone() },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn translate(value: serde_json::Value) -> ChatCompletionRequest {
        let req: MessagesRequest = serde_json::from_value(value).unwrap();
        anthropic_to_openai(&req, &HashMap::new(), TranslateOptions::default())
    }

    #[test]
    fn test_simple_text_request() {
        let mut req =
            MessagesRequest::new("claude-sonnet-4-20250514", 1024, vec![Message::user("Hello")]);
        req.system = Some(SystemContent::Text("You are helpful".to_string()));
        req.temperature = Some(0.2);
        req.top_k = Some(40);
        req.stop_sequences = Some(vec!["END".to_string()]);

        let mut model_map = HashMap::new();
        model_map.insert(
            "claude-sonnet-4-20250514".to_string(),
            "anthropic/claude-sonnet-4".to_string(),
        );

        let result = anthropic_to_openai(&req, &model_map, TranslateOptions::default());

        assert_eq!(result.model, "anthropic/claude-sonnet-4");
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].role, "system");
        assert_eq!(
            result.messages[0].content,
            Some(ChatContent::Text("You are helpful".to_string()))
        );
        assert_eq!(result.messages[1].role, "user");
        assert_eq!(result.max_tokens, Some(1024));
        assert_eq!(result.temperature, Some(0.2));
        assert_eq!(result.top_k, Some(40));
        assert_eq!(result.stop, Some(vec!["END".to_string()]));
        assert!(result.stream_options.is_none());
        assert!(result.usage.is_none());
    }

    #[test]
    fn test_cache_marked_system_stays_array_form() {
        let result = translate(json!({
            "model": "m",
            "max_tokens": 10,
            "system": [
                {"type": "text", "text": "static rules", "cache_control": {"type": "ephemeral", "ttl": "1h"}},
                {"type": "text", "text": "dynamic"}
            ],
            "messages": [{"role": "user", "content": "hi"}]
        }));

        let system = serde_json::to_value(&result.messages[0]).unwrap();
        assert_eq!(
            system["content"],
            json!([
                {"type": "text", "text": "static rules", "cache_control": {"type": "ephemeral", "ttl": "1h"}},
                {"type": "text", "text": "dynamic"}
            ])
        );
    }

    #[test]
    fn test_plain_text_blocks_flatten_with_newlines() {
        let result = translate(json!({
            "model": "m",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "first"},
                {"type": "text", "text": "second"}
            ]}]
        }));
        assert_eq!(
            result.messages[0].content,
            Some(ChatContent::Text("first\nsecond".to_string()))
        );
    }

    #[test]
    fn test_images_and_cache_markers_keep_parts() {
        let result = translate(json!({
            "model": "m",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "look", "cache_control": {"type": "ephemeral"}},
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}},
                {"type": "image", "source": {"type": "url", "url": "https://example.com/a.jpg"}}
            ]}]
        }));

        let value = serde_json::to_value(&result.messages[0]).unwrap();
        assert_eq!(value["content"][0]["cache_control"], json!({"type": "ephemeral"}));
        assert_eq!(value["content"][1]["image_url"]["url"], "data:image/png;base64,AAAA");
        assert_eq!(value["content"][2]["image_url"]["url"], "https://example.com/a.jpg");
    }

    #[test]
    fn test_two_tool_results_become_two_tool_messages() {
        let result = translate(json!({
            "model": "m",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "one"},
                {"type": "tool_result", "tool_use_id": "toolu_2", "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}], "is_error": true}
            ]}]
        }));

        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].role, "tool");
        assert_eq!(result.messages[0].tool_call_id.as_deref(), Some("toolu_1"));
        assert_eq!(result.messages[0].content, Some(ChatContent::Text("one".to_string())));
        assert_eq!(result.messages[1].tool_call_id.as_deref(), Some("toolu_2"));
        assert_eq!(
            result.messages[1].content,
            Some(ChatContent::Text("Error: a\nb".to_string()))
        );
    }

    #[test]
    fn test_remaining_user_content_follows_tool_messages() {
        let result = translate(json!({
            "model": "m",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "before"},
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "result 1"},
                {"type": "text", "text": "Now continue"}
            ]}]
        }));

        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].role, "tool");
        assert_eq!(result.messages[1].role, "user");
        assert_eq!(
            result.messages[1].content,
            Some(ChatContent::Text("before\nNow continue".to_string()))
        );
    }

    #[test]
    fn test_assistant_tool_use_becomes_tool_calls() {
        let result = translate(json!({
            "model": "m",
            "max_tokens": 10,
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_9", "name": "get_weather", "input": {"city": "London"}}
                ]}
            ]
        }));

        let assistant = &result.messages[1];
        assert!(assistant.content.is_none());
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "toolu_9");
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].function.arguments, r#"{"city":"London"}"#);
    }

    #[test]
    fn test_tools_and_tool_choice() {
        let result = translate(json!({
            "model": "m",
            "max_tokens": 10,
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{
                "name": "search",
                "description": "Search the web",
                "input_schema": {"type": "object"},
                "cache_control": {"type": "ephemeral"}
            }],
            "tool_choice": {"type": "any"}
        }));

        let tools = serde_json::to_value(result.tools.as_ref().unwrap()).unwrap();
        assert_eq!(
            tools,
            json!([{
                "type": "function",
                "function": {"name": "search", "description": "Search the web", "parameters": {"type": "object"}},
                "cache_control": {"type": "ephemeral"}
            }])
        );
        assert_eq!(result.tool_choice, Some(ChatToolChoice::String("required".to_string())));
        assert_eq!(result.stream_options, Some(StreamOptions { include_usage: true }));
    }

    #[test]
    fn test_specific_tool_choice() {
        assert_eq!(
            serde_json::to_value(translate_tool_choice(&ToolChoice::Tool {
                name: "lookup".to_string()
            }))
            .unwrap(),
            json!({"type": "function", "function": {"name": "lookup"}})
        );
        assert_eq!(
            translate_tool_choice(&ToolChoice::Auto),
            ChatToolChoice::String("auto".to_string())
        );
    }

    #[test]
    fn test_cost_accounting_requested() {
        let req = MessagesRequest::new("m", 10, vec![Message::user("hi")]);
        let result = anthropic_to_openai(
            &req,
            &HashMap::new(),
            TranslateOptions { request_cost: true },
        );
        assert_eq!(result.usage, Some(UsageOptions { include: true }));
    }

    #[test]
    fn test_unmapped_model_passes_through() {
        let req = MessagesRequest::new("some-unknown-model", 100, vec![Message::user("hi")]);
        let result = anthropic_to_openai(&req, &HashMap::new(), TranslateOptions::default());
        assert_eq!(result.model, "some-unknown-model");
    }
}
