// 内容块分类器
// Gemini parts / Anthropic content blocks -> 统一的 ContentBlock 变体

use serde_json::{json, Value};

/// Recursion bound when unwrapping nested `{text: {text: ...}}` shapes
const MAX_TEXT_DEPTH: usize = 8;

/// Block `type` values that are ordinary content even when a signature field is present
const PLAIN_TYPES: &[&str] = &[
    "text",
    "image",
    "document",
    "input_text",
    "output_text",
    "image_url",
    "input_image",
    "search_result",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingStyle {
    /// `{thought: true, text, thoughtSignature}`
    GeminiThought,
    /// `{type: "thinking", thinking, signature}`
    AnthropicThinking,
    /// `{type: "redacted_thinking", data}`
    AnthropicRedacted,
    /// `{type: "reasoning", text, signature}`
    Reasoning,
}

/// Which wire syntax a tool block arrived in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolShape {
    /// `{type: "tool_use" | "tool_result", ...}`
    Anthropic,
    /// `{functionCall: {...}}` / `{functionResponse: {...}}`
    Gemini,
    /// `{tool_use: {...}}` / `{tool_result: {...}}`
    Nested,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThinkingBlock {
    pub text: String,
    pub signature: Option<String>,
    pub style: ThinkingStyle,
    raw: Value,
}

impl ThinkingBlock {
    pub fn new(style: ThinkingStyle, text: impl Into<String>, signature: Option<String>) -> Self {
        let text = text.into();
        let raw = super::sanitize::canonical_thinking_value(style, &text, signature.as_deref());
        Self {
            text,
            signature,
            style,
            raw,
        }
    }

    /// The block as it arrived on the wire
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallBlock {
    pub tool_name: String,
    pub call_id: Option<String>,
    pub arguments: Value,
    pub shape: ToolShape,
    raw: Value,
}

impl ToolCallBlock {
    /// Drop a provenance tag attached to the call part itself
    /// (Gemini puts `thoughtSignature` next to `functionCall`).
    pub fn strip_signature(&mut self) -> bool {
        let Some(obj) = self.raw.as_object_mut() else {
            return false;
        };
        let gemini = obj.remove("thoughtSignature").is_some();
        let generic = obj.remove("signature").is_some();
        gemini || generic
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultBlock {
    pub call_id: Option<String>,
    pub tool_name: Option<String>,
    pub payload: Value,
    pub is_error: bool,
    pub shape: ToolShape,
    raw: Value,
}

impl ToolResultBlock {
    /// Build a fresh result in the given wire syntax
    pub fn new(
        shape: ToolShape,
        call_id: &str,
        tool_name: Option<&str>,
        payload: Value,
        is_error: bool,
    ) -> Self {
        let raw = match shape {
            ToolShape::Anthropic => {
                let mut v = json!({
                    "type": "tool_result",
                    "tool_use_id": call_id,
                    "content": payload,
                });
                if is_error {
                    v["is_error"] = json!(true);
                }
                v
            }
            ToolShape::Gemini => {
                let response = if is_error {
                    json!({ "result": payload, "is_error": true })
                } else {
                    json!({ "result": payload })
                };
                json!({
                    "functionResponse": {
                        "name": tool_name.unwrap_or(call_id),
                        "response": response,
                        "id": call_id,
                    }
                })
            }
            ToolShape::Nested => {
                let mut v = json!({
                    "tool_result": {
                        "tool_use_id": call_id,
                        "content": payload,
                    }
                });
                if is_error {
                    v["tool_result"]["is_error"] = json!(true);
                }
                v
            }
        };

        Self {
            call_id: Some(call_id.to_string()),
            tool_name: tool_name.map(str::to_string),
            payload: classify_payload(&raw, shape),
            is_error,
            shape,
            raw,
        }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Flatten the payload into text for demotion to a plain block
    pub fn payload_text(&self) -> String {
        match &self.payload {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => {
                let text = extract_text(other, 0);
                if text.is_empty() {
                    other.to_string()
                } else {
                    text
                }
            }
        }
    }
}

/// One content unit, classified once at the input boundary
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Thinking(ThinkingBlock),
    ToolCall(ToolCallBlock),
    ToolResult(ToolResultBlock),
    Plain(Value),
}

impl ContentBlock {
    pub fn is_thinking(&self) -> bool {
        matches!(self, ContentBlock::Thinking(_))
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, ContentBlock::ToolCall(_))
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, ContentBlock::ToolResult(_))
    }

    pub fn is_plain(&self) -> bool {
        matches!(self, ContentBlock::Plain(_))
    }

    /// Re-expand to the wire shape it was read from, writing back any
    /// correlation id the pairing pass assigned.
    pub fn into_value(self) -> Value {
        match self {
            ContentBlock::Thinking(b) => b.raw,
            ContentBlock::Plain(v) => v,
            ContentBlock::ToolCall(b) => {
                let mut raw = b.raw;
                if let Some(id) = b.call_id {
                    write_call_id(&mut raw, b.shape, &id);
                }
                raw
            }
            ContentBlock::ToolResult(b) => {
                let mut raw = b.raw;
                if let Some(id) = b.call_id {
                    write_result_id(&mut raw, b.shape, &id);
                }
                raw
            }
        }
    }
}

/// Classify one block. Total: anything unrecognized is `Plain`.
///
/// Tool shapes win over thinking shapes when a block carries both.
pub fn classify(part: &Value) -> ContentBlock {
    let Some(obj) = part.as_object() else {
        return ContentBlock::Plain(part.clone());
    };
    let block_type = obj.get("type").and_then(Value::as_str);

    // 1. 工具块优先
    match block_type {
        Some("tool_use") => {
            return ContentBlock::ToolCall(ToolCallBlock {
                tool_name: str_field(part, "name").unwrap_or_default(),
                call_id: non_empty(str_field(part, "id")),
                arguments: part.get("input").cloned().unwrap_or_else(|| json!({})),
                shape: ToolShape::Anthropic,
                raw: part.clone(),
            });
        }
        Some("tool_result") => {
            return ContentBlock::ToolResult(ToolResultBlock {
                call_id: non_empty(str_field(part, "tool_use_id")),
                tool_name: non_empty(str_field(part, "name")),
                payload: classify_payload(part, ToolShape::Anthropic),
                is_error: part.get("is_error").and_then(Value::as_bool).unwrap_or(false),
                shape: ToolShape::Anthropic,
                raw: part.clone(),
            });
        }
        _ => {}
    }

    if let Some(fc) = obj.get("functionCall").filter(|v| v.is_object()) {
        return ContentBlock::ToolCall(ToolCallBlock {
            tool_name: str_field(fc, "name").unwrap_or_default(),
            call_id: non_empty(str_field(fc, "id")).or_else(|| non_empty(str_field(part, "id"))),
            arguments: fc.get("args").cloned().unwrap_or_else(|| json!({})),
            shape: ToolShape::Gemini,
            raw: part.clone(),
        });
    }

    if let Some(fr) = obj.get("functionResponse").filter(|v| v.is_object()) {
        return ContentBlock::ToolResult(ToolResultBlock {
            call_id: non_empty(str_field(fr, "id")).or_else(|| non_empty(str_field(part, "id"))),
            tool_name: non_empty(str_field(fr, "name")),
            payload: classify_payload(part, ToolShape::Gemini),
            is_error: fr
                .pointer("/response/is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            shape: ToolShape::Gemini,
            raw: part.clone(),
        });
    }

    if let Some(inner) = obj.get("tool_use").filter(|v| v.is_object()) {
        return ContentBlock::ToolCall(ToolCallBlock {
            tool_name: str_field(inner, "name").unwrap_or_default(),
            call_id: non_empty(str_field(inner, "id")),
            arguments: inner.get("input").cloned().unwrap_or_else(|| json!({})),
            shape: ToolShape::Nested,
            raw: part.clone(),
        });
    }

    if let Some(inner) = obj.get("tool_result").filter(|v| v.is_object()) {
        return ContentBlock::ToolResult(ToolResultBlock {
            call_id: non_empty(str_field(inner, "tool_use_id"))
                .or_else(|| non_empty(str_field(inner, "id"))),
            tool_name: non_empty(str_field(inner, "name")),
            payload: classify_payload(part, ToolShape::Nested),
            is_error: inner.get("is_error").and_then(Value::as_bool).unwrap_or(false),
            shape: ToolShape::Nested,
            raw: part.clone(),
        });
    }

    // 2. 思维块
    let signature = str_field(part, "signature").or_else(|| str_field(part, "thoughtSignature"));

    let style = match block_type {
        Some("thinking") => Some(ThinkingStyle::AnthropicThinking),
        Some("redacted_thinking") => Some(ThinkingStyle::AnthropicRedacted),
        Some("reasoning") => Some(ThinkingStyle::Reasoning),
        _ if obj.get("thought").and_then(Value::as_bool) == Some(true) => {
            Some(ThinkingStyle::GeminiThought)
        }
        // Signed but unrecognized: assume it is foreign reasoning
        Some(t) if signature.is_some() && !PLAIN_TYPES.contains(&t) => Some(ThinkingStyle::Reasoning),
        None if obj.contains_key("thoughtSignature") => Some(ThinkingStyle::GeminiThought),
        None if signature.is_some() => Some(ThinkingStyle::Reasoning),
        _ => None,
    };

    match style {
        Some(style) => ContentBlock::Thinking(ThinkingBlock {
            text: thinking_text(part, style),
            signature,
            style,
            raw: part.clone(),
        }),
        None => ContentBlock::Plain(part.clone()),
    }
}

/// Text of a thinking block, with nested `{text: {text: ...}}` wrappers unwrapped
fn thinking_text(part: &Value, style: ThinkingStyle) -> String {
    let primary = match style {
        ThinkingStyle::AnthropicThinking => "thinking",
        ThinkingStyle::AnthropicRedacted => "data",
        ThinkingStyle::GeminiThought | ThinkingStyle::Reasoning => "text",
    };

    [primary, "text", "thinking", "data", "content"]
        .iter()
        .find_map(|key| part.get(*key))
        .map(|v| extract_text(v, 0))
        .unwrap_or_default()
}

/// Flatten a text-like value. Strings pass through, objects are unwrapped
/// via their `text`/`thinking` field, arrays are concatenated.
pub fn extract_text(value: &Value, depth: usize) -> String {
    if depth > MAX_TEXT_DEPTH {
        return String::new();
    }
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("text")
            .or_else(|| map.get("thinking"))
            .map(|v| extract_text(v, depth + 1))
            .unwrap_or_default(),
        Value::Array(items) => items
            .iter()
            .map(|v| extract_text(v, depth + 1))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn classify_payload(raw: &Value, shape: ToolShape) -> Value {
    let found = match shape {
        ToolShape::Anthropic => raw.get("content"),
        ToolShape::Gemini => raw.pointer("/functionResponse/response"),
        ToolShape::Nested => raw.pointer("/tool_result/content"),
    };
    found.cloned().unwrap_or(Value::Null)
}

fn write_call_id(raw: &mut Value, shape: ToolShape, id: &str) {
    match shape {
        ToolShape::Anthropic => raw["id"] = json!(id),
        ToolShape::Gemini => {
            let part_level = raw.get("id").is_some();
            if part_level {
                raw["id"] = json!(id);
            }
            if !part_level || raw.pointer("/functionCall/id").is_some() {
                raw["functionCall"]["id"] = json!(id);
            }
        }
        ToolShape::Nested => raw["tool_use"]["id"] = json!(id),
    }
}

fn write_result_id(raw: &mut Value, shape: ToolShape, id: &str) {
    match shape {
        ToolShape::Anthropic => raw["tool_use_id"] = json!(id),
        ToolShape::Gemini => {
            let part_level = raw.get("id").is_some();
            if part_level {
                raw["id"] = json!(id);
            }
            if !part_level || raw.pointer("/functionResponse/id").is_some() {
                raw["functionResponse"]["id"] = json!(id);
            }
        }
        ToolShape::Nested => raw["tool_result"]["tool_use_id"] = json!(id),
    }
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_thinking_styles() {
        let gemini = classify(&json!({"thought": true, "text": "hmm", "thoughtSignature": "sig"}));
        let ContentBlock::Thinking(b) = gemini else { panic!("expected thinking") };
        assert_eq!(b.style, ThinkingStyle::GeminiThought);
        assert_eq!(b.text, "hmm");
        assert_eq!(b.signature.as_deref(), Some("sig"));

        let anthropic = classify(&json!({"type": "thinking", "thinking": "plan", "signature": "s"}));
        let ContentBlock::Thinking(b) = anthropic else { panic!("expected thinking") };
        assert_eq!(b.style, ThinkingStyle::AnthropicThinking);
        assert_eq!(b.text, "plan");

        let redacted = classify(&json!({"type": "redacted_thinking", "data": "opaque"}));
        let ContentBlock::Thinking(b) = redacted else { panic!("expected thinking") };
        assert_eq!(b.style, ThinkingStyle::AnthropicRedacted);
        assert_eq!(b.text, "opaque");
        assert!(b.signature.is_none());

        let reasoning = classify(&json!({"type": "reasoning", "text": "why", "signature": "s"}));
        assert!(matches!(reasoning, ContentBlock::Thinking(ThinkingBlock { style: ThinkingStyle::Reasoning, .. })));
    }

    #[test]
    fn test_signed_unknown_type_is_thinking() {
        let block = classify(&json!({"type": "mystery", "body": "x", "signature": "abc"}));
        assert!(block.is_thinking());

        // A recognized plain type stays plain
        let block = classify(&json!({"type": "text", "text": "x", "signature": "abc"}));
        assert!(block.is_plain());
    }

    #[test]
    fn test_tool_precedence_over_thinking() {
        let part = json!({
            "functionCall": {"name": "bash", "args": {"command": "ls"}},
            "thoughtSignature": "x".repeat(60),
        });
        let ContentBlock::ToolCall(call) = classify(&part) else { panic!("expected tool call") };
        assert_eq!(call.tool_name, "bash");
        assert_eq!(call.shape, ToolShape::Gemini);
        assert!(call.call_id.is_none());
    }

    #[test]
    fn test_classify_tool_forms() {
        let use_block = classify(&json!({"type": "tool_use", "id": "toolu_1", "name": "read", "input": {}}));
        assert!(matches!(&use_block, ContentBlock::ToolCall(c) if c.call_id.as_deref() == Some("toolu_1")));

        let result = classify(&json!({"type": "tool_result", "tool_use_id": "toolu_1", "content": "ok", "is_error": true}));
        let ContentBlock::ToolResult(r) = result else { panic!("expected result") };
        assert_eq!(r.call_id.as_deref(), Some("toolu_1"));
        assert!(r.is_error);
        assert_eq!(r.payload, json!("ok"));

        let fr = classify(&json!({"functionResponse": {"name": "read", "response": {"result": "x"}}, "id": "c1"}));
        let ContentBlock::ToolResult(r) = fr else { panic!("expected result") };
        assert_eq!(r.call_id.as_deref(), Some("c1"));
        assert_eq!(r.tool_name.as_deref(), Some("read"));

        let nested_call = classify(&json!({"tool_use": {"id": "n1", "name": "grep", "input": {}}}));
        assert!(nested_call.is_tool_call());
        let nested_result = classify(&json!({"tool_result": {"tool_use_id": "n1", "content": "x"}}));
        assert!(nested_result.is_tool_result());
    }

    #[test]
    fn test_garbage_is_plain() {
        for v in [json!(null), json!(42), json!("text"), json!([1, 2]), json!({"text": "hi"})] {
            let block = classify(&v);
            assert!(block.is_plain());
            assert_eq!(block.into_value(), v);
        }
    }

    #[test]
    fn test_nested_text_unwrapped() {
        let block = classify(&json!({"thought": true, "text": {"text": {"text": "deep"}}}));
        let ContentBlock::Thinking(b) = block else { panic!("expected thinking") };
        assert_eq!(b.text, "deep");
    }

    #[test]
    fn test_assigned_ids_written_back() {
        let ContentBlock::ToolCall(mut call) = classify(&json!({"functionCall": {"name": "bash", "args": {}}}))
        else {
            panic!("expected tool call")
        };
        call.call_id = Some("call-9".to_string());
        let out = ContentBlock::ToolCall(call).into_value();
        assert_eq!(out["functionCall"]["id"], "call-9");

        let ContentBlock::ToolResult(mut res) = classify(&json!({"type": "tool_result", "content": "x"}))
        else {
            panic!("expected result")
        };
        res.call_id = Some("call-9".to_string());
        let out = ContentBlock::ToolResult(res).into_value();
        assert_eq!(out["tool_use_id"], "call-9");
    }

    #[test]
    fn test_part_level_id_stays_part_level() {
        let v = json!({"functionCall": {"name": "bash", "args": {}}, "id": "call-1"});
        assert_eq!(classify(&v).into_value(), v);
    }
}
