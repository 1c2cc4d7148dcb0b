// 思维块规范化
// 去掉传输层注入的字段 (cache_control, providerOptions ...)，只保留目标协议需要的最小字段集

use serde_json::{json, Value};

use super::block::{classify, ContentBlock, ThinkingBlock, ThinkingStyle};

/// Minimal wire form of a thinking block in its own syntax
pub fn canonical_thinking_value(style: ThinkingStyle, text: &str, signature: Option<&str>) -> Value {
    let mut v = match style {
        ThinkingStyle::GeminiThought => json!({ "thought": true, "text": text }),
        ThinkingStyle::AnthropicThinking => json!({ "type": "thinking", "thinking": text }),
        ThinkingStyle::AnthropicRedacted => json!({ "type": "redacted_thinking", "data": text }),
        ThinkingStyle::Reasoning => json!({ "type": "reasoning", "text": text }),
    };

    if let Some(sig) = signature {
        let key = match style {
            ThinkingStyle::GeminiThought => "thoughtSignature",
            _ => "signature",
        };
        v[key] = json!(sig);
    }
    v
}

/// Canonicalize a thinking block. Style, text and signature are preserved;
/// everything else on the wire object is dropped. Idempotent.
pub fn sanitize_thinking(block: &ThinkingBlock) -> ThinkingBlock {
    ThinkingBlock::new(block.style, block.text.clone(), block.signature.clone())
}

/// Same as [`sanitize_thinking`] but with the signature replaced
pub fn sanitize_with_signature(block: &ThinkingBlock, signature: Option<String>) -> ThinkingBlock {
    ThinkingBlock::new(block.style, block.text.clone(), signature)
}

/// Sanitize any wire value. Non-thinking input is returned untouched.
pub fn sanitize_part(part: &Value) -> Value {
    match classify(part) {
        ContentBlock::Thinking(block) => ContentBlock::Thinking(sanitize_thinking(&block)).into_value(),
        _ => part.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_transport_metadata() {
        let part = json!({
            "type": "thinking",
            "thinking": "step one",
            "signature": "sig",
            "cache_control": {"type": "ephemeral"},
            "providerOptions": {"anthropic": {}}
        });
        assert_eq!(
            sanitize_part(&part),
            json!({"type": "thinking", "thinking": "step one", "signature": "sig"})
        );
    }

    #[test]
    fn test_format_preserving() {
        let gemini = json!({"thought": true, "text": {"text": "inner"}, "thoughtSignature": "s"});
        assert_eq!(
            sanitize_part(&gemini),
            json!({"thought": true, "text": "inner", "thoughtSignature": "s"})
        );

        let redacted = json!({"type": "redacted_thinking", "data": "blob", "extra": 1});
        assert_eq!(sanitize_part(&redacted), json!({"type": "redacted_thinking", "data": "blob"}));
    }

    #[test]
    fn test_idempotent_for_every_variant() {
        let samples = [
            json!({"thought": true, "text": "a", "thoughtSignature": "s", "x": 1}),
            json!({"type": "thinking", "thinking": {"text": "b"}, "signature": "s"}),
            json!({"type": "redacted_thinking", "data": "c"}),
            json!({"type": "reasoning", "text": "d"}),
            json!({"type": "unknown_kind", "signature": "s", "content": "e"}),
            json!({"thoughtSignature": "s", "text": "f"}),
            json!({"type": "tool_use", "id": "t", "name": "n", "input": {}}),
            json!({"functionResponse": {"name": "n", "response": {}}}),
            json!({"text": "plain"}),
            json!("garbage"),
            json!(null),
        ];
        for sample in samples {
            let once = sanitize_part(&sample);
            let twice = sanitize_part(&once);
            assert_eq!(once, twice, "not idempotent for {}", sample);
        }
    }
}
