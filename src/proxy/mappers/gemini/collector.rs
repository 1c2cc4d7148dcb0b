// 响应侧签名收集: 只记录本系统亲眼看到上游签发的签名
use serde_json::Value;

use crate::proxy::mappers::content::{classify, ContentBlock};
use crate::proxy::signature_cache::{is_well_formed_signature, SignatureStore};

/// Record every `(thinking text, signature)` pair an upstream response carries.
///
/// Handles Gemini `candidates[].content.parts[]` (thought text split across
/// parts, signature on the last thought part or on the following
/// `functionCall` part) and Anthropic `content[]`. Returns how many pairs
/// were recorded.
pub fn record_response_signatures(
    response: &Value,
    session_id: Option<&str>,
    store: &dyn SignatureStore,
) -> usize {
    let Some(session_id) = session_id else {
        return 0;
    };
    let mut recorded = 0;

    if let Some(candidates) = response.get("candidates").and_then(Value::as_array) {
        for candidate in candidates {
            if let Some(parts) = candidate.pointer("/content/parts").and_then(Value::as_array) {
                recorded += record_parts(parts, session_id, store);
            }
        }
    }

    if let Some(blocks) = response.get("content").and_then(Value::as_array) {
        recorded += record_parts(blocks, session_id, store);
    }

    if recorded > 0 {
        tracing::debug!(
            "[SignatureCache] Recorded {} signature(s) for session {}",
            recorded,
            session_id
        );
    }
    recorded
}

fn record_parts(parts: &[Value], session_id: &str, store: &dyn SignatureStore) -> usize {
    let mut recorded = 0;
    let mut pending_text = String::new();

    for part in parts {
        match classify(part) {
            ContentBlock::Thinking(block) => {
                pending_text.push_str(&block.text);
                if let Some(sig) = block.signature.as_deref().filter(|s| is_well_formed_signature(s)) {
                    store.record(session_id, &pending_text, sig);
                    recorded += 1;
                    pending_text.clear();
                }
            }
            ContentBlock::ToolCall(_) => {
                let sig = part
                    .get("thoughtSignature")
                    .and_then(Value::as_str)
                    .filter(|s| is_well_formed_signature(s));
                if let (Some(sig), false) = (sig, pending_text.is_empty()) {
                    store.record(session_id, &pending_text, sig);
                    recorded += 1;
                }
                pending_text.clear();
            }
            _ => pending_text.clear(),
        }
    }
    recorded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::signature_cache::{SignatureCache, SKIP_SIGNATURE_VALIDATOR};
    use serde_json::json;

    fn sig(c: char) -> String {
        std::iter::repeat(c).take(72).collect()
    }

    #[test]
    fn test_records_streamed_thought_parts() {
        let store = SignatureCache::new();
        let response = json!({"candidates": [{"content": {"role": "model", "parts": [
            {"thought": true, "text": "first half, "},
            {"thought": true, "text": "second half", "thoughtSignature": sig('a')},
            {"text": "answer"}
        ]}}]});

        assert_eq!(record_response_signatures(&response, Some("s1"), &store), 1);
        assert_eq!(store.lookup("s1", "first half, second half"), Some(sig('a')));
    }

    #[test]
    fn test_signature_on_function_call_part() {
        let store = SignatureCache::new();
        let response = json!({"candidates": [{"content": {"parts": [
            {"thought": true, "text": "need ls"},
            {"functionCall": {"name": "ls", "args": {}}, "thoughtSignature": sig('b')}
        ]}}]});
        assert_eq!(record_response_signatures(&response, Some("s1"), &store), 1);
        assert_eq!(store.lookup("s1", "need ls"), Some(sig('b')));
    }

    #[test]
    fn test_anthropic_content_shape() {
        let store = SignatureCache::new();
        let response = json!({"content": [
            {"type": "thinking", "thinking": "plan", "signature": sig('c')},
            {"type": "text", "text": "done"}
        ]});
        assert_eq!(record_response_signatures(&response, Some("s2"), &store), 1);
        assert_eq!(store.lookup("s2", "plan"), Some(sig('c')));
    }

    #[test]
    fn test_skips_bypass_short_and_sessionless() {
        let store = SignatureCache::new();
        let response = json!({"content": [
            {"type": "thinking", "thinking": "a", "signature": SKIP_SIGNATURE_VALIDATOR},
            {"type": "thinking", "thinking": "b", "signature": "short"}
        ]});
        assert_eq!(record_response_signatures(&response, Some("s3"), &store), 0);

        let signed = json!({"content": [{"type": "thinking", "thinking": "c", "signature": sig('d')}]});
        assert_eq!(record_response_signatures(&signed, None, &store), 0);
        assert!(store.is_empty());
    }
}
