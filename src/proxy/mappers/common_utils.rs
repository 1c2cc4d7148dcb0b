// Common payload hygiene shared by every protocol path
use serde_json::Value;

/// Fields that hold a turn array directly
const CONVERSATION_KEYS: &[&str] = &["contents", "messages"];
/// Wrapper fields that may carry a nested copy of the request
const WRAPPER_KEYS: &[&str] = &["request"];

const DEFAULT_MAX_DEPTH: usize = 3;

/// 递归移除 cache_control 字段 (客户端注入的缓存提示, 上游会拒绝)
pub fn deep_clean_cache_control(value: &mut Value) -> usize {
    match value {
        Value::Object(map) => {
            let mut removed = usize::from(map.remove("cache_control").is_some());
            for v in map.values_mut() {
                removed += deep_clean_cache_control(v);
            }
            removed
        }
        Value::Array(arr) => arr.iter_mut().map(deep_clean_cache_control).sum(),
        _ => 0,
    }
}

/// 深度迭代清理客户端发送的 [undefined] 脏字符串，防止 Gemini 接口校验失败
pub fn deep_clean_undefined(value: &mut Value) {
    match value {
        Value::Object(map) => {
            // 移除值为 "[undefined]" 的键
            map.retain(|_, v| v.as_str() != Some("[undefined]"));
            for v in map.values_mut() {
                deep_clean_undefined(v);
            }
        }
        Value::Array(arr) => {
            for v in arr.iter_mut() {
                deep_clean_undefined(v);
            }
        }
        _ => {}
    }
}

/// Finds the conversation arrays inside a request payload.
///
/// Only known container fields are entered: `contents` / `messages`, the same
/// fields one wrapper level down (`request.contents`), and a top-level array.
/// Depth is bounded; `serde_json::Value` owns its children so it cannot alias.
#[derive(Debug, Clone, Copy)]
pub struct ConversationVisitor {
    max_depth: usize,
}

impl Default for ConversationVisitor {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ConversationVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Calls `f` once per conversation array found. Returns how many were visited.
    pub fn visit<F>(&self, payload: &mut Value, mut f: F) -> usize
    where
        F: FnMut(&mut Vec<Value>),
    {
        if let Value::Array(turns) = payload {
            f(turns);
            return 1;
        }
        let mut visited = 0;
        self.walk(payload, 0, &mut f, &mut visited);
        visited
    }

    fn walk<F>(&self, node: &mut Value, depth: usize, f: &mut F, visited: &mut usize)
    where
        F: FnMut(&mut Vec<Value>),
    {
        if depth > self.max_depth {
            tracing::debug!("[Visitor] Depth limit {} reached, not descending", self.max_depth);
            return;
        }
        let Some(map) = node.as_object_mut() else {
            return;
        };

        for key in CONVERSATION_KEYS {
            if let Some(Value::Array(turns)) = map.get_mut(*key) {
                f(turns);
                *visited += 1;
            }
        }
        for key in WRAPPER_KEYS {
            if let Some(inner) = map.get_mut(*key) {
                self.walk(inner, depth + 1, f, visited);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deep_clean_cache_control() {
        let mut v = json!({
            "messages": [{"content": [{"type": "text", "text": "x", "cache_control": {"type": "ephemeral"}}]}],
            "cache_control": 1
        });
        assert_eq!(deep_clean_cache_control(&mut v), 2);
        assert_eq!(v, json!({"messages": [{"content": [{"type": "text", "text": "x"}]}]}));
    }

    #[test]
    fn test_deep_clean_undefined() {
        let mut v = json!({
            "a": "[undefined]",
            "b": {"c": "[undefined]", "d": 1},
            "e": [{"f": "[undefined]"}, "[undefined]"]
        });
        deep_clean_undefined(&mut v);
        // Array elements are values, not keys: left alone
        assert_eq!(v, json!({"b": {"d": 1}, "e": [{}, "[undefined]"]}));
    }

    #[test]
    fn test_visitor_finds_known_containers_only() {
        let mut v = json!({
            "contents": [{"role": "user", "parts": []}],
            "request": {"messages": [{"role": "user", "content": "x"}]},
            "metadata": {"contents": [{"role": "user", "parts": []}]}
        });
        let mut seen = Vec::new();
        let count = ConversationVisitor::new().visit(&mut v, |turns| seen.push(turns.len()));
        assert_eq!(count, 2);
        assert_eq!(seen, vec![1, 1]);
    }

    #[test]
    fn test_visitor_top_level_array_and_depth_bound() {
        let mut arr = json!([{"role": "user", "parts": []}]);
        assert_eq!(ConversationVisitor::new().visit(&mut arr, |_| {}), 1);

        let mut nested = json!({"request": {"request": {"contents": []}}});
        assert_eq!(ConversationVisitor::with_max_depth(1).visit(&mut nested, |_| {}), 0);
        assert_eq!(ConversationVisitor::with_max_depth(2).visit(&mut nested, |_| {}), 1);
    }
}
