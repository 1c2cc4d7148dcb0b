// 对话结构: Gemini `{role, parts}` 与 Anthropic `{role, content}` 共用同一套逻辑

use serde_json::{json, Value};

use super::block::{classify, ContentBlock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireShape {
    /// `[{role, parts: [...]}]`
    GeminiParts,
    /// `[{role, content: [...] | "..."}]`
    AnthropicContent,
}

impl WireShape {
    pub fn blocks_key(&self) -> &'static str {
        match self {
            WireShape::GeminiParts => "parts",
            WireShape::AnthropicContent => "content",
        }
    }

    pub fn default_producer_role(&self) -> &'static str {
        match self {
            WireShape::GeminiParts => "model",
            WireShape::AnthropicContent => "assistant",
        }
    }

    /// A plain text block in this syntax
    pub fn text_block(&self, text: &str) -> Value {
        match self {
            WireShape::GeminiParts => json!({ "text": text }),
            WireShape::AnthropicContent => json!({ "type": "text", "text": text }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    /// `model` / `assistant`
    Producer,
    /// `user` / `tool`
    Consumer,
    Other,
}

impl TurnRole {
    pub fn from_role(role: Option<&str>) -> Self {
        match role {
            Some("model") | Some("assistant") => TurnRole::Producer,
            // Gemini treats a missing role as user
            Some("user") | Some("tool") | None => TurnRole::Consumer,
            Some(_) => TurnRole::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub role: TurnRole,
    pub blocks: Vec<ContentBlock>,
    /// Original turn object with the blocks array taken out
    body: Value,
    /// False when the turn has no block array we can rewrite (string content, garbage)
    structured: bool,
}

impl Turn {
    fn from_value(mut body: Value, shape: WireShape) -> Self {
        let role = TurnRole::from_role(body.get("role").and_then(Value::as_str));
        let key = shape.blocks_key();

        let taken = match body.get_mut(key) {
            Some(v) if v.is_array() => Some(v.take()),
            _ => None,
        };

        match taken {
            Some(Value::Array(items)) => Turn {
                role,
                blocks: items.iter().map(classify).collect(),
                body,
                structured: true,
            },
            _ => Turn {
                role,
                blocks: Vec::new(),
                body,
                structured: false,
            },
        }
    }

    /// A turn created by the rewriter itself
    pub fn synthetic(role_name: &str, blocks: Vec<ContentBlock>) -> Self {
        Turn {
            role: TurnRole::from_role(Some(role_name)),
            blocks,
            body: json!({ "role": role_name }),
            structured: true,
        }
    }

    pub fn is_structured(&self) -> bool {
        self.structured
    }

    pub fn role_name(&self) -> Option<&str> {
        self.body.get("role").and_then(Value::as_str)
    }

    /// Turn string content (or a missing block array) into a rewritable block list.
    /// Returns false for non-object turns.
    pub fn make_structured(&mut self, shape: WireShape) -> bool {
        if self.structured {
            return true;
        }
        let Some(obj) = self.body.as_object_mut() else {
            return false;
        };
        match obj.remove(shape.blocks_key()) {
            Some(Value::String(s)) => {
                if !s.is_empty() {
                    self.blocks.push(ContentBlock::Plain(shape.text_block(&s)));
                }
            }
            Some(Value::Null) | None => {}
            Some(other) => {
                // Neither string nor array: leave the turn alone
                obj.insert(shape.blocks_key().to_string(), other);
                return false;
            }
        }
        self.structured = true;
        true
    }

    pub fn has_thinking(&self) -> bool {
        self.blocks.iter().any(ContentBlock::is_thinking)
    }

    pub fn has_tool_call(&self) -> bool {
        self.blocks.iter().any(ContentBlock::is_tool_call)
    }

    /// Tool-result turn: a consumer turn carrying at least one tool result
    pub fn is_tool_result_turn(&self) -> bool {
        self.role == TurnRole::Consumer && self.blocks.iter().any(ContentBlock::is_tool_result)
    }

    pub fn into_value(self, shape: WireShape) -> Value {
        if !self.structured {
            return self.body;
        }
        let mut body = self.body;
        let blocks: Vec<Value> = self.blocks.into_iter().map(ContentBlock::into_value).collect();
        if let Some(obj) = body.as_object_mut() {
            obj.insert(shape.blocks_key().to_string(), Value::Array(blocks));
        }
        body
    }
}

/// One request's turn sequence in a single wire shape
#[derive(Debug, Clone)]
pub struct Conversation {
    pub shape: WireShape,
    pub turns: Vec<Turn>,
}

impl Conversation {
    /// Detect the shape from the first turn carrying a block array.
    /// Hands the values back untouched when no turn looks like a conversation turn.
    pub fn from_values(values: Vec<Value>) -> Result<Self, Vec<Value>> {
        let Some(shape) = values.iter().find_map(detect_shape) else {
            return Err(values);
        };
        let turns = values.into_iter().map(|v| Turn::from_value(v, shape)).collect();
        Ok(Conversation { shape, turns })
    }

    pub fn into_values(self) -> Vec<Value> {
        let shape = self.shape;
        self.turns.into_iter().map(|t| t.into_value(shape)).collect()
    }

    /// Role string used by producer turns in this conversation
    pub fn producer_role_name(&self) -> String {
        self.turns
            .iter()
            .filter(|t| t.role == TurnRole::Producer)
            .find_map(|t| t.role_name().map(str::to_string))
            .unwrap_or_else(|| self.shape.default_producer_role().to_string())
    }
}

fn detect_shape(turn: &Value) -> Option<WireShape> {
    let obj = turn.as_object()?;
    if obj.get("parts").is_some_and(Value::is_array) {
        return Some(WireShape::GeminiParts);
    }
    match obj.get("content") {
        Some(Value::Array(_)) => Some(WireShape::AnthropicContent),
        Some(Value::String(_)) if obj.contains_key("role") => Some(WireShape::AnthropicContent),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_is_lossless() {
        let values = vec![
            json!({"role": "user", "parts": [{"text": "hi"}], "extra": 1}),
            json!({"role": "model", "parts": [
                {"thought": true, "text": "t", "thoughtSignature": "s", "junk": true},
                {"functionCall": {"name": "bash", "args": {"c": 1}}}
            ]}),
            json!("not a turn"),
        ];
        let conv = Conversation::from_values(values.clone()).unwrap();
        assert_eq!(conv.shape, WireShape::GeminiParts);
        assert_eq!(conv.into_values(), values);
    }

    #[test]
    fn test_anthropic_string_content() {
        let values = vec![
            json!({"role": "user", "content": "hello"}),
            json!({"role": "assistant", "content": [{"type": "text", "text": "hey"}]}),
        ];
        let mut conv = Conversation::from_values(values.clone()).unwrap();
        assert_eq!(conv.shape, WireShape::AnthropicContent);
        assert!(!conv.turns[0].is_structured());
        assert_eq!(conv.producer_role_name(), "assistant");

        assert!(conv.turns[0].make_structured(WireShape::AnthropicContent));
        let out = conv.into_values();
        assert_eq!(out[0]["content"], json!([{"type": "text", "text": "hello"}]));
        assert_eq!(out[1], values[1]);
    }

    #[test]
    fn test_unrecognized_input_is_not_a_conversation() {
        let garbage = vec![json!(1), json!({"a": 2})];
        assert_eq!(Conversation::from_values(garbage.clone()).err(), Some(garbage));
        assert!(Conversation::from_values(Vec::new()).is_err());
    }
}
