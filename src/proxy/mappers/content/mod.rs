// 统一内容模型
// 三种线格式 (Gemini / Anthropic / generic reasoning) 在这里被分类为同一个变体类型，
// 下游逻辑只处理变体，输出时再展开回原始格式。

pub mod block;
pub mod conversation;
pub mod sanitize;

pub use block::{
    classify, extract_text, ContentBlock, ThinkingBlock, ThinkingStyle, ToolCallBlock,
    ToolResultBlock, ToolShape,
};
pub use conversation::{Conversation, Turn, TurnRole, WireShape};
pub use sanitize::{canonical_thinking_value, sanitize_part, sanitize_thinking, sanitize_with_signature};
