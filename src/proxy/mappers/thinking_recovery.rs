use super::content::{ContentBlock, Conversation, Turn, TurnRole};

/// Synthetic model acknowledgement appended when closing a broken tool loop
pub const TOOL_LOOP_ACK_TEXT: &str = "[Tool execution completed.]";
/// Synthetic user continuation appended after the acknowledgement
pub const TOOL_LOOP_CONTINUE_TEXT: &str = "[Continue]";

/// 剥离所有思维块
///
/// Returns the number of removed blocks. Signatures riding on tool call
/// parts are removed as well; the count of those is returned separately.
pub fn strip_all_thinking_blocks(conversation: &mut Conversation) -> (usize, usize) {
    let mut stripped = 0;
    let mut call_signatures = 0;

    for turn in conversation.turns.iter_mut() {
        let before = turn.blocks.len();
        turn.blocks.retain(|b| !b.is_thinking());
        stripped += before - turn.blocks.len();

        for block in turn.blocks.iter_mut() {
            if let ContentBlock::ToolCall(call) = block {
                if call.strip_signature() {
                    call_signatures += 1;
                }
            }
        }
    }

    if stripped > 0 || call_signatures > 0 {
        tracing::debug!(
            "[Thinking-Recovery] Stripped {} thinking blocks and {} tool call signatures",
            stripped,
            call_signatures
        );
    }
    (stripped, call_signatures)
}

/// Mid tool loop whose issuing turn does not open with a thinking block.
///
/// True when the last turn is a tool-result turn and the nearest producer
/// turn before it issued tool calls without leading thinking (e.g. after
/// context truncation).
pub fn needs_tool_loop_closure(conversation: &Conversation) -> bool {
    let Some((last_idx, last)) = conversation
        .turns
        .iter()
        .enumerate()
        .rev()
        .find(|(_, t)| t.role != TurnRole::Other)
    else {
        return false;
    };
    if !last.is_tool_result_turn() {
        return false;
    }

    let issuer = conversation.turns[..last_idx]
        .iter()
        .rev()
        .find(|t| t.role == TurnRole::Producer);

    match issuer {
        Some(turn) if turn.has_tool_call() => {
            !turn.blocks.first().map(ContentBlock::is_thinking).unwrap_or(false)
        }
        _ => false,
    }
}

/// 针对思维模型关闭工具循环
///
/// Appends a synthetic model acknowledgement and a user continuation so the
/// next real turn starts outside the broken loop. History is left untouched.
pub fn close_tool_loop_for_thinking(conversation: &mut Conversation) {
    let shape = conversation.shape;
    let producer_role = conversation.producer_role_name();

    conversation.turns.push(Turn::synthetic(
        &producer_role,
        vec![ContentBlock::Plain(shape.text_block(TOOL_LOOP_ACK_TEXT))],
    ));
    conversation.turns.push(Turn::synthetic(
        "user",
        vec![ContentBlock::Plain(shape.text_block(TOOL_LOOP_CONTINUE_TEXT))],
    ));

    tracing::info!("[Thinking-Recovery] Closed open tool loop with synthetic turns");
}
