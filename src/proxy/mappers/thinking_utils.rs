// 思维块调和引擎
// 按模型家族决定: 全部剥离 (Claude 默认) 或 按签名信任逐块过滤

use super::content::{
    sanitize_with_signature, ContentBlock, Conversation, ThinkingBlock, ThinkingStyle, Turn,
    TurnRole, WireShape,
};
use super::thinking_recovery::{
    close_tool_loop_for_thinking, needs_tool_loop_closure, strip_all_thinking_blocks,
};
use crate::proxy::common::model_mapping::ModelFamily;
use crate::proxy::signature_cache::{
    is_trusted, is_well_formed_signature, SignatureStore, SKIP_SIGNATURE_VALIDATOR,
};

/// Text carried by injected bypass thinking blocks
pub const BYPASS_THINKING_TEXT: &str = "Thinking...";

/// Per-request reconciliation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkingPolicy {
    pub family: ModelFamily,
    /// Opt-in: run the trust path even for the signature-strict family
    pub keep_claude_thinking: bool,
    pub close_tool_loops: bool,
}

impl ThinkingPolicy {
    pub fn new(family: ModelFamily) -> Self {
        Self {
            family,
            keep_claude_thinking: false,
            close_tool_loops: true,
        }
    }

    /// Unconditional strip applies to the strict family unless overridden
    pub fn strips_all(&self) -> bool {
        self.family.is_signature_strict() && !self.keep_claude_thinking
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Removed by the unconditional strip
    pub stripped: usize,
    /// Signatures removed from tool call parts by the unconditional strip
    pub stripped_call_signatures: usize,
    /// Trusted and forwarded as-is
    pub kept: usize,
    /// Arrived unsigned (or truncated), signature restored from the store
    pub restored: usize,
    pub dropped_foreign: usize,
    pub dropped_unsigned: usize,
    /// Unverified thinking trimmed from the end of a producer turn
    pub trimmed_trailing: usize,
    /// Thinking blocks moved ahead of other content
    pub moved: usize,
    pub bypass_injected: usize,
    /// Split thought parts folded back into the block they were signed as
    pub merged_parts: usize,
    /// Turns left with no blocks after thinking removal
    pub emptied_turns_removed: usize,
    pub tool_loop_closed: bool,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        *self
            == ReconcileReport {
                kept: self.kept,
                ..Default::default()
            }
    }
}

enum Verdict {
    /// Own tag equals the cached tag
    Trusted,
    /// Unsigned but the store knows the tag for this text
    Restorable(String),
    Foreign,
    Unsigned,
}

impl Verdict {
    fn is_verified(&self) -> bool {
        matches!(self, Verdict::Trusted | Verdict::Restorable(_))
    }
}

fn evaluate(block: &ThinkingBlock, store: &dyn SignatureStore, session_id: Option<&str>) -> Verdict {
    let own = block
        .signature
        .as_deref()
        .filter(|s| is_well_formed_signature(s));

    if is_trusted(store, session_id, &block.text, own) {
        return Verdict::Trusted;
    }
    if own.is_some() {
        return Verdict::Foreign;
    }
    match session_id.and_then(|sid| store.lookup(sid, &block.text)) {
        Some(cached) if is_well_formed_signature(&cached) => Verdict::Restorable(cached),
        _ => Verdict::Unsigned,
    }
}

/// Reconcile every thinking block in the conversation for the target family.
///
/// Infallible. Structural garbage is passed through untouched.
pub fn reconcile_thinking(
    conversation: &mut Conversation,
    store: &dyn SignatureStore,
    session_id: Option<&str>,
    policy: &ThinkingPolicy,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let had_blocks: Vec<bool> = conversation
        .turns
        .iter()
        .map(|t| t.is_structured() && !t.blocks.is_empty())
        .collect();

    if policy.strips_all() {
        let (stripped, call_sigs) = strip_all_thinking_blocks(conversation);
        report.stripped = stripped;
        report.stripped_call_signatures = call_sigs;
    } else {
        for turn in conversation.turns.iter_mut() {
            filter_turn_by_trust(turn, store, session_id, &mut report);
        }
    }

    remove_emptied_turns(conversation, &had_blocks, &mut report);

    for turn in conversation.turns.iter_mut() {
        if turn.role == TurnRole::Producer {
            report.moved += move_thinking_to_front(turn);
        }
    }

    // Decided before injection: the bypass block would otherwise mask a truncated loop
    let close_loop = !policy.strips_all()
        && policy.family.is_signature_strict()
        && policy.close_tool_loops
        && needs_tool_loop_closure(conversation);

    // Strict family: every tool-calling turn opens with thinking, stripped or not
    if policy.family.is_signature_strict() {
        let shape = conversation.shape;
        for turn in conversation.turns.iter_mut() {
            if turn.role == TurnRole::Producer && ensure_thinking_before_tool_call(turn, shape) {
                report.bypass_injected += 1;
            }
        }
    }

    if close_loop {
        close_tool_loop_for_thinking(conversation);
        report.tool_loop_closed = true;
    }

    if !report.is_noop() {
        tracing::info!(
            "[Thinking-Reconcile] family={} strip_all={} report={:?}",
            policy.family.as_str(),
            policy.strips_all(),
            report
        );
    }
    report
}

/// Trust path for one turn: trim trailing unverified thinking (producer
/// turns), then keep trusted blocks, restore cached tags, drop the rest.
fn filter_turn_by_trust(
    turn: &mut Turn,
    store: &dyn SignatureStore,
    session_id: Option<&str>,
    report: &mut ReconcileReport,
) {
    if !turn.has_thinking() {
        return;
    }

    let blocks = std::mem::take(&mut turn.blocks);
    let blocks = merge_split_thinking(blocks, store, session_id, report);

    let mut judged: Vec<(ContentBlock, Option<Verdict>)> = blocks
        .into_iter()
        .map(|block| {
            let verdict = match &block {
                ContentBlock::Thinking(b) => Some(evaluate(b, store, session_id)),
                _ => None,
            };
            (block, verdict)
        })
        .collect();

    if turn.role == TurnRole::Producer {
        while let Some((_, Some(verdict))) = judged.last() {
            if verdict.is_verified() {
                break;
            }
            judged.pop();
            report.trimmed_trailing += 1;
        }
    }

    for (block, verdict) in judged {
        match (block, verdict) {
            (ContentBlock::Thinking(b), Some(Verdict::Trusted)) => {
                let signature = b.signature.clone();
                turn.blocks
                    .push(ContentBlock::Thinking(sanitize_with_signature(&b, signature)));
                report.kept += 1;
            }
            (ContentBlock::Thinking(b), Some(Verdict::Restorable(cached))) => {
                turn.blocks
                    .push(ContentBlock::Thinking(sanitize_with_signature(&b, Some(cached))));
                report.restored += 1;
            }
            (ContentBlock::Thinking(_), Some(Verdict::Foreign)) => report.dropped_foreign += 1,
            (ContentBlock::Thinking(_), _) => report.dropped_unsigned += 1,
            (other, _) => turn.blocks.push(other),
        }
    }
}

/// Upstream streams one thought as several parts and signs only the last one
/// (or the following `functionCall`); the tag is recorded for the joined text.
/// Rejoin such runs when the joined text verifies, so echoed history is trusted.
fn merge_split_thinking(
    blocks: Vec<ContentBlock>,
    store: &dyn SignatureStore,
    session_id: Option<&str>,
    report: &mut ReconcileReport,
) -> Vec<ContentBlock> {
    let mut out = Vec::with_capacity(blocks.len());
    let mut run: Vec<ThinkingBlock> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Thinking(b) => {
                // A signed part ends a run
                let continues = run
                    .last()
                    .is_some_and(|prev| prev.style == b.style && !has_real_signature(prev));
                if !continues {
                    flush_thinking_run(&mut run, &mut out, store, session_id, report);
                }
                run.push(b);
            }
            other => {
                flush_thinking_run(&mut run, &mut out, store, session_id, report);
                out.push(other);
            }
        }
    }
    flush_thinking_run(&mut run, &mut out, store, session_id, report);
    out
}

fn has_real_signature(block: &ThinkingBlock) -> bool {
    block.signature.as_deref().is_some_and(is_well_formed_signature)
}

fn flush_thinking_run(
    run: &mut Vec<ThinkingBlock>,
    out: &mut Vec<ContentBlock>,
    store: &dyn SignatureStore,
    session_id: Option<&str>,
    report: &mut ReconcileReport,
) {
    if run.len() > 1 {
        let text: String = run.iter().map(|b| b.text.as_str()).collect();
        if let Some(last) = run.last() {
            let joined = ThinkingBlock::new(last.style, text, last.signature.clone());
            if evaluate(&joined, store, session_id).is_verified() {
                tracing::debug!("[Thinking-Reconcile] Rejoined {} split thought parts", run.len());
                report.merged_parts += run.len() - 1;
                run.clear();
                out.push(ContentBlock::Thinking(joined));
                return;
            }
        }
    }
    out.extend(run.drain(..).map(ContentBlock::Thinking));
}

/// Drop turns whose only content was thinking. Turns that arrived empty stay.
fn remove_emptied_turns(conversation: &mut Conversation, had_blocks: &[bool], report: &mut ReconcileReport) {
    let mut idx = 0;
    conversation.turns.retain(|turn| {
        let had = had_blocks.get(idx).copied().unwrap_or(false);
        idx += 1;
        let emptied = had && turn.blocks.is_empty();
        if emptied {
            report.emptied_turns_removed += 1;
        }
        !emptied
    });
}

/// 将思维块稳定地排到最前面. Returns how many thinking blocks changed position.
pub fn move_thinking_to_front(turn: &mut Turn) -> usize {
    let Some(first_other) = turn.blocks.iter().position(|b| !b.is_thinking()) else {
        return 0;
    };
    let misplaced = turn.blocks[first_other..]
        .iter()
        .filter(|b| b.is_thinking())
        .count();
    if misplaced == 0 {
        return 0;
    }

    let (thinking, rest): (Vec<_>, Vec<_>) =
        turn.blocks.drain(..).partition(ContentBlock::is_thinking);
    turn.blocks.extend(thinking);
    turn.blocks.extend(rest);

    tracing::debug!("[Thinking-Reconcile] Moved {} thinking block(s) to turn start", misplaced);
    misplaced
}

/// The strict family requires a producer turn with tool calls to open with
/// thinking. Inject a bypass-tagged block at the turn start when none
/// survived. Returns true when a block was injected.
pub fn ensure_thinking_before_tool_call(turn: &mut Turn, shape: WireShape) -> bool {
    if !turn.has_tool_call() {
        return false;
    }
    if turn.has_thinking() {
        // Out of order: move instead of duplicating
        move_thinking_to_front(turn);
        return false;
    }

    turn.blocks.insert(0, ContentBlock::Thinking(bypass_block(shape)));
    true
}

/// A thinking block tagged with the public bypass sentinel
pub fn bypass_block(shape: WireShape) -> ThinkingBlock {
    let style = match shape {
        WireShape::GeminiParts => ThinkingStyle::GeminiThought,
        WireShape::AnthropicContent => ThinkingStyle::AnthropicThinking,
    };
    ThinkingBlock::new(
        style,
        BYPASS_THINKING_TEXT,
        Some(SKIP_SIGNATURE_VALIDATOR.to_string()),
    )
}
