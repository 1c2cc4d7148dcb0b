// 工具调用配对校验与修复
// 每个 tool call 必须在之后的回合里恰好有一个 tool result

use std::collections::{HashMap, HashSet, VecDeque};

use super::content::{
    ContentBlock, Conversation, ToolResultBlock, ToolShape, Turn, TurnRole, WireShape,
};
use serde_json::json;

/// Payload of synthesized results for calls that never got one
pub const TOOL_RESPONSE_UNAVAILABLE: &str = "tool response unavailable";

const UNNAMED_TOOL: &str = "<unnamed>";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairingReport {
    /// Call ids with no result in any later turn, in issue order
    pub orphaned_calls: Vec<String>,
    /// Result ids with no earlier originating call
    pub orphaned_results: Vec<String>,
    /// Result ids whose call was already answered
    pub duplicate_results: Vec<String>,
    /// Call ids issued more than once
    pub duplicate_calls: Vec<String>,
    pub unidentified_calls: usize,
    pub unidentified_results: usize,
}

impl PairingReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_calls.is_empty()
            && self.orphaned_results.is_empty()
            && self.duplicate_results.is_empty()
            && self.duplicate_calls.is_empty()
            && self.unidentified_calls == 0
            && self.unidentified_results == 0
    }
}

/// Read-only correlation scan. Results of a turn are matched before that
/// turn's own calls are registered, so a result must follow its call.
pub fn validate(conversation: &Conversation) -> PairingReport {
    let mut report = PairingReport::default();
    let mut issued: HashSet<&str> = HashSet::new();
    let mut pending: Vec<&str> = Vec::new();

    for turn in &conversation.turns {
        for block in &turn.blocks {
            let ContentBlock::ToolResult(result) = block else {
                continue;
            };
            match result.call_id.as_deref() {
                None => report.unidentified_results += 1,
                Some(id) => {
                    if let Some(pos) = pending.iter().position(|p| *p == id) {
                        pending.remove(pos);
                    } else if issued.contains(id) {
                        report.duplicate_results.push(id.to_string());
                    } else {
                        report.orphaned_results.push(id.to_string());
                    }
                }
            }
        }

        for block in &turn.blocks {
            let ContentBlock::ToolCall(call) = block else {
                continue;
            };
            match call.call_id.as_deref() {
                None => report.unidentified_calls += 1,
                Some(id) if !issued.insert(id) => report.duplicate_calls.push(id.to_string()),
                Some(id) => pending.push(id),
            }
        }
    }

    report.orphaned_calls = pending.into_iter().map(str::to_string).collect();
    report
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryLevel {
    /// (a) the result's own id is still pending
    Exact,
    /// (b) oldest pending call with the same tool name
    Name,
    /// (c) borrowed from the pool of calls nobody asked for by name
    Orphan,
    /// (d) nothing available; fresh id that correlates to nothing
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    pub id: String,
    pub level: RecoveryLevel,
    /// Set for the guessing levels only
    pub warning: Option<String>,
}

/// Outstanding calls for one repair pass. Built fresh per pass, never shared.
#[derive(Debug, Default)]
pub struct PendingCallIndex {
    /// FIFO of outstanding ids per tool name
    by_name: HashMap<String, VecDeque<String>>,
    /// Calls whose name no unidentified result is looking for
    orphans: VecDeque<String>,
    /// Calls that a later result names by exact id
    reserved: HashSet<String>,
}

impl PendingCallIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool_name: &str, call_id: impl Into<String>) {
        self.by_name
            .entry(tool_name.to_string())
            .or_default()
            .push_back(call_id.into());
    }

    pub fn register_orphan(&mut self, call_id: impl Into<String>) {
        self.orphans.push_back(call_id.into());
    }

    pub fn reserve(&mut self, call_id: impl Into<String>) {
        self.reserved.insert(call_id.into());
    }

    pub fn is_pending(&self, call_id: &str) -> bool {
        self.reserved.contains(call_id)
            || self.orphans.iter().any(|id| id == call_id)
            || self.by_name.values().any(|q| q.iter().any(|id| id == call_id))
    }

    pub fn is_empty(&self) -> bool {
        self.reserved.is_empty() && self.orphans.is_empty() && self.by_name.values().all(VecDeque::is_empty)
    }

    fn take_id(&mut self, call_id: &str) -> bool {
        if self.reserved.remove(call_id) {
            return true;
        }
        if let Some(pos) = self.orphans.iter().position(|id| id == call_id) {
            self.orphans.remove(pos);
            return true;
        }
        for queue in self.by_name.values_mut() {
            if let Some(pos) = queue.iter().position(|id| id == call_id) {
                queue.remove(pos);
                return true;
            }
        }
        false
    }

    /// Correlate one incoming result, consuming the matched call.
    pub fn recover(&mut self, tool_name: Option<&str>, call_id: Option<&str>) -> Recovery {
        if let Some(id) = call_id {
            if self.take_id(id) {
                return Recovery {
                    id: id.to_string(),
                    level: RecoveryLevel::Exact,
                    warning: None,
                };
            }
        }

        if let Some(name) = tool_name {
            if let Some(id) = self.by_name.get_mut(name).and_then(VecDeque::pop_front) {
                tracing::debug!("[Tool-Pairing] Recovered id {} for '{}' by name", id, name);
                return Recovery {
                    id,
                    level: RecoveryLevel::Name,
                    warning: None,
                };
            }
        }

        let name = tool_name.unwrap_or(UNNAMED_TOOL);
        if let Some(id) = self.orphans.pop_front() {
            let warning = format!(
                "Tool result for '{}' matched to orphaned call {} (no pending call with that name)",
                name, id
            );
            tracing::warn!("[Tool-Pairing] {}", warning);
            return Recovery {
                id,
                level: RecoveryLevel::Orphan,
                warning: Some(warning),
            };
        }

        let id = format!("toolu_placeholder_{}", uuid::Uuid::new_v4().simple());
        let warning = format!(
            "Tool result for '{}' has no matching call; assigned placeholder id {}",
            name, id
        );
        tracing::warn!("[Tool-Pairing] {}", warning);
        Recovery {
            id,
            level: RecoveryLevel::Placeholder,
            warning: Some(warning),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepairOutcome {
    pub before: PairingReport,
    pub after: PairingReport,
    pub assigned_call_ids: usize,
    pub recovered_results: usize,
    pub dropped_duplicates: usize,
    /// Placeholder-level results rewritten as plain text
    pub demoted_results: usize,
    pub synthesized_results: usize,
    pub warnings: Vec<String>,
}

/// Validate, and repair when `auto_fix` is on. A clean conversation is left untouched.
pub fn pair_tool_calls(conversation: &mut Conversation, auto_fix: bool) -> RepairOutcome {
    let before = validate(conversation);
    if before.is_clean() {
        return RepairOutcome {
            after: before.clone(),
            before,
            ..Default::default()
        };
    }
    if !auto_fix {
        tracing::warn!("[Tool-Pairing] Unpaired tool blocks left as-is (auto-fix off): {:?}", before);
        return RepairOutcome {
            after: before.clone(),
            before,
            ..Default::default()
        };
    }
    repair(conversation)
}

/// Per-id facts needed before the sequential pass
struct Lookahead {
    /// Last turn index holding a result for this id
    last_result_turn: HashMap<String, usize>,
    /// Tool names of results that cannot match by exact id
    wanted_names: HashSet<String>,
}

impl Lookahead {
    fn scan(conversation: &Conversation) -> Self {
        let mut first_call_turn: HashMap<&str, usize> = HashMap::new();
        for (ti, turn) in conversation.turns.iter().enumerate() {
            for block in &turn.blocks {
                if let ContentBlock::ToolCall(call) = block {
                    if let Some(id) = call.call_id.as_deref() {
                        first_call_turn.entry(id).or_insert(ti);
                    }
                }
            }
        }

        let mut last_result_turn = HashMap::new();
        let mut wanted_names = HashSet::new();
        for (ti, turn) in conversation.turns.iter().enumerate() {
            for block in &turn.blocks {
                let ContentBlock::ToolResult(result) = block else {
                    continue;
                };
                let exact = result
                    .call_id
                    .as_deref()
                    .and_then(|id| first_call_turn.get(id))
                    .is_some_and(|call_turn| *call_turn < ti);
                if let Some(id) = &result.call_id {
                    last_result_turn.insert(id.clone(), ti);
                }
                if !exact {
                    if let Some(name) = &result.tool_name {
                        wanted_names.insert(name.clone());
                    }
                }
            }
        }

        Self {
            last_result_turn,
            wanted_names,
        }
    }

    fn is_reserved(&self, call_id: &str, call_turn: usize) -> bool {
        self.last_result_turn
            .get(call_id)
            .is_some_and(|result_turn| *result_turn > call_turn)
    }
}

/// Repair so that every call has exactly one later result. Converges in one
/// pass: `validate` on the output is always clean.
pub fn repair(conversation: &mut Conversation) -> RepairOutcome {
    let mut outcome = RepairOutcome {
        before: validate(conversation),
        ..Default::default()
    };
    let lookahead = Lookahead::scan(conversation);
    let shape = conversation.shape;

    let mut index = PendingCallIndex::new();
    let mut issued_ids: HashSet<String> = HashSet::new();
    let mut answered: HashSet<String> = HashSet::new();
    // (turn, id, name) in issue order
    let mut issued: Vec<(usize, String, String)> = Vec::new();
    let mut name_counters: HashMap<String, usize> = HashMap::new();
    // 重复 id -> 重新分配的 id, 按发出顺序
    let mut remapped: HashMap<String, VecDeque<String>> = HashMap::new();

    for (ti, turn) in conversation.turns.iter_mut().enumerate() {
        let blocks = std::mem::take(&mut turn.blocks);
        let mut kept = Vec::with_capacity(blocks.len());

        // 1. results first
        for block in blocks {
            let mut result = match block {
                ContentBlock::ToolResult(result) => result,
                other => {
                    kept.push(other);
                    continue;
                }
            };

            // A result naming a reused id belongs to the reassigned call
            if let Some(id) = result.call_id.clone() {
                if !index.is_pending(&id) {
                    if let Some(fresh) = remapped.get_mut(&id).and_then(VecDeque::pop_front) {
                        tracing::debug!("[Tool-Pairing] Result for reused id {} bound to {}", id, fresh);
                        result.call_id = Some(fresh);
                        outcome.recovered_results += 1;
                    }
                }
            }

            if let Some(id) = result.call_id.as_deref() {
                if answered.contains(id) && !index.is_pending(id) {
                    let warning = format!("Dropped duplicate tool result for call {}", id);
                    tracing::warn!("[Tool-Pairing] {}", warning);
                    outcome.warnings.push(warning);
                    outcome.dropped_duplicates += 1;
                    continue;
                }
            }

            let recovery = index.recover(result.tool_name.as_deref(), result.call_id.as_deref());
            if let Some(warning) = recovery.warning.clone() {
                outcome.warnings.push(warning);
            }

            if recovery.level == RecoveryLevel::Placeholder {
                kept.push(ContentBlock::Plain(demote_result(&result, &recovery.id, shape)));
                outcome.demoted_results += 1;
                continue;
            }

            if result.call_id.as_deref() != Some(recovery.id.as_str()) {
                outcome.recovered_results += 1;
            }
            answered.insert(recovery.id.clone());
            result.call_id = Some(recovery.id);
            kept.push(ContentBlock::ToolResult(result));
        }

        // 2. then this turn's calls
        for block in kept.iter_mut() {
            let ContentBlock::ToolCall(call) = block else {
                continue;
            };

            let mut reused = None;
            let id = match call.call_id.clone() {
                Some(id) if !issued_ids.contains(&id) => id,
                previous => {
                    let fresh = next_call_id(&call.tool_name, &mut name_counters, &issued_ids);
                    if let Some(dup) = previous {
                        tracing::warn!("[Tool-Pairing] Duplicate call id {} reassigned to {}", dup, fresh);
                        remapped.entry(dup.clone()).or_default().push_back(fresh.clone());
                        reused = Some(dup);
                    }
                    call.call_id = Some(fresh.clone());
                    outcome.assigned_call_ids += 1;
                    fresh
                }
            };
            issued_ids.insert(id.clone());

            let reserved = lookahead.is_reserved(&id, ti)
                || reused.as_deref().is_some_and(|dup| lookahead.is_reserved(dup, ti));
            if reserved {
                index.reserve(id.clone());
            } else if lookahead.wanted_names.contains(&call.tool_name) {
                index.register(&call.tool_name, id.clone());
            } else {
                index.register_orphan(id.clone());
            }
            issued.push((ti, id, call.tool_name.clone()));
        }

        turn.blocks = kept;
    }

    // 3. synthesize error results for calls still pending
    let orphaned: Vec<(usize, String, String)> = issued
        .into_iter()
        .filter(|(_, id, _)| index.is_pending(id))
        .collect();
    outcome.synthesized_results = orphaned.len();
    insert_unavailable_results(conversation, orphaned);

    outcome.after = validate(conversation);
    if outcome.after.is_clean() {
        tracing::info!(
            "[Tool-Pairing] Repaired: assigned={} recovered={} duplicates={} demoted={} synthesized={}",
            outcome.assigned_call_ids,
            outcome.recovered_results,
            outcome.dropped_duplicates,
            outcome.demoted_results,
            outcome.synthesized_results
        );
    } else {
        tracing::error!("[Tool-Pairing] Repair did not converge: {:?}", outcome.after);
    }
    outcome
}

/// Deterministic id for a call that arrived without one
fn next_call_id(tool_name: &str, counters: &mut HashMap<String, usize>, taken: &HashSet<String>) -> String {
    let name = if tool_name.is_empty() { "tool" } else { tool_name };
    let counter = counters.entry(name.to_string()).or_insert(0);
    loop {
        *counter += 1;
        let candidate = format!("call_{}_{}", name, counter);
        if !taken.contains(&candidate) {
            return candidate;
        }
    }
}

fn demote_result(result: &ToolResultBlock, placeholder_id: &str, shape: WireShape) -> serde_json::Value {
    let name = result.tool_name.as_deref().unwrap_or(UNNAMED_TOOL);
    let text = format!(
        "[Orphaned tool result from '{}' ({})]: {}",
        name,
        placeholder_id,
        result.payload_text()
    );
    shape.text_block(&text)
}

/// Put one error result per orphaned call into the consumer turn right
/// after the call's turn, creating that turn when needed.
fn insert_unavailable_results(conversation: &mut Conversation, orphaned: Vec<(usize, String, String)>) {
    // Back to front so earlier indices stay valid
    let mut by_turn: Vec<(usize, Vec<(String, String)>)> = Vec::new();
    for (ti, id, name) in orphaned {
        match by_turn.last_mut() {
            Some((t, items)) if *t == ti => items.push((id, name)),
            _ => by_turn.push((ti, vec![(id, name)])),
        }
    }

    let shape = conversation.shape;
    for (ti, items) in by_turn.into_iter().rev() {
        let synthetic: Vec<ContentBlock> = items
            .iter()
            .map(|(id, name)| {
                tracing::debug!("[Tool-Pairing] Synthesized unavailable result for {} ({})", name, id);
                ContentBlock::ToolResult(ToolResultBlock::new(
                    ToolShape::Anthropic,
                    id,
                    Some(name),
                    json!(TOOL_RESPONSE_UNAVAILABLE),
                    true,
                ))
            })
            .collect();

        let next = ti + 1;
        let reusable = conversation
            .turns
            .get_mut(next)
            .filter(|t| t.role == TurnRole::Consumer)
            .is_some_and(|t| t.make_structured(shape));

        if reusable {
            let turn = &mut conversation.turns[next];
            let tail = std::mem::take(&mut turn.blocks);
            turn.blocks = synthetic;
            turn.blocks.extend(tail);
        } else {
            conversation.turns.insert(next, Turn::synthetic("user", synthetic));
        }
    }
}
