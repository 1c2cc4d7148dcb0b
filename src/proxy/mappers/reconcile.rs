// 请求级调和入口: 思维块调和 -> 工具配对修复
use serde_json::Value;

use super::common_utils::{deep_clean_cache_control, ConversationVisitor};
use super::content::Conversation;
use super::thinking_utils::{reconcile_thinking, ReconcileReport, ThinkingPolicy};
use super::tool_pairing::{pair_tool_calls, RepairOutcome};
use crate::models::ReconcilerConfig;
use crate::proxy::common::model_mapping::ModelFamily;
use crate::proxy::signature_cache::SignatureStore;

/// Everything one request's reconciliation needs. The store is borrowed so
/// tests can hand in their own.
#[derive(Clone, Copy)]
pub struct ReconcileContext<'a> {
    pub store: &'a dyn SignatureStore,
    pub family: ModelFamily,
    pub session_id: Option<&'a str>,
    pub keep_claude_thinking: bool,
    pub auto_fix_tool_pairing: bool,
    pub close_tool_loops: bool,
}

impl<'a> ReconcileContext<'a> {
    pub fn new(store: &'a dyn SignatureStore, family: ModelFamily) -> Self {
        Self::from_config(store, family, &ReconcilerConfig::default())
    }

    pub fn from_config(
        store: &'a dyn SignatureStore,
        family: ModelFamily,
        config: &ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            family,
            session_id: None,
            keep_claude_thinking: config.keep_claude_thinking,
            auto_fix_tool_pairing: config.auto_fix_tool_pairing,
            close_tool_loops: config.close_tool_loops,
        }
    }

    pub fn with_session(mut self, session_id: Option<&'a str>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn policy(&self) -> ThinkingPolicy {
        ThinkingPolicy {
            family: self.family,
            keep_claude_thinking: self.keep_claude_thinking,
            close_tool_loops: self.close_tool_loops,
        }
    }
}

impl std::fmt::Debug for ReconcileContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileContext")
            .field("family", &self.family)
            .field("session_id", &self.session_id)
            .field("keep_claude_thinking", &self.keep_claude_thinking)
            .field("auto_fix_tool_pairing", &self.auto_fix_tool_pairing)
            .field("close_tool_loops", &self.close_tool_loops)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileSummary {
    pub conversations: usize,
    pub cache_control_removed: usize,
    pub thinking: Vec<ReconcileReport>,
    pub pairing: Vec<RepairOutcome>,
}

impl ReconcileSummary {
    /// Recovery warnings from every conversation in the payload
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.pairing
            .iter()
            .flat_map(|p| p.warnings.iter().map(String::as_str))
    }
}

/// Reconcile one conversation array in place: thinking first, then pairing.
/// Arrays that are not conversations are left untouched.
pub fn reconcile_conversation(
    turns: &mut Vec<Value>,
    ctx: &ReconcileContext<'_>,
) -> Option<(ReconcileReport, RepairOutcome)> {
    let mut conversation = match Conversation::from_values(std::mem::take(turns)) {
        Ok(conversation) => conversation,
        Err(untouched) => {
            *turns = untouched;
            return None;
        }
    };

    let thinking = reconcile_thinking(
        &mut conversation,
        ctx.store,
        ctx.session_id,
        &ctx.policy(),
    );
    let pairing = pair_tool_calls(&mut conversation, ctx.auto_fix_tool_pairing);

    *turns = conversation.into_values();
    Some((thinking, pairing))
}

/// Run the full pipeline over every conversation array in a request payload.
pub fn reconcile_payload(payload: &mut Value, ctx: &ReconcileContext<'_>) -> ReconcileSummary {
    let mut summary = ReconcileSummary::default();

    ConversationVisitor::new().visit(payload, |turns| {
        if let Some((thinking, pairing)) = reconcile_conversation(turns, ctx) {
            // 只清理真正的对话数组
            summary.cache_control_removed += turns.iter_mut().map(deep_clean_cache_control).sum::<usize>();
            summary.conversations += 1;
            summary.thinking.push(thinking);
            summary.pairing.push(pairing);
        }
    });

    if summary.cache_control_removed > 0 {
        tracing::debug!(
            "[Reconcile] Removed {} cache_control hints from conversation blocks",
            summary.cache_control_removed
        );
    }
    summary
}
