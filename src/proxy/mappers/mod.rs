// Mappers 模块
// 负责请求体的结构性改写: 思维块调和、工具配对修复、上游信封

pub mod common_utils;
pub mod content;
pub mod gemini;
pub mod reconcile;
pub mod thinking_recovery;
pub mod thinking_utils;
pub mod tool_pairing;

pub use reconcile::{reconcile_payload, ReconcileContext, ReconcileSummary};
pub use thinking_utils::{reconcile_thinking, ReconcileReport, ThinkingPolicy};
pub use tool_pairing::{pair_tool_calls, repair, validate, PairingReport, PendingCallIndex, Recovery, RecoveryLevel};
