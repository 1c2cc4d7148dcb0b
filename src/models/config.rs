use serde::{Deserialize, Serialize};

/// 重写层配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Opt-in: evaluate Claude thinking blocks against the signature cache
    /// instead of stripping them unconditionally.
    pub keep_claude_thinking: bool,
    /// Repair unpaired tool calls/results. When off, pairing problems are only logged.
    pub auto_fix_tool_pairing: bool,
    /// Close an open tool loop whose issuing turn lost its leading thinking block.
    pub close_tool_loops: bool,
    /// Signature cache entry lifetime, in seconds.
    pub signature_ttl_secs: u64,
    /// Entry count above which the signature cache sweeps expired entries.
    pub signature_cache_limit: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            keep_claude_thinking: false,
            auto_fix_tool_pairing: true,
            close_tool_loops: true,
            signature_ttl_secs: 2 * 60 * 60,
            signature_cache_limit: 1000,
        }
    }
}
