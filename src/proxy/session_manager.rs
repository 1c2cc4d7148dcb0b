// 会话指纹: 为签名缓存提供稳定的会话 ID
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

static SYSTEM_REMINDER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)<system-reminder>.*?</system-reminder>").ok());

pub struct SessionManager;

impl SessionManager {
    /// Stable session id for one conversation.
    ///
    /// 1. `metadata.user_id` when the client sends one
    /// 2. `sid-<16 hex>` fingerprint of the first real user text
    /// 3. `None`: nothing stable to key on, so no signature can be trusted
    pub fn extract_session_id(payload: &Value) -> Option<String> {
        let body = payload.get("request").filter(|r| r.is_object()).unwrap_or(payload);

        for candidate in [payload, body] {
            if let Some(user_id) = candidate
                .pointer("/metadata/user_id")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
            {
                return Some(user_id.to_string());
            }
        }

        let turns = ["contents", "messages"]
            .iter()
            .find_map(|k| body.get(*k).and_then(Value::as_array))
            .or_else(|| payload.as_array())?;

        let first_text = turns
            .iter()
            .filter(|t| t.get("role").and_then(Value::as_str).unwrap_or("user") == "user")
            .find_map(|t| {
                let text = Self::strip_reminders(&Self::turn_text(t));
                let text = text.trim();
                (!text.is_empty()).then(|| text.to_string())
            })?;

        let digest = Sha256::digest(first_text.as_bytes());
        let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
        let sid = format!("sid-{}", hex);
        tracing::debug!("[Session] Fingerprinted session {}", sid);
        Some(sid)
    }

    fn turn_text(turn: &Value) -> String {
        let collect = |blocks: &Vec<Value>| {
            blocks
                .iter()
                .filter(|b| b.get("thought").and_then(Value::as_bool) != Some(true))
                .filter(|b| matches!(b.get("type").and_then(Value::as_str), None | Some("text")))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        };

        if let Some(parts) = turn.get("parts").and_then(Value::as_array) {
            return collect(parts);
        }
        match turn.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(blocks)) => collect(blocks),
            _ => String::new(),
        }
    }

    fn strip_reminders(text: &str) -> String {
        match SYSTEM_REMINDER.as_ref() {
            Some(re) => re.replace_all(text, "").into_owned(),
            None => text.to_string(),
        }
    }
}
