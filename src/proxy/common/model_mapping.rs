// 模型名称映射 & 模型家族识别
use once_cell::sync::Lazy;
use std::collections::HashMap;

static MODEL_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();

    // 直接支持的模型
    m.insert("claude-opus-4-5-thinking", "claude-opus-4-5-thinking");
    m.insert("claude-sonnet-4-5", "claude-sonnet-4-5");
    m.insert("claude-sonnet-4-5-thinking", "claude-sonnet-4-5-thinking");

    // 别名映射
    m.insert("claude-sonnet-4-5-20250929", "claude-sonnet-4-5-thinking");
    m.insert("claude-3-5-sonnet-20241022", "claude-sonnet-4-5");
    m.insert("claude-opus-4", "claude-opus-4-5-thinking");
    m.insert("claude-opus-4-5-20251101", "claude-opus-4-5-thinking");
    m.insert("claude-opus-4-6", "claude-opus-4-6-thinking");
    m.insert("claude-haiku-4-5-20251001", "claude-sonnet-4-5");

    // OpenAI 协议
    m.insert("gpt-4o", "gemini-2.5-flash");
    m.insert("gpt-4o-mini", "gemini-2.5-flash");
    m.insert("gpt-4-turbo", "gemini-2.5-flash");

    // Gemini 协议
    m.insert("gemini-2.5-flash-lite", "gemini-2.5-flash");
    m.insert("gemini-3-pro-low", "gemini-3-pro-preview");
    m.insert("gemini-3-pro-high", "gemini-3-pro-preview");
    m.insert("gemini-3-pro", "gemini-3-pro-preview");

    m
});

/// Reconciliation policy family of the model that will receive the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// Signature-strict: rejects any thinking signature it cannot verify itself
    Claude,
    Gemini,
    Gpt,
}

impl ModelFamily {
    /// Detect the family by model name substring. Unknown names are Gemini,
    /// since that is what the gateway serves natively.
    pub fn detect(model: &str) -> Self {
        let lower = model.to_lowercase();
        // Vertex-style resource paths: keep only the model id
        let name = lower.rsplit('/').next().unwrap_or(&lower);

        if ["claude", "opus", "sonnet", "haiku"].iter().any(|k| name.contains(k)) {
            return ModelFamily::Claude;
        }
        if name.contains("gpt") || ["o1", "o3", "o4"].iter().any(|p| name.starts_with(p)) {
            return ModelFamily::Gpt;
        }
        ModelFamily::Gemini
    }

    pub fn is_signature_strict(&self) -> bool {
        matches!(self, ModelFamily::Claude)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Claude => "claude",
            ModelFamily::Gemini => "gemini",
            ModelFamily::Gpt => "gpt",
        }
    }
}

/// Resolve a client-facing model name to the upstream model id.
/// Unknown names pass through unchanged.
pub fn map_model_alias(input: &str) -> String {
    if let Some(mapped) = MODEL_ALIASES.get(input) {
        return mapped.to_string();
    }
    input.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_detection() {
        assert_eq!(ModelFamily::detect("claude-opus-4-5-thinking"), ModelFamily::Claude);
        assert_eq!(ModelFamily::detect("Claude-Sonnet-4-5"), ModelFamily::Claude);
        assert_eq!(
            ModelFamily::detect("projects/p/locations/us/publishers/anthropic/models/claude-sonnet-4-5"),
            ModelFamily::Claude
        );
        assert_eq!(ModelFamily::detect("gemini-3-pro-high"), ModelFamily::Gemini);
        assert_eq!(ModelFamily::detect("gpt-oss-120b"), ModelFamily::Gpt);
        assert_eq!(ModelFamily::detect("o3-mini"), ModelFamily::Gpt);
        assert_eq!(ModelFamily::detect("something-new"), ModelFamily::Gemini);
    }

    #[test]
    fn test_only_claude_is_strict() {
        assert!(ModelFamily::Claude.is_signature_strict());
        assert!(!ModelFamily::Gemini.is_signature_strict());
        assert!(!ModelFamily::Gpt.is_signature_strict());
    }

    #[test]
    fn test_alias_mapping() {
        assert_eq!(map_model_alias("claude-opus-4"), "claude-opus-4-5-thinking");
        assert_eq!(map_model_alias("gemini-3-pro"), "gemini-3-pro-preview");
        assert_eq!(map_model_alias("claude-sonnet-5"), "claude-sonnet-5");
    }
}
