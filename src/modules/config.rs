use once_cell::sync::Lazy;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::models::ReconcilerConfig;

const CONFIG_DIR: &str = "antigravity-reconciler";
const CONFIG_FILE: &str = "config.toml";

/// Environment switch for the Claude trust-based thinking path. Only `"1"` enables it.
pub const KEEP_THINKING_ENV: &str = "CLAUDE_KEEP_THINKING";

static GLOBAL_CONFIG: Lazy<ReconcilerConfig> = Lazy::new(load_config);

/// Process-wide configuration snapshot, loaded on first use
pub fn get_config() -> &'static ReconcilerConfig {
    &GLOBAL_CONFIG
}

/// 获取配置文件路径
pub fn get_config_path() -> AppResult<PathBuf> {
    let base = dirs::config_dir().ok_or(AppError::NoConfigDir)?;
    Ok(base.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Read a config file. A missing file is not an error and yields defaults.
pub fn load_config_from(path: &Path) -> AppResult<ReconcilerConfig> {
    if !path.exists() {
        tracing::debug!("[Config] {} not found, using defaults", path.display());
        return Ok(ReconcilerConfig::default());
    }

    let content = fs::read_to_string(path)?;
    let config: ReconcilerConfig = toml::from_str(&content)?;
    tracing::info!("[Config] Loaded {}", path.display());
    Ok(config)
}

/// Load the config file (if any) and apply environment overrides.
/// Errors are logged and degrade to defaults.
pub fn load_config() -> ReconcilerConfig {
    let mut config = match get_config_path().and_then(|p| load_config_from(&p)) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("[Config] Failed to load config, using defaults: {}", e);
            ReconcilerConfig::default()
        }
    };

    apply_env_overrides(&mut config, std::env::var(KEEP_THINKING_ENV).ok().as_deref());
    config
}

/// 应用环境变量覆盖
///
/// `Some("1")` enables the override, any other present value disables it,
/// `None` keeps whatever the file said.
pub fn apply_env_overrides(config: &mut ReconcilerConfig, keep_thinking: Option<&str>) {
    if let Some(value) = keep_thinking {
        let enabled = value == "1";
        if enabled != config.keep_claude_thinking {
            tracing::info!(
                "[Config] {}={} -> keep_claude_thinking={}",
                KEEP_THINKING_ENV,
                value,
                enabled
            );
        }
        config.keep_claude_thinking = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_override_values() {
        let mut cfg = ReconcilerConfig::default();
        apply_env_overrides(&mut cfg, Some("1"));
        assert!(cfg.keep_claude_thinking);

        apply_env_overrides(&mut cfg, Some("true"));
        assert!(!cfg.keep_claude_thinking, "only \"1\" is recognized");

        cfg.keep_claude_thinking = true;
        apply_env_overrides(&mut cfg, None);
        assert!(cfg.keep_claude_thinking, "absent env keeps file value");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!("reconciler-missing-{}.toml", uuid::Uuid::new_v4()));
        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg, ReconcilerConfig::default());
    }

    #[test]
    fn test_load_file_and_reject_garbage() {
        let dir = std::env::temp_dir();
        let good = dir.join(format!("reconciler-good-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&good, "auto_fix_tool_pairing = false\nsignature_ttl_secs = 60\n").unwrap();
        let cfg = load_config_from(&good).unwrap();
        assert!(!cfg.auto_fix_tool_pairing);
        assert_eq!(cfg.signature_ttl_secs, 60);

        let bad = dir.join(format!("reconciler-bad-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&bad, "signature_ttl_secs = \"soon\"").unwrap();
        assert!(matches!(load_config_from(&bad), Err(AppError::Toml(_))));

        let _ = fs::remove_file(good);
        let _ = fs::remove_file(bad);
    }
}
