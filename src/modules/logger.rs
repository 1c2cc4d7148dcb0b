use tracing_subscriber::{fmt, EnvFilter};

/// 初始化日志系统
///
/// Logs go to stderr so stdout stays a clean payload channel.
/// Calling it twice is harmless.
pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();

    if result.is_ok() {
        tracing::debug!("[Logger] Initialized");
    }
}
