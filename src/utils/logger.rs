use crate::config::LoggingConfig;
use crate::utils::error::{EngineError, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `RUST_LOG` 優先，其次使用設定中的 level
fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("placement_engine={}", config.level)))
}

pub fn init_logger(config: &LoggingConfig) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(config));
    let layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let result = if config.format == "json" {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer.compact()).try_init()
    };

    result.map_err(|e| EngineError::ConfigValidationError {
        field: "logging".to_string(),
        message: format!("logger already initialized: {}", e),
    })
}
