// src/logger.rs

use crate::config::Config;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;

/// Инициализация логирования через tracing
pub fn init(cfg: &Config) {
    // Уровень из RUST_LOG, иначе INFO
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    tracing::info!(
        "Logger initialized. Tracked currencies: {}, poll every {}s for up to {}h",
        cfg.tracked_currencies.join(","),
        cfg.poll_interval_secs,
        cfg.poll_max_hours
    );
}
