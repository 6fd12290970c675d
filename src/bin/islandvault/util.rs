use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use IslandVault::config::VaultConfig;

/// Конфигурация из окружения; `--store` перекрывает IV_STORE_DIR.
pub fn config_for(store: Option<PathBuf>) -> VaultConfig {
    let cfg = VaultConfig::from_env();
    match store {
        Some(dir) => cfg.with_store_dir(dir),
        None => cfg,
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
