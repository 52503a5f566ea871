use std::fs;
use std::path::PathBuf;

use crate::proxy::ProxyConfig;

const CONFIG_FILE: &str = "proxy_config.json";

/// Data directory for config and logs. Overridable for containers.
pub fn get_data_dir() -> Result<PathBuf, String> {
    let dir = match std::env::var("AFFILIATE_PROXY_DATA_DIR") {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from("data"),
    };
    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| format!("failed to create data dir: {e}"))?;
    }
    Ok(dir)
}

/// Load the proxy configuration, writing defaults on first run.
pub fn load_config() -> Result<ProxyConfig, String> {
    let data_dir = get_data_dir()?;
    let config_path = data_dir.join(CONFIG_FILE);

    if !config_path.exists() {
        let config = ProxyConfig::default();
        let _ = save_config(&config);
        return Ok(config);
    }

    let content = fs::read_to_string(&config_path)
        .map_err(|e| format!("failed to read config file: {e}"))?;

    serde_json::from_str(&content).map_err(|e| format!("failed to parse config file: {e}"))
}

/// Save the proxy configuration. The secret never passes through here.
pub fn save_config(config: &ProxyConfig) -> Result<(), String> {
    let data_dir = get_data_dir()?;
    let config_path = data_dir.join(CONFIG_FILE);

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("failed to serialize config: {e}"))?;

    fs::write(&config_path, content).map_err(|e| format!("failed to save config: {e}"))
}
