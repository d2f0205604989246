pub mod config;
pub mod manager;
pub mod provider;

pub use config::{
    Config, ConfigError, ConfigResult, EngineConfig, LogLevel, LoggingConfig, ParameterTable,
    Range, TokenBudgetConfig,
};
pub use manager::{ConfigFormat, ConfigManager};
pub use provider::{parse_transformer_specs, ProviderConfig, TransformerSpec};

use std::path::PathBuf;

/// 获取 Switchyard 配置目录路径
pub fn switchyard_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".switchyard"))
}

/// 获取默认配置文件路径
pub fn default_config_path() -> Option<PathBuf> {
    switchyard_dir().map(|dir| dir.join("config.json"))
}

/// 获取默认日志文件路径
pub fn default_log_path() -> Option<PathBuf> {
    switchyard_dir().map(|dir| dir.join("logs").join("switchyard.log"))
}

/// 展开路径中的 ~ 为用户主目录
pub fn expand_tilde(path: &str) -> Option<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None => Some(PathBuf::from(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switchyard_dir() {
        let dir = switchyard_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().to_string_lossy().contains(".switchyard"));
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/.switchyard/config.json");
        assert!(expanded.is_some());
        assert!(!expanded.unwrap().to_string_lossy().starts_with('~'));
        assert_eq!(expand_tilde("/etc/switchyard.toml"), Some(PathBuf::from("/etc/switchyard.toml")));
    }
}
