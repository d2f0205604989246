use crate::config::{Config, ConfigError, ConfigResult};
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 配置文件格式，按扩展名判断
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }

    fn parse(self, content: &str) -> ConfigResult<Config> {
        match self {
            ConfigFormat::Json => Ok(serde_json::from_str(content)?),
            ConfigFormat::Toml => Ok(toml::from_str(content)?),
        }
    }

    fn render(self, config: &Config) -> ConfigResult<String> {
        match self {
            ConfigFormat::Json => Ok(serde_json::to_string_pretty(config)?),
            ConfigFormat::Toml => Ok(toml::to_string_pretty(config)?),
        }
    }
}

/// 配置管理器
#[derive(Clone)]
pub struct ConfigManager {
    path: PathBuf,
    config: Arc<RwLock<Config>>,
    #[cfg(feature = "hot-reload")]
    watcher: Option<Arc<RwLock<notify::RecommendedWatcher>>>,
}

impl ConfigManager {
    /// 加载配置文件，不存在时写入默认配置
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let format = ConfigFormat::from_path(path);
        let config = if path.exists() {
            info!("Loading config from {:?}", path);
            let config = Self::read_file(path, format).await?;
            Self::validate(&config)?;
            config
        } else {
            info!("Config file not found, creating default config at {:?}", path);
            let default_config = Config::default();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, format.render(&default_config)?).await?;
            default_config
        };

        Ok(Self {
            path: path.to_path_buf(),
            config: Arc::new(RwLock::new(config)),
            #[cfg(feature = "hot-reload")]
            watcher: None,
        })
    }

    /// 从默认位置加载配置
    pub async fn load_default() -> ConfigResult<Self> {
        let config_path = Self::default_config_path()?;
        Self::load(&config_path).await
    }

    /// 获取默认配置路径 (~/.switchyard/config.json)
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        crate::default_config_path()
            .ok_or_else(|| ConfigError::InvalidPath("Could not find home directory".to_string()))
    }

    /// 创建一个新的配置管理器（用于测试）
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            path,
            config: Arc::new(RwLock::new(config)),
            #[cfg(feature = "hot-reload")]
            watcher: None,
        }
    }

    /// 获取配置的共享引用
    pub fn get(&self) -> Arc<RwLock<Config>> {
        Arc::clone(&self.config)
    }

    /// 获取当前配置的快照
    pub async fn snapshot(&self) -> Config {
        self.config.read().await.clone()
    }

    /// 保存配置到文件
    pub async fn save(&self) -> ConfigResult<()> {
        let config = self.config.read().await;
        let content = ConfigFormat::from_path(&self.path).render(&config)?;
        drop(config);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&self.path, content).await?;
        info!("Config saved to {:?}", self.path);
        Ok(())
    }

    /// 重新加载配置，校验失败时保留旧配置
    pub async fn reload(&self) -> ConfigResult<()> {
        let new_config = Self::read_existing(&self.path).await?;

        let mut config = self.config.write().await;
        *config = new_config;
        drop(config);

        info!("Config reloaded from {:?}", self.path);
        Ok(())
    }

    /// 更新配置并保存
    pub async fn update<F>(&self, f: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.config.write().await;
        let mut candidate = config.clone();
        f(&mut candidate);
        Self::validate(&candidate)?;
        *config = candidate;
        drop(config);
        self.save().await
    }

    /// 验证配置
    pub fn validate(config: &Config) -> ConfigResult<()> {
        if config.engine.chain_cache_capacity == 0 {
            return Err(ConfigError::Validation(
                "engine.chain_cache_capacity must be greater than 0".to_string(),
            ));
        }

        if config.token_budget.min_output_tokens == 0 {
            return Err(ConfigError::Validation(
                "token_budget.min_output_tokens must be greater than 0".to_string(),
            ));
        }

        if config.token_budget.default_max_tokens == 0 {
            return Err(ConfigError::Validation(
                "token_budget.default_max_tokens must be greater than 0".to_string(),
            ));
        }

        for (provider, table) in &config.parameters {
            for (parameter, range) in &table.ranges {
                if range.min > range.max {
                    return Err(ConfigError::Validation(format!(
                        "parameter range for {}.{} has min {} greater than max {}",
                        provider, parameter, range.min, range.max
                    )));
                }
            }
        }

        let mut seen = HashSet::new();
        for provider in &config.providers {
            if provider.name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "provider name cannot be empty".to_string(),
                ));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "provider '{}' is defined more than once",
                    provider.name
                )));
            }
            if let Some(spec) = provider.transformers.iter().find(|t| t.name.trim().is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "provider '{}' lists a transformer without a name: {:?}",
                    provider.name, spec
                )));
            }
        }

        Ok(())
    }

    async fn read_file(path: &Path, format: ConfigFormat) -> ConfigResult<Config> {
        let content = tokio::fs::read_to_string(path).await?;
        let content = Self::expand_env_vars(&content)?;
        format.parse(&content)
    }

    async fn read_existing(path: &Path) -> ConfigResult<Config> {
        if !path.exists() {
            return Err(ConfigError::InvalidPath(format!(
                "Config file not found: {:?}",
                path
            )));
        }
        let config = Self::read_file(path, ConfigFormat::from_path(path)).await?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// 展开环境变量 ${VAR} 或 ${VAR:-default}
    pub fn expand_env_vars(content: &str) -> ConfigResult<String> {
        static ENV_VAR: OnceLock<Regex> = OnceLock::new();
        let re = ENV_VAR.get_or_init(|| {
            Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid")
        });

        let mut missing = None;
        let expanded = re.replace_all(content, |caps: &regex::Captures<'_>| {
            let var_expr = &caps[1];
            let (var_name, default_value) = match var_expr.find(":-") {
                Some(pos) => (&var_expr[..pos], Some(&var_expr[pos + 2..])),
                None => (var_expr, None),
            };

            match std::env::var(var_name) {
                Ok(val) => val,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    None => {
                        missing.get_or_insert_with(|| var_name.to_string());
                        String::new()
                    }
                },
            }
        });

        match missing {
            Some(name) => Err(ConfigError::EnvVarNotFound(name)),
            None => Ok(expanded.into_owned()),
        }
    }

    /// 获取配置文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(feature = "hot-reload")]
impl ConfigManager {
    /// 启动热重载监听
    pub fn watch<F>(&mut self, callback: F) -> ConfigResult<()>
    where
        F: Fn(&Config) + Send + 'static,
    {
        use notify::{
            Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Result as NotifyResult,
            Watcher,
        };

        let path = self.path.clone();
        let config = Arc::clone(&self.config);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: NotifyResult<Event>| {
                if let Ok(event) = res {
                    if event.kind.is_modify() {
                        let _ = tx.send(());
                    }
                }
            },
            NotifyConfig::default(),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        self.watcher = Some(Arc::new(RwLock::new(watcher)));

        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                debug!("Config file changed, reloading...");
                match Self::read_existing(&path).await {
                    Ok(new_config) => {
                        let mut cfg = config.write().await;
                        *cfg = new_config;
                        info!("Config hot-reloaded successfully");
                        callback(&cfg);
                    }
                    Err(e) => {
                        warn!("Failed to hot-reload config: {}", e);
                    }
                }
            }
        });

        info!("Started watching config file: {:?}", self.path);
        Ok(())
    }

    /// 停止热重载监听
    pub fn unwatch(&mut self) -> ConfigResult<()> {
        if let Some(ref watcher) = self.watcher {
            use notify::Watcher;
            if let Ok(mut w) = watcher.try_write() {
                w.unwatch(&self.path)?;
            }
            self.watcher = None;
            info!("Stopped watching config file");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let manager = ConfigManager::load(&config_path).await.unwrap();
        let config = manager.snapshot().await;

        assert!(config_path.exists());
        assert_eq!(config.engine.chain_cache_capacity, 100);
        assert!(config.providers.is_empty());
    }

    #[tokio::test]
    async fn test_env_var_expansion() {
        std::env::set_var("SWITCHYARD_TEST_BASE_URL", "https://api.example.com");

        let content = r#"{"url": "${SWITCHYARD_TEST_BASE_URL}", "other": "${SWITCHYARD_TEST_UNSET:-fallback}"}"#;
        let expanded = ConfigManager::expand_env_vars(content).unwrap();

        assert!(expanded.contains("https://api.example.com"));
        assert!(expanded.contains("fallback"));
    }

    #[test]
    fn test_env_var_missing() {
        let err = ConfigManager::expand_env_vars("${SWITCHYARD_TEST_DEFINITELY_MISSING}").unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarNotFound(name) if name == "SWITCHYARD_TEST_DEFINITELY_MISSING"));
    }

    #[tokio::test]
    async fn test_config_validation() {
        let mut config = Config::default();
        config.engine.chain_cache_capacity = 0;
        assert!(ConfigManager::validate(&config).is_err());

        config.engine.chain_cache_capacity = 10;
        assert!(ConfigManager::validate(&config).is_ok());

        config
            .parameters
            .get_mut("openai")
            .unwrap()
            .ranges
            .insert("temperature".to_string(), crate::Range::new(3.0, 1.0));
        assert!(ConfigManager::validate(&config).is_err());
    }

    #[tokio::test]
    async fn test_duplicate_provider_rejected() {
        let mut config = Config::default();
        config.providers.push(crate::ProviderConfig::new("gemini"));
        config.providers.push(crate::ProviderConfig::new("gemini"));

        let err = ConfigManager::validate(&config).unwrap_err();
        assert!(err.to_string().contains("gemini"));
    }
}
