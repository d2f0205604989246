use switchyard_config::{ConfigError, ConfigManager, TransformerSpec};
use tempfile::TempDir;

#[tokio::test]
async fn loads_toml_with_transformer_shorthand() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("switchyard.toml");
    tokio::fs::write(
        &path,
        r#"
version = "test"

[engine]
chain_cache_capacity = 4

[[providers]]
name = "deepseek"
api_base_url = "${SWITCHYARD_IT_DEEPSEEK_URL:-https://api.deepseek.com}"
models = ["deepseek-chat", "deepseek-reasoner"]
transformers = { use = ["deepseek", ["maxtoken", { max_tokens = 6000 }]] }
"#,
    )
    .await
    .unwrap();

    let manager = ConfigManager::load(&path).await.unwrap();
    let config = manager.snapshot().await;

    assert_eq!(config.version, "test");
    assert_eq!(config.engine.chain_cache_capacity, 4);
    let provider = config.provider("deepseek").unwrap();
    assert_eq!(provider.api_base_url.as_deref(), Some("https://api.deepseek.com"));
    assert_eq!(provider.transformers[0], TransformerSpec::new("deepseek"));
    assert_eq!(
        provider.transformers[1],
        TransformerSpec::new("maxtoken").with_option("max_tokens", serde_json::json!(6000))
    );
}

#[tokio::test]
async fn reload_keeps_previous_config_on_invalid_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");

    let manager = ConfigManager::load(&path).await.unwrap();
    tokio::fs::write(&path, r#"{"engine": {"chain_cache_capacity": 0}}"#)
        .await
        .unwrap();

    let err = manager.reload().await.unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
    assert_eq!(manager.snapshot().await.engine.chain_cache_capacity, 100);

    tokio::fs::write(&path, r#"{"engine": {"chain_cache_capacity": 7}}"#)
        .await
        .unwrap();
    manager.reload().await.unwrap();
    assert_eq!(manager.snapshot().await.engine.chain_cache_capacity, 7);
}

#[tokio::test]
async fn update_persists_and_validates() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    let manager = ConfigManager::load(&path).await.unwrap();

    manager
        .update(|config| config.token_budget.safety_buffer = 250)
        .await
        .unwrap();
    assert!(manager.update(|config| config.engine.chain_cache_capacity = 0).await.is_err());

    let reopened = ConfigManager::load(&path).await.unwrap();
    let config = reopened.snapshot().await;
    assert_eq!(config.token_budget.safety_buffer, 250);
    assert_eq!(config.engine.chain_cache_capacity, 100);
}
