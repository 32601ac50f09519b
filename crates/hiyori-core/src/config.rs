use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub default_model: Option<String>,
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    pub default_provider: Option<String>,
    pub assets_dir: Option<String>,
    /// Per-locale system prompt overrides keyed by locale tag.
    #[serde(default)]
    pub prompts: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    file: Value,
    env: Value,
    cli: Value,
}

/// Layered configuration: file < environment < command line.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    layers: ConfigLayers,
}

impl ConfigStore {
    pub async fn new(path: impl AsRef<Path>, cli_overrides: Option<Value>) -> anyhow::Result<Self> {
        Self::with_env_layer(path, env_layer(), cli_overrides).await
    }

    async fn with_env_layer(
        path: impl AsRef<Path>,
        env: Value,
        cli_overrides: Option<Value>,
    ) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = read_json_file(path)
            .await
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Ok(Self {
            layers: ConfigLayers {
                file,
                env,
                cli: cli_overrides.unwrap_or_else(empty_object),
            },
        })
    }

    pub fn get(&self) -> AppConfig {
        match serde_json::from_value(self.get_effective_value()) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("effective config did not match schema, using defaults: {}", err);
                AppConfig::default()
            }
        }
    }

    pub fn get_effective_value(&self) -> Value {
        let mut merged = empty_object();
        deep_merge(&mut merged, &self.layers.file);
        deep_merge(&mut merged, &self.layers.env);
        deep_merge(&mut merged, &self.layers.cli);
        merged
    }
}

/// Explicit path, then `HIYORI_CONFIG`, then the platform config directory.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    if let Ok(path) = std::env::var("HIYORI_CONFIG") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("hiyori").join("config.json");
    }
    PathBuf::from(".hiyori/config.json")
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    if !path.exists() {
        return Ok(empty_object());
    }
    let raw = fs::read_to_string(path).await?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) => {
            tracing::warn!("config file {} is not a JSON object, ignoring", path.display());
            Ok(empty_object())
        }
        Err(err) => {
            tracing::warn!("config file {} is not valid JSON, ignoring: {}", path.display(), err);
            Ok(empty_object())
        }
    }
}

fn env_layer() -> Value {
    env_layer_from(|key| std::env::var(key).ok())
}

fn env_layer_from(lookup: impl Fn(&str) -> Option<String>) -> Value {
    let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let mut root = empty_object();

    if let Some(provider) = var("HIYORI_PROVIDER") {
        deep_merge(
            &mut root,
            &json!({ "default_provider": provider.trim().to_ascii_lowercase() }),
        );
    }
    if let Some(dir) = var("HIYORI_ASSETS_DIR") {
        deep_merge(&mut root, &json!({ "assets_dir": dir }));
    }
    if let Some(account_id) = var("CLOUDFLARE_ACCOUNT_ID") {
        deep_merge(
            &mut root,
            &json!({ "providers": { "workers-ai": { "account_id": account_id } } }),
        );
    }
    if let Some(token) = var("CLOUDFLARE_API_TOKEN") {
        deep_merge(
            &mut root,
            &json!({ "providers": { "workers-ai": { "api_key": token } } }),
        );
    }
    add_openai_env(&mut root, var("OPENAI_API_KEY"), "openai", "https://api.openai.com/v1");
    add_openai_env(
        &mut root,
        var("OPENROUTER_API_KEY"),
        "openrouter",
        "https://openrouter.ai/api/v1",
    );
    add_openai_env(&mut root, var("GROQ_API_KEY"), "groq", "https://api.groq.com/openai/v1");
    if let Some(ollama_url) = var("OLLAMA_URL") {
        deep_merge(
            &mut root,
            &json!({ "providers": { "ollama": { "url": ollama_url } } }),
        );
    }

    root
}

fn add_openai_env(root: &mut Value, api_key: Option<String>, provider: &str, default_url: &str) {
    if let Some(api_key) = api_key {
        deep_merge(
            root,
            &json!({
                "providers": {
                    provider: {
                        "api_key": api_key,
                        "url": default_url
                    }
                }
            }),
        );
    }
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

impl From<ProviderConfig> for hiyori_providers::ProviderConfig {
    fn from(value: ProviderConfig) -> Self {
        Self {
            api_key: value.api_key,
            url: value.url,
            default_model: value.default_model,
            account_id: value.account_id,
        }
    }
}

impl From<AppConfig> for hiyori_providers::AppConfig {
    fn from(value: AppConfig) -> Self {
        Self {
            providers: value
                .providers
                .into_iter()
                .map(|(k, v)| (k, v.into()))
                .collect(),
            default_provider: value.default_provider,
        }
    }
}
