use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use hiyori_types::{Message, ProviderInfo, Role};

/// Raw response body of an inference call, forwarded without inspection.
pub type ByteStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

pub const MAX_TOKENS: u32 = 1024;
pub const WORKERS_AI_MODEL: &str = "@cf/meta/llama-3.1-8b-instruct-fast";
pub const WORKERS_AI_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

pub const SUPPORTED_PROVIDER_IDS: [&str; 6] =
    ["workers-ai", "openai", "openrouter", "groq", "ollama", "local"];

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
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InferenceRequest {
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub stream: bool,
}

impl InferenceRequest {
    pub fn streaming(messages: Vec<Message>) -> Self {
        Self {
            messages,
            max_tokens: MAX_TOKENS,
            stream: true,
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn info(&self) -> ProviderInfo;

    /// Starts an inference call. Errors raised here happen before any byte of
    /// the reply exists; errors inside the stream happen mid-reply.
    async fn run(&self, request: InferenceRequest) -> anyhow::Result<ByteStream>;
}

/// Providers built once at startup; one of them serves every request.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Arc<Vec<Arc<dyn Provider>>>,
    default_provider: Option<String>,
}

impl ProviderRegistry {
    pub fn new(config: AppConfig) -> Self {
        let providers = build_providers(&config);
        Self::from_providers(providers, config.default_provider)
    }

    pub fn from_providers(
        providers: Vec<Arc<dyn Provider>>,
        default_provider: Option<String>,
    ) -> Self {
        Self {
            providers: Arc::new(providers),
            default_provider,
        }
    }

    /// The configured default provider, or the first one built.
    pub fn active(&self) -> anyhow::Result<Arc<dyn Provider>> {
        if let Some(default_id) = &self.default_provider {
            if let Some(provider) = self.providers.iter().find(|p| &p.info().id == default_id) {
                return Ok(provider.clone());
            }
            tracing::warn!(
                "default provider `{}` is not configured, falling back to the first provider",
                default_id
            );
        }

        let Some(provider) = self.providers.first() else {
            anyhow::bail!("No provider configured.");
        };
        Ok(provider.clone())
    }
}

fn build_providers(config: &AppConfig) -> Vec<Arc<dyn Provider>> {
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

    if let Some(entry) = config.providers.get("workers-ai") {
        providers.push(Arc::new(WorkersAiProvider {
            account_id: entry
                .account_id
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            api_token: entry
                .api_key
                .as_deref()
                .filter(|key| !is_placeholder_api_key(key))
                .map(str::to_string),
            base_url: normalize_plain_base(entry.url.as_deref().unwrap_or(WORKERS_AI_BASE_URL)),
            model: entry
                .default_model
                .clone()
                .unwrap_or_else(|| WORKERS_AI_MODEL.to_string()),
            client: Client::new(),
        }));
    }

    add_openai_provider(
        config,
        &mut providers,
        "openai",
        "OpenAI",
        "https://api.openai.com/v1",
        "gpt-4o-mini",
        true,
    );
    add_openai_provider(
        config,
        &mut providers,
        "openrouter",
        "OpenRouter",
        "https://openrouter.ai/api/v1",
        "meta-llama/llama-3.1-8b-instruct",
        true,
    );
    add_openai_provider(
        config,
        &mut providers,
        "groq",
        "Groq",
        "https://api.groq.com/openai/v1",
        "llama-3.1-8b-instant",
        true,
    );
    add_openai_provider(
        config,
        &mut providers,
        "ollama",
        "Ollama",
        "http://127.0.0.1:11434/v1",
        "llama3.1:8b",
        false,
    );

    if config.providers.contains_key("local") || providers.is_empty() {
        providers.push(Arc::new(LocalEchoProvider::default()));
    }

    providers
}

fn add_openai_provider(
    config: &AppConfig,
    providers: &mut Vec<Arc<dyn Provider>>,
    id: &str,
    name: &str,
    default_url: &str,
    default_model: &str,
    use_api_key: bool,
) {
    let Some(entry) = config.providers.get(id) else {
        return;
    };
    providers.push(Arc::new(OpenAICompatibleProvider {
        id: id.to_string(),
        name: name.to_string(),
        base_url: normalize_base(entry.url.as_deref().unwrap_or(default_url)),
        api_key: if use_api_key {
            entry
                .api_key
                .as_deref()
                .filter(|key| !is_placeholder_api_key(key))
                .map(str::to_string)
        } else {
            None
        },
        model: entry
            .default_model
            .clone()
            .unwrap_or_else(|| default_model.to_string()),
        client: Client::new(),
    }));
}

fn is_placeholder_api_key(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("x")
        || trimmed.eq_ignore_ascii_case("placeholder")
}

/// Cloudflare Workers AI over its REST API. Streaming replies arrive as
/// `data: {"response": "..."}` frames ending with `data: [DONE]`.
struct WorkersAiProvider {
    account_id: Option<String>,
    api_token: Option<String>,
    base_url: String,
    model: String,
    client: Client,
}

impl WorkersAiProvider {
    fn run_url(&self) -> anyhow::Result<String> {
        let Some(account_id) = &self.account_id else {
            anyhow::bail!("workers-ai requires an account id (set CLOUDFLARE_ACCOUNT_ID)");
        };
        Ok(format!(
            "{}/accounts/{}/ai/run/{}",
            self.base_url, account_id, self.model
        ))
    }
}

#[async_trait]
impl Provider for WorkersAiProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "workers-ai".to_string(),
            name: "Cloudflare Workers AI".to_string(),
            model: self.model.clone(),
        }
    }

    async fn run(&self, request: InferenceRequest) -> anyhow::Result<ByteStream> {
        let url = self.run_url()?;
        let mut req = self.client.post(url).json(&request);
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        passthrough_body(resp, "workers-ai").await
    }
}

struct OpenAICompatibleProvider {
    id: String,
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: Client,
}

impl OpenAICompatibleProvider {
    fn request_body(&self, request: &InferenceRequest) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": request
                .messages
                .iter()
                .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
                .collect::<Vec<_>>(),
            "max_tokens": request.max_tokens,
            "stream": request.stream,
        })
    }
}

#[async_trait]
impl Provider for OpenAICompatibleProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            model: self.model.clone(),
        }
    }

    async fn run(&self, request: InferenceRequest) -> anyhow::Result<ByteStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(url).json(&self.request_body(&request));
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }
        let resp = req.send().await?;
        passthrough_body(resp, &self.id).await
    }
}

async fn passthrough_body(resp: reqwest::Response, provider_id: &str) -> anyhow::Result<ByteStream> {
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!(
            "provider `{}` stream request failed with status {}: {}",
            provider_id,
            status,
            truncate_for_error(&text, 500)
        );
    }
    let bytes = resp
        .bytes_stream()
        .map(|chunk| chunk.map_err(anyhow::Error::from));
    Ok(Box::pin(bytes))
}

/// Offline provider that answers with the last user turn, framed the way
/// Workers AI frames its replies.
#[derive(Debug, Clone)]
pub struct LocalEchoProvider {
    delay: Duration,
}

impl Default for LocalEchoProvider {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(30),
        }
    }
}

impl LocalEchoProvider {
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Provider for LocalEchoProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "local".to_string(),
            name: "Local Echo".to_string(),
            model: "echo-1".to_string(),
        }
    }

    async fn run(&self, request: InferenceRequest) -> anyhow::Result<ByteStream> {
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let reply = format!("Echo: {prompt}");
        let delay = self.delay;
        let frames = stream! {
            for piece in reply.split_inclusive(' ') {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let frame = format!("data: {}\n\n", json!({ "response": piece }));
                yield Ok::<Bytes, anyhow::Error>(Bytes::from(frame));
            }
            yield Ok::<Bytes, anyhow::Error>(Bytes::from_static(b"data: [DONE]\n\n"));
        };
        Ok(Box::pin(frames))
    }
}

fn normalize_base(input: &str) -> String {
    if input.ends_with("/v1") {
        input.trim_end_matches('/').to_string()
    } else {
        format!("{}/v1", input.trim_end_matches('/'))
    }
}

fn normalize_plain_base(input: &str) -> String {
    input.trim_end_matches('/').to_string()
}

fn truncate_for_error(input: &str, max_len: usize) -> String {
    if input.len() <= max_len {
        return input.to_string();
    }
    let mut end = max_len;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &input[..end])
}
