use std::path::PathBuf;
use std::sync::Arc;

use hiyori_core::{AppConfig, PromptComposer};
use hiyori_providers::ProviderRegistry;

mod http;
mod relay;

pub use http::{app_router, serve};
pub use relay::{relay, stream_response, EVENT_STREAM_CONTENT_TYPE};

pub const DEFAULT_ASSETS_DIR: &str = "public";

#[derive(Clone)]
pub struct AppState {
    pub composer: Arc<PromptComposer>,
    pub providers: ProviderRegistry,
    pub assets_dir: PathBuf,
}

impl AppState {
    pub fn new(composer: PromptComposer, providers: ProviderRegistry, assets_dir: PathBuf) -> Self {
        Self {
            composer: Arc::new(composer),
            providers,
            assets_dir,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let composer = PromptComposer::with_overrides(&config.prompts);
        let providers = ProviderRegistry::new(config.clone().into());
        let assets_dir = config
            .assets_dir
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_ASSETS_DIR);
        Self::new(composer, providers, PathBuf::from(assets_dir))
    }
}
