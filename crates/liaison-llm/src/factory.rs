//! Config-driven provider selection.
//!
//! A session's start request carries a model hint (`auto`, `qwen-max`,
//! `openai`); the factory resolves it against settings to a concrete
//! backend at session start. Selection is a configuration decision, never
//! runtime type inspection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use liaison_settings::ProviderSettings;

use crate::openai::OpenAiCompatProvider;
use crate::provider::{Provider, ProviderError, ProviderResult};

/// Factory for creating providers on demand, one per session start.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    /// Create a provider for the given model hint.
    ///
    /// Returns `ProviderError::Auth` if no credentials are available for
    /// the resolved backend.
    async fn create(&self, model_hint: &str) -> ProviderResult<Arc<dyn Provider>>;
}

/// Resolved backend parameters for a model hint.
#[derive(Clone, Debug, PartialEq, Eq)]
struct ResolvedBackend<'a> {
    name: &'static str,
    base_url: &'a str,
    model: &'a str,
}

/// Resolve a model hint against settings. Unknown hints fall back to the
/// configured default.
fn resolve_hint<'a>(settings: &'a ProviderSettings, hint: &str) -> ResolvedBackend<'a> {
    let effective = match hint {
        "" | "auto" => settings.default_model.as_str(),
        known @ ("qwen-max" | "openai") => known,
        unknown => {
            warn!(hint = unknown, default = %settings.default_model, "unknown model hint, using default");
            settings.default_model.as_str()
        }
    };
    match effective {
        "openai" => ResolvedBackend {
            name: "openai",
            base_url: &settings.openai_base_url,
            model: &settings.openai_model,
        },
        // qwen-max and anything else configured as default
        _ => ResolvedBackend {
            name: "qwen",
            base_url: &settings.qwen_base_url,
            model: &settings.qwen_model,
        },
    }
}

/// [`ProviderFactory`] building [`OpenAiCompatProvider`]s from settings.
pub struct OpenAiCompatFactory {
    settings: ProviderSettings,
}

impl OpenAiCompatFactory {
    /// Create a factory over the given provider settings.
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ProviderFactory for OpenAiCompatFactory {
    async fn create(&self, model_hint: &str) -> ProviderResult<Arc<dyn Provider>> {
        let backend = resolve_hint(&self.settings, model_hint);
        let api_key =
            std::env::var(&self.settings.api_key_env).map_err(|_| ProviderError::Auth {
                message: format!("API key env var {} is not set", self.settings.api_key_env),
            })?;
        let provider = OpenAiCompatProvider::new(
            backend.name,
            backend.base_url,
            backend.model,
            api_key,
            Duration::from_millis(self.settings.request_timeout_ms),
        )?;
        Ok(Arc::new(provider))
    }
}
