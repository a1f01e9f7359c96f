use anyhow::Result;
use tracing::{error, info};

pub mod error;
pub mod gateway;
pub mod locales;
pub mod logging;
pub mod profile;
pub mod prompts;
pub mod providers;
pub mod server;
pub mod settings;

pub use error::{ConfigurationError, GatewayError};
pub use gateway::{Gateway, GatewayResult};
pub use locales::Locale;
pub use profile::{Gender, GrowthProfile, ValidationError};
pub use prompts::{Persona, PromptEngine, PromptPair};
pub use providers::{
    Provider, ProviderConfig, ProviderError, ProviderImpl, ProviderKind, ProviderResponse,
};
pub use settings::Settings;

pub type AppGateway = Gateway<ProviderImpl>;

/// Builds the gateway from settings. A missing credential or unknown provider
/// does not fail here; it is logged and every request gets the fallback reply.
pub fn build_gateway<F>(settings: &Settings, lookup: F) -> Result<AppGateway>
where
    F: Fn(&str) -> Option<String>,
{
    let engine = PromptEngine::new(locales::LocaleBundles::load()?)?;
    let provider = resolve_provider(settings, lookup);
    if let Err(err) = &provider {
        error!("{}; requests will receive the fallback response", err);
    }
    Ok(Gateway::new(provider, engine, settings.persona())
        .with_retry(settings.retry_policy())
        .with_timeout(settings.timeout()))
}

pub fn resolve_provider<F>(settings: &Settings, lookup: F) -> Result<ProviderImpl, ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    let kind = ProviderKind::parse(&settings.provider)
        .ok_or_else(|| ConfigurationError::UnknownProvider(settings.provider.clone()))?;

    let mut config = ProviderConfig::preset(kind).with_max_tokens(settings.max_tokens);
    if let Some(model) = settings.model.as_deref() {
        config = config.with_model(model);
    }
    if let Some(endpoint) = settings.endpoint.as_deref() {
        config = config.with_endpoint(endpoint);
    }

    let key = providers::resolve_key(kind, lookup).ok_or_else(|| {
        ConfigurationError::MissingCredential {
            provider: kind.as_str(),
            checked: format!("{}, {}", kind.key_env(), providers::FALLBACK_KEY_ENV),
        }
    })?;

    info!(
        "using provider {} (model: {}, endpoint: {})",
        kind.as_str(),
        config.model,
        config.endpoint
    );
    Ok(providers::build_provider(config, key, reqwest::Client::new()))
}

pub async fn run(settings: Settings) -> Result<()> {
    let gateway = build_gateway(&settings, crate::settings::get_env)?;
    server::run_server(gateway, &settings.route, &settings.addr).await
}
