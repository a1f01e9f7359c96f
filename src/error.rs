use thiserror::Error;

use crate::profile::ValidationError;
use crate::prompts::RenderError;
use crate::providers::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("unknown provider '{0}' (expected openrouter, siliconflow, openai or claude)")]
    UnknownProvider(String),
    #[error("no API key found for provider '{provider}' (checked {checked})")]
    MissingCredential {
        provider: &'static str,
        checked: String,
    },
}

/// Every way a request can fail before a report is produced.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error("gateway misconfigured: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("prompt rendering failed: {0}")]
    Render(#[from] RenderError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation",
            GatewayError::Configuration(_) => "configuration",
            GatewayError::Render(_) => "render",
            GatewayError::Provider(ProviderError::Timeout(_)) => "timeout",
            GatewayError::Provider(_) => "provider",
        }
    }
}
