use reqwest::RequestBuilder;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

mod claude;
mod openai;
pub mod retry;

pub use claude::Claude;
pub use openai::OpenAI;

/// Sampling temperature sent with every request.
pub const TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
/// Shared fallback credential variable, checked after the provider-specific one.
pub const FALLBACK_KEY_ENV: &str = "AI_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenRouter,
    SiliconFlow,
    OpenAI,
    Claude,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenRouter,
        ProviderKind::SiliconFlow,
        ProviderKind::OpenAI,
        ProviderKind::Claude,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::SiliconFlow => "siliconflow",
            ProviderKind::OpenAI => "openai",
            ProviderKind::Claude => "claude",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "openrouter" => Some(ProviderKind::OpenRouter),
            "siliconflow" | "silicon-flow" => Some(ProviderKind::SiliconFlow),
            "openai" => Some(ProviderKind::OpenAI),
            "claude" | "anthropic" => Some(ProviderKind::Claude),
            _ => None,
        }
    }

    pub fn wire(&self) -> WireFormat {
        match self {
            ProviderKind::OpenRouter | ProviderKind::SiliconFlow | ProviderKind::OpenAI => {
                WireFormat::ChatCompletions
            }
            ProviderKind::Claude => WireFormat::Messages,
        }
    }

    pub fn key_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "OPENROUTER_API_KEY",
            ProviderKind::SiliconFlow => "SILICONFLOW_API_KEY",
            ProviderKind::OpenAI => "OPENAI_API_KEY",
            ProviderKind::Claude => "ANTHROPIC_API_KEY",
        }
    }
}

/// Request/response envelope family spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// OpenAI-compatible `/chat/completions`.
    ChatCompletions,
    /// Anthropic `/v1/messages`.
    Messages,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    Bearer,
    Header(String),
}

/// Everything needed to talk to one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub endpoint: String,
    pub auth: AuthScheme,
    pub model: String,
    pub headers: Vec<(String, String)>,
    pub max_tokens: Option<u32>,
}

impl ProviderConfig {
    pub fn preset(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::OpenRouter => Self {
                kind,
                endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
                auth: AuthScheme::Bearer,
                model: "google/gemini-2.0-flash-001".to_string(),
                headers: vec![
                    ("HTTP-Referer".to_string(), "https://babyup.app".to_string()),
                    ("X-Title".to_string(), "BabyUp".to_string()),
                ],
                max_tokens: None,
            },
            ProviderKind::SiliconFlow => Self {
                kind,
                endpoint: "https://api.siliconflow.cn/v1/chat/completions".to_string(),
                auth: AuthScheme::Bearer,
                model: "Qwen/Qwen2.5-7B-Instruct".to_string(),
                headers: Vec::new(),
                max_tokens: Some(DEFAULT_MAX_TOKENS),
            },
            ProviderKind::OpenAI => Self {
                kind,
                endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
                auth: AuthScheme::Bearer,
                model: "gpt-4o-mini".to_string(),
                headers: Vec::new(),
                max_tokens: None,
            },
            ProviderKind::Claude => Self {
                kind,
                endpoint: "https://api.anthropic.com/v1/messages".to_string(),
                auth: AuthScheme::Header("x-api-key".to_string()),
                model: "claude-3-5-sonnet-latest".to_string(),
                headers: vec![("anthropic-version".to_string(), "2023-06-01".to_string())],
                max_tokens: Some(DEFAULT_MAX_TOKENS),
            },
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model.trim().to_string();
        }
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        if !endpoint.trim().is_empty() {
            self.endpoint = endpoint.trim().to_string();
        }
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        if let Some(max_tokens) = max_tokens {
            self.max_tokens = (max_tokens > 0).then_some(max_tokens);
        }
        self
    }

    pub(crate) fn authorize(&self, builder: RequestBuilder, key: &str) -> RequestBuilder {
        let builder = match &self.auth {
            AuthScheme::Bearer => builder.bearer_auth(key),
            AuthScheme::Header(name) => builder.header(name.as_str(), key),
        };
        self.headers
            .iter()
            .fold(builder, |builder, (name, value)| {
                builder.header(name.as_str(), value.as_str())
            })
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} API error ({status}): {message}")]
    Status {
        provider: &'static str,
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("malformed {provider} response: {detail}")]
    MalformedResponse {
        provider: &'static str,
        detail: String,
    },
    #[error("{provider} request failed: {detail}")]
    Transport {
        provider: &'static str,
        detail: String,
    },
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Status {
                status, message, ..
            } => retry::is_rate_limited(*status, message),
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub(crate) fn transport(provider: &'static str, err: reqwest::Error) -> Self {
        ProviderError::Transport {
            provider,
            detail: err.to_string(),
        }
    }

    pub(crate) fn malformed(provider: &'static str, detail: impl Into<String>) -> Self {
        ProviderError::MalformedResponse {
            provider,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: String) -> Self {
        Self {
            role: MessageRole::System,
            content,
        }
    }

    pub fn user(content: String) -> Self {
        Self {
            role: MessageRole::User,
            content,
        }
    }
}

pub type ProviderFuture =
    Pin<Box<dyn Future<Output = Result<ProviderResponse, ProviderError>> + Send>>;

/// One backend behind a uniform `generate` call. Implementations make exactly
/// one network request per `generate` and never retry.
pub trait Provider: Clone + Send + Sync {
    fn name(&self) -> &'static str;
    fn model(&self) -> &str;
    fn append_system_input(self, input: String) -> Self;
    fn append_user_input(self, input: String) -> Self;
    fn generate(self) -> ProviderFuture;
}

#[derive(Debug, Clone)]
pub enum ProviderImpl {
    OpenAI(OpenAI),
    Claude(Claude),
}

impl Provider for ProviderImpl {
    fn name(&self) -> &'static str {
        match self {
            ProviderImpl::OpenAI(provider) => provider.name(),
            ProviderImpl::Claude(provider) => provider.name(),
        }
    }

    fn model(&self) -> &str {
        match self {
            ProviderImpl::OpenAI(provider) => provider.model(),
            ProviderImpl::Claude(provider) => provider.model(),
        }
    }

    fn append_system_input(self, input: String) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.append_system_input(input))
            }
            ProviderImpl::Claude(provider) => {
                ProviderImpl::Claude(provider.append_system_input(input))
            }
        }
    }

    fn append_user_input(self, input: String) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.append_user_input(input))
            }
            ProviderImpl::Claude(provider) => {
                ProviderImpl::Claude(provider.append_user_input(input))
            }
        }
    }

    fn generate(self) -> ProviderFuture {
        match self {
            ProviderImpl::OpenAI(provider) => provider.generate(),
            ProviderImpl::Claude(provider) => provider.generate(),
        }
    }
}

pub fn build_provider(config: ProviderConfig, key: String, client: reqwest::Client) -> ProviderImpl {
    match config.kind.wire() {
        WireFormat::ChatCompletions => ProviderImpl::OpenAI(OpenAI::new(config, key, client)),
        WireFormat::Messages => ProviderImpl::Claude(Claude::new(config, key, client)),
    }
}

/// Looks up the credential for `kind`, then the shared fallback variable.
pub fn resolve_key<F>(kind: ProviderKind, lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(kind.key_env())
        .or_else(|| lookup(FALLBACK_KEY_ENV))
        .filter(|value| !value.trim().is_empty())
}

pub(crate) fn format_error_parts(
    message: Option<String>,
    kind: Option<String>,
    code: Option<String>,
) -> String {
    let mut parts = Vec::new();
    if let Some(message) = message
        && !message.trim().is_empty()
    {
        parts.push(message);
    }
    if let Some(kind) = kind
        && !kind.trim().is_empty()
    {
        parts.push(format!("type: {}", kind));
    }
    if let Some(code) = code
        && !code.trim().is_empty()
    {
        parts.push(format!("code: {}", code));
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(" | ")
    }
}
