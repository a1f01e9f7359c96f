use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::error::{ConfigurationError, GatewayError};
use crate::locales::Locale;
use crate::profile::{self, ValidationError};
use crate::prompts::{Persona, PromptEngine, PromptPair};
use crate::providers::retry::{RetryPolicy, wait_with_backoff};
use crate::providers::{Provider, ProviderError, ProviderResponse, ProviderUsage};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(25);

/// Outcome of one request. Only `text` or `user_message` ever reach the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayResult {
    Success {
        text: String,
    },
    Failure {
        user_message: String,
        internal_detail: String,
    },
}

impl GatewayResult {
    pub fn is_success(&self) -> bool {
        matches!(self, GatewayResult::Success { .. })
    }
}

/// Turns a raw request body into a report: normalize, render, call the
/// provider. Shared read-only across requests.
#[derive(Debug, Clone)]
pub struct Gateway<P: Provider> {
    provider: Result<P, ConfigurationError>,
    engine: PromptEngine,
    persona: Persona,
    retry: RetryPolicy,
    timeout: Duration,
}

impl<P: Provider> Gateway<P> {
    pub fn new(
        provider: Result<P, ConfigurationError>,
        engine: PromptEngine,
        persona: Persona,
    ) -> Self {
        Self {
            provider,
            engine,
            persona,
            retry: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = RetryPolicy {
            max_attempts: retry.max_attempts.max(1),
            ..retry
        };
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn fallback_message(&self, locale: Locale) -> &str {
        &self.engine.bundle(locale).fallback_message
    }

    pub async fn handle(&self, body: &[u8]) -> GatewayResult {
        let started = Instant::now();
        let raw = serde_json::from_slice::<Value>(body)
            .map_err(|err| ValidationError::MalformedJson(err.to_string()));
        let locale = raw.as_ref().map(requested_locale).unwrap_or_default();

        match self.run(raw, locale).await {
            Ok(response) => {
                info!(
                    "report generated (locale: {}, model: {}, {}, {}ms)",
                    locale.as_str(),
                    response.model.as_deref().unwrap_or("unavailable"),
                    format_usage(response.usage.as_ref()),
                    started.elapsed().as_millis()
                );
                GatewayResult::Success {
                    text: response.text,
                }
            }
            Err(err) => {
                let internal_detail = err.to_string();
                error!(
                    "report failed (locale: {}, kind: {}, {}ms): {}",
                    locale.as_str(),
                    err.kind(),
                    started.elapsed().as_millis(),
                    internal_detail
                );
                GatewayResult::Failure {
                    user_message: self.fallback_message(locale).to_string(),
                    internal_detail,
                }
            }
        }
    }

    async fn run(
        &self,
        raw: Result<Value, ValidationError>,
        locale: Locale,
    ) -> Result<ProviderResponse, GatewayError> {
        let profile = profile::normalize(&raw?)?;
        let prompt = self.engine.render(&profile, locale, &self.persona)?;
        let provider = self.provider.as_ref().map_err(Clone::clone)?;
        debug!(
            "calling {} ({}) for {} day old profile",
            provider.name(),
            provider.model(),
            profile.age_days()
        );

        let response = timeout(self.timeout, self.generate_with_retry(provider, &prompt))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))??;
        Ok(response)
    }

    async fn generate_with_retry(
        &self,
        provider: &P,
        prompt: &PromptPair,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut attempt = 0usize;
        let mut delay = self.retry.base_delay;
        loop {
            attempt += 1;
            let result = provider
                .clone()
                .append_system_input(prompt.system_prompt.clone())
                .append_user_input(prompt.user_prompt.clone())
                .generate()
                .await;
            match result {
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    delay = wait_with_backoff(
                        provider.name(),
                        attempt,
                        &self.retry,
                        delay,
                        err.retry_after(),
                    )
                    .await;
                }
                other => return other,
            }
        }
    }
}

fn requested_locale(raw: &Value) -> Locale {
    Locale::resolve(raw.get("lang").and_then(Value::as_str))
}

fn format_usage(usage: Option<&ProviderUsage>) -> String {
    let Some(usage) = usage else {
        return "tokens: unavailable".to_string();
    };
    let total = usage.total_tokens.or_else(|| {
        usage
            .prompt_tokens
            .zip(usage.completion_tokens)
            .map(|(prompt, completion)| prompt + completion)
    });
    match total {
        Some(total) => format!("tokens: {}", total),
        None => "tokens: unavailable".to_string(),
    }
}
