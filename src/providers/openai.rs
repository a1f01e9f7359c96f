use serde::{Deserialize, Serialize};

use super::retry::retry_after;
use super::{
    Message, Provider, ProviderConfig, ProviderError, ProviderFuture, ProviderResponse,
    ProviderUsage, TEMPERATURE, format_error_parts,
};

/// Any backend speaking the OpenAI `/chat/completions` dialect
/// (OpenRouter, SiliconFlow, OpenAI).
#[derive(Debug, Clone)]
pub struct OpenAI {
    config: ProviderConfig,
    key: String,
    client: reqwest::Client,
    messages: Vec<Message>,
}

impl OpenAI {
    pub fn new(config: ProviderConfig, key: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            config,
            key: key.into(),
            client,
            messages: Vec::new(),
        }
    }
}

impl Provider for OpenAI {
    fn name(&self) -> &'static str {
        self.config.kind.as_str()
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn append_system_input(mut self, input: String) -> Self {
        self.messages.push(Message::system(input));
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.messages.push(Message::user(input));
        self
    }

    fn generate(self) -> ProviderFuture {
        Box::pin(async move { call_chat_completions(self).await })
    }
}

async fn call_chat_completions(provider: OpenAI) -> Result<ProviderResponse, ProviderError> {
    let name = provider.name();
    let body = build_request_body(&provider.config, &provider.messages);
    let request = provider
        .config
        .authorize(provider.client.post(&provider.config.endpoint), &provider.key)
        .json(&body);

    let response = request
        .send()
        .await
        .map_err(|err| ProviderError::transport(name, err))?;
    let status = response.status();
    let retry_after = retry_after(response.headers());
    let text = response.text().await.unwrap_or_default();
    if status.is_success() {
        return extract_chat_response(&text, name, &provider.config.model);
    }

    let message = extract_openai_error(&text).unwrap_or(text);
    Err(ProviderError::Status {
        provider: name,
        status: status.as_u16(),
        message,
        retry_after,
    })
}

fn build_request_body<'a>(
    config: &'a ProviderConfig,
    messages: &'a [Message],
) -> ChatCompletionRequest<'a> {
    ChatCompletionRequest {
        model: &config.model,
        messages: messages
            .iter()
            .map(|message| ChatMessage {
                role: message.role.as_str(),
                content: &message.content,
            })
            .collect(),
        temperature: TEMPERATURE,
        max_tokens: config.max_tokens,
    }
}

fn extract_chat_response(
    text: &str,
    provider: &'static str,
    fallback_model: &str,
) -> Result<ProviderResponse, ProviderError> {
    let payload: ChatCompletionResponse = serde_json::from_str(text)
        .map_err(|err| ProviderError::malformed(provider, format!("invalid JSON: {}", err)))?;

    // Some gateways answer 200 with an error envelope instead of choices.
    if payload.choices.is_empty()
        && let Some(error) = payload.error
    {
        let code = error.code.as_ref().and_then(status_from_code);
        return Err(ProviderError::Status {
            provider,
            status: code.unwrap_or(502),
            message: format_error_parts(error.message, error.kind, error.code.map(code_text)),
            retry_after: None,
        });
    }

    let content = payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| ProviderError::malformed(provider, "no message content in first choice"))?;

    let model = payload
        .model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage.map(|usage| ProviderUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    });
    Ok(ProviderResponse {
        text: content,
        model,
        usage,
    })
}

fn extract_openai_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<OpenAIError>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(
        error.message,
        error.kind,
        error.code.map(code_text),
    ))
}

fn status_from_code(code: &serde_json::Value) -> Option<u16> {
    code.as_u64()
        .and_then(|value| u16::try_from(value).ok())
        .filter(|value| (100..600).contains(value))
}

fn code_text(code: serde_json::Value) -> String {
    match code {
        serde_json::Value::String(value) => value,
        other => other.to_string(),
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    error: Option<OpenAIError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<serde_json::Value>,
}
