use serde::{Deserialize, Serialize};

use super::retry::retry_after;
use super::{
    DEFAULT_MAX_TOKENS, Message, MessageRole, Provider, ProviderConfig, ProviderError,
    ProviderFuture, ProviderResponse, ProviderUsage, TEMPERATURE, format_error_parts,
};

#[derive(Debug, Clone)]
pub struct Claude {
    config: ProviderConfig,
    key: String,
    client: reqwest::Client,
    messages: Vec<Message>,
}

impl Claude {
    pub fn new(config: ProviderConfig, key: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            config,
            key: key.into(),
            client,
            messages: Vec::new(),
        }
    }
}

impl Provider for Claude {
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
        Box::pin(async move { call_messages(self).await })
    }
}

async fn call_messages(provider: Claude) -> Result<ProviderResponse, ProviderError> {
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
        return extract_text_response(&text, name, &provider.config.model);
    }
    Err(ProviderError::Status {
        provider: name,
        status: status.as_u16(),
        message: extract_claude_error(&text).unwrap_or(text),
        retry_after,
    })
}

// The Messages API takes the system prompt as a top-level field.
fn build_request_body<'a>(
    config: &'a ProviderConfig,
    messages: &'a [Message],
) -> MessagesRequest<'a> {
    let (system_inputs, user_inputs): (Vec<&Message>, Vec<&Message>) = messages
        .iter()
        .partition(|message| matches!(message.role, MessageRole::System));

    let system = system_inputs
        .iter()
        .map(|message| message.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    MessagesRequest {
        model: &config.model,
        max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: (!system.trim().is_empty()).then_some(system),
        messages: user_inputs
            .into_iter()
            .map(|message| MessagesTurn {
                role: message.role.as_str(),
                content: &message.content,
            })
            .collect(),
        temperature: TEMPERATURE,
    }
}

fn extract_text_response(
    text: &str,
    provider: &'static str,
    fallback_model: &str,
) -> Result<ProviderResponse, ProviderError> {
    let payload: MessagesResponse = serde_json::from_str(text)
        .map_err(|err| ProviderError::malformed(provider, format!("invalid JSON: {}", err)))?;

    let content = payload
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");
    if content.trim().is_empty() {
        return Err(ProviderError::malformed(provider, "no text block in content"));
    }

    let model = payload
        .model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage.map(|usage| ProviderUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage
            .input_tokens
            .zip(usage.output_tokens)
            .map(|(input, output)| input + output),
    });
    Ok(ProviderResponse {
        text: content,
        model,
        usage,
    })
}

fn extract_claude_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ClaudeError>,
    }

    #[derive(Deserialize)]
    struct ClaudeError {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(error.message, error.kind, None))
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<MessagesTurn<'a>>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct MessagesTurn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}
