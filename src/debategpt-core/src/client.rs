//! The chat-completion boundary.

use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use tracing::debug;

use crate::config::{ModelConfig, ModelSource};
use crate::error::{DebateGptError, Result};
use crate::prompt::{ChatMessage, Role};

/// Anything that turns a chat prompt into a completion.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model name recorded alongside results.
    fn name(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage], max_tokens: u32) -> Result<String>;
}

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub api_base: String,
    pub api_key: String,
}

impl Endpoint {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
        }
    }
}

/// [`ChatModel`] backed by an OpenAI-compatible chat completions API.
pub struct OpenAiChatModel {
    client: Client<OpenAIConfig>,
    name: String,
    request_model: String,
}

impl OpenAiChatModel {
    pub fn new(model: &ModelConfig, endpoint: &Endpoint) -> Result<Self> {
        if model.source == ModelSource::Openai && endpoint.api_key.is_empty() {
            return Err(DebateGptError::ConfigError(
                "OPENAI_API_KEY must be set to prompt OpenAI models".to_string(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(model.timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                DebateGptError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        let config = OpenAIConfig::new()
            .with_api_key(&endpoint.api_key)
            .with_api_base(&endpoint.api_base);

        Ok(Self {
            client: Client::with_config(config).with_http_client(http_client),
            name: model.name.clone(),
            request_model: model.request_model().to_string(),
        })
    }
}

fn to_request_message(message: &ChatMessage) -> ChatCompletionRequestMessage {
    let content = message.content.clone();
    match message.role {
        Role::System => ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
            content: content.into(),
            name: None,
        }),
        Role::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
            content: content.into(),
            name: None,
        }),
        Role::Assistant => {
            ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                content: Some(content.into()),
                name: None,
                tool_calls: None,
                refusal: None,
                audio: None,
                function_call: None,
            })
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, messages: &[ChatMessage], max_tokens: u32) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.request_model)
            .max_completion_tokens(max_tokens)
            .messages(messages.iter().map(to_request_message).collect::<Vec<_>>())
            .build()?;

        let response = self.client.chat().create(request).await?;
        debug!(
            model = %self.request_model,
            choices = response.choices.len(),
            "Completion received"
        );
        Ok(response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;

    #[test]
    fn test_request_message_roles() {
        let system = to_request_message(&ChatMessage::system("judge"));
        assert!(matches!(system, ChatCompletionRequestMessage::System(_)));
        let user = to_request_message(&ChatMessage::user("debate"));
        assert!(matches!(user, ChatCompletionRequestMessage::User(_)));
        let assistant = to_request_message(&ChatMessage::new("assistant", "Pro").unwrap());
        assert!(matches!(assistant, ChatCompletionRequestMessage::Assistant(_)));
    }

    #[test]
    fn test_openai_requires_key() {
        let model = default_config().model;
        let endpoint = Endpoint::new("https://api.openai.com/v1", "");
        assert!(matches!(
            OpenAiChatModel::new(&model, &endpoint),
            Err(DebateGptError::ConfigError(_))
        ));
    }

    #[test]
    fn test_open_source_needs_no_key() {
        let mut model = default_config().model;
        model.name = "mistral".to_string();
        model.source = ModelSource::OpenSource;
        model.request_name = Some("gpt-3.5-turbo".to_string());
        let endpoint = Endpoint::new("http://localhost:8000/v1", "");
        let client = OpenAiChatModel::new(&model, &endpoint).unwrap();
        assert_eq!(client.name(), "mistral");
        assert_eq!(client.request_model, "gpt-3.5-turbo");
    }
}
