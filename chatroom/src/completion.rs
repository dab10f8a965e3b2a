use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::assembler::{assemble, ChatMessage};
use crate::config::CompletionConfig;
use crate::db::{with_conn, DbPool};
use crate::error::{ChatError, Result};
use crate::messages;
use crate::model::Message;

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage>,
}

/// Subset of the chat-completion response this service reads.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Option<Vec<Choice>>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// Text of the first choice, if the response has one.
    pub fn into_text(self) -> Result<String> {
        self.choices
            .ok_or_else(|| ChatError::MalformedResponse("missing `choices`".into()))?
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::MalformedResponse("empty `choices`".into()))?
            .message
            .and_then(|m| m.content)
            .ok_or_else(|| ChatError::MalformedResponse("missing `choices[0].message.content`".into()))
    }
}

/// Forwards a room's history to the chat-completion endpoint.
#[derive(Clone)]
pub struct CompletionGateway {
    client: Client,
    config: CompletionConfig,
}

impl CompletionGateway {
    pub fn new(config: CompletionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChatError::Completion(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Load the room's history and ask the model for the next reply.
    pub async fn complete_room(&self, pool: &DbPool, room_id: i64) -> Result<String> {
        let history = with_conn(pool, move |conn| messages::list_by_room(conn, room_id)).await?;
        self.complete(&history).await
    }

    /// Send `history` to the completion endpoint and return the reply text.
    pub async fn complete(&self, history: &[Message]) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages: assemble(history),
        };
        debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            "sending completion request"
        );
        let secs = self.config.timeout.as_secs();
        match tokio::time::timeout(self.config.timeout, self.send(&request)).await {
            Ok(res) => res,
            Err(_) => {
                warn!(timeout_secs = secs, "completion request timed out");
                Err(ChatError::Timeout(secs))
            }
        }
    }

    async fn send(&self, request: &ChatCompletionRequest<'_>) -> Result<String> {
        let api_key = std::env::var(&self.config.api_key_env).unwrap_or_default();
        let secs = self.config.timeout.as_secs();
        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                ChatError::Timeout(secs)
            } else {
                ChatError::Completion(e.to_string())
            }
        };
        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        if !status.is_success() {
            warn!(%status, "completion endpoint returned an error");
            return Err(ChatError::Completion(format!("endpoint returned {status}: {body}")));
        }
        let parsed: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| ChatError::MalformedResponse(e.to_string()))?;
        parsed.into_text()
    }
}
