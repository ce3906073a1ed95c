pub mod model_pool;
pub mod rig_backend;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::contract::OutputSchema;
use crate::error::InvokeError;

pub use model_pool::ModelPool;
pub use rig_backend::RigInvoker;

/// Model tiers used by the pipeline stages. Missing tiers fall back to "default".
pub const ROUTER_TIER: &str = "router";
pub const MASTER_TIER: &str = "master";
pub const ROLE_TIER: &str = "role";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// A single model call: ordered messages, the tier to route it to, and an
/// optional schema the answer must satisfy.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub tier: String,
    pub messages: Vec<ChatMessage>,
    pub schema: Option<OutputSchema>,
}

impl InvokeRequest {
    /// The common system + user pair.
    pub fn new(tier: &str, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            tier: tier.to_string(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: OutputSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Concatenated system messages, or empty if there are none.
    pub fn system_prompt(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A complete model answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub content: String,
    /// Validated structured output. Present exactly when a schema was requested.
    pub metadata: Option<Map<String, Value>>,
    /// Reasoning text emitted by thinking models, if any.
    pub reasoning: Option<String>,
}

impl ModelResponse {
    /// Wrap raw model text, validating it when a schema is given.
    pub fn from_text(
        content: String,
        reasoning: Option<String>,
        schema: Option<&OutputSchema>,
    ) -> Result<Self, InvokeError> {
        let metadata = match schema {
            Some(schema) => Some(schema.parse(&content)?),
            None => None,
        };
        Ok(Self {
            content,
            metadata,
            reasoning,
        })
    }
}

/// Incremental text chunks of a streamed completion.
pub type ChunkStream = BoxStream<'static, Result<String, InvokeError>>;

/// Sends messages to a language model.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Run the request to completion.
    async fn invoke(&self, request: InvokeRequest) -> Result<ModelResponse, InvokeError>;

    /// Run the request as a stream of text chunks.
    ///
    /// Backends without native streaming yield the full completion as one chunk.
    async fn invoke_stream(&self, request: InvokeRequest) -> Result<ChunkStream, InvokeError> {
        let response = self.invoke(request).await?;
        Ok(stream::iter(vec![Ok(response.content)]).boxed())
    }
}

/// Drain a chunk stream into a complete response.
///
/// The accumulated text is validated against `schema` exactly like a
/// non-streamed response, so both paths produce the same result.
pub async fn collect_stream(
    mut chunks: ChunkStream,
    schema: Option<&OutputSchema>,
) -> Result<ModelResponse, InvokeError> {
    let mut content = String::new();
    let mut count = 0usize;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        count += 1;
        debug!("Stream chunk {count}: {} chars", chunk.len());
        content.push_str(&chunk);
    }
    ModelResponse::from_text(content, None, schema)
}
