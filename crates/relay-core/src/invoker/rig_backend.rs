use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use rig::completion::{CompletionModel, CompletionRequest, Message};
use rig::message::{AssistantContent, Text, UserContent};
use rig::streaming::StreamedAssistantContent;
use rig::OneOrMany;
use tracing::debug;

use super::{ChatRole, ChunkStream, InvokeRequest, ModelInvoker, ModelPool, ModelResponse};
use crate::error::InvokeError;

/// [`ModelInvoker`] backed by rig completion models.
///
/// Uses rig's CompletionModel directly; structured output is requested by
/// appending the schema to the preamble and validated on our side, so it
/// works with any provider regardless of native JSON-mode support.
pub struct RigInvoker {
    models: ModelPool,
    temperature: f64,
    max_tokens: u64,
}

impl RigInvoker {
    pub fn new(models: ModelPool, temperature: f64, max_tokens: u64) -> Self {
        Self {
            models,
            temperature,
            max_tokens,
        }
    }

    pub fn models(&self) -> &ModelPool {
        &self.models
    }
}

/// Translate a request into rig form. System messages are folded into the
/// preamble, followed by the schema instruction when a schema is set.
pub(crate) fn build_completion_request(
    request: &InvokeRequest,
    temperature: f64,
    max_tokens: u64,
) -> Result<CompletionRequest, InvokeError> {
    if !request.messages.iter().any(|m| m.role == ChatRole::User) {
        return Err(InvokeError::Model("request has no user message".into()));
    }

    let mut preamble = request.system_prompt();
    if let Some(schema) = &request.schema {
        if !preamble.is_empty() {
            preamble.push_str("\n\n");
        }
        preamble.push_str(&schema.instruction());
    }

    let history: Vec<Message> = request
        .messages
        .iter()
        .filter_map(|m| match m.role {
            ChatRole::System => None,
            ChatRole::User => Some(Message::User {
                content: OneOrMany::one(UserContent::Text(Text {
                    text: m.content.clone(),
                })),
            }),
            ChatRole::Assistant => Some(Message::Assistant {
                id: None,
                content: OneOrMany::one(AssistantContent::Text(Text {
                    text: m.content.clone(),
                })),
            }),
        })
        .collect();

    let chat_history = OneOrMany::many(history)
        .map_err(|_| InvokeError::Model("request has no user message".into()))?;

    Ok(CompletionRequest {
        preamble: if preamble.is_empty() {
            None
        } else {
            Some(preamble)
        },
        chat_history,
        documents: Vec::new(),
        tools: Vec::new(),
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        tool_choice: None,
        additional_params: None,
    })
}

#[allow(deprecated)]
#[async_trait]
impl ModelInvoker for RigInvoker {
    async fn invoke(&self, request: InvokeRequest) -> Result<ModelResponse, InvokeError> {
        let (model, model_name) = self.models.get(&request.tier);
        let completion = build_completion_request(&request, self.temperature, self.max_tokens)?;

        debug!(
            "LLM request [{}/{model_name}]: {} messages, schema={}",
            request.tier,
            request.messages.len(),
            request.schema.as_ref().map(|s| s.name()).unwrap_or("none")
        );

        let started = Instant::now();
        let response = model
            .completion(completion)
            .await
            .map_err(|e| InvokeError::Model(format!("LLM completion error: {e}")))?;

        let mut text = String::new();
        let mut reasoning = String::new();
        for content in response.choice.iter() {
            match content {
                AssistantContent::Text(t) => text.push_str(&t.text),
                AssistantContent::Reasoning(r) => {
                    if !reasoning.is_empty() {
                        reasoning.push('\n');
                    }
                    reasoning.push_str(&r.reasoning.join(" "));
                }
                _ => {}
            }
        }

        debug!(
            "LLM response [{}/{model_name}]: {} chars in {:.1}s",
            request.tier,
            text.len(),
            started.elapsed().as_secs_f64()
        );

        let reasoning = if reasoning.is_empty() {
            None
        } else {
            Some(reasoning)
        };
        ModelResponse::from_text(text, reasoning, request.schema.as_ref())
    }

    async fn invoke_stream(&self, request: InvokeRequest) -> Result<ChunkStream, InvokeError> {
        let (model, model_name) = self.models.get(&request.tier);
        let model = model.clone();
        let completion = build_completion_request(&request, self.temperature, self.max_tokens)?;

        debug!(
            "LLM stream request [{}/{model_name}]: {} messages",
            request.tier,
            request.messages.len()
        );

        let stream = model
            .stream(completion)
            .await
            .map_err(|e| InvokeError::Model(format!("LLM stream error: {e}")))?;

        // Only text deltas make up the content; reasoning and the final
        // usage frame are dropped.
        let chunks = stream.filter_map(|item| async move {
            match item {
                Ok(StreamedAssistantContent::Text(t)) => Some(Ok(t.text)),
                Ok(_) => None,
                Err(e) => Some(Err(InvokeError::Model(format!("LLM stream error: {e}")))),
            }
        });
        Ok(chunks.boxed())
    }
}
