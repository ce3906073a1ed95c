//! Scripted model backend for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::error::InvokeError;
use crate::invoker::{ChunkStream, InvokeRequest, ModelInvoker, ModelResponse};

#[derive(Clone)]
pub(crate) enum Reply {
    Text(String),
    Fail(String),
    Delayed(Duration, String),
    Panic,
}

enum Matcher {
    Tier(String),
    SystemContains(String),
}

impl Matcher {
    fn matches(&self, request: &InvokeRequest) -> bool {
        match self {
            Matcher::Tier(t) => &request.tier == t,
            Matcher::SystemContains(s) => request.system_prompt().contains(s.as_str()),
        }
    }
}

/// Answers requests from a rule list; the first matching rule wins.
#[derive(Default)]
pub(crate) struct ScriptedInvoker {
    rules: Vec<(Matcher, Reply)>,
    calls: Mutex<Vec<InvokeRequest>>,
    stream_calls: AtomicUsize,
    completed: AtomicUsize,
}

impl ScriptedInvoker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_tier(mut self, tier: &str, reply: Reply) -> Self {
        self.rules.push((Matcher::Tier(tier.to_string()), reply));
        self
    }

    pub(crate) fn on_system(mut self, needle: &str, reply: Reply) -> Self {
        self.rules
            .push((Matcher::SystemContains(needle.to_string()), reply));
        self
    }

    pub(crate) fn calls(&self) -> Vec<InvokeRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_for_tier(&self, tier: &str) -> usize {
        self.calls().iter().filter(|r| r.tier == tier).count()
    }

    pub(crate) fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Replies that ran to the end, including any scripted delay.
    pub(crate) fn completed_replies(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    async fn reply_text(&self, request: &InvokeRequest) -> Result<String, InvokeError> {
        self.calls.lock().unwrap().push(request.clone());
        let reply = self
            .rules
            .iter()
            .find(|(m, _)| m.matches(request))
            .map(|(_, r)| r.clone())
            .unwrap_or_else(|| Reply::Fail("no scripted reply".into()));
        let result = match reply {
            Reply::Text(t) => Ok(t),
            Reply::Fail(msg) => Err(InvokeError::Model(msg)),
            Reply::Delayed(delay, t) => {
                tokio::time::sleep(delay).await;
                Ok(t)
            }
            Reply::Panic => panic!("scripted panic"),
        };
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(&self, request: InvokeRequest) -> Result<ModelResponse, InvokeError> {
        let text = self.reply_text(&request).await?;
        ModelResponse::from_text(text, None, request.schema.as_ref())
    }

    async fn invoke_stream(&self, request: InvokeRequest) -> Result<ChunkStream, InvokeError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let text = self.reply_text(&request).await?;
        let chunks: Vec<Result<String, InvokeError>> = text
            .chars()
            .collect::<Vec<_>>()
            .chunks(3)
            .map(|c| Ok(c.iter().collect()))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

pub(crate) fn roles_json(roles: &[(&str, &str)]) -> String {
    let roles: Vec<serde_json::Value> = roles
        .iter()
        .map(|(name, desc)| serde_json::json!({ "role_name": name, "role_description": desc }))
        .collect();
    serde_json::json!({ "roles": roles }).to_string()
}
