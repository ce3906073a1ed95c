use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::contract::{OutputSchema, CHOICE_FIELD};
use crate::error::{PipelineError, PipelineResult, StepError};
use crate::invoker::{InvokeRequest, ModelInvoker, ROUTER_TIER};
use crate::task::{Category, TaskRequest};

const ROUTER_PROMPT: &str = "You are a routing agent. Do NOT answer or carry out the user's \
request. Read it and reply only with the structured task category.";

/// Outcome of routing one task.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// `None` when the router found no fitting category.
    pub category: Option<Category>,
    pub raw_metadata: Map<String, Value>,
}

/// Maps a task description onto a [`Category`] with one schema-bound model call.
pub struct Classifier {
    invoker: Arc<dyn ModelInvoker>,
    schema: OutputSchema,
    timeout: Duration,
}

impl Classifier {
    pub fn new(invoker: Arc<dyn ModelInvoker>, timeout: Duration) -> Self {
        Self {
            invoker,
            schema: OutputSchema::classification(),
            timeout,
        }
    }

    pub async fn classify(&self, task: &TaskRequest) -> PipelineResult<Classification> {
        if task.description.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "task description is empty".into(),
            ));
        }

        info!("Routing task {}", task.id);
        let request = InvokeRequest::new(ROUTER_TIER, ROUTER_PROMPT, task.description.clone())
            .with_schema(self.schema.clone());

        let response = tokio::time::timeout(self.timeout, self.invoker.invoke(request))
            .await
            .map_err(|_| {
                PipelineError::Classification(StepError::Timeout {
                    secs: self.timeout.as_secs_f64(),
                })
            })?
            .map_err(|e| PipelineError::Classification(e.into()))?;

        let raw_metadata = response.metadata.ok_or_else(|| {
            PipelineError::Classification(StepError::Malformed(
                "response carried no structured output".into(),
            ))
        })?;
        let shown = Value::Object(raw_metadata.clone());
        debug!("Router metadata for task {}: {shown}", task.id);

        let category = match raw_metadata.get(CHOICE_FIELD) {
            None | Some(Value::Null) => None,
            Some(Value::String(label)) => Some(Category::from_label(label).ok_or_else(|| {
                PipelineError::Classification(StepError::Malformed(format!(
                    "unknown category '{label}'"
                )))
            })?),
            Some(other) => {
                return Err(PipelineError::Classification(StepError::Malformed(format!(
                    "{CHOICE_FIELD} is not a string: {other}"
                ))))
            }
        };

        match category {
            Some(c) => info!("Task {} routed to {c}", task.id),
            None => info!("Task {} matched no category", task.id),
        }

        Ok(Classification {
            category,
            raw_metadata,
        })
    }
}
