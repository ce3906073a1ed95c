use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::contract::{OutputSchema, RoleItem, RoleStructure};
use crate::error::{PipelineError, PipelineResult, StepError};
use crate::invoker::{InvokeRequest, ModelInvoker, MASTER_TIER};
use crate::task::TaskRequest;

const MASTER_PROMPT: &str = "You are a role management agent. Your job is to assign the set of \
specialised agents that together accomplish the user's goal. For each agent give a role name and \
a role description; the description is used verbatim as that agent's system prompt, so write it \
as a complete operating instruction. Do NOT answer the user's request yourself and do not output \
any prose: reply with the structured role list only. Use as many roles as the task needs.";

/// One sub-agent to run, as decided by the master.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleDefinition {
    pub role_name: String,
    pub role_description: String,
}

impl TryFrom<RoleItem> for RoleDefinition {
    type Error = String;

    fn try_from(item: RoleItem) -> Result<Self, Self::Error> {
        let role_name = item.role_name.trim();
        let role_description = item.role_description.trim();
        if role_name.is_empty() {
            return Err("role_name is blank".into());
        }
        if role_description.is_empty() {
            return Err(format!("role '{role_name}' has a blank role_description"));
        }
        Ok(Self {
            role_name: role_name.to_string(),
            role_description: role_description.to_string(),
        })
    }
}

/// Splits a task into an ordered list of role definitions.
pub struct Decomposer {
    invoker: Arc<dyn ModelInvoker>,
    schema: OutputSchema,
    timeout: Duration,
    max_roles: usize,
}

impl Decomposer {
    pub fn new(invoker: Arc<dyn ModelInvoker>, timeout: Duration) -> Self {
        Self {
            invoker,
            schema: OutputSchema::decomposition(),
            timeout,
            max_roles: 0,
        }
    }

    /// Cap the number of roles kept from the model output. 0 means unlimited.
    pub fn with_max_roles(mut self, max_roles: usize) -> Self {
        self.max_roles = max_roles;
        self
    }

    pub async fn decompose(&self, task: &TaskRequest) -> PipelineResult<Vec<RoleDefinition>> {
        info!("Decomposing task {}", task.id);
        let request = InvokeRequest::new(MASTER_TIER, MASTER_PROMPT, task.description.clone())
            .with_schema(self.schema.clone());

        let response = tokio::time::timeout(self.timeout, self.invoker.invoke(request))
            .await
            .map_err(|_| {
                PipelineError::Decomposition(StepError::Timeout {
                    secs: self.timeout.as_secs_f64(),
                })
            })?
            .map_err(|e| PipelineError::Decomposition(e.into()))?;

        let metadata = response.metadata.ok_or_else(|| {
            PipelineError::Decomposition(StepError::Malformed(
                "response carried no structured output".into(),
            ))
        })?;

        let structure: RoleStructure = serde_json::from_value(Value::Object(metadata))
            .map_err(|e| PipelineError::Decomposition(StepError::Malformed(e.to_string())))?;

        let mut roles = structure
            .roles
            .into_iter()
            .map(RoleDefinition::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| PipelineError::Decomposition(StepError::Malformed(e)))?;

        if self.max_roles > 0 && roles.len() > self.max_roles {
            warn!(
                "Task {}: master proposed {} roles, keeping the first {}",
                task.id,
                roles.len(),
                self.max_roles
            );
            roles.truncate(self.max_roles);
        }

        for (i, role) in roles.iter().enumerate() {
            debug!("Task {} role #{i}: {}", task.id, role.role_name);
        }
        info!("Task {} decomposed into {} role(s)", task.id, roles.len());
        Ok(roles)
    }
}
