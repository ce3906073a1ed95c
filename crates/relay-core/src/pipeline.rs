use std::sync::Arc;
use std::time::Duration;

use relay_config::PipelineConfig;
use tracing::info;

use crate::dispatch::{DispatchTable, PipelineOutcome, RequirementAnalysisHandler};
use crate::error::PipelineResult;
use crate::invoker::ModelInvoker;
use crate::master::Decomposer;
use crate::role::RoleExecutor;
use crate::router::Classifier;
use crate::task::TaskRequest;

/// Classify → dispatch, and for requirement analysis decompose → execute → aggregate.
pub struct Pipeline {
    classifier: Classifier,
    dispatch: DispatchTable,
    originator: String,
}

impl Pipeline {
    pub fn new(classifier: Classifier, dispatch: DispatchTable) -> Self {
        Self {
            classifier,
            dispatch,
            originator: "cli".to_string(),
        }
    }

    /// Wire every stage to one invoker using the configured limits.
    pub fn from_config(invoker: Arc<dyn ModelInvoker>, config: &PipelineConfig) -> Self {
        let classifier = Classifier::new(
            invoker.clone(),
            Duration::from_secs(config.classify_timeout_secs),
        );
        let decomposer = Decomposer::new(
            invoker.clone(),
            Duration::from_secs(config.decompose_timeout_secs),
        )
        .with_max_roles(config.max_roles);
        let executor = RoleExecutor::new(invoker, Duration::from_secs(config.role_timeout_secs))
            .with_max_concurrent(config.max_concurrent_roles)
            .with_streaming(config.streaming);

        let dispatch = DispatchTable::new(Arc::new(RequirementAnalysisHandler::new(
            decomposer, executor,
        )));
        Self::new(classifier, dispatch)
    }

    pub fn with_originator(mut self, originator: &str) -> Self {
        self.originator = originator.to_string();
        self
    }

    pub fn dispatch_table(&self) -> &DispatchTable {
        &self.dispatch
    }

    /// Run a raw task description end to end.
    pub async fn run(&self, description: &str) -> PipelineResult<PipelineOutcome> {
        let task = TaskRequest::new(description, &self.originator)?;
        self.run_task(&task).await
    }

    pub async fn run_task(&self, task: &TaskRequest) -> PipelineResult<PipelineOutcome> {
        info!("Task {} from {}: {}", task.id, task.originator, task.description);
        let classification = self.classifier.classify(task).await?;
        self.dispatch.dispatch(classification.category, task).await
    }
}
