use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::aggregate::{AggregatedReport, Aggregator};
use crate::error::PipelineResult;
use crate::master::Decomposer;
use crate::role::RoleExecutor;
use crate::task::{Category, TaskRequest};

/// Terminal state of a pipeline run that did not error.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// No handler did anything: the category was unmatched or left unhandled.
    NoAction { category: Option<Category> },
    /// A handler ran but produced no report.
    Handled { category: Category },
    Report {
        category: Category,
        report: AggregatedReport,
    },
}

impl PipelineOutcome {
    pub fn category(&self) -> Option<Category> {
        match self {
            PipelineOutcome::NoAction { category } => *category,
            PipelineOutcome::Handled { category } | PipelineOutcome::Report { category, .. } => {
                Some(*category)
            }
        }
    }

    pub fn report(&self) -> Option<&AggregatedReport> {
        match self {
            PipelineOutcome::Report { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// What a handler did with a task.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutput {
    Done,
    Skipped,
    Report(AggregatedReport),
}

/// Work performed for one category.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &TaskRequest) -> PipelineResult<HandlerOutput>;
}

/// Stand-in for categories whose processing lives outside this crate.
pub struct PlaceholderHandler {
    category: Category,
}

impl PlaceholderHandler {
    pub fn new(category: Category) -> Self {
        Self { category }
    }
}

#[async_trait]
impl TaskHandler for PlaceholderHandler {
    async fn handle(&self, task: &TaskRequest) -> PipelineResult<HandlerOutput> {
        info!("Handling {} task {}", self.category, task.id);
        Ok(HandlerOutput::Done)
    }
}

/// Explicitly leaves a classified category unhandled.
pub struct NoopHandler;

#[async_trait]
impl TaskHandler for NoopHandler {
    async fn handle(&self, _task: &TaskRequest) -> PipelineResult<HandlerOutput> {
        Ok(HandlerOutput::Skipped)
    }
}

/// Decompose → execute roles → aggregate.
pub struct RequirementAnalysisHandler {
    decomposer: Decomposer,
    executor: RoleExecutor,
}

impl RequirementAnalysisHandler {
    pub fn new(decomposer: Decomposer, executor: RoleExecutor) -> Self {
        Self {
            decomposer,
            executor,
        }
    }
}

#[async_trait]
impl TaskHandler for RequirementAnalysisHandler {
    async fn handle(&self, task: &TaskRequest) -> PipelineResult<HandlerOutput> {
        // A decomposition error aborts here, before any role is started
        let roles = self.decomposer.decompose(task).await?;
        let results = self.executor.execute_all(&roles, task).await;
        Ok(HandlerOutput::Report(Aggregator::aggregate(&task.id, results)))
    }
}

/// One handler per [`Category`], chosen by exhaustive match.
pub struct DispatchTable {
    content_generation: Arc<dyn TaskHandler>,
    programming: Arc<dyn TaskHandler>,
    tool_invocation: Arc<dyn TaskHandler>,
    information_retrieval: Arc<dyn TaskHandler>,
    requirement_analysis: Arc<dyn TaskHandler>,
}

impl DispatchTable {
    /// Placeholder handlers everywhere except requirement analysis.
    pub fn new(requirement_analysis: Arc<dyn TaskHandler>) -> Self {
        Self {
            content_generation: Arc::new(PlaceholderHandler::new(Category::ContentGeneration)),
            programming: Arc::new(PlaceholderHandler::new(Category::Programming)),
            tool_invocation: Arc::new(PlaceholderHandler::new(Category::ToolInvocation)),
            information_retrieval: Arc::new(PlaceholderHandler::new(
                Category::InformationRetrieval,
            )),
            requirement_analysis,
        }
    }

    pub fn with_handler(mut self, category: Category, handler: Arc<dyn TaskHandler>) -> Self {
        *self.slot_mut(category) = handler;
        self
    }

    fn slot_mut(&mut self, category: Category) -> &mut Arc<dyn TaskHandler> {
        match category {
            Category::ContentGeneration => &mut self.content_generation,
            Category::Programming => &mut self.programming,
            Category::ToolInvocation => &mut self.tool_invocation,
            Category::InformationRetrieval => &mut self.information_retrieval,
            Category::RequirementAnalysis => &mut self.requirement_analysis,
        }
    }

    fn handler(&self, category: Category) -> &dyn TaskHandler {
        match category {
            Category::ContentGeneration => self.content_generation.as_ref(),
            Category::Programming => self.programming.as_ref(),
            Category::ToolInvocation => self.tool_invocation.as_ref(),
            Category::InformationRetrieval => self.information_retrieval.as_ref(),
            Category::RequirementAnalysis => self.requirement_analysis.as_ref(),
        }
    }

    /// Route a classified task. `None` runs no handler and is not an error.
    pub async fn dispatch(
        &self,
        category: Option<Category>,
        task: &TaskRequest,
    ) -> PipelineResult<PipelineOutcome> {
        let Some(category) = category else {
            info!("Task {}: no matching category, no action taken", task.id);
            return Ok(PipelineOutcome::NoAction { category: None });
        };

        match self.handler(category).handle(task).await? {
            HandlerOutput::Done => Ok(PipelineOutcome::Handled { category }),
            HandlerOutput::Skipped => {
                info!("Task {}: category {category} is not handled, no action taken", task.id);
                Ok(PipelineOutcome::NoAction {
                    category: Some(category),
                })
            }
            HandlerOutput::Report(report) => Ok(PipelineOutcome::Report { category, report }),
        }
    }

    /// Route by raw label. Unknown labels behave like "no match".
    pub async fn dispatch_label(
        &self,
        label: Option<&str>,
        task: &TaskRequest,
    ) -> PipelineResult<PipelineOutcome> {
        let category = match label {
            Some(l) => {
                let parsed = Category::from_label(l);
                if parsed.is_none() {
                    info!("Task {}: unrecognised category label '{l}'", task.id);
                }
                parsed
            }
            None => None,
        };
        self.dispatch(category, task).await
    }
}
