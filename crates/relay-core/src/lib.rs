pub mod aggregate;
pub mod contract;
pub mod dispatch;
pub mod error;
pub mod invoker;
pub mod master;
pub mod pipeline;
pub mod role;
pub mod router;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types
pub use aggregate::{AggregatedReport, Aggregator};
pub use contract::OutputSchema;
pub use dispatch::{DispatchTable, PipelineOutcome, TaskHandler};
pub use error::{InvokeError, PipelineError, StepError, StructuredOutputError};
pub use invoker::{ModelInvoker, ModelPool, RigInvoker};
pub use master::{Decomposer, RoleDefinition};
pub use pipeline::Pipeline;
pub use role::{RoleExecutor, RoleResult, RoleStatus};
pub use router::{Classification, Classifier};
pub use task::{Category, TaskRequest};
