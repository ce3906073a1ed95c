use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// A task as submitted to the pipeline.
///
/// Created once at the entry point and only ever read afterwards; every
/// stage receives the original description, never a rewritten one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub id: String,
    pub description: String,
    pub originator: String,
}

impl TaskRequest {
    /// Build a request, rejecting blank descriptions.
    pub fn new(description: &str, originator: &str) -> PipelineResult<Self> {
        let description = description.trim();
        if description.is_empty() {
            return Err(PipelineError::InvalidInput(
                "task description is empty".into(),
            ));
        }
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
            description: description.to_string(),
            originator: originator.to_string(),
        })
    }
}

/// The closed set of intents the router can pick from.
///
/// This enum is the single source of truth: the classification schema's
/// `enum` is generated from [`Category::ALL`] and the dispatch table matches
/// on it exhaustively.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    ContentGeneration,
    Programming,
    ToolInvocation,
    InformationRetrieval,
    RequirementAnalysis,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::ContentGeneration,
        Category::Programming,
        Category::ToolInvocation,
        Category::InformationRetrieval,
        Category::RequirementAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::ContentGeneration => "content_generation",
            Category::Programming => "programming",
            Category::ToolInvocation => "tool_invocation",
            Category::InformationRetrieval => "information_retrieval",
            Category::RequirementAnalysis => "requirement_analysis",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
    }

    /// One-line hint shown to the router model next to each label.
    pub fn hint(&self) -> &'static str {
        match self {
            Category::ContentGeneration => "writing prose, copy, summaries or other text",
            Category::Programming => "writing, reviewing or debugging code",
            Category::ToolInvocation => "operating an external tool or service",
            Category::InformationRetrieval => "looking up or researching facts",
            Category::RequirementAnalysis => {
                "analysing product requirements or producing requirement documents"
            }
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
