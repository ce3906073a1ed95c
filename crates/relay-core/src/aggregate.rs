use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::role::{RoleResult, RoleStatus};

/// Summary of all role runs for one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedReport {
    pub task_id: String,
    pub results: Vec<RoleResult>,
    pub created_at: DateTime<Utc>,
}

impl AggregatedReport {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == RoleStatus::Completed)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.completed_count()
    }

    /// True when there was at least one role and none of them completed.
    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.completed_count() == 0
    }

    /// Render the report as Markdown, one section per role in ordinal order.
    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "# Report for task {}\n\n{} role(s): {} completed, {} failed\n",
            self.task_id,
            self.results.len(),
            self.completed_count(),
            self.failed_count()
        );
        if self.results.is_empty() {
            out.push_str("\nNo roles were identified for this task.\n");
        }
        for r in &self.results {
            match (&r.status, &r.output, &r.error) {
                (RoleStatus::Completed, Some(output), _) => {
                    out.push_str(&format!(
                        "\n## {}. {} (completed)\n\n{}\n",
                        r.ordinal + 1,
                        r.role_name,
                        output.trim()
                    ));
                }
                (_, _, error) => {
                    let reason = error
                        .as_ref()
                        .map(|e| e.message.as_str())
                        .unwrap_or("unknown error");
                    out.push_str(&format!(
                        "\n## {}. {} (failed)\n\n> {reason}\n",
                        r.ordinal + 1,
                        r.role_name
                    ));
                }
            }
        }
        out
    }
}

/// Combines role results into the terminal report.
pub struct Aggregator;

impl Aggregator {
    /// Order is preserved and same-named roles stay separate entries.
    /// An all-failed input still produces a report.
    pub fn aggregate(task_id: &str, results: Vec<RoleResult>) -> AggregatedReport {
        let report = AggregatedReport {
            task_id: task_id.to_string(),
            results,
            created_at: Utc::now(),
        };
        if report.all_failed() {
            warn!("Task {task_id}: all {} role(s) failed", report.len());
        } else {
            info!(
                "Task {task_id}: report ready, {}/{} role(s) completed",
                report.completed_count(),
                report.len()
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::{ErrorKind, RoleError};

    fn ok(ordinal: usize, name: &str, output: &str) -> RoleResult {
        RoleResult {
            ordinal,
            role_name: name.into(),
            status: RoleStatus::Completed,
            output: Some(output.into()),
            error: None,
            elapsed_ms: 10,
        }
    }

    fn failed(ordinal: usize, name: &str) -> RoleResult {
        RoleResult {
            ordinal,
            role_name: name.into(),
            status: RoleStatus::Failed,
            output: None,
            error: Some(RoleError {
                kind: ErrorKind::Timeout,
                message: "timed out after 1.0s".into(),
            }),
            elapsed_ms: 1000,
        }
    }

    #[test]
    fn preserves_order_and_duplicate_names() {
        let report = Aggregator::aggregate(
            "t1",
            vec![ok(0, "PM", "a"), ok(1, "PM", "b"), failed(2, "QA")],
        );
        assert_eq!(report.len(), 3);
        let outputs: Vec<Option<&str>> =
            report.results.iter().map(|r| r.output.as_deref()).collect();
        assert_eq!(outputs, vec![Some("a"), Some("b"), None]);
        assert_eq!(report.completed_count(), 2);
        assert_eq!(report.failed_count(), 1);
        assert!(!report.all_failed());
    }

    #[test]
    fn all_failed_is_still_a_report() {
        let report = Aggregator::aggregate("t2", vec![failed(0, "A"), failed(1, "B")]);
        assert_eq!(report.len(), 2);
        assert!(report.all_failed());
        let md = report.to_markdown();
        assert!(md.contains("0 completed, 2 failed"));
        assert!(md.contains("## 2. B (failed)"));
    }

    #[test]
    fn empty_input_gives_empty_report() {
        let report = Aggregator::aggregate("t3", Vec::new());
        assert!(report.is_empty());
        assert!(!report.all_failed());
        assert!(report.to_markdown().contains("No roles were identified"));
    }

    #[test]
    fn serializes_status_and_error_kind_in_snake_case() {
        let report = Aggregator::aggregate("t4", vec![failed(0, "A")]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["taskId"], "t4");
        assert_eq!(json["results"][0]["status"], "failed");
        assert_eq!(json["results"][0]["error"]["kind"], "timeout");
    }
}
