use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of AI task a workflow belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Translation,
    Polish,
    Proofreading,
    ChapterSummary,
    Assistant,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::Translation,
        TaskType::Polish,
        TaskType::Proofreading,
        TaskType::ChapterSummary,
        TaskType::Assistant,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Translation => "translation",
            TaskType::Polish => "polish",
            TaskType::Proofreading => "proofreading",
            TaskType::ChapterSummary => "chapter_summary",
            TaskType::Assistant => "assistant",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TransitionError::UnknownTaskType(s.to_string()))
    }
}

/// The four workflow states a task moves through.
///
/// Translation: PLANNING → WORKING ⇄ REVIEW → END.
/// Polish, proofreading, chapter summary: PLANNING → WORKING → END.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Planning,
    Working,
    Review,
    End,
}

impl WorkflowStatus {
    pub const ALL: [WorkflowStatus; 4] = [
        WorkflowStatus::Planning,
        WorkflowStatus::Working,
        WorkflowStatus::Review,
        WorkflowStatus::End,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Planning => "planning",
            WorkflowStatus::Working => "working",
            WorkflowStatus::Review => "review",
            WorkflowStatus::End => "end",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| TransitionError::UnknownStatus(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("unknown workflow status: {0}")]
    UnknownStatus(String),

    #[error("task type {0} has no workflow status")]
    NoWorkflow(TaskType),

    #[error("a task must start in `planning`, got `{requested}`")]
    MustStartWithPlanning { requested: WorkflowStatus },

    #[error("invalid transition `{from} → {to}` for {task_type} task (allowed next: {})", format_allowed(.allowed))]
    InvalidTransition {
        task_type: TaskType,
        from: WorkflowStatus,
        to: WorkflowStatus,
        allowed: Vec<WorkflowStatus>,
    },
}

fn format_allowed(allowed: &[WorkflowStatus]) -> String {
    if allowed.is_empty() {
        return "none".to_string();
    }
    allowed
        .iter()
        .map(WorkflowStatus::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validates workflow-status transitions per task type.
pub struct StateMachine;

impl StateMachine {
    /// Statuses reachable from `from` for the given task type.
    pub fn allowed(task_type: TaskType, from: WorkflowStatus) -> &'static [WorkflowStatus] {
        use WorkflowStatus::*;
        match task_type {
            TaskType::Translation => match from {
                Planning => &[Working],
                Working => &[Review],
                Review => &[Working, End],
                End => &[],
            },
            TaskType::Polish | TaskType::Proofreading | TaskType::ChapterSummary => match from {
                Planning => &[Working],
                Working => &[End],
                Review | End => &[],
            },
            TaskType::Assistant => &[],
        }
    }

    /// Checks a requested status against the current one.
    ///
    /// - With no current status only `planning` is accepted.
    /// - Anything not in the table is rejected, never coerced.
    pub fn validate(
        task_type: TaskType,
        current: Option<WorkflowStatus>,
        requested: WorkflowStatus,
    ) -> Result<(), TransitionError> {
        if task_type == TaskType::Assistant {
            return Err(TransitionError::NoWorkflow(task_type));
        }

        let Some(from) = current else {
            return if requested == WorkflowStatus::Planning {
                Ok(())
            } else {
                Err(TransitionError::MustStartWithPlanning { requested })
            };
        };

        let allowed = Self::allowed(task_type, from);
        if allowed.contains(&requested) {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition {
                task_type,
                from,
                to: requested,
                allowed: allowed.to_vec(),
            })
        }
    }

    /// String form used at the tool boundary, where the model supplies raw values.
    pub fn validate_str(
        task_type: &str,
        current: Option<&str>,
        requested: &str,
    ) -> Result<(), TransitionError> {
        let task_type: TaskType = task_type.parse()?;
        let current: Option<WorkflowStatus> = current.map(str::parse).transpose()?;
        let requested: WorkflowStatus = requested.parse()?;
        Self::validate(task_type, current, requested)
    }
}
