//! Guarded workflow-status changes.
//!
//! [`apply_status`] validates the transition, runs the review completeness gate
//! for translation tasks and then writes the new status to the registry.

use std::fmt;

use thiserror::Error;

use super::state::{StateMachine, TaskType, TransitionError, WorkflowStatus};
use super::task::{TaskPatch, TaskRegistry, TaskStatus};
use crate::document::{Chapter, ParagraphWriter, WorkspaceError};
use crate::gateway::ChunkBoundary;

/// Upper bound on paragraph IDs listed in a gate failure.
pub const MAX_LISTED_MISSING: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletenessScope {
    CurrentChunk,
    WholeChapter,
}

impl fmt::Display for CompletenessScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletenessScope::CurrentChunk => write!(f, "current chunk"),
            CompletenessScope::WholeChapter => write!(f, "whole chapter"),
        }
    }
}

/// Why a chapter (or chunk) is not ready for review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteChapter {
    pub scope: CompletenessScope,
    pub title_missing: bool,
    pub missing_count: usize,
    /// At most [`MAX_LISTED_MISSING`] IDs.
    pub listed: Vec<String>,
}

impl fmt::Display for IncompleteChapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.title_missing {
            parts.push("the chapter title has not been translated".to_string());
        }
        if self.missing_count > 0 {
            let more = if self.missing_count > self.listed.len() {
                format!(" (and {} more)", self.missing_count - self.listed.len())
            } else {
                String::new()
            };
            parts.push(format!(
                "{} paragraph(s) in the {} are still untranslated: {}{more}",
                self.missing_count,
                self.scope,
                self.listed.join(", ")
            ));
        }
        write!(f, "cannot enter review: {}", parts.join("; "))
    }
}

/// Checks that the title and every non-empty paragraph in scope are translated.
///
/// With a boundary, paragraphs outside it are ignored even when untranslated.
pub fn check_completeness(
    chapter: &Chapter,
    boundary: Option<&ChunkBoundary>,
) -> Result<(), IncompleteChapter> {
    let scope = if boundary.is_some() {
        CompletenessScope::CurrentChunk
    } else {
        CompletenessScope::WholeChapter
    };

    let missing: Vec<&str> = chapter
        .paragraphs
        .iter()
        .filter(|p| boundary.is_none_or(|b| b.contains(&p.id)))
        .filter(|p| !p.is_blank() && !p.is_translated())
        .map(|p| p.id.as_str())
        .collect();

    let title_missing = !chapter.title_translated();
    if missing.is_empty() && !title_missing {
        return Ok(());
    }

    Err(IncompleteChapter {
        scope,
        title_missing,
        missing_count: missing.len(),
        listed: missing
            .iter()
            .take(MAX_LISTED_MISSING)
            .map(|id| id.to_string())
            .collect(),
    })
}

/// Why a status change was refused.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task {0} is not associated with a chapter")]
    NoChapter(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("{0}")]
    Incomplete(IncompleteChapter),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

/// Result of a successful status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub task_id: String,
    pub previous: Option<WorkflowStatus>,
    pub current: WorkflowStatus,
}

/// Validates and applies a workflow-status change for a registered task.
pub async fn apply_status<R, W>(
    registry: &R,
    writer: &W,
    task_id: &str,
    requested: WorkflowStatus,
    boundary: Option<&ChunkBoundary>,
) -> Result<StatusChange, StatusError>
where
    R: TaskRegistry,
    W: ParagraphWriter,
{
    let task = registry
        .task(task_id)
        .ok_or_else(|| StatusError::TaskNotFound(task_id.to_string()))?;

    StateMachine::validate(task.task_type, task.workflow_status, requested)?;

    if task.task_type == TaskType::Translation && requested == WorkflowStatus::Review {
        let chapter_id = task
            .chapter_id
            .as_deref()
            .ok_or_else(|| StatusError::NoChapter(task_id.to_string()))?;
        let chapter = writer.load(chapter_id).await?;
        check_completeness(&chapter, boundary).map_err(StatusError::Incomplete)?;
    }

    let mut patch = TaskPatch::workflow(requested);
    if requested == WorkflowStatus::End {
        patch.status = Some(TaskStatus::Completed);
    }
    if !registry.update_task(task_id, patch) {
        return Err(StatusError::TaskNotFound(task_id.to_string()));
    }

    tracing::debug!(
        task_id,
        from = ?task.workflow_status,
        to = %requested,
        "workflow status changed"
    );

    Ok(StatusChange {
        task_id: task_id.to_string(),
        previous: task.workflow_status,
        current: requested,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::document::{InMemoryStore, ParagraphUpdate, SaveMode, Workspace};
    use crate::workflow::task::{InMemoryTaskRegistry, TaskDescriptor};

    fn chapter() -> Chapter {
        Chapter::new("c1", "第一章")
            .with_title_translation("Chapter One")
            .with_paragraph("p1", "甲")
            .with_paragraph("p2", "  ")
            .with_paragraph("p3", "丙")
    }

    fn setup(chapter: Chapter) -> (InMemoryTaskRegistry, Workspace<Arc<InMemoryStore>>) {
        let store = Arc::new(InMemoryStore::new().with_chapter(chapter));
        (InMemoryTaskRegistry::new(), Workspace::new(store))
    }

    async fn walk_to_working(registry: &InMemoryTaskRegistry, ws: &Workspace<Arc<InMemoryStore>>, id: &str) {
        apply_status(registry, ws, id, WorkflowStatus::Planning, None)
            .await
            .unwrap();
        apply_status(registry, ws, id, WorkflowStatus::Working, None)
            .await
            .unwrap();
    }

    #[test]
    fn blank_paragraphs_are_not_required() {
        let mut ch = chapter();
        for id in ["p1", "p3"] {
            ch.paragraph_mut(id)
                .unwrap()
                .push_translation(crate::document::Translation::new("x", "m"));
        }
        assert!(check_completeness(&ch, None).is_ok());
    }

    #[test]
    fn boundary_ignores_paragraphs_outside_it() {
        let mut ch = chapter();
        ch.paragraph_mut("p1")
            .unwrap()
            .push_translation(crate::document::Translation::new("x", "m"));

        let boundary = ChunkBoundary::new(["p1", "p2"]);
        assert!(check_completeness(&ch, Some(&boundary)).is_ok());

        let err = check_completeness(&ch, None).unwrap_err();
        assert_eq!(err.scope, CompletenessScope::WholeChapter);
        assert_eq!(err.missing_count, 1);
        assert_eq!(err.listed, vec!["p3".to_string()]);
    }

    #[test]
    fn failure_lists_at_most_ten_ids() {
        let mut ch = Chapter::new("c1", "t").with_title_translation("T");
        for i in 0..14 {
            ch = ch.with_paragraph(format!("p{i}"), "文");
        }
        let boundary = ChunkBoundary::new((0..14).map(|i| format!("p{i}")));
        let err = check_completeness(&ch, Some(&boundary)).unwrap_err();

        assert_eq!(err.missing_count, 14);
        assert_eq!(err.listed.len(), MAX_LISTED_MISSING);
        let message = err.to_string();
        assert!(message.contains("14 paragraph(s) in the current chunk"));
        assert!(message.contains("(and 4 more)"));
    }

    #[test]
    fn missing_title_is_named() {
        let ch = Chapter::new("c1", "第一章");
        let err = check_completeness(&ch, None).unwrap_err();
        assert!(err.title_missing);
        assert_eq!(
            err.to_string(),
            "cannot enter review: the chapter title has not been translated"
        );
    }

    #[tokio::test]
    async fn review_is_gated_on_translations() {
        let (registry, ws) = setup(chapter());
        let id = registry.add_task(TaskDescriptor::new(TaskType::Translation).for_chapter("c1"));
        walk_to_working(&registry, &ws, &id).await;

        let err = apply_status(&registry, &ws, &id, WorkflowStatus::Review, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StatusError::Incomplete(ref i) if i.missing_count == 2));
        assert_eq!(
            registry.task(&id).unwrap().workflow_status,
            Some(WorkflowStatus::Working)
        );

        ws.append_translations(
            "c1",
            "m",
            &[ParagraphUpdate::new("p1", "A"), ParagraphUpdate::new("p3", "C")],
            SaveMode::Deferred,
        )
        .await
        .unwrap();

        let change = apply_status(&registry, &ws, &id, WorkflowStatus::Review, None)
            .await
            .unwrap();
        assert_eq!(change.previous, Some(WorkflowStatus::Working));
        assert_eq!(change.current, WorkflowStatus::Review);
    }

    #[tokio::test]
    async fn end_marks_task_completed() {
        let (registry, ws) = setup(chapter());
        let id = registry.add_task(TaskDescriptor::new(TaskType::Polish).for_chapter("c1"));
        walk_to_working(&registry, &ws, &id).await;

        apply_status(&registry, &ws, &id, WorkflowStatus::End, None)
            .await
            .unwrap();
        let task = registry.task(&id).unwrap();
        assert_eq!(task.workflow_status, Some(WorkflowStatus::End));
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn polish_cannot_enter_review() {
        let (registry, ws) = setup(chapter());
        let id = registry.add_task(TaskDescriptor::new(TaskType::Polish).for_chapter("c1"));
        walk_to_working(&registry, &ws, &id).await;

        let err = apply_status(&registry, &ws, &id, WorkflowStatus::Review, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StatusError::Transition(TransitionError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_task_is_rejected() {
        let (registry, ws) = setup(chapter());
        let err = apply_status(&registry, &ws, "ghost", WorkflowStatus::Planning, None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "task not found: ghost");
    }
}
