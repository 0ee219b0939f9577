use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::state::{TaskType, WorkflowStatus};

/// Top-level lifecycle of a task, independent of its workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }
}

/// Work done out of the total, with an optional status line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    #[serde(default)]
    pub message: Option<String>,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            current: 0,
            total,
            message: None,
        }
    }
}

/// One in-flight AI task.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    /// `None` until the model requests `planning`.
    pub workflow_status: Option<WorkflowStatus>,
    pub status: TaskStatus,
    pub chapter_id: Option<String>,
    pub book_id: Option<String>,
    /// Updated by the controller as paragraphs are applied.
    pub progress: Progress,
    /// Cancelling this token stops every provider call made for the task.
    #[serde(skip)]
    pub abort: CancellationToken,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a caller supplies to register a task.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub task_type: TaskType,
    pub chapter_id: Option<String>,
    pub book_id: Option<String>,
    pub abort: CancellationToken,
}

impl TaskDescriptor {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            chapter_id: None,
            book_id: None,
            abort: CancellationToken::new(),
        }
    }

    pub fn for_chapter(mut self, chapter_id: impl Into<String>) -> Self {
        self.chapter_id = Some(chapter_id.into());
        self
    }

    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }
}

/// Partial update applied by [`TaskRegistry::update_task`].
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub workflow_status: Option<WorkflowStatus>,
    pub status: Option<TaskStatus>,
    pub progress: Option<Progress>,
}

impl TaskPatch {
    pub fn workflow(status: WorkflowStatus) -> Self {
        Self {
            workflow_status: Some(status),
            ..Default::default()
        }
    }

    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Lookup and mutation of in-flight tasks, injected into every component that needs it.
pub trait TaskRegistry {
    fn add_task(&self, descriptor: TaskDescriptor) -> String;

    /// Returns false when the task is unknown.
    fn update_task(&self, task_id: &str, patch: TaskPatch) -> bool;

    fn task(&self, task_id: &str) -> Option<Task>;

    fn remove_task(&self, task_id: &str) -> Option<Task>;

    /// Sets the final top-level status and moves the task out of the live set.
    /// Archived tasks no longer accept updates. Returns false when the task is unknown.
    fn archive_task(&self, task_id: &str, status: TaskStatus) -> bool;

    /// Tasks whose top-level status is still `processing`.
    fn active_tasks(&self) -> Vec<Task>;

    /// Cancels the abort handle of every active task for the chapter and type,
    /// marking them cancelled. Returns how many were stopped.
    fn stop_tasks(&self, chapter_id: &str, task_type: TaskType) -> usize;
}

impl<R: TaskRegistry + ?Sized> TaskRegistry for Arc<R> {
    fn add_task(&self, descriptor: TaskDescriptor) -> String {
        (**self).add_task(descriptor)
    }

    fn update_task(&self, task_id: &str, patch: TaskPatch) -> bool {
        (**self).update_task(task_id, patch)
    }

    fn task(&self, task_id: &str) -> Option<Task> {
        (**self).task(task_id)
    }

    fn remove_task(&self, task_id: &str) -> Option<Task> {
        (**self).remove_task(task_id)
    }

    fn archive_task(&self, task_id: &str, status: TaskStatus) -> bool {
        (**self).archive_task(task_id, status)
    }

    fn active_tasks(&self) -> Vec<Task> {
        (**self).active_tasks()
    }

    fn stop_tasks(&self, chapter_id: &str, task_type: TaskType) -> usize {
        (**self).stop_tasks(chapter_id, task_type)
    }
}

/// Registry kept in process memory. Terminal tasks move to an archive.
#[derive(Debug, Default)]
pub struct InMemoryTaskRegistry {
    tasks: Mutex<HashMap<String, Task>>,
    archived: Mutex<Vec<Task>>,
}

impl InMemoryTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every task, archived ones included, oldest first.
    pub fn all_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.lock().values().cloned().collect();
        tasks.extend(self.archived_tasks());
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Tasks closed with [`TaskRegistry::archive_task`], in archive order.
    pub fn archived_tasks(&self) -> Vec<Task> {
        self.archived.lock().clone()
    }
}

impl TaskRegistry for InMemoryTaskRegistry {
    fn add_task(&self, descriptor: TaskDescriptor) -> String {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            task_type: descriptor.task_type,
            workflow_status: None,
            status: TaskStatus::Processing,
            chapter_id: descriptor.chapter_id,
            book_id: descriptor.book_id,
            progress: Progress::default(),
            abort: descriptor.abort,
            created_at: now,
            updated_at: now,
        };
        let id = task.id.clone();
        self.tasks.lock().insert(id.clone(), task);
        id
    }

    fn update_task(&self, task_id: &str, patch: TaskPatch) -> bool {
        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.get_mut(task_id) else {
            return false;
        };
        if let Some(status) = patch.workflow_status {
            task.workflow_status = Some(status);
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(progress) = patch.progress {
            task.progress = progress;
        }
        task.updated_at = Utc::now();
        true
    }

    fn task(&self, task_id: &str) -> Option<Task> {
        self.tasks.lock().get(task_id).cloned()
    }

    fn remove_task(&self, task_id: &str) -> Option<Task> {
        self.tasks.lock().remove(task_id)
    }

    fn archive_task(&self, task_id: &str, status: TaskStatus) -> bool {
        let Some(mut task) = self.tasks.lock().remove(task_id) else {
            return false;
        };
        task.status = status;
        task.updated_at = Utc::now();
        self.archived.lock().push(task);
        true
    }

    fn active_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .lock()
            .values()
            .filter(|t| !t.status.is_terminal())
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    fn stop_tasks(&self, chapter_id: &str, task_type: TaskType) -> usize {
        let mut tasks = self.tasks.lock();
        let mut stopped = 0;
        for task in tasks.values_mut() {
            if task.status.is_terminal()
                || task.task_type != task_type
                || task.chapter_id.as_deref() != Some(chapter_id)
            {
                continue;
            }
            task.abort.cancel();
            task.status = TaskStatus::Cancelled;
            task.updated_at = Utc::now();
            stopped += 1;
        }
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_without_workflow_status() {
        let registry = InMemoryTaskRegistry::new();
        let id = registry.add_task(TaskDescriptor::new(TaskType::Translation).for_chapter("c1"));

        let task = registry.task(&id).unwrap();
        assert_eq!(task.workflow_status, None);
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.chapter_id.as_deref(), Some("c1"));
        assert_eq!(registry.active_tasks().len(), 1);
    }

    #[test]
    fn patches_apply_only_given_fields() {
        let registry = InMemoryTaskRegistry::new();
        let id = registry.add_task(TaskDescriptor::new(TaskType::Polish));

        assert!(registry.update_task(&id, TaskPatch::workflow(WorkflowStatus::Planning)));
        assert!(registry.update_task(&id, TaskPatch::status(TaskStatus::Completed)));

        let task = registry.task(&id).unwrap();
        assert_eq!(task.workflow_status, Some(WorkflowStatus::Planning));
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(registry.active_tasks().is_empty());
        assert!(!registry.update_task("missing", TaskPatch::default()));
    }

    #[test]
    fn stop_tasks_targets_chapter_and_type() {
        let registry = InMemoryTaskRegistry::new();
        let a = registry.add_task(TaskDescriptor::new(TaskType::Translation).for_chapter("c1"));
        let b = registry.add_task(TaskDescriptor::new(TaskType::Polish).for_chapter("c1"));
        let c = registry.add_task(TaskDescriptor::new(TaskType::Translation).for_chapter("c2"));

        assert_eq!(registry.stop_tasks("c1", TaskType::Translation), 1);

        let stopped = registry.task(&a).unwrap();
        assert!(stopped.abort.is_cancelled());
        assert_eq!(stopped.status, TaskStatus::Cancelled);
        assert!(!registry.task(&b).unwrap().abort.is_cancelled());
        assert!(!registry.task(&c).unwrap().abort.is_cancelled());

        // Already terminal tasks are not counted twice.
        assert_eq!(registry.stop_tasks("c1", TaskType::Translation), 0);
    }

    #[test]
    fn archived_task_leaves_the_live_set() {
        let registry = InMemoryTaskRegistry::new();
        let id = registry.add_task(TaskDescriptor::new(TaskType::Translation).for_chapter("c1"));
        registry.update_task(&id, TaskPatch::workflow(WorkflowStatus::Working));

        assert!(registry.archive_task(&id, TaskStatus::Cancelled));

        assert!(registry.task(&id).is_none());
        assert!(registry.active_tasks().is_empty());
        assert!(!registry.update_task(&id, TaskPatch::workflow(WorkflowStatus::Review)));
        assert_eq!(registry.stop_tasks("c1", TaskType::Translation), 0);

        let archived = registry.archived_tasks();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].status, TaskStatus::Cancelled);
        assert_eq!(archived[0].workflow_status, Some(WorkflowStatus::Working));
        assert_eq!(registry.all_tasks().len(), 1);
        assert!(!registry.archive_task(&id, TaskStatus::Failed));
    }

    #[test]
    fn task_serializes_without_abort_handle() {
        let registry = InMemoryTaskRegistry::new();
        let id = registry.add_task(TaskDescriptor::new(TaskType::Translation));
        let json = serde_json::to_value(registry.task(&id).unwrap()).unwrap();
        assert_eq!(json["task_type"], "translation");
        assert_eq!(json["status"], "processing");
        assert!(json.get("abort").is_none());
    }
}
