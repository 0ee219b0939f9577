mod state;
mod status;
mod task;

pub use state::{StateMachine, TaskType, TransitionError, WorkflowStatus};
pub use status::{
    CompletenessScope, IncompleteChapter, MAX_LISTED_MISSING, StatusChange, StatusError,
    apply_status, check_completeness,
};
pub use task::{
    InMemoryTaskRegistry, Progress, Task, TaskDescriptor, TaskPatch, TaskRegistry, TaskStatus,
};
