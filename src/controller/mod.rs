//! Chapter-level translate, polish and proofread runs.
//!
//! A run resolves its target paragraphs, splits them into chunks and drives
//! one tool-loop session per chunk. Accepted batches land in the in-memory
//! chapter through a [`RunWriter`]; the chapter is flushed to the store once,
//! when the run ends, whether it completed, failed or was cancelled.

mod plan;
mod prompt;
mod record;
mod writer;

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::document::{Paragraph, ParagraphStore, StoreError, Workspace, WorkspaceError};
use crate::gateway::{BatchGateway, BatchItem, BatchRejected, BatchRequest, ChunkBoundary, ChunkSession};
use crate::llm::{ChatMessage, ChatRequest, LlmProvider, ProviderError, generate};
use crate::tool_loop::{LoopConfig, LoopError, LoopOutcome, ToolLoop, seeded_history};
use crate::tools::{WorkflowTools, workflow_tool_specs};
use crate::workflow::{
    StatusError, TaskDescriptor, TaskPatch, TaskRegistry, TaskStatus, WorkflowStatus, apply_status,
};

pub use plan::{RunOptions, is_eligible, plan_chunks, resolve_targets};
pub use record::{ControllerEvent, JobKind, JobSnapshot, JobStatus, JobTable};
pub use writer::RunWriter;

/// Summaries allowed per chunk before giving up.
const MAX_CONTEXT_RESETS: usize = 3;

/// Tunables for chapter runs.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Nominal paragraphs per `add_translation_batch` call.
    pub batch_size: usize,
    /// Source characters per chunk.
    pub chunk_max_chars: usize,
    /// Reminders sent when the model stops before `end`.
    pub max_nudges: usize,
    /// How long a finished job keeps its progress visible.
    pub progress_linger: Duration,
    /// Model settings shared by every chunk session.
    pub tool_loop: LoopConfig,
}

impl ControllerConfig {
    /// Defaults: batches of 20, 4000-character chunks, two nudges.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            batch_size: 20,
            chunk_max_chars: 4000,
            max_nudges: 2,
            progress_linger: Duration::from_secs(3),
            tool_loop: LoopConfig::new(model),
        }
    }
}

/// Outcome of a run that ended without an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub kind: JobKind,
    pub chapter_id: String,
    pub status: JobStatus,
    /// Distinct paragraphs that received a new version.
    pub applied: usize,
    /// Paragraphs targeted by the run.
    pub total: usize,
    /// Whether the chapter was written to the store.
    pub flushed: bool,
}

/// Why a run ended in error.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("a {kind} job is already running for chapter {chapter_id}")]
    AlreadyRunning { kind: JobKind, chapter_id: String },

    #[error("paragraph {0} not found")]
    ParagraphNotFound(String),

    #[error("paragraph {paragraph_id} is not eligible for {kind}")]
    NotEligible {
        kind: JobKind,
        paragraph_id: String,
    },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("result rejected: {0}")]
    Rejected(#[from] BatchRejected),

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("task {task_id} stopped in `{status}` after {nudges} reminder(s)")]
    Unfinished {
        task_id: String,
        status: String,
        nudges: usize,
    },

    #[error("task {task_id} ran out of context after {resets} summaries")]
    ContextExhausted { task_id: String, resets: usize },

    #[error("chapter {chapter_id} was saved to memory but not to disk: {source}")]
    NotPersisted {
        chapter_id: String,
        source: StoreError,
    },
}

enum ChunkOutcome {
    Completed,
    Cancelled,
}

/// Drives chapter jobs: one job per (kind, chapter) at a time.
pub struct ChapterController<P, S, R> {
    provider: P,
    workspace: Workspace<S>,
    registry: R,
    config: ControllerConfig,
    jobs: JobTable,
}

impl<P, S, R> ChapterController<P, S, R>
where
    P: LlmProvider,
    S: ParagraphStore,
    R: TaskRegistry,
{
    pub fn new(provider: P, store: S, registry: R, config: ControllerConfig) -> Self {
        Self {
            jobs: JobTable::new(config.progress_linger),
            provider,
            workspace: Workspace::new(store),
            registry,
            config,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn workspace(&self) -> &Workspace<S> {
        &self.workspace
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Live progress of the job, if one ran recently.
    pub fn snapshot(&self, kind: JobKind, chapter_id: &str) -> Option<JobSnapshot> {
        self.jobs.snapshot(kind, chapter_id)
    }

    /// Progress and paragraph events for every job.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.jobs.subscribe()
    }

    /// Cancels the job for this chapter and kind along with its registered
    /// tasks. Work already applied is still flushed by the run.
    pub fn cancel(&self, kind: JobKind, chapter_id: &str) -> bool {
        let running = self.jobs.cancel(kind, chapter_id);
        let stopped = self.registry.stop_tasks(chapter_id, kind.task_type());
        tracing::info!(%kind, chapter_id, running, stopped, "cancel requested");
        running || stopped > 0
    }

    /// Runs the job over every eligible paragraph of the chapter, chunk by chunk.
    ///
    /// Stops at the first failed chunk. Applied work is flushed once at the end
    /// in every case, and a failed flush is reported as [`ControllerError::NotPersisted`].
    pub async fn run_full_chapter(
        &self,
        kind: JobKind,
        chapter_id: &str,
        options: &RunOptions,
    ) -> Result<JobReport, ControllerError> {
        let chapter = self.workspace.chapter(chapter_id).await?;
        let targets =
            resolve_targets(&chapter, kind, options).map_err(ControllerError::ParagraphNotFound)?;
        let run_cancel = self.begin(kind, chapter_id, targets.len())?;
        tracing::info!(%kind, chapter_id, targets = targets.len(), "chapter run started");

        let writer = RunWriter::new(&self.workspace, &self.jobs, kind, chapter_id);
        let chunks = plan_chunks(&chapter, &targets, self.config.chunk_max_chars);
        let mut outcome = Ok(ChunkOutcome::Completed);
        for (index, chunk) in chunks.iter().enumerate() {
            if run_cancel.is_cancelled() {
                outcome = Ok(ChunkOutcome::Cancelled);
                break;
            }
            self.jobs.set_message(
                kind,
                chapter_id,
                format!("part {} of {}", index + 1, chunks.len()),
            );
            outcome = self
                .run_chunk(kind, chapter_id, chunk, (index, chunks.len()), &writer, &run_cancel)
                .await;
            if !matches!(outcome, Ok(ChunkOutcome::Completed)) {
                break;
            }
        }

        self.finish_run(kind, chapter_id, targets.len(), &writer, outcome)
            .await
    }

    /// Processes one paragraph with a plain completion call and commits the
    /// reply through the batch gateway as a batch of one.
    pub async fn run_single_paragraph(
        &self,
        kind: JobKind,
        chapter_id: &str,
        paragraph_id: &str,
    ) -> Result<JobReport, ControllerError> {
        let chapter = self.workspace.chapter(chapter_id).await?;
        let paragraph = chapter
            .paragraph(paragraph_id)
            .ok_or_else(|| ControllerError::ParagraphNotFound(paragraph_id.to_string()))?;
        if !is_eligible(kind, paragraph) {
            return Err(ControllerError::NotEligible {
                kind,
                paragraph_id: paragraph_id.to_string(),
            });
        }
        let run_cancel = self.begin(kind, chapter_id, 1)?;

        let writer = RunWriter::new(&self.workspace, &self.jobs, kind, chapter_id);
        let task_cancel = run_cancel.child_token();
        let task_id = self.register_task(kind, chapter_id, &task_cancel);
        self.jobs
            .set_in_flight(kind, chapter_id, &[paragraph_id.to_string()]);

        let outcome = self
            .complete_paragraph(kind, &task_id, chapter_id, paragraph, &writer, &task_cancel)
            .await;
        self.close_task(&task_id, &outcome);

        self.finish_run(kind, chapter_id, 1, &writer, outcome).await
    }

    fn begin(&self, kind: JobKind, chapter_id: &str, total: usize) -> Result<CancellationToken, ControllerError> {
        self.jobs
            .begin(kind, chapter_id, total)
            .ok_or_else(|| ControllerError::AlreadyRunning {
                kind,
                chapter_id: chapter_id.to_string(),
            })
    }

    fn register_task(&self, kind: JobKind, chapter_id: &str, cancel: &CancellationToken) -> String {
        self.registry.add_task(
            TaskDescriptor::new(kind.task_type())
                .for_chapter(chapter_id)
                .with_abort(cancel.clone()),
        )
    }

    /// Archives the task with its final status. A completed task is closed at `end`.
    fn close_task(&self, task_id: &str, outcome: &Result<ChunkOutcome, ControllerError>) {
        let status = match outcome {
            Ok(ChunkOutcome::Completed) => {
                self.registry
                    .update_task(task_id, TaskPatch::workflow(WorkflowStatus::End));
                TaskStatus::Completed
            }
            Ok(ChunkOutcome::Cancelled) => TaskStatus::Cancelled,
            Err(_) => TaskStatus::Failed,
        };
        self.registry.archive_task(task_id, status);
    }

    async fn run_chunk(
        &self,
        kind: JobKind,
        chapter_id: &str,
        chunk: &[String],
        (index, total): (usize, usize),
        writer: &RunWriter<'_, S>,
        run_cancel: &CancellationToken,
    ) -> Result<ChunkOutcome, ControllerError> {
        // Reloaded so the prompt reflects earlier chunks.
        let chapter = self.workspace.chapter(chapter_id).await?;
        let task_cancel = run_cancel.child_token();
        let task_id = self.register_task(kind, chapter_id, &task_cancel);
        self.jobs.set_in_flight(kind, chapter_id, chunk);
        tracing::info!(
            %kind,
            chapter_id,
            task_id = %task_id,
            chunk = index + 1,
            of = total,
            paragraphs = chunk.len(),
            "chunk started"
        );

        let session = ChunkSession::new(&task_id, chapter_id, &self.config.tool_loop.model)
            .with_boundary(ChunkBoundary::new(chunk.iter().cloned()));
        let mut tools = WorkflowTools::new(&self.registry, writer, session, self.config.batch_size);
        let specs = workflow_tool_specs(kind.task_type());
        let system = prompt::system_prompt(kind, self.config.batch_size);
        let mut history = vec![
            ChatMessage::system(&system),
            ChatMessage::user(prompt::chunk_message(kind, &chapter, chunk, index, total)),
        ];
        let tool_loop = ToolLoop::new(&self.provider, &self.config.tool_loop);

        let mut nudges = 0;
        let mut resets = 0;
        let outcome = loop {
            match tool_loop
                .run(&mut history, &specs, &mut tools, &task_cancel)
                .await
            {
                Err(LoopError::Cancelled) => break Ok(ChunkOutcome::Cancelled),
                Err(LoopError::Provider(e)) => break Err(ControllerError::Provider(e)),
                Ok(LoopOutcome::NeedsReset { summary }) => {
                    resets += 1;
                    if resets > MAX_CONTEXT_RESETS {
                        break Err(ControllerError::ContextExhausted {
                            task_id: task_id.clone(),
                            resets: MAX_CONTEXT_RESETS,
                        });
                    }
                    tracing::info!(task_id = %task_id, resets, "continuing from summary");
                    history = seeded_history(&system, &summary);
                    let remaining = tools.remaining_ids();
                    if !remaining.is_empty() {
                        let chapter = match self.workspace.chapter(chapter_id).await {
                            Ok(chapter) => chapter,
                            Err(e) => break Err(e.into()),
                        };
                        history.push(ChatMessage::user(prompt::chunk_message(
                            kind, &chapter, &remaining, index, total,
                        )));
                    }
                }
                Ok(LoopOutcome::Completed { .. } | LoopOutcome::RoundLimit { .. }) => {
                    let status = tools.workflow_status();
                    if status == Some(WorkflowStatus::End) {
                        break Ok(ChunkOutcome::Completed);
                    }
                    if nudges >= self.config.max_nudges {
                        break Err(ControllerError::Unfinished {
                            task_id: task_id.clone(),
                            status: status.map_or_else(|| "unset".to_string(), |s| s.to_string()),
                            nudges,
                        });
                    }
                    nudges += 1;
                    tracing::debug!(task_id = %task_id, nudges, "model stopped early, nudging");
                    history.push(ChatMessage::user(prompt::nudge_message(
                        status,
                        &tools.remaining_ids(),
                    )));
                }
            }
        };

        self.close_task(&task_id, &outcome);
        self.jobs.set_in_flight(kind, chapter_id, &[]);
        outcome
    }

    async fn complete_paragraph(
        &self,
        kind: JobKind,
        task_id: &str,
        chapter_id: &str,
        paragraph: &Paragraph,
        writer: &RunWriter<'_, S>,
        cancel: &CancellationToken,
    ) -> Result<ChunkOutcome, ControllerError> {
        for status in [WorkflowStatus::Planning, WorkflowStatus::Working] {
            apply_status(&self.registry, writer, task_id, status, None).await?;
        }

        let loop_config = &self.config.tool_loop;
        let mut request = ChatRequest::new(
            &loop_config.model,
            vec![
                ChatMessage::system(prompt::role_prompt(kind)),
                ChatMessage::user(prompt::single_paragraph_message(kind, paragraph)),
            ],
        )
        .with_max_tokens(loop_config.max_tokens);
        request.temperature = loop_config.temperature;

        let response = match generate(&self.provider, &request, cancel, |_| {}).await {
            Ok(response) => response,
            Err(ProviderError::Cancelled) => return Ok(ChunkOutcome::Cancelled),
            Err(e) => return Err(e.into()),
        };
        let text = response.text.trim();
        if text.is_empty() {
            return Err(ControllerError::EmptyResponse);
        }

        let mut session = ChunkSession::new(task_id, chapter_id, &loop_config.model);
        BatchGateway::new(&self.registry, writer, 1)
            .submit(
                &mut session,
                BatchRequest {
                    chapter_id: chapter_id.to_string(),
                    items: vec![BatchItem::new(&paragraph.id, text)],
                },
            )
            .await?;
        Ok(ChunkOutcome::Completed)
    }

    async fn finish_run(
        &self,
        kind: JobKind,
        chapter_id: &str,
        total: usize,
        writer: &RunWriter<'_, S>,
        outcome: Result<ChunkOutcome, ControllerError>,
    ) -> Result<JobReport, ControllerError> {
        let status = match &outcome {
            Ok(ChunkOutcome::Completed) => JobStatus::Completed,
            Ok(ChunkOutcome::Cancelled) => JobStatus::Cancelled,
            Err(_) => JobStatus::Failed,
        };

        let flush = if writer.touched() {
            Some(self.workspace.flush(chapter_id).await)
        } else {
            None
        };
        let flushed = matches!(flush, Some(Ok(true)));
        self.jobs.finish(kind, chapter_id, status);

        let applied = writer.applied_count();
        tracing::info!(%kind, chapter_id, %status, applied, total, flushed, "chapter run finished");

        if let Some(Err(source)) = flush {
            tracing::error!(chapter_id, error = %source, "chapter flush failed");
            if let Err(e) = &outcome {
                tracing::warn!(chapter_id, error = %e, "run had already failed");
            }
            return Err(ControllerError::NotPersisted {
                chapter_id: chapter_id.to_string(),
                source,
            });
        }
        if let Err(e) = outcome {
            tracing::warn!(chapter_id, error = %e, "chapter run failed");
            return Err(e);
        }

        Ok(JobReport {
            kind,
            chapter_id: chapter_id.to_string(),
            status,
            applied,
            total,
            flushed,
        })
    }
}
