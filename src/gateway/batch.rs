//! The single write path model tool calls use to commit paragraph results.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::chunk::ChunkSession;
use super::quota::{self, QuotaExceeded};
use super::quotes::{self, QuoteSide};
use crate::document::{Chapter, ParagraphUpdate, ParagraphWriter, WorkspaceError};
use crate::workflow::{TaskRegistry, TaskType, WorkflowStatus};

/// Offending IDs listed in an out-of-boundary rejection.
const MAX_LISTED_OFFENDERS: usize = 5;

/// One paragraph result as submitted by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    #[serde(default)]
    pub paragraph_id: Option<String>,
    /// Positional addressing. Present only so it can be rejected explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<serde_json::Value>,
    pub translated_text: String,
}

impl BatchItem {
    pub fn new(paragraph_id: impl Into<String>, translated_text: impl Into<String>) -> Self {
        Self {
            paragraph_id: Some(paragraph_id.into()),
            index: None,
            translated_text: translated_text.into(),
        }
    }
}

/// Arguments of `add_translation_batch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub chapter_id: String,
    #[serde(default)]
    pub items: Vec<BatchItem>,
}

/// Reasons a batch is refused. Nothing is written when any of these is returned.
#[derive(Debug, Error)]
pub enum BatchRejected {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("batches can only be submitted while the task is `working` (current: {status})")]
    NotWorking { status: String },

    #[error("batch targets chapter {requested} but this session is for chapter {expected}")]
    ChapterMismatch { requested: String, expected: String },

    #[error("batch contains no items")]
    EmptyBatch,

    #[error("item {position} has no paragraph_id; every item must name its paragraph")]
    MissingParagraphId { position: usize },

    #[error("item {position} uses positional `index` addressing; use paragraph_id instead")]
    PositionalAddressing { position: usize },

    #[error("batch of {received} paragraphs exceeds the allowed maximum of {allowed}; split it")]
    QuotaExceeded { received: usize, allowed: usize },

    #[error("duplicate paragraph IDs in batch: {}", .0.join(", "))]
    DuplicateIds(Vec<String>),

    #[error(
        "{total} paragraph(s) are outside the current chunk ({boundary}): {}",
        .offending.join(", ")
    )]
    OutOfBoundary {
        offending: Vec<String>,
        total: usize,
        boundary: String,
    },

    #[error(
        "translation of paragraph {paragraph_id} has {found} {side} quote(s), the source has {expected}"
    )]
    QuoteDropped {
        paragraph_id: String,
        side: QuoteSide,
        expected: usize,
        found: usize,
    },

    #[error("paragraph {0} not found in chapter")]
    ParagraphNotFound(String),

    #[error(transparent)]
    Workspace(WorkspaceError),
}

impl From<QuotaExceeded> for BatchRejected {
    fn from(e: QuotaExceeded) -> Self {
        BatchRejected::QuotaExceeded {
            received: e.received,
            allowed: e.allowed,
        }
    }
}

impl From<WorkspaceError> for BatchRejected {
    fn from(e: WorkspaceError) -> Self {
        match e {
            WorkspaceError::ParagraphNotFound { paragraph_id, .. } => {
                BatchRejected::ParagraphNotFound(paragraph_id)
            }
            other => BatchRejected::Workspace(other),
        }
    }
}

/// Reply to an accepted batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchAccepted {
    pub processed_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// Only reported for translation tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_paragraph_ids: Option<Vec<String>>,
}

/// Validates and commits result batches for one task.
pub struct BatchGateway<'a, R, W> {
    registry: &'a R,
    writer: &'a W,
    max_batch: usize,
}

impl<'a, R, W> BatchGateway<'a, R, W>
where
    R: TaskRegistry,
    W: ParagraphWriter,
{
    /// `max_batch` is the nominal batch size the quota is measured against.
    pub fn new(registry: &'a R, writer: &'a W, max_batch: usize) -> Self {
        Self {
            registry,
            writer,
            max_batch: max_batch.max(1),
        }
    }

    /// Validates a batch and commits it in one write.
    ///
    /// Every rejection happens before the writer is touched, so a rejected
    /// batch never leaves partial results behind.
    pub async fn submit(
        &self,
        session: &mut ChunkSession,
        request: BatchRequest,
    ) -> Result<BatchAccepted, BatchRejected> {
        let result = self.try_submit(session, request).await;
        if let Err(e) = &result {
            tracing::debug!(task_id = %session.task_id, error = %e, "batch rejected");
        }
        result
    }

    async fn try_submit(
        &self,
        session: &mut ChunkSession,
        request: BatchRequest,
    ) -> Result<BatchAccepted, BatchRejected> {
        let task = self
            .registry
            .task(&session.task_id)
            .ok_or_else(|| BatchRejected::TaskNotFound(session.task_id.clone()))?;
        if task.workflow_status != Some(WorkflowStatus::Working) {
            return Err(BatchRejected::NotWorking {
                status: task
                    .workflow_status
                    .map_or_else(|| "unset".to_string(), |s| s.to_string()),
            });
        }

        if request.chapter_id != session.chapter_id {
            return Err(BatchRejected::ChapterMismatch {
                requested: request.chapter_id,
                expected: session.chapter_id.clone(),
            });
        }
        if request.items.is_empty() {
            return Err(BatchRejected::EmptyBatch);
        }

        let updates = addressed_updates(&request.items)?;
        let chapter = self.writer.load(&session.chapter_id).await?;

        let remaining = session
            .boundary
            .as_ref()
            .map(|b| quota::remaining_in_chunk(b.len(), session.ledger.len()));
        let decision = quota::check_batch_size(updates.len(), self.max_batch, remaining)?;

        check_duplicates(&updates)?;
        self.check_boundary(session, &updates)?;
        check_quotes(&chapter, &updates)?;

        self.writer
            .commit(&session.chapter_id, &session.model_id, &updates)
            .await?;
        session
            .ledger
            .record(updates.iter().map(|u| u.paragraph_id.as_str()));

        let remaining_paragraph_ids = (task.task_type == TaskType::Translation).then(|| {
            match &session.boundary {
                Some(boundary) => session
                    .ledger
                    .remaining(boundary.ids().iter().map(String::as_str)),
                None => session.ledger.remaining(
                    chapter
                        .paragraphs
                        .iter()
                        .filter(|p| !p.is_blank())
                        .map(|p| p.id.as_str()),
                ),
            }
        });

        tracing::info!(
            task_id = %session.task_id,
            chapter_id = %session.chapter_id,
            count = updates.len(),
            "batch committed"
        );

        Ok(BatchAccepted {
            processed_count: updates.len(),
            warning: decision.warning(),
            remaining_paragraph_ids,
        })
    }

    fn check_boundary(
        &self,
        session: &ChunkSession,
        updates: &[ParagraphUpdate],
    ) -> Result<(), BatchRejected> {
        let Some(boundary) = &session.boundary else {
            return Ok(());
        };
        let offending: Vec<&str> = updates
            .iter()
            .map(|u| u.paragraph_id.as_str())
            .filter(|id| !boundary.contains(id))
            .collect();
        if offending.is_empty() {
            return Ok(());
        }
        Err(BatchRejected::OutOfBoundary {
            total: offending.len(),
            offending: offending
                .iter()
                .take(MAX_LISTED_OFFENDERS)
                .map(|id| id.to_string())
                .collect(),
            boundary: boundary.describe(),
        })
    }
}

fn addressed_updates(items: &[BatchItem]) -> Result<Vec<ParagraphUpdate>, BatchRejected> {
    items
        .iter()
        .enumerate()
        .map(|(position, item)| {
            if item.index.is_some() {
                return Err(BatchRejected::PositionalAddressing { position });
            }
            match item.paragraph_id.as_deref().map(str::trim) {
                Some(id) if !id.is_empty() => {
                    Ok(ParagraphUpdate::new(id, item.translated_text.clone()))
                }
                _ => Err(BatchRejected::MissingParagraphId { position }),
            }
        })
        .collect()
}

fn check_duplicates(updates: &[ParagraphUpdate]) -> Result<(), BatchRejected> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for update in updates {
        let id = update.paragraph_id.as_str();
        if !seen.insert(id) && !duplicates.iter().any(|d| d == id) {
            duplicates.push(id.to_string());
        }
    }
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(BatchRejected::DuplicateIds(duplicates))
    }
}

fn check_quotes(chapter: &Chapter, updates: &[ParagraphUpdate]) -> Result<(), BatchRejected> {
    for update in updates {
        let paragraph = chapter
            .paragraph(&update.paragraph_id)
            .ok_or_else(|| BatchRejected::ParagraphNotFound(update.paragraph_id.clone()))?;
        if let Some(shortfall) = quotes::missing_quote_side(&paragraph.text, &update.text) {
            return Err(BatchRejected::QuoteDropped {
                paragraph_id: update.paragraph_id.clone(),
                side: shortfall.side,
                expected: shortfall.expected,
                found: shortfall.found,
            });
        }
    }
    Ok(())
}
