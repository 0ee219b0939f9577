//! In-memory working copy of the chapters being edited.
//!
//! Every mutation goes through [`Workspace::update_chapter`], which runs the
//! mapper against a clone of the chapter and swaps it in only if the mapper
//! succeeds. Persistence is controlled per call with [`SaveMode`].

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use thiserror::Error;

use super::model::{Chapter, ParagraphUpdate, Translation};
use super::store::{ParagraphStore, StoreError};

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("paragraph {paragraph_id} not found in chapter {chapter_id}")]
    ParagraphNotFound {
        chapter_id: String,
        paragraph_id: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Whether an update is flushed to the store right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Write through to memory and flush the chapter before returning.
    Immediate,
    /// Write through to memory only; the caller flushes later.
    Deferred,
}

/// The write path used by the batch gateway.
///
/// The workspace itself commits with an immediate flush; chapter runs plug in
/// their own writer that defers persistence and tracks progress.
#[allow(async_fn_in_trait)]
pub trait ParagraphWriter {
    /// Live view of the chapter content.
    async fn load(&self, chapter_id: &str) -> Result<Chapter, WorkspaceError>;

    /// Appends one new translation version per update, all or nothing.
    async fn commit(
        &self,
        chapter_id: &str,
        model_id: &str,
        updates: &[ParagraphUpdate],
    ) -> Result<(), WorkspaceError>;

    async fn commit_title(&self, chapter_id: &str, title: &str) -> Result<(), WorkspaceError>;
}

/// Chapters being edited, loaded lazily from `S`.
pub struct Workspace<S> {
    store: S,
    chapters: Mutex<HashMap<String, Chapter>>,
    dirty: Mutex<HashSet<String>>,
}

impl<S: ParagraphStore> Workspace<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            chapters: Mutex::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Snapshot of a chapter, loading it from the store on first access.
    pub async fn chapter(&self, chapter_id: &str) -> Result<Chapter, WorkspaceError> {
        self.ensure_loaded(chapter_id).await?;
        self.chapters
            .lock()
            .get(chapter_id)
            .cloned()
            .ok_or_else(|| StoreError::ChapterNotFound(chapter_id.to_string()).into())
    }

    async fn ensure_loaded(&self, chapter_id: &str) -> Result<(), WorkspaceError> {
        if self.chapters.lock().contains_key(chapter_id) {
            return Ok(());
        }
        let loaded = self.store.load_chapter(chapter_id).await?;
        self.chapters
            .lock()
            .entry(chapter_id.to_string())
            .or_insert(loaded);
        Ok(())
    }

    /// Atomic read-modify-write of one chapter.
    ///
    /// The mapper sees a private copy; on error nothing changes in memory and
    /// nothing is flushed.
    pub async fn update_chapter<T>(
        &self,
        chapter_id: &str,
        mode: SaveMode,
        mapper: impl FnOnce(&mut Chapter) -> Result<T, WorkspaceError>,
    ) -> Result<T, WorkspaceError> {
        self.ensure_loaded(chapter_id).await?;
        let value = {
            let mut chapters = self.chapters.lock();
            let current = chapters
                .get(chapter_id)
                .ok_or_else(|| StoreError::ChapterNotFound(chapter_id.to_string()))?;
            let mut draft = current.clone();
            let value = mapper(&mut draft)?;
            chapters.insert(chapter_id.to_string(), draft);
            value
        };
        self.dirty.lock().insert(chapter_id.to_string());

        if mode == SaveMode::Immediate {
            self.flush(chapter_id).await?;
        }
        Ok(value)
    }

    /// Appends a new translation version to every referenced paragraph and
    /// selects it. Fails without touching anything if any paragraph is missing.
    pub async fn append_translations(
        &self,
        chapter_id: &str,
        model_id: &str,
        updates: &[ParagraphUpdate],
        mode: SaveMode,
    ) -> Result<usize, WorkspaceError> {
        self.update_chapter(chapter_id, mode, |chapter| {
            for update in updates {
                let paragraph = chapter.paragraph_mut(&update.paragraph_id).ok_or_else(|| {
                    WorkspaceError::ParagraphNotFound {
                        chapter_id: chapter_id.to_string(),
                        paragraph_id: update.paragraph_id.clone(),
                    }
                })?;
                paragraph.push_translation(Translation::new(update.text.clone(), model_id));
            }
            Ok(updates.len())
        })
        .await
    }

    pub async fn set_title_translation(
        &self,
        chapter_id: &str,
        title: &str,
        mode: SaveMode,
    ) -> Result<(), WorkspaceError> {
        self.update_chapter(chapter_id, mode, |chapter| {
            chapter.title.translation = Some(title.to_string());
            Ok(())
        })
        .await
    }

    /// Writes the in-memory chapter to the store.
    ///
    /// Returns `false` when the chapter was never loaded, i.e. there is nothing to write.
    /// The chapter stays dirty if it changed while the save was in progress.
    pub async fn flush(&self, chapter_id: &str) -> Result<bool, StoreError> {
        let snapshot = self.chapters.lock().get(chapter_id).cloned();
        let Some(chapter) = snapshot else {
            return Ok(false);
        };
        self.store.save_chapter(&chapter).await?;

        let chapters = self.chapters.lock();
        if chapters.get(chapter_id) == Some(&chapter) {
            self.dirty.lock().remove(chapter_id);
            tracing::debug!(chapter_id, "chapter flushed");
        } else {
            tracing::debug!(chapter_id, "chapter changed during flush, still dirty");
        }
        Ok(true)
    }

    /// True when the chapter has in-memory changes not yet flushed.
    pub fn is_dirty(&self, chapter_id: &str) -> bool {
        self.dirty.lock().contains(chapter_id)
    }
}

impl<S: ParagraphStore> ParagraphWriter for Workspace<S> {
    async fn load(&self, chapter_id: &str) -> Result<Chapter, WorkspaceError> {
        self.chapter(chapter_id).await
    }

    async fn commit(
        &self,
        chapter_id: &str,
        model_id: &str,
        updates: &[ParagraphUpdate],
    ) -> Result<(), WorkspaceError> {
        self.append_translations(chapter_id, model_id, updates, SaveMode::Immediate)
            .await
            .map(|_| ())
    }

    async fn commit_title(&self, chapter_id: &str, title: &str) -> Result<(), WorkspaceError> {
        self.set_title_translation(chapter_id, title, SaveMode::Immediate)
            .await
    }
}
