//! Durable chapter storage.
//!
//! [`ParagraphStore`] is the contract the engine needs from the storage layer:
//! load a chapter and save it back whole. Two implementations ship with the
//! crate: [`InMemoryStore`] for tests and embedding, and [`JsonFileStore`]
//! which keeps a whole [`Book`] in one JSON file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use super::model::{Book, Chapter};

/// Failures reading or writing chapters.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("chapter not found: {0}")]
    ChapterNotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Chapter-level persistence used by the workflow engine.
///
/// `save_chapter` must be idempotent: saving unchanged content twice is harmless.
#[allow(async_fn_in_trait)]
pub trait ParagraphStore {
    async fn load_chapter(&self, chapter_id: &str) -> Result<Chapter, StoreError>;

    async fn save_chapter(&self, chapter: &Chapter) -> Result<(), StoreError>;
}

impl<S: ParagraphStore + ?Sized> ParagraphStore for Arc<S> {
    async fn load_chapter(&self, chapter_id: &str) -> Result<Chapter, StoreError> {
        (**self).load_chapter(chapter_id).await
    }

    async fn save_chapter(&self, chapter: &Chapter) -> Result<(), StoreError> {
        (**self).save_chapter(chapter).await
    }
}

/// Map-backed store that counts writes and can be told to fail them.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    chapters: Mutex<HashMap<String, Chapter>>,
    writes: AtomicUsize,
    fail_saves: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chapter(self, chapter: Chapter) -> Self {
        self.insert(chapter);
        self
    }

    pub fn insert(&self, chapter: Chapter) {
        self.chapters.lock().insert(chapter.id.clone(), chapter);
    }

    /// Current durable copy of a chapter.
    pub fn chapter(&self, chapter_id: &str) -> Option<Chapter> {
        self.chapters.lock().get(chapter_id).cloned()
    }

    /// Number of successful `save_chapter` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl ParagraphStore for InMemoryStore {
    async fn load_chapter(&self, chapter_id: &str) -> Result<Chapter, StoreError> {
        self.chapter(chapter_id)
            .ok_or_else(|| StoreError::ChapterNotFound(chapter_id.to_string()))
    }

    async fn save_chapter(&self, chapter: &Chapter) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("saves are disabled".into()));
        }
        self.chapters
            .lock()
            .insert(chapter.id.clone(), chapter.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Keeps one book as pretty-printed JSON on disk.
///
/// Saves rewrite the whole file through a sibling temp file and a rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file.
    lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load_book(&self) -> Result<Book, StoreError> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub async fn save_book(&self, book: &Book) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        self.write_book(book).await
    }

    async fn write_book(&self, book: &Book) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(book)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

impl ParagraphStore for JsonFileStore {
    async fn load_chapter(&self, chapter_id: &str) -> Result<Chapter, StoreError> {
        let book = self.load_book().await?;
        book.chapters
            .into_iter()
            .find(|c| c.id == chapter_id)
            .ok_or_else(|| StoreError::ChapterNotFound(chapter_id.to_string()))
    }

    async fn save_chapter(&self, chapter: &Chapter) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut book = self.load_book().await?;
        let slot = book
            .chapters
            .iter_mut()
            .find(|c| c.id == chapter.id)
            .ok_or_else(|| StoreError::ChapterNotFound(chapter.id.clone()))?;
        *slot = chapter.clone();
        self.write_book(&book).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::model::Translation;

    fn sample_book() -> Book {
        Book {
            id: "b1".into(),
            title: "Book".into(),
            chapters: vec![
                Chapter::new("c1", "一").with_paragraph("p1", "你好"),
                Chapter::new("c2", "二").with_paragraph("p2", "再见"),
            ],
        }
    }

    #[tokio::test]
    async fn in_memory_counts_writes_and_fails_on_demand() {
        let store = InMemoryStore::new().with_chapter(Chapter::new("c1", "t"));
        let chapter = store.load_chapter("c1").await.unwrap();

        store.save_chapter(&chapter).await.unwrap();
        assert_eq!(store.write_count(), 1);

        store.set_fail_saves(true);
        let err = store.save_chapter(&chapter).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn in_memory_missing_chapter() {
        let store = InMemoryStore::new();
        let err = store.load_chapter("nope").await.unwrap_err();
        assert_eq!(err.to_string(), "chapter not found: nope");
    }

    #[tokio::test]
    async fn json_store_replaces_only_the_saved_chapter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.json");
        let store = JsonFileStore::new(&path);
        store.save_book(&sample_book()).await.unwrap();

        let mut chapter = store.load_chapter("c2").await.unwrap();
        chapter.paragraphs[0].push_translation(Translation::new("Goodbye", "m"));
        store.save_chapter(&chapter).await.unwrap();

        let book = store.load_book().await.unwrap();
        assert_eq!(book.chapters.len(), 2);
        assert!(book.chapters[0].paragraphs[0].translations.is_empty());
        assert_eq!(
            book.chapters[1].paragraphs[0]
                .selected_translation()
                .unwrap()
                .text,
            "Goodbye"
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn json_store_rejects_unknown_chapter_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("book.json"));
        store.save_book(&sample_book()).await.unwrap();

        let err = store
            .save_chapter(&Chapter::new("c9", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ChapterNotFound(id) if id == "c9"));
    }
}
