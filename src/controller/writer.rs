use std::collections::HashMap;

use parking_lot::Mutex;

use super::record::{JobKind, JobTable};
use crate::document::{
    Chapter, ParagraphStore, ParagraphUpdate, ParagraphWriter, SaveMode, Workspace, WorkspaceError,
};

/// Writer used for the duration of one chapter run.
///
/// Applies accepted batches to the in-memory chapter without saving, drops
/// updates whose text is byte-identical to the last one applied for that
/// paragraph, and keeps the job's progress and in-flight set current.
pub struct RunWriter<'a, S> {
    workspace: &'a Workspace<S>,
    jobs: &'a JobTable,
    kind: JobKind,
    chapter_id: String,
    last_applied: Mutex<HashMap<String, String>>,
    title_written: Mutex<bool>,
}

impl<'a, S: ParagraphStore> RunWriter<'a, S> {
    pub fn new(
        workspace: &'a Workspace<S>,
        jobs: &'a JobTable,
        kind: JobKind,
        chapter_id: impl Into<String>,
    ) -> Self {
        Self {
            workspace,
            jobs,
            kind,
            chapter_id: chapter_id.into(),
            last_applied: Mutex::new(HashMap::new()),
            title_written: Mutex::new(false),
        }
    }

    /// Distinct paragraphs applied during the run.
    pub fn applied_count(&self) -> usize {
        self.last_applied.lock().len()
    }

    /// True when anything reached the in-memory chapter and needs a flush.
    pub fn touched(&self) -> bool {
        self.applied_count() > 0 || *self.title_written.lock()
    }
}

impl<S: ParagraphStore> ParagraphWriter for RunWriter<'_, S> {
    async fn load(&self, chapter_id: &str) -> Result<Chapter, WorkspaceError> {
        self.workspace.chapter(chapter_id).await
    }

    async fn commit(
        &self,
        chapter_id: &str,
        model_id: &str,
        updates: &[ParagraphUpdate],
    ) -> Result<(), WorkspaceError> {
        let fresh: Vec<ParagraphUpdate> = {
            let last = self.last_applied.lock();
            updates
                .iter()
                .filter(|u| last.get(&u.paragraph_id) != Some(&u.text))
                .cloned()
                .collect()
        };
        if fresh.len() < updates.len() {
            tracing::debug!(
                chapter_id,
                dropped = updates.len() - fresh.len(),
                "identical updates dropped"
            );
        }
        if fresh.is_empty() {
            return Ok(());
        }

        self.workspace
            .append_translations(chapter_id, model_id, &fresh, SaveMode::Deferred)
            .await?;

        let completed = {
            let mut last = self.last_applied.lock();
            for update in &fresh {
                last.insert(update.paragraph_id.clone(), update.text.clone());
            }
            last.len()
        };
        let ids: Vec<String> = fresh.into_iter().map(|u| u.paragraph_id).collect();
        self.jobs
            .record_applied(self.kind, &self.chapter_id, &ids, completed);
        Ok(())
    }

    async fn commit_title(&self, chapter_id: &str, title: &str) -> Result<(), WorkspaceError> {
        self.workspace
            .set_title_translation(chapter_id, title, SaveMode::Deferred)
            .await?;
        *self.title_written.lock() = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::document::InMemoryStore;

    #[tokio::test]
    async fn identical_updates_are_dropped_before_accounting() {
        let store = Arc::new(InMemoryStore::new().with_chapter(
            Chapter::new("c1", "t")
                .with_paragraph("p1", "甲")
                .with_paragraph("p2", "乙"),
        ));
        let workspace = Workspace::new(store.clone());
        let jobs = JobTable::new(Duration::from_secs(60));
        jobs.begin(JobKind::Translation, "c1", 2);
        let writer = RunWriter::new(&workspace, &jobs, JobKind::Translation, "c1");

        writer
            .commit("c1", "m", &[ParagraphUpdate::new("p1", "A")])
            .await
            .unwrap();
        writer
            .commit("c1", "m", &[ParagraphUpdate::new("p1", "A")])
            .await
            .unwrap();

        let chapter = workspace.chapter("c1").await.unwrap();
        assert_eq!(chapter.paragraph("p1").unwrap().translations.len(), 1);
        assert_eq!(writer.applied_count(), 1);
        assert_eq!(
            jobs.snapshot(JobKind::Translation, "c1").unwrap().progress.current,
            1
        );

        // A changed text is a new version but not a new paragraph.
        writer
            .commit("c1", "m", &[ParagraphUpdate::new("p1", "A2")])
            .await
            .unwrap();
        let chapter = workspace.chapter("c1").await.unwrap();
        assert_eq!(chapter.paragraph("p1").unwrap().translations.len(), 2);
        assert_eq!(writer.applied_count(), 1);

        // Nothing was saved.
        assert_eq!(store.write_count(), 0);
        assert!(writer.touched());
    }

    #[tokio::test]
    async fn title_marks_run_touched() {
        let store = Arc::new(InMemoryStore::new().with_chapter(Chapter::new("c1", "t")));
        let workspace = Workspace::new(store);
        let jobs = JobTable::new(Duration::from_secs(60));
        let writer = RunWriter::new(&workspace, &jobs, JobKind::Translation, "c1");

        assert!(!writer.touched());
        writer.commit_title("c1", "Title").await.unwrap();
        assert!(writer.touched());
    }
}
