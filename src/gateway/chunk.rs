use std::collections::HashSet;

/// The paragraph IDs one chunk is allowed to touch.
///
/// Built once before the chunk is dispatched and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkBoundary {
    ids: Vec<String>,
    members: HashSet<String>,
}

impl ChunkBoundary {
    pub fn new<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut ordered = Vec::new();
        let mut members = HashSet::new();
        for id in ids {
            let id = id.into();
            if members.insert(id.clone()) {
                ordered.push(id);
            }
        }
        Self {
            ids: ordered,
            members,
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn contains(&self, paragraph_id: &str) -> bool {
        self.members.contains(paragraph_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.ids.first().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.ids.last().map(String::as_str)
    }

    /// `first…last`, for error messages.
    pub fn describe(&self) -> String {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) if first != last => format!("{first}…{last}"),
            (Some(only), _) => only.to_string(),
            _ => "(empty)".to_string(),
        }
    }
}

/// Paragraph IDs already committed in the current chunk session.
#[derive(Debug, Clone, Default)]
pub struct SubmittedLedger {
    ids: HashSet<String>,
}

impl SubmittedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        self.ids.extend(ids.into_iter().map(str::to_string));
    }

    pub fn contains(&self, paragraph_id: &str) -> bool {
        self.ids.contains(paragraph_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn reset(&mut self) {
        self.ids.clear();
    }

    /// IDs from `scope` not yet committed, in `scope` order.
    pub fn remaining<'a>(&self, scope: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        scope
            .into_iter()
            .filter(|id| !self.ids.contains(*id))
            .map(str::to_string)
            .collect()
    }
}

/// Everything one chunk's tool calls share: which task they act for, which
/// paragraphs they may touch, and what has been committed so far.
#[derive(Debug, Clone)]
pub struct ChunkSession {
    pub task_id: String,
    pub chapter_id: String,
    pub model_id: String,
    /// `None` for single-paragraph runs, which skip the boundary check.
    pub boundary: Option<ChunkBoundary>,
    pub ledger: SubmittedLedger,
}

impl ChunkSession {
    pub fn new(
        task_id: impl Into<String>,
        chapter_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            chapter_id: chapter_id.into(),
            model_id: model_id.into(),
            boundary: None,
            ledger: SubmittedLedger::new(),
        }
    }

    pub fn with_boundary(mut self, boundary: ChunkBoundary) -> Self {
        self.boundary = Some(boundary);
        self
    }
}
