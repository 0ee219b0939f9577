//! Which paragraphs a run touches and how they are split into chunks.

use std::collections::HashSet;

use super::record::JobKind;
use crate::document::{Chapter, Paragraph};

/// Caller-supplied narrowing of a full-chapter run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Restrict the run to these paragraphs. Unknown IDs are an error.
    pub paragraph_ids: Option<Vec<String>>,
    /// Translation only: skip paragraphs that already have a selected translation.
    pub only_untranslated: bool,
}

impl RunOptions {
    pub fn only_untranslated() -> Self {
        Self {
            only_untranslated: true,
            ..Default::default()
        }
    }

    pub fn paragraphs<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            paragraph_ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }
}

/// Whether a single paragraph can be processed by a job of this kind.
pub fn is_eligible(kind: JobKind, paragraph: &Paragraph) -> bool {
    if paragraph.is_blank() {
        return false;
    }
    match kind {
        JobKind::Translation => true,
        JobKind::Polish | JobKind::Proofreading => paragraph.is_translated(),
    }
}

/// Target paragraph IDs in chapter order.
///
/// Returns the first unknown ID from an explicit filter as the error.
pub fn resolve_targets(
    chapter: &Chapter,
    kind: JobKind,
    options: &RunOptions,
) -> Result<Vec<String>, String> {
    let filter: Option<HashSet<&str>> = match &options.paragraph_ids {
        Some(ids) => {
            if let Some(unknown) = ids.iter().find(|id| chapter.paragraph(id).is_none()) {
                return Err(unknown.clone());
            }
            Some(ids.iter().map(String::as_str).collect())
        }
        None => None,
    };

    Ok(chapter
        .paragraphs
        .iter()
        .filter(|p| filter.as_ref().is_none_or(|f| f.contains(p.id.as_str())))
        .filter(|p| is_eligible(kind, p))
        .filter(|p| !(kind == JobKind::Translation && options.only_untranslated && p.is_translated()))
        .map(|p| p.id.clone())
        .collect())
}

/// Splits targets into chunks of at most `max_chars` source characters.
///
/// Every chunk holds at least one paragraph, so a single oversized paragraph
/// becomes its own chunk.
pub fn plan_chunks(chapter: &Chapter, targets: &[String], max_chars: usize) -> Vec<Vec<String>> {
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_chars = 0;

    for id in targets {
        let chars = chapter
            .paragraph(id)
            .map_or(0, |p| p.text.chars().count());
        if !current.is_empty() && current_chars + chars > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        current.push(id.clone());
        current_chars += chars;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
