use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One immutable translation version of a paragraph.
///
/// Corrections never edit an existing version; they append a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    pub id: String,
    pub text: String,
    /// Model that produced this version.
    pub model_id: String,
    pub created_at: DateTime<Utc>,
}

impl Translation {
    pub fn new(text: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            model_id: model_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// A source paragraph together with its translation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    pub id: String,
    /// Source text. Never modified after import.
    pub text: String,
    /// Oldest first.
    #[serde(default)]
    pub translations: Vec<Translation>,
    #[serde(default)]
    pub selected_translation_id: Option<String>,
}

impl Paragraph {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            translations: Vec::new(),
            selected_translation_id: None,
        }
    }

    /// Structurally empty paragraphs (blank lines, spacing) are never sent to a model.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn selected_translation(&self) -> Option<&Translation> {
        let selected = self.selected_translation_id.as_deref()?;
        self.translations.iter().find(|t| t.id == selected)
    }

    /// True when the selected pointer references an existing version.
    pub fn is_translated(&self) -> bool {
        self.selected_translation().is_some()
    }

    /// Appends a new version and points the selection at it.
    pub fn push_translation(&mut self, translation: Translation) -> &Translation {
        self.selected_translation_id = Some(translation.id.clone());
        self.translations.push(translation);
        &self.translations[self.translations.len() - 1]
    }

    /// Re-selects an existing version. Returns false if the id is not in the history.
    pub fn select_translation(&mut self, translation_id: &str) -> bool {
        if self.translations.iter().any(|t| t.id == translation_id) {
            self.selected_translation_id = Some(translation_id.to_string());
            true
        } else {
            false
        }
    }
}

/// Source title and its translation, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterTitle {
    pub original: String,
    #[serde(default)]
    pub translation: Option<String>,
}

/// An ordered list of paragraphs under a title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    #[serde(default)]
    pub title: ChapterTitle,
    #[serde(default)]
    pub paragraphs: Vec<Paragraph>,
}

impl Chapter {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: ChapterTitle {
                original: title.into(),
                translation: None,
            },
            paragraphs: Vec::new(),
        }
    }

    pub fn with_paragraph(mut self, id: impl Into<String>, text: impl Into<String>) -> Self {
        self.paragraphs.push(Paragraph::new(id, text));
        self
    }

    pub fn with_title_translation(mut self, translation: impl Into<String>) -> Self {
        self.title.translation = Some(translation.into());
        self
    }

    pub fn paragraph(&self, paragraph_id: &str) -> Option<&Paragraph> {
        self.paragraphs.iter().find(|p| p.id == paragraph_id)
    }

    pub fn paragraph_mut(&mut self, paragraph_id: &str) -> Option<&mut Paragraph> {
        self.paragraphs.iter_mut().find(|p| p.id == paragraph_id)
    }

    /// True when the title has a non-blank translation.
    pub fn title_translated(&self) -> bool {
        self.title
            .translation
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }
}

/// The on-disk unit: every chapter of one novel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

/// A `{paragraph_id, text}` pair produced by a model for one paragraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParagraphUpdate {
    pub paragraph_id: String,
    pub text: String,
}

impl ParagraphUpdate {
    pub fn new(paragraph_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            paragraph_id: paragraph_id.into(),
            text: text.into(),
        }
    }
}
