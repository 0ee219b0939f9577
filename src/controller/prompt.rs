use std::fmt::Write as _;

use super::record::JobKind;
use crate::document::{Chapter, Paragraph};
use crate::tools::{ADD_TRANSLATION_BATCH, UPDATE_CHAPTER_TITLE, UPDATE_TASK_STATUS};
use crate::workflow::WorkflowStatus;

fn verb(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Translation => "translate",
        JobKind::Polish => "polish",
        JobKind::Proofreading => "proofread",
    }
}

/// Role description without workflow instructions.
pub fn role_prompt(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Translation => {
            "You are a literary translator working on a novel. Translate each source \
             paragraph faithfully and naturally. Keep dialogue quotes paired: every quote \
             that opens in the source must open and close in the translation."
        }
        JobKind::Polish => {
            "You are a literary editor. Improve the fluency and style of existing \
             translations without changing their meaning."
        }
        JobKind::Proofreading => {
            "You are a proofreader. Compare each translation with its source and fix \
             mistranslations, omissions and typos. Leave correct paragraphs as they are."
        }
    }
}

pub fn system_prompt(kind: JobKind, batch_size: usize) -> String {
    let mut prompt = String::from(role_prompt(kind));

    let _ = write!(
        prompt,
        "\n\nWorkflow:\n\
         1. Call `{UPDATE_TASK_STATUS}` with `planning`, then `working`.\n\
         2. Submit results with `{ADD_TRANSLATION_BATCH}`, at most {batch_size} paragraphs \
         per call, each addressed by its paragraph_id.\n"
    );
    match kind {
        JobKind::Translation => {
            let _ = write!(
                prompt,
                "3. Translate the chapter title with `{UPDATE_CHAPTER_TITLE}`.\n\
                 4. When every paragraph is submitted, move to `review`, check your work, \
                 then move to `end`.\n"
            );
        }
        JobKind::Polish | JobKind::Proofreading => {
            prompt.push_str("3. When every paragraph is submitted, move to `end`.\n");
        }
    }
    prompt.push_str("Rejected tool calls explain why; fix the problem and retry.");
    prompt
}

fn paragraph_line(out: &mut String, kind: JobKind, paragraph: &Paragraph) {
    let _ = writeln!(out, "[{}] {}", paragraph.id, paragraph.text);
    if kind != JobKind::Translation {
        if let Some(current) = paragraph.selected_translation() {
            let _ = writeln!(out, "    current translation: {}", current.text);
        }
    }
}

pub fn chunk_message(
    kind: JobKind,
    chapter: &Chapter,
    chunk: &[String],
    index: usize,
    total: usize,
) -> String {
    let mut out = format!(
        "Chapter {} ({}), part {} of {}.\n",
        chapter.id,
        chapter.title.original,
        index + 1,
        total
    );
    if kind == JobKind::Translation {
        match &chapter.title.translation {
            Some(title) if !title.trim().is_empty() => {
                let _ = writeln!(out, "Title already translated as: {title}");
            }
            _ => {
                let _ = writeln!(out, "The chapter title still needs a translation.");
            }
        }
    }
    let _ = writeln!(out, "\nParagraphs to {}:", verb(kind));
    for id in chunk {
        if let Some(paragraph) = chapter.paragraph(id) {
            paragraph_line(&mut out, kind, paragraph);
        }
    }
    out
}

pub fn nudge_message(status: Option<WorkflowStatus>, remaining: &[String]) -> String {
    let status = status.map_or("unset", |s| s.as_str());
    let mut out = format!(
        "You stopped before finishing. The task is in `{status}` and must reach `end`."
    );
    if !remaining.is_empty() {
        let _ = write!(
            out,
            " Paragraphs not yet submitted: {}.",
            remaining.join(", ")
        );
    }
    out.push_str(" Continue with the workflow tools.");
    out
}

/// Prompt for the single-paragraph variant, answered with plain text.
pub fn single_paragraph_message(kind: JobKind, paragraph: &Paragraph) -> String {
    let mut out = format!(
        "{} the following paragraph. Reply with the result only.\n\n{}\n",
        capitalize(verb(kind)),
        paragraph.text
    );
    if kind != JobKind::Translation {
        if let Some(current) = paragraph.selected_translation() {
            let _ = write!(out, "\nCurrent translation:\n{}\n", current.text);
        }
    }
    out
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Translation;

    #[test]
    fn chunk_message_lists_only_chunk_paragraphs() {
        let chapter = Chapter::new("c1", "第一章")
            .with_paragraph("p1", "甲")
            .with_paragraph("p2", "乙");
        let message = chunk_message(JobKind::Translation, &chapter, &["p2".to_string()], 1, 3);

        assert!(message.contains("part 2 of 3"));
        assert!(message.contains("[p2] 乙"));
        assert!(!message.contains("[p1]"));
        assert!(message.contains("title still needs"));
    }

    #[test]
    fn polish_prompts_include_current_translation() {
        let mut paragraph = Paragraph::new("p1", "甲");
        paragraph.push_translation(Translation::new("First", "m"));
        let message = single_paragraph_message(JobKind::Polish, &paragraph);
        assert!(message.starts_with("Polish the following"));
        assert!(message.contains("Current translation:\nFirst"));
    }

    #[test]
    fn nudge_names_status_and_remaining() {
        let message = nudge_message(Some(WorkflowStatus::Working), &["p3".to_string()]);
        assert!(message.contains("`working`"));
        assert!(message.contains("p3"));
        assert!(nudge_message(None, &[]).contains("`unset`"));
    }

    #[test]
    fn system_prompt_mentions_review_for_translation_only() {
        assert!(system_prompt(JobKind::Translation, 10).contains("`review`"));
        assert!(!system_prompt(JobKind::Proofreading, 10).contains("`review`"));
    }
}
