//! Terminal output: a progress bar that follows a chapter job, and colored
//! result lines.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use novelflow::controller::{JobReport, JobSnapshot, JobStatus};
use novelflow::workflow::IncompleteChapter;

/// Progress display for one running job.
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    pub fn start(description: &str) -> Self {
        let pb = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.set_message(description.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    pub fn update(&self, snapshot: &JobSnapshot) {
        self.pb.set_length(snapshot.progress.total as u64);
        self.pb.set_position(snapshot.progress.current as u64);
        let mut message = snapshot.progress.message.clone().unwrap_or_default();
        if !snapshot.in_flight.is_empty() {
            message.push_str(&format!(" ({} in flight)", snapshot.in_flight.len()));
        }
        self.pb.set_message(message);
    }

    pub fn note(&self, text: &str) {
        self.pb
            .println(format!("  {} {text}", self.yellow.apply_to("!")));
    }

    pub fn complete(&self, report: &JobReport) {
        self.pb.finish_and_clear();
        let line = format!(
            "{} {}: {}/{} paragraph(s) applied",
            report.kind, report.chapter_id, report.applied, report.total
        );
        match report.status {
            JobStatus::Completed => println!("  {} {line}", self.green.apply_to("✓")),
            JobStatus::Cancelled => {
                println!("  {} {line} (cancelled, applied work saved)", self.yellow.apply_to("■"))
            }
            JobStatus::Failed => println!("  {} {line}", self.red.apply_to("✗")),
        }
    }

    pub fn fail(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.red.apply_to("✗"));
    }
}

/// One line per chapter: translated paragraphs out of non-blank ones.
pub fn print_coverage(rows: &[(String, usize, usize, bool)]) {
    let green = Style::new().green();
    let dim = Style::new().dim();
    for (chapter_id, translated, total, title) in rows {
        let style = if translated == total && *title { &green } else { &dim };
        let title_mark = if *title { "title ✓" } else { "title ·" };
        println!(
            "{}",
            style.apply_to(format!("{chapter_id:<16} {translated:>5}/{total:<5} {title_mark}"))
        );
    }
}

/// Prints the review gate result and returns whether the chapter passed.
pub fn print_review(chapter_id: &str, result: Result<(), IncompleteChapter>) -> bool {
    match result {
        Ok(()) => {
            println!(
                "  {} chapter {chapter_id} is ready for review",
                Style::new().green().bold().apply_to("✓")
            );
            true
        }
        Err(incomplete) => {
            println!("  {} {incomplete}", Style::new().red().bold().apply_to("✗"));
            false
        }
    }
}
