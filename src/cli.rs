//! Command line interface built on clap.
//!
//! [`Cli`] holds the subcommands (run, status, review) and the global flags
//! (--model, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use novelflow::controller::JobKind;

/// Chunked LLM translation, polishing and proofreading for novel chapters.
#[derive(Debug, Parser)]
#[command(name = "novelflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Model ID, overriding the config file.
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Debug-level logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Translation,
    Polish,
    Proofreading,
}

impl From<KindArg> for JobKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Translation => JobKind::Translation,
            KindArg::Polish => JobKind::Polish,
            KindArg::Proofreading => JobKind::Proofreading,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs a job over one chapter, or over a single paragraph.
    Run {
        /// Book JSON file.
        #[arg(long)]
        book: PathBuf,

        #[arg(long)]
        chapter: String,

        #[arg(long, value_enum, default_value_t = KindArg::Translation)]
        kind: KindArg,

        /// Process only this paragraph. Repeat to run a subset as a chapter job.
        #[arg(long = "paragraph")]
        paragraphs: Vec<String>,

        /// Skip paragraphs that already have a translation.
        #[arg(long, default_value_t = false)]
        only_untranslated: bool,
    },

    /// Shows translation coverage for every chapter in a book.
    Status {
        #[arg(long)]
        book: PathBuf,
    },

    /// Checks whether a chapter is ready for review.
    Review {
        #[arg(long)]
        book: PathBuf,

        #[arg(long)]
        chapter: String,
    },
}
