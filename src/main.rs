mod cli;
mod ui;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use novelflow::config::NovelflowConfig;
use novelflow::controller::{ChapterController, JobKind, RunOptions};
use novelflow::document::{JsonFileStore, ParagraphStore};
use novelflow::llm::AnthropicClient;
use novelflow::workflow::{InMemoryTaskRegistry, check_completeness};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = NovelflowConfig::load().context("failed to load novelflow.toml")?;
    if let Some(model) = cli.model {
        config.model = model;
    }

    match cli.command {
        Command::Run {
            book,
            chapter,
            kind,
            paragraphs,
            only_untranslated,
        } => {
            run(
                &config,
                book,
                &chapter,
                kind.into(),
                paragraphs,
                only_untranslated,
            )
            .await
        }
        Command::Status { book } => status(book).await,
        Command::Review { book, chapter } => review(book, &chapter).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "novelflow=debug"
    } else {
        "novelflow=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(
    config: &NovelflowConfig,
    book: PathBuf,
    chapter_id: &str,
    kind: JobKind,
    paragraphs: Vec<String>,
    only_untranslated: bool,
) -> Result<()> {
    if config.api_key.is_empty() {
        bail!("no API key: set ANTHROPIC_API_KEY or api_key in novelflow.toml");
    }
    let provider = AnthropicClient::new(config.api_key.clone())?;
    let controller = ChapterController::new(
        provider,
        JsonFileStore::new(book),
        InMemoryTaskRegistry::new(),
        config.controller_config(),
    );
    let progress = ui::JobProgress::start(&format!("{kind} {chapter_id}"));

    let job = async {
        if let [paragraph_id] = paragraphs.as_slice() {
            controller
                .run_single_paragraph(kind, chapter_id, paragraph_id)
                .await
        } else {
            let options = RunOptions {
                paragraph_ids: (!paragraphs.is_empty()).then(|| paragraphs.clone()),
                only_untranslated,
            };
            controller.run_full_chapter(kind, chapter_id, &options).await
        }
    };
    tokio::pin!(job);

    let mut tick = tokio::time::interval(Duration::from_millis(200));
    let mut interrupted = false;
    let result = loop {
        tokio::select! {
            result = &mut job => break result,
            _ = tick.tick() => {
                if let Some(snapshot) = controller.snapshot(kind, chapter_id) {
                    progress.update(&snapshot);
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                progress.note("interrupted, saving applied work");
                controller.cancel(kind, chapter_id);
            }
        }
    };

    match result {
        Ok(report) => {
            progress.complete(&report);
            Ok(())
        }
        Err(e) => {
            progress.fail(&e.to_string());
            Err(e.into())
        }
    }
}

async fn status(book: PathBuf) -> Result<()> {
    let store = JsonFileStore::new(book);
    let book = store
        .load_book()
        .await
        .with_context(|| format!("failed to read {}", store.path().display()))?;

    println!("{} ({} chapter(s))", book.title, book.chapters.len());
    let rows: Vec<(String, usize, usize, bool)> = book
        .chapters
        .iter()
        .map(|chapter| {
            let content: Vec<_> = chapter.paragraphs.iter().filter(|p| !p.is_blank()).collect();
            let translated = content.iter().filter(|p| p.is_translated()).count();
            (
                chapter.id.clone(),
                translated,
                content.len(),
                chapter.title_translated(),
            )
        })
        .collect();
    ui::print_coverage(&rows);
    Ok(())
}

async fn review(book: PathBuf, chapter_id: &str) -> Result<()> {
    let store = JsonFileStore::new(book);
    let chapter = store
        .load_chapter(chapter_id)
        .await
        .with_context(|| format!("failed to load chapter {chapter_id}"))?;
    if !ui::print_review(chapter_id, check_completeness(&chapter, None)) {
        bail!("chapter {chapter_id} is not ready for review");
    }
    Ok(())
}
