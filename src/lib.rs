//! Chunked LLM workflow engine for translating, polishing and proofreading
//! novel chapters.
//!
//! - [`workflow`]: task registry and the per-task-type status machine.
//! - [`gateway`]: validation and commit of model-submitted batches.
//! - [`controller`]: chapter runs with live progress and cancellation.
//! - [`tool_loop`] and [`tools`]: the conversational tool-call loop and the
//!   JSON tools it exposes.

pub mod config;
pub mod controller;
pub mod document;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod tool_loop;
pub mod tools;
pub mod workflow;

#[cfg(test)]
mod test_support;

pub use config::NovelflowConfig;
pub use controller::{ChapterController, ControllerConfig, ControllerError, JobKind, JobReport};
pub use error::NovelflowError;
