//! Validation and commit of model-produced paragraph batches.

mod batch;
mod chunk;
pub mod quota;
pub mod quotes;

pub use batch::{BatchAccepted, BatchGateway, BatchItem, BatchRejected, BatchRequest};
pub use chunk::{ChunkBoundary, ChunkSession, SubmittedLedger};
pub use quota::{QuotaDecision, QuotaExceeded};
pub use quotes::{QuoteShortfall, QuoteSide};
