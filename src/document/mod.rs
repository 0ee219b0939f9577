mod model;
mod store;
mod workspace;

pub use model::{Book, Chapter, ChapterTitle, Paragraph, ParagraphUpdate, Translation};
pub use store::{InMemoryStore, JsonFileStore, ParagraphStore, StoreError};
pub use workspace::{ParagraphWriter, SaveMode, Workspace, WorkspaceError};
