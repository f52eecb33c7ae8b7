//! Export a CTF's Discord history into pads and record it as a task.

pub mod exporter;
pub mod publisher;
pub mod render;
pub mod workflow;

pub use exporter::{export_messages, RenderedMessage, DEFAULT_PAGE_SIZE};
pub use publisher::{
    ArchivePublisher, DocumentService, HedgedocClient, HedgedocConfig, PublishError,
    DEFAULT_MAX_DOCUMENT_CHARS,
};
pub use render::{pack_blocks, render_blocks};
pub use workflow::{
    archive_button_id, archive_task_title, parse_archive_button, ArchiveError, ArchiveOutcome,
    ArchiveState, ArchiveWorkflow, ARCHIVE_BUTTON_PREFIX,
};
