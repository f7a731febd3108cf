pub mod art;
pub mod encode;
mod engine;
pub mod error;
pub mod event;
mod execute;
pub mod library;
mod model;
pub mod plan;
pub mod query;
pub mod represent;
pub mod resolve;
pub mod tags;
mod template;

pub use crate::art::{ArtProcessor, ArtProcessorHandle, Artwork, ImageArtProcessor};
pub use crate::encode::{CommandEncoder, Encoder, EncoderHandle};
pub use crate::engine::{Collaborators, CreateDirectory, Engine, Track, UpdateOptions};
pub use crate::event::{Applied, Event, Failure, Outcome, RunSummary};
pub use crate::library::{Library, LibraryHandle, SnapshotLibrary};
pub use crate::model::{Album, AlbumId, ItemId, KNOWN_FIELDS, LibraryItem, Metadata, Value, item_view};
pub use crate::plan::{Action, ActionKind, Plan, Reason};
pub use crate::tags::{LoftyTagWriter, TagWriter, TagWriterHandle};
pub use crate::template::{DEFAULT_LIST_FORMAT, ItemTemplate, PathGenerator};

/// Upper bound on actions in flight within one stage of a run.
pub const MAX_PROCESS_CONCURRENCY: usize = 32;
