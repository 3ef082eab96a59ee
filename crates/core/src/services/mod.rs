//! Business logic services.

#![allow(missing_docs)]

pub mod dispatch;
pub mod file;
pub mod media;
pub mod note;
pub mod session;

pub use dispatch::{
    ClusterJobDispatcher, DispatcherService, InlineDispatcher, ProcessingDispatcher,
    build_dispatcher,
};
pub use file::{FileService, FileWithUrl};
pub use media::{MediaConfig, MediaKind, MediaService};
pub use note::{
    CreateNoteInput, NotePage, NoteService, NoteWithFiles, UpdateNoteInput, UploadUrl,
};
pub use session::{RegisterInput, Session, SessionService};
