pub mod debounce;
pub mod manager;
pub mod models;
pub mod state;

pub use debounce::{DraftPersister, DraftStore, PendingWrites};
pub use manager::DraftManager;
pub use models::{Draft, DraftKey, DraftRecord, NoteStatus, PublishedNote};
