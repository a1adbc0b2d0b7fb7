pub mod manager;
pub mod models;

pub use manager::AttachmentManager;
pub use models::{Attachment, AttachmentPayload, PreviewHandle};
