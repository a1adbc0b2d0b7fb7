//! Note status transitions.
//!
//! ```text
//!   empty ──content or attachment──▶ draft ──publish──▶ published
//!     ▲                                │                    │
//!     └──blank and no attachments──────┘                    │
//!     └─────────────────────────── clear ───────────────────┘
//! ```
//!
//! `published` only leaves through an explicit clear.

use super::models::{Draft, NoteStatus};
use crate::attachments::Attachment;
use crate::errors::AppError;

/// Status a draft should have after an edit.
pub fn settle(draft: &Draft) -> NoteStatus {
    match draft.status {
        NoteStatus::Published => NoteStatus::Published,
        _ if draft.has_content() || !draft.attachments.is_empty() => NoteStatus::Draft,
        _ => NoteStatus::Empty,
    }
}

pub fn set_content(draft: &mut Draft, content: &str) -> NoteStatus {
    draft.content = content.to_string();
    draft.status = settle(draft);
    draft.status
}

pub fn add_attachment(draft: &mut Draft, attachment: Attachment) -> NoteStatus {
    draft.attachments.push(attachment);
    draft.status = settle(draft);
    draft.status
}

/// Detach one attachment, returning it so its preview can be revoked.
pub fn remove_attachment(draft: &mut Draft, attachment_id: &str) -> Option<Attachment> {
    let index = draft.attachments.iter().position(|a| a.id == attachment_id)?;
    let removed = draft.attachments.remove(index);
    draft.status = settle(draft);
    Some(removed)
}

pub fn mark_published(draft: &mut Draft, note_id: &str) -> Result<(), AppError> {
    if draft.status != NoteStatus::Draft {
        return Err(AppError::Validation(format!(
            "Cannot publish a note in state '{}'",
            draft.status
        )));
    }
    draft.status = NoteStatus::Published;
    draft.published_note_id = Some(note_id.to_string());
    Ok(())
}

/// Reset all bookkeeping. Returns the attachments that were dropped.
pub fn clear(draft: &mut Draft) -> Vec<Attachment> {
    let attachments = std::mem::take(&mut draft.attachments);
    *draft = Draft::default();
    attachments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachments::AttachmentPayload;

    fn attachment(id: &str) -> Attachment {
        Attachment {
            id: id.to_string(),
            version_id: "v-1".to_string(),
            playlist_local_id: "pl-1".to_string(),
            name: format!("{}.png", id),
            media_type: "image/png".to_string(),
            preview: None,
            payload: AttachmentPayload::Bytes(vec![0]),
            created_at: 0,
        }
    }

    #[test]
    fn test_content_drives_empty_and_draft() {
        let mut draft = Draft::default();
        assert_eq!(set_content(&mut draft, "hello"), NoteStatus::Draft);
        assert_eq!(set_content(&mut draft, "  "), NoteStatus::Empty);
    }

    #[test]
    fn test_attachment_keeps_blank_draft_alive() {
        let mut draft = Draft::default();
        assert_eq!(add_attachment(&mut draft, attachment("a")), NoteStatus::Draft);
        assert_eq!(set_content(&mut draft, ""), NoteStatus::Draft);

        let removed = remove_attachment(&mut draft, "a").unwrap();
        assert_eq!(removed.id, "a");
        assert_eq!(draft.status, NoteStatus::Empty);
        assert!(remove_attachment(&mut draft, "a").is_none());
    }

    #[test]
    fn test_published_is_sticky_until_clear() {
        let mut draft = Draft::default();
        set_content(&mut draft, "hello");
        mark_published(&mut draft, "note-1").unwrap();
        assert_eq!(draft.status, NoteStatus::Published);

        assert_eq!(set_content(&mut draft, "follow-up"), NoteStatus::Published);
        assert_eq!(set_content(&mut draft, ""), NoteStatus::Published);
        assert_eq!(draft.content, "");
        assert!(mark_published(&mut draft, "note-2").is_err());

        draft.attachments.push(attachment("b"));
        let dropped = clear(&mut draft);
        assert_eq!(dropped.len(), 1);
        assert_eq!(draft, Draft::default());
    }

    #[test]
    fn test_empty_cannot_be_published() {
        let mut draft = Draft::default();
        assert!(matches!(
            mark_published(&mut draft, "note-1"),
            Err(AppError::Validation(_))
        ));
    }
}
