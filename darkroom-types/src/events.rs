//! Delete events: the gravestone log that drives incremental sync.

use serde::{Deserialize, Serialize};

use crate::{AlbumId, DeletePart};

/// What kind of object disappeared.
///
/// The numeric values are part of the wire protocol and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeleteEventKind {
    /// A file was removed from the Gallery.
    Gallery = 1,
    /// A file was permanently removed from the Trash.
    Trash = 2,
    /// A file in an album was deleted.
    AlbumFile = 3,
    /// An album disappeared from the user's view (deleted, unshared,
    /// left, or the user was removed).
    Album = 4,
    /// A contact was removed.
    Contact = 5,
    /// A file was moved out of an album to another destination.
    AlbumFileMovedOut = 6,
}

impl DeleteEventKind {
    /// The wire value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A dated gravestone, appended to a per-user log when a syncable object
/// disappears from that user's view.
///
/// The log is append-only; clients filter it by `date > cursor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteEvent {
    /// The filename, or the decimal user id for contact events. Empty for
    /// whole-album events.
    #[serde(default)]
    pub file: String,
    /// The album involved, when any.
    #[serde(default)]
    pub album_id: AlbumId,
    /// When the object disappeared, in milliseconds since epoch.
    pub date: i64,
    /// What disappeared.
    pub kind: DeleteEventKind,
}

impl DeleteEvent {
    /// Convert to the wire shape (all values as strings).
    pub fn to_part(&self) -> DeletePart {
        DeletePart {
            file: self.file.clone(),
            album_id: self.album_id.to_string(),
            date: crate::number(self.date),
            kind: crate::number(i64::from(self.kind.as_u8())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_are_fixed() {
        assert_eq!(DeleteEventKind::Gallery.as_u8(), 1);
        assert_eq!(DeleteEventKind::Trash.as_u8(), 2);
        assert_eq!(DeleteEventKind::AlbumFile.as_u8(), 3);
        assert_eq!(DeleteEventKind::Album.as_u8(), 4);
        assert_eq!(DeleteEventKind::Contact.as_u8(), 5);
        assert_eq!(DeleteEventKind::AlbumFileMovedOut.as_u8(), 6);
    }

    #[test]
    fn album_delete_part() {
        let ev = DeleteEvent {
            file: String::new(),
            album_id: AlbumId::new("a1"),
            date: 2000,
            kind: DeleteEventKind::Album,
        };
        let part = ev.to_part();
        assert_eq!(part.album_id, "a1");
        assert_eq!(part.date, "2000");
        assert_eq!(part.kind, "4");
    }
}
