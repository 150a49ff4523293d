//! # darkroom-types
//!
//! Shared types for the darkroom vault server.
//!
//! This crate pins the identifiers and wire shapes that every other crate
//! agrees on:
//! - [`UserId`], [`AlbumId`], [`BlobId`] - identity types
//! - [`Response`] - the JSON envelope returned to clients
//! - [`Permissions`] - the album permission bitmask
//! - [`DeleteEvent`] - sync gravestones
//!
//! Every number that crosses the wire is transported as a decimal string;
//! [`number`] is the single place that conversion happens.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod api;
mod events;
mod ids;
mod permissions;

pub use api::{number, AlbumPart, ContactPart, DeletePart, FilePart, Response};
pub use events::{DeleteEvent, DeleteEventKind};
pub use ids::{AlbumId, BlobId, UserId, MIN_USER_ID};
pub use permissions::Permissions;

/// Set tag for a user's primary photo collection.
pub const GALLERY_SET: &str = "0";
/// Set tag for soft-deleted files.
pub const TRASH_SET: &str = "1";
/// Set tag for files living inside a named album.
pub const ALBUM_SET: &str = "2";
