//! Wire shapes for the sync protocol.
//!
//! Responses are JSON envelopes of the form
//! `{"status": "ok"|"nok", "parts": {...}, "infos": [...], "errors": [...]}`.
//! Every numeric value inside `parts` is transported as a decimal string;
//! the external client depends on that, so [`number`] is used everywhere a
//! count or timestamp crosses the boundary.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Render a numeric value the way the wire protocol expects it.
pub fn number(n: i64) -> String {
    n.to_string()
}

/// The JSON envelope returned for every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// `"ok"` or `"nok"`.
    pub status: String,
    /// Endpoint-specific payload, keyed by part name.
    pub parts: Map<String, Value>,
    /// Human-readable informational messages.
    pub infos: Vec<String>,
    /// Human-readable error messages.
    pub errors: Vec<String>,
}

impl Response {
    /// A successful response with no parts yet.
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            parts: Map::new(),
            infos: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// A failed response.
    pub fn nok() -> Self {
        Self {
            status: "nok".to_string(),
            parts: Map::new(),
            infos: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// A failed response instructing the client to discard its session.
    pub fn nok_logout() -> Self {
        Self::nok().with_part("logout", json!("1"))
    }

    /// Attach a single part.
    pub fn with_part(mut self, key: &str, value: Value) -> Self {
        self.parts.insert(key.to_string(), value);
        self
    }

    /// Attach a list-valued part from anything serializable.
    pub fn with_part_list<T: Serialize>(mut self, key: &str, items: &[T]) -> Self {
        let list: Vec<Value> = items
            .iter()
            .map(|i| serde_json::to_value(i).expect("wire types serialize"))
            .collect();
        self.parts.insert(key.to_string(), Value::Array(list));
        self
    }

    /// Attach an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.errors.push(msg.into());
        self
    }

    /// Attach an informational message.
    pub fn with_info(mut self, msg: impl Into<String>) -> Self {
        self.infos.push(msg.into());
        self
    }

    /// True when the status is `"ok"`.
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// An album as the client sees it in the `albums` stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumPart {
    /// Album identifier.
    #[serde(rename = "albumId")]
    pub album_id: String,
    /// Creation time, ms string.
    #[serde(rename = "dateCreated")]
    pub date_created: String,
    /// Last modification time, ms string.
    #[serde(rename = "dateModified")]
    pub date_modified: String,
    /// The album key, wrapped for this viewer. For the owner this is the
    /// key they stored at creation; for a member it is their sharing key.
    #[serde(rename = "encPrivateKey")]
    pub enc_private_key: String,
    /// The album public key.
    #[serde(rename = "publicKey")]
    pub public_key: String,
    /// Client-encrypted album metadata.
    pub metadata: String,
    /// `"1"` when the viewer owns the album.
    #[serde(rename = "isOwner")]
    pub is_owner: String,
    /// `"1"` when the album is shared.
    #[serde(rename = "isShared")]
    pub is_shared: String,
    /// `"1"` when the album is hidden.
    #[serde(rename = "isHidden")]
    pub is_hidden: String,
    /// `"1"` when the album is locked.
    #[serde(rename = "isLocked")]
    pub is_locked: String,
    /// The permission bitmask, empty if never shared.
    pub permissions: String,
    /// Comma-joined, ascending member ids; empty when unshared.
    pub members: String,
    /// Cover file selector.
    pub cover: String,
}

/// A contact as the client sees it in the `contacts` stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPart {
    /// The contact's user id, decimal string.
    #[serde(rename = "userId")]
    pub user_id: String,
    /// The contact's email.
    pub email: String,
    /// The contact's long-term public key, standard base64.
    #[serde(rename = "publicKey")]
    pub public_key: String,
    /// Last modification time, ms string.
    #[serde(rename = "dateModified")]
    pub date_modified: String,
}

/// A file as the client sees it in the `files`, `trash` and `albumFiles`
/// streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePart {
    /// Filename (client-chosen, unique within its set).
    pub file: String,
    /// Client file-format version.
    pub version: String,
    /// Client-encrypted file headers.
    pub headers: String,
    /// Creation time, ms string.
    #[serde(rename = "dateCreated")]
    pub date_created: String,
    /// Last modification time, ms string.
    #[serde(rename = "dateModified")]
    pub date_modified: String,
    /// Owning album, empty for Gallery and Trash.
    #[serde(rename = "albumId")]
    pub album_id: String,
}

/// A gravestone as the client sees it in the `deletes` stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePart {
    /// Filename, or decimal user id for contact events.
    pub file: String,
    /// The album involved, empty when none.
    #[serde(rename = "albumId")]
    pub album_id: String,
    /// Deletion time, ms string.
    pub date: String,
    /// Numeric event type, as a string.
    #[serde(rename = "type")]
    pub kind: String,
}
