use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::Hash;

/// Pointer from a file node to the blob holding its content.
///
/// This is persisted by the file layer as `storage.reference`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageReference {
    /// ID of the blob.
    #[serde(rename = "_id")]
    pub id: Uuid,
}

/// The result of storing a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreFileResult {
    /// The blob the file now points to.
    pub reference: StorageReference,

    /// The size of the content.
    pub size: u64,

    /// The hash of the content.
    pub hash: Hash,

    /// How the content was stored.
    #[serde(default)]
    pub kind: StoreFileResultKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum StoreFileResultKind {
    /// The staged blob became the canonical blob for its content.
    #[default]
    Uploaded,

    /// The content already existed and the staged blob was discarded.
    Deduplicated,
}
