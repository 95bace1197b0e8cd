//! Files.
//!
//! ## File IDs
//!
//! A file ID identifies the node in the outer filesystem that owns a
//! reference to a blob. The storage layer treats it as opaque, but
//! validates it so it can be safely stored and logged.
//!
//! File IDs can be up to 128 characters long and can only consist of
//! ASCII alphanumeric characters (A-Za-z0-9), dashes ('-'), underscores
//! ('_'), dots ('.') and colons (':'). They must start with an
//! alphanumeric character. Hexadecimal object IDs and UUIDs are both
//! valid file IDs.
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{de, Deserialize, Serialize};

use crate::error::{BalloonError, BalloonResult};

/// The maximum allowable length of a file ID.
pub const MAX_FILE_ID_LENGTH: usize = 128;

lazy_static! {
    static ref FILE_ID_REGEX: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-_.:]{0,127}$").unwrap();
}

/// The ID of a file owning a blob reference.
#[derive(Serialize, Deserialize, Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct FileId(#[serde(deserialize_with = "FileId::deserialize")] String);

impl FileId {
    /// Creates a file ID from a String.
    pub fn new(id: String) -> BalloonResult<Self> {
        validate_file_id(&id)?;
        Ok(Self(id))
    }

    /// Returns the string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deserializes a potentially-invalid file ID.
    fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use de::Error;
        String::deserialize(deserializer).and_then(|s| {
            validate_file_id(&s).map_err(|e| Error::custom(e.to_string()))?;
            Ok(s)
        })
    }
}

impl FromStr for FileId {
    type Err = BalloonError;

    fn from_str(id: &str) -> BalloonResult<Self> {
        Self::new(id.to_owned())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_file_id(id: &str) -> BalloonResult<()> {
    if id.is_empty() {
        return Err(BalloonError::InvalidFileId {
            id: id.to_owned(),
            reason: "File ID cannot be empty",
        });
    }

    if id.len() > MAX_FILE_ID_LENGTH {
        return Err(BalloonError::InvalidFileId {
            id: id.to_owned(),
            reason: "File ID is too long",
        });
    }

    if !FILE_ID_REGEX.is_match(id) {
        return Err(BalloonError::InvalidFileId {
            id: id.to_owned(),
            reason: "File ID contains invalid characters",
        });
    }

    Ok(())
}
