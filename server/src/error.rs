//! Error handling.

use std::error::Error as StdError;

use anyhow::Error as AnyError;
use displaydoc::Display;
use serde::Serialize;
use uuid::Uuid;

use balloon::error::BalloonError;

pub type ServerResult<T> = Result<T, ServerError>;

/// An error.
#[derive(Debug, Display)]
pub enum ServerError {
    // Generic responses
    /// The server encountered an internal error or misconfiguration.
    InternalServerError,

    // Specialized responses
    /// The requested blob does not exist.
    NoSuchBlob,

    /// The upload session does not exist or has already been finalized.
    NoSuchSession,

    /// The requested file version does not exist.
    NoSuchVersion { version: u32 },

    /// The blob has already been finalized.
    BlobFinalized,

    /// Chunk {seq} of blob {blob_id} is missing.
    MissingChunk { blob_id: Uuid, seq: i32 },

    /// Insufficient storage: {reason}
    InsufficientStorage { reason: InsufficientStorageReason },

    /// Database error: {0}
    DatabaseError(AnyError),

    /// Storage error: {0}
    StorageError(AnyError),

    /// General request error: {0}
    RequestError(AnyError),

    /// Error from the common components.
    BalloonError(BalloonError),
}

/// The reason an upload was refused for lack of space.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum InsufficientStorageReason {
    /// The user's storage quota is full.
    UserQuotaFull,

    /// The file exceeds the maximum file size.
    FileTooLarge,
}

/// The category of an error as seen by the outer API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The resource does not exist.
    NotFound,

    /// There isn't enough space to store the content.
    StorageFull,

    /// The request can't be fulfilled as is.
    BadRequest,

    /// Something unexpected happened on our side.
    Internal,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    code: u16,
    error: String,
    message: String,
}

impl ServerError {
    pub fn database_error(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::DatabaseError(AnyError::new(error))
    }

    pub fn storage_error(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::StorageError(AnyError::new(error))
    }

    pub fn request_error(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::RequestError(AnyError::new(error))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::InternalServerError => "InternalServerError",

            Self::NoSuchBlob => "NoSuchBlob",
            Self::NoSuchSession => "NoSuchSession",
            Self::NoSuchVersion { .. } => "NoSuchVersion",
            Self::BlobFinalized => "BlobFinalized",
            Self::MissingChunk { .. } => "MissingChunk",
            Self::InsufficientStorage { .. } => "InsufficientStorage",
            Self::BalloonError(e) => e.name(),
            Self::DatabaseError(_) => "DatabaseError",
            Self::StorageError(_) => "StorageError",
            Self::RequestError(_) => "RequestError",
        }
    }

    /// Returns the category of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NoSuchBlob => ErrorClass::NotFound,
            Self::NoSuchSession => ErrorClass::NotFound,
            Self::NoSuchVersion { .. } => ErrorClass::NotFound,
            Self::InsufficientStorage { .. } => ErrorClass::StorageFull,
            Self::BlobFinalized => ErrorClass::BadRequest,
            Self::RequestError(_) => ErrorClass::BadRequest,
            Self::BalloonError(BalloonError::InvalidFileId { .. }) => ErrorClass::BadRequest,
            _ => ErrorClass::Internal,
        }
    }

    /// Returns a version of this error for clients.
    pub fn into_clients(self) -> Self {
        match self {
            Self::DatabaseError(_) => Self::InternalServerError,
            Self::StorageError(_) => Self::InternalServerError,
            Self::MissingChunk { .. } => Self::InternalServerError,

            _ => self,
        }
    }

    /// Returns the response the outer API sends for this error.
    pub fn into_response(self) -> ErrorResponse {
        if matches!(
            self,
            Self::DatabaseError(_) | Self::StorageError(_) | Self::MissingChunk { .. }
        ) {
            tracing::error!("{:?}", self);
        }

        let sanitized = self.into_clients();

        ErrorResponse {
            code: sanitized.class().http_status_code(),
            message: sanitized.to_string(),
            error: sanitized.name().to_string(),
        }
    }
}

impl ErrorClass {
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::StorageFull => 507,
            Self::BadRequest => 400,
            Self::Internal => 500,
        }
    }
}

impl StdError for ServerError {}

impl From<BalloonError> for ServerError {
    fn from(error: BalloonError) -> Self {
        Self::BalloonError(error)
    }
}

impl From<InsufficientStorageReason> for ServerError {
    fn from(reason: InsufficientStorageReason) -> Self {
        Self::InsufficientStorage { reason }
    }
}
