//! Types shared with the callers of the storage layer.

pub mod v1;
