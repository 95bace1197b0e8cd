//! Database entities.
//!
//! We use SeaORM and target PostgreSQL (production) and SQLite (development).

pub mod blob;
pub mod blobref;
pub mod chunk;
pub mod quota;
