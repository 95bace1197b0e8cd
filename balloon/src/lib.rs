//! The Balloon Library.
//!
//! Types and stream utilities shared by the blob storage server and
//! the components built on top of it.

#![deny(
    asm_sub_register,
    deprecated,
    missing_abi,
    unsafe_code,
    unused_macros,
    unused_must_use,
    unused_unsafe
)]
#![deny(clippy::from_over_into, clippy::needless_question_mark)]
#![cfg_attr(
    not(debug_assertions),
    deny(unused_imports, unused_mut, unused_variables,)
)]

pub mod api;
pub mod error;
pub mod file;
pub mod hash;
#[cfg(feature = "stream")]
pub mod stream;
pub mod testing;

pub use error::{BalloonError, BalloonResult};
