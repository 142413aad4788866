//! Types shared between the chrootctl library and its binaries.

pub mod constants;
pub mod errors;

pub use errors::{ChrootError, ChrootResult};
