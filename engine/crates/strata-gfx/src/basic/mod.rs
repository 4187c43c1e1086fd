pub mod error;
pub mod flags;
pub mod format;
