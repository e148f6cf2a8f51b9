//! Workspace documents and the operations on them.

pub mod binding;
pub mod documents;
pub mod error;
