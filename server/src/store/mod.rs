pub mod document;

pub use document::{DocumentError, JsonDocument, Snapshot};
