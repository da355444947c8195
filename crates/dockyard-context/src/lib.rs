//! Build context preparation.
//!
//! Uploaded archives arrive as zip, gzip or tar. They are sniffed by content,
//! normalized to a plain tar stream, unpacked into a scratch directory where
//! the language recipe is injected, and re-packed as a gzip-compressed tar
//! ready for the container engine.

pub mod archive;
pub mod recipe;

pub use archive::{ArchiveKind, normalize};
pub use recipe::{ContextPreparer, RECIPE_FILE};
