pub mod error;
pub mod source;

pub use error::{SourceError, SourceResult};
pub use source::{ChunkSource, FileSource, MemorySource};
