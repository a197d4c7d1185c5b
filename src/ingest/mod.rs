pub mod builder;
pub mod chunker;
pub mod extract;
pub mod incremental;
pub mod pipeline;

pub use builder::{BuildReport, IndexBuilder};
pub use chunker::{estimate_tokens, Chunker, WindowChunker};
pub use extract::{Extractor, ExtractorRegistry, Format, Markdown, PlainText};
pub use incremental::{detect_changes, ChangeSet};
pub use pipeline::{IngestOutput, IngestionPipeline};
