pub mod merge;
pub mod retrieve;
pub mod vector;

pub use merge::{merge_adjacent_chunks, MergeOptions, Passage};
pub use retrieve::Retriever;
pub use vector::{Chunk, RetrievalResult, VectorStore};
