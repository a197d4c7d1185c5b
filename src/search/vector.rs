//! Flat cosine-similarity index over embedded chunks.
//!
//! Every stored vector and every query is L2-normalised, so similarity is a
//! plain inner product. Search is an exact linear scan.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{RagindexError, Result};
use crate::source::SourceKey;

const MAGIC: &[u8; 4] = b"RGIX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// One unit of indexed text with its ordinal position inside its source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub source: SourceKey,
    pub position: usize,
    pub text: String,
    /// Hash of the source content this chunk was cut from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Chunk {
    pub fn new(source: impl Into<SourceKey>, position: usize, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            position,
            text: text.into(),
            content_hash: None,
        }
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }
}

/// A search hit
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub score: f32,
}

/// In-memory flat index. Row `i` of the vector matrix belongs to `chunks[i]`.
#[derive(Debug, Clone, Default)]
pub struct VectorStore {
    dimension: Option<usize>,
    vectors: Vec<f32>,
    chunks: Vec<Chunk>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored vectors
    pub fn ntotal(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Dimension fixed by the first non-empty `add`
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Stored (normalised) vector for row `i`
    pub fn vector(&self, i: usize) -> Option<&[f32]> {
        let dim = self.dimension?;
        self.vectors.get(i * dim..(i + 1) * dim)
    }

    /// All rows belonging to `source`, in insertion order
    pub fn rows_for_source(&self, source: &str) -> Vec<(&Chunk, &[f32])> {
        self.chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.source == source)
            .filter_map(|(i, c)| self.vector(i).map(|v| (c, v)))
            .collect()
    }

    /// Number of rows belonging to `source`
    pub fn chunk_count_for(&self, source: &str) -> usize {
        self.chunks.iter().filter(|c| c.source == source).count()
    }

    /// Whether every row of `source` was cut from content hashing to `hash`.
    /// Vacuously true for a source with no rows.
    pub fn rows_match_hash(&self, source: &str, hash: &str) -> bool {
        self.chunks
            .iter()
            .filter(|c| c.source == source)
            .all(|c| c.content_hash.as_deref() == Some(hash))
    }

    /// Distinct sources with at least one row, in first-seen order
    pub fn sources(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.chunks
            .iter()
            .map(|c| c.source.as_str())
            .filter(|s| seen.insert(*s))
            .collect()
    }

    /// Append vectors and their chunks.
    ///
    /// Either every pair is added or none is. The first non-empty call fixes
    /// the store's dimension; later vectors of another size are rejected with
    /// [`RagindexError::DimensionMismatch`].
    pub fn add(&mut self, vectors: Vec<Vec<f32>>, chunks: Vec<Chunk>) -> Result<()> {
        if vectors.len() != chunks.len() {
            return Err(RagindexError::InvalidInput(format!(
                "{} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        let Some(first) = vectors.first() else {
            return Ok(());
        };

        let expected = self.dimension.unwrap_or(first.len());
        if expected == 0 {
            return Err(RagindexError::InvalidInput(
                "Cannot index zero-dimension vectors".to_string(),
            ));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(RagindexError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        self.dimension = Some(expected);
        self.vectors.reserve(vectors.len() * expected);
        for mut vector in vectors {
            normalize(&mut vector);
            self.vectors.extend_from_slice(&vector);
        }
        self.chunks.extend(chunks);
        Ok(())
    }

    /// The `k` rows most similar to `query`, best first.
    ///
    /// An empty store or `k == 0` yields no results; `k` larger than the
    /// store yields every row.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalResult>> {
        let Some(dim) = self.dimension else {
            return Ok(Vec::new());
        };
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != dim {
            return Err(RagindexError::DimensionMismatch {
                expected: dim,
                actual: query.len(),
            });
        }

        let mut query = query.to_vec();
        normalize(&mut query);

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(dim)
            .enumerate()
            .map(|(i, row)| (i, dot(row, &query)))
            .collect();

        // Ties keep insertion order
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| RetrievalResult {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect())
    }

    /// Persist to `<base>.index` and `<base>.chunks.json`
    pub fn save(&self, base: &Path) -> Result<()> {
        let index_path = index_file(base);
        let chunks_path = chunks_file(base);
        if let Some(parent) = index_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let dim = self.dimension.unwrap_or(0);
        let mut buf = Vec::with_capacity(HEADER_LEN + self.vectors.len() * 4);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&(dim as u32).to_le_bytes());
        buf.extend_from_slice(&(self.chunks.len() as u64).to_le_bytes());
        for value in &self.vectors {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        let chunks_json = serde_json::to_vec(&self.chunks)?;

        let index_tmp = with_suffix(&index_path, ".tmp");
        let chunks_tmp = with_suffix(&chunks_path, ".tmp");
        std::fs::write(&index_tmp, &buf)?;
        std::fs::write(&chunks_tmp, &chunks_json)?;
        std::fs::rename(&chunks_tmp, &chunks_path)?;
        std::fs::rename(&index_tmp, &index_path)?;

        log::info!(
            "Saved index with {} vectors to {}",
            self.chunks.len(),
            index_path.display()
        );
        Ok(())
    }

    /// Load a store saved by [`VectorStore::save`]. Both artifacts must exist
    /// and agree on the row count.
    pub fn load(base: &Path) -> Result<Self> {
        let index_path = index_file(base);
        let chunks_path = chunks_file(base);
        for path in [&index_path, &chunks_path] {
            if !path.exists() {
                return Err(RagindexError::MissingArtifact(path.clone()));
            }
        }

        let raw = std::fs::read(&index_path)?;
        let (dim, count) = parse_header(&raw)?;
        if dim == 0 && count > 0 {
            return Err(RagindexError::CorruptArtifact(format!(
                "{}: {} rows of dimension 0",
                index_path.display(),
                count
            )));
        }
        let expected_bytes = count
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| {
                RagindexError::CorruptArtifact(format!(
                    "{}: header claims {} rows of dimension {}",
                    index_path.display(),
                    count,
                    dim
                ))
            })?;
        let payload = &raw[HEADER_LEN..];
        if payload.len() != expected_bytes {
            return Err(RagindexError::CorruptArtifact(format!(
                "{}: expected {} bytes of vectors, found {}",
                index_path.display(),
                expected_bytes,
                payload.len()
            )));
        }

        let chunks: Vec<Chunk> = serde_json::from_slice(&std::fs::read(&chunks_path)?)
            .map_err(|e| {
                RagindexError::CorruptArtifact(format!("{}: {}", chunks_path.display(), e))
            })?;
        if chunks.len() != count {
            return Err(RagindexError::CorruptArtifact(format!(
                "index has {} vectors but {} chunks",
                count,
                chunks.len()
            )));
        }

        let vectors = payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Self {
            dimension: (dim > 0).then_some(dim),
            vectors,
            chunks,
        })
    }

    /// Whether both artifacts for `base` exist
    pub fn exists(base: &Path) -> bool {
        index_file(base).exists() && chunks_file(base).exists()
    }

    /// Delete both artifacts; absent files are not an error
    pub fn remove_files(base: &Path) -> Result<()> {
        for path in [index_file(base), chunks_file(base)] {
            match std::fs::remove_file(&path) {
                Ok(()) => log::info!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn parse_header(raw: &[u8]) -> Result<(usize, usize)> {
    if raw.len() < HEADER_LEN || &raw[0..4] != MAGIC {
        return Err(RagindexError::CorruptArtifact(
            "index file has no valid header".to_string(),
        ));
    }
    let read_u32 = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
    let version = read_u32(4);
    if version != FORMAT_VERSION {
        return Err(RagindexError::CorruptArtifact(format!(
            "unsupported index format version {}",
            version
        )));
    }
    let dim = read_u32(8) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&raw[12..20]);
    let count = usize::try_from(u64::from_le_bytes(count_bytes)).map_err(|_| {
        RagindexError::CorruptArtifact("index row count does not fit in memory".to_string())
    })?;
    Ok((dim, count))
}

/// `<base>.index`
pub fn index_file(base: &Path) -> PathBuf {
    with_suffix(base, ".index")
}

/// `<base>.chunks.json`
pub fn chunks_file(base: &Path) -> PathBuf {
    with_suffix(base, ".chunks.json")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Scale to unit length; zero vectors are left as-is
fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with(rows: &[(&str, usize, Vec<f32>)]) -> VectorStore {
        let mut store = VectorStore::new();
        let (vectors, chunks): (Vec<Vec<f32>>, Vec<Chunk>) = rows
            .iter()
            .map(|(src, pos, v)| (v.clone(), Chunk::new(*src, *pos, format!("{}#{}", src, pos))))
            .unzip();
        store.add(vectors, chunks).unwrap();
        store
    }

    #[test]
    fn test_empty_store_search() {
        let store = VectorStore::new();
        assert!(store.search(&[1.0, 0.0], 5).unwrap().is_empty());
        assert_eq!(store.dimension(), None);
    }

    #[test]
    fn test_search_orders_by_cosine() {
        let store = store_with(&[
            ("a", 0, vec![1.0, 0.0]),
            ("a", 1, vec![0.0, 3.0]),
            ("b", 0, vec![2.0, 2.0]),
        ]);
        let results = store.search(&[10.0, 0.0], 3).unwrap();
        assert_eq!(results[0].chunk, Chunk::new("a", 0, "a#0"));
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert_eq!(results[1].chunk.source, "b");
        assert!((results[1].score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!(results[2].score.abs() < 1e-6);
    }

    #[test]
    fn test_k_larger_than_store_returns_all() {
        let store = store_with(&[("a", 0, vec![1.0, 0.0]), ("a", 1, vec![0.0, 1.0])]);
        assert_eq!(store.search(&[1.0, 1.0], 100).unwrap().len(), 2);
        assert!(store.search(&[1.0, 1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_vectors_accepted() {
        let store = store_with(&[("a", 0, vec![0.5, 0.5]), ("b", 0, vec![0.5, 0.5])]);
        let results = store.search(&[1.0, 1.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.source, "a");
        assert_eq!(results[1].chunk.source, "b");
    }

    #[test]
    fn test_dimension_fixed_by_first_add() {
        let mut store = store_with(&[("a", 0, vec![1.0, 0.0, 0.0])]);
        let err = store
            .add(vec![vec![1.0, 0.0]], vec![Chunk::new("b", 0, "x")])
            .unwrap_err();
        assert!(matches!(
            err,
            RagindexError::DimensionMismatch { expected: 3, actual: 2 }
        ));
        assert_eq!(store.ntotal(), 1);
    }

    #[test]
    fn test_mixed_dimensions_rejected_atomically() {
        let mut store = VectorStore::new();
        let err = store
            .add(
                vec![vec![1.0, 0.0], vec![1.0]],
                vec![Chunk::new("a", 0, "x"), Chunk::new("a", 1, "y")],
            )
            .unwrap_err();
        assert!(matches!(err, RagindexError::DimensionMismatch { .. }));
        assert!(store.is_empty());
        assert_eq!(store.dimension(), None);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let store = store_with(&[("a", 0, vec![1.0, 0.0])]);
        assert!(matches!(
            store.search(&[1.0, 0.0, 0.0], 1),
            Err(RagindexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut store = VectorStore::new();
        assert!(store.add(vec![vec![1.0]], vec![]).is_err());
    }

    #[test]
    fn test_rows_for_source() {
        let store = store_with(&[
            ("a", 0, vec![1.0, 0.0]),
            ("b", 0, vec![0.0, 1.0]),
            ("a", 1, vec![0.0, 2.0]),
        ]);
        let rows = store.rows_for_source("a");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].0.position, 1);
        assert_eq!(rows[1].1, &[0.0, 1.0]);
        assert_eq!(store.chunk_count_for("b"), 1);
        assert_eq!(store.chunk_count_for("zzz"), 0);
    }

    #[test]
    fn test_save_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("nested/global");
        let store = store_with(&[("a", 0, vec![3.0, 4.0]), ("b", 2, vec![0.0, 1.0])]);
        store.save(&base).unwrap();

        assert!(VectorStore::exists(&base));
        let loaded = VectorStore::load(&base).unwrap();
        assert_eq!(loaded.ntotal(), 2);
        assert_eq!(loaded.dimension(), Some(2));
        assert_eq!(loaded.chunks(), store.chunks());

        let results = loaded.search(&[3.0, 4.0], 1).unwrap();
        assert_eq!(results[0].chunk.source, "a");
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_load_missing_either_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("global");
        store_with(&[("a", 0, vec![1.0])]).save(&base).unwrap();

        std::fs::remove_file(chunks_file(&base)).unwrap();
        assert!(matches!(
            VectorStore::load(&base),
            Err(RagindexError::MissingArtifact(p)) if p == chunks_file(&base)
        ));

        store_with(&[("a", 0, vec![1.0])]).save(&base).unwrap();
        std::fs::remove_file(index_file(&base)).unwrap();
        assert!(matches!(
            VectorStore::load(&base),
            Err(RagindexError::MissingArtifact(p)) if p == index_file(&base)
        ));
    }

    #[test]
    fn test_load_mismatched_artifacts_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("global");
        store_with(&[("a", 0, vec![1.0]), ("a", 1, vec![2.0])]).save(&base).unwrap();
        std::fs::write(chunks_file(&base), r#"[{"source":"a","position":0,"text":"x"}]"#).unwrap();

        assert!(matches!(
            VectorStore::load(&base),
            Err(RagindexError::CorruptArtifact(_))
        ));
    }

    #[test]
    fn test_load_bad_header_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("global");
        std::fs::write(index_file(&base), b"NOPE").unwrap();
        std::fs::write(chunks_file(&base), "[]").unwrap();
        assert!(matches!(
            VectorStore::load(&base),
            Err(RagindexError::CorruptArtifact(_))
        ));
    }

    fn write_header(base: &Path, dim: u32, count: u64) {
        let mut raw = Vec::new();
        raw.extend_from_slice(MAGIC);
        raw.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        raw.extend_from_slice(&dim.to_le_bytes());
        raw.extend_from_slice(&count.to_le_bytes());
        std::fs::write(index_file(base), raw).unwrap();
        std::fs::write(chunks_file(base), "[]").unwrap();
    }

    #[test]
    fn test_load_oversized_row_count_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("global");
        write_header(&base, 1536, u64::MAX);
        assert!(matches!(
            VectorStore::load(&base),
            Err(RagindexError::CorruptArtifact(_))
        ));
    }

    #[test]
    fn test_load_rows_without_dimension_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("global");
        write_header(&base, 0, 3);
        assert!(matches!(
            VectorStore::load(&base),
            Err(RagindexError::CorruptArtifact(_))
        ));
    }

    #[test]
    fn test_load_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("global");
        VectorStore::new().save(&base).unwrap();
        let loaded = VectorStore::load(&base).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimension(), None);
    }

    #[test]
    fn test_content_hash_survives_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("global");
        let mut store = VectorStore::new();
        store
            .add(
                vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
                vec![
                    Chunk::new("a", 0, "x").with_content_hash("h1"),
                    Chunk::new("a", 1, "y").with_content_hash("h1"),
                    Chunk::new("b", 0, "z"),
                ],
            )
            .unwrap();
        store.save(&base).unwrap();

        let loaded = VectorStore::load(&base).unwrap();
        assert!(loaded.rows_match_hash("a", "h1"));
        assert!(!loaded.rows_match_hash("a", "h2"));
        assert!(!loaded.rows_match_hash("b", "h1"));
        assert!(loaded.rows_match_hash("absent", "anything"));
        assert_eq!(loaded.sources(), vec!["a", "b"]);
    }

    #[test]
    fn test_remove_files() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("global");
        store_with(&[("a", 0, vec![1.0])]).save(&base).unwrap();
        VectorStore::remove_files(&base).unwrap();
        assert!(!VectorStore::exists(&base));
        // second removal is a no-op
        VectorStore::remove_files(&base).unwrap();
    }
}
