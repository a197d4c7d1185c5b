//! In-process collaborators for tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::cache::SourceContent;
use crate::embeddings::Embedder;
use crate::error::{RagindexError, Result};
use crate::ingest::{Chunker, Extractor};
use crate::rerank::{finalize, RerankedCandidate, Reranker};

/// Reads content as UTF-8; keys in `failing` raise an extraction error
#[derive(Default)]
pub struct FakeExtractor {
    failing: HashSet<String>,
    pub calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn failing_on(keys: &[&str]) -> Self {
        Self {
            failing: keys.iter().map(|k| k.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl Extractor for FakeExtractor {
    fn extract(&self, key: &str, content: &SourceContent) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(key) {
            return Err(RagindexError::Extraction {
                key: key.to_string(),
                reason: "unreadable".to_string(),
            });
        }
        let bytes = content.read()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// One chunk per non-empty line
pub struct LineChunker;

impl Chunker for LineChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Deterministic embedder.
///
/// Texts registered with [`FakeEmbedder::with_vector`] get that vector;
/// anything else gets a bag-of-bytes vector. Texts containing `"!fail"`
/// make the whole call fail. A delay applies to every call, or only to calls
/// with a text containing the marker given to [`FakeEmbedder::with_delay_for`].
pub struct FakeEmbedder {
    dimension: usize,
    fixed: HashMap<String, Vec<f32>>,
    delay: Option<Duration>,
    slow_marker: Option<String>,
    pub calls: AtomicUsize,
    pub embedded: Mutex<Vec<String>>,
}

impl FakeEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fixed: HashMap::new(),
            delay: None,
            slow_marker: None,
            calls: AtomicUsize::new(0),
            embedded: Mutex::new(Vec::new()),
        }
    }

    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.fixed.insert(text.to_string(), vector);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_delay_for(mut self, marker: &str, delay: Duration) -> Self {
        self.delay = Some(delay);
        self.slow_marker = Some(marker.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.fixed.get(text) {
            return v.clone();
        }
        let mut v = vec![0.0; self.dimension];
        v[0] = 1.0;
        for (i, b) in text.bytes().enumerate() {
            v[(b as usize + i) % self.dimension] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            let slow = match &self.slow_marker {
                Some(marker) => texts.iter().any(|t| t.contains(marker.as_str())),
                None => true,
            };
            if slow {
                tokio::time::sleep(delay).await;
            }
        }
        if texts.iter().any(|t| t.contains("!fail")) {
            return Err(RagindexError::Embedding("refused".to_string()));
        }
        self.embedded
            .lock()
            .unwrap()
            .extend(texts.iter().cloned());
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn model_name(&self) -> &str {
        "fake"
    }
}

/// Scores candidates by whether they contain `needle`, preferring later
/// candidates on ties
pub struct FakeReranker {
    pub needle: String,
}

#[async_trait]
impl Reranker for FakeReranker {
    async fn rerank(
        &self,
        _query: &str,
        candidates: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankedCandidate>> {
        let scored = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let hit = if c.contains(&self.needle) { 1.0 } else { 0.0 };
                (i, hit + i as f32 * 0.001)
            })
            .collect();
        Ok(finalize(scored, candidates, top_n))
    }

    fn model_name(&self) -> &str {
        "fake-rerank"
    }
}
