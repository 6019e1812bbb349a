mod chunking;
mod corpus;
mod similarity;
mod snippet;
mod tokenize;

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use civic_core::{Citation, KbDocument, KbSearchHit};
use tracing::debug;

pub use chunking::chunk_document;
pub use corpus::{build_document, load_kb_dir, CHUNK_MAX_WORDS};
pub use similarity::{best_embedding_score, cosine_similarity, lexical_overlap};
pub use snippet::{best_snippet, DEFAULT_SNIPPET_WINDOW};
pub use tokenize::tokenize;

pub trait EmbeddingModel: Send + Sync {
    fn model_name(&self) -> &'static str;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// How a document's relevance to a query is scored.
///
/// `Embedding` (the default) takes the best cosine similarity between the
/// query embedding and the document's chunk embeddings. `Lexical` is the
/// fallback: the share of query tokens found in the document title and body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoringStrategy {
    #[default]
    Embedding,
    Lexical,
}

impl ScoringStrategy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "embedding" | "semantic" => Some(Self::Embedding),
            "lexical" | "keyword" => Some(Self::Lexical),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Embedding => "embedding",
            Self::Lexical => "lexical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Documents must score strictly above this.
    pub min_score: f32,
    pub strategy: ScoringStrategy,
    pub snippet_window: usize,
}

impl RetrievalConfig {
    pub const CHAT_TOP_K: usize = 3;
    pub const CHAT_MIN_SCORE: f32 = 0.0;
    pub const STAFF_MIN_SCORE: f32 = 0.3;

    pub fn chat() -> Self {
        Self {
            top_k: Self::CHAT_TOP_K,
            min_score: Self::CHAT_MIN_SCORE,
            strategy: ScoringStrategy::Embedding,
            snippet_window: DEFAULT_SNIPPET_WINDOW,
        }
    }

    /// Staff search pages through every match, so there is no top-k cap.
    pub fn staff() -> Self {
        Self {
            top_k: usize::MAX,
            min_score: Self::STAFF_MIN_SCORE,
            strategy: ScoringStrategy::Embedding,
            snippet_window: DEFAULT_SNIPPET_WINDOW,
        }
    }

    pub fn with_strategy(mut self, strategy: ScoringStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    pub citations: Vec<Citation>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct ScoredDocument<'a> {
    pub score: f32,
    pub doc: &'a KbDocument,
}

/// Chat confidence from the number of citations returned.
pub fn citation_confidence(citations: usize) -> f32 {
    match citations {
        0 => 0.2,
        1 => 0.55,
        _ => 0.75,
    }
}

#[derive(Clone)]
pub struct KnowledgeRetriever {
    embedder: Arc<dyn EmbeddingModel>,
}

impl KnowledgeRetriever {
    pub fn new(embedder: Arc<dyn EmbeddingModel>) -> Self {
        Self { embedder }
    }

    pub fn model_name(&self) -> &'static str {
        self.embedder.model_name()
    }

    pub fn index_document(
        &self,
        id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        source_url: Option<String>,
    ) -> KbDocument {
        build_document(id, title, body, source_url, self.embedder.as_ref())
    }

    /// Documents scoring above `config.min_score`, best first. Equal scores keep
    /// corpus order.
    pub fn rank<'a>(
        &self,
        query: &str,
        docs: &'a [KbDocument],
        config: &RetrievalConfig,
    ) -> Vec<ScoredDocument<'a>> {
        if query.trim().is_empty() {
            return Vec::new();
        }

        let query_embedding = match config.strategy {
            ScoringStrategy::Embedding => Some(self.embedder.embed(query)),
            ScoringStrategy::Lexical => None,
        };

        let mut scored = docs
            .iter()
            .map(|doc| {
                let score = match &query_embedding {
                    Some(embedding) => best_embedding_score(
                        embedding,
                        doc.chunks.iter().map(|chunk| chunk.embedding.as_deref()),
                    ),
                    None => lexical_overlap(query, &format!("{}\n{}", doc.title, doc.body)),
                };
                ScoredDocument { score, doc }
            })
            .filter(|scored| scored.score > config.min_score)
            .collect::<Vec<_>>();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        debug!(
            strategy = ?config.strategy,
            corpus = docs.len(),
            matched = scored.len(),
            "ranked knowledge documents"
        );

        scored
    }

    pub fn retrieve(&self, query: &str, docs: &[KbDocument], config: &RetrievalConfig) -> Retrieval {
        let citations = self
            .rank(query, docs, config)
            .into_iter()
            .take(config.top_k)
            .map(|scored| Citation {
                title: scored.doc.title.clone(),
                snippet: best_snippet(query, &scored.doc.body, config.snippet_window),
                source_link: scored.doc.source_url.clone(),
            })
            .collect::<Vec<_>>();

        let confidence = citation_confidence(citations.len());
        Retrieval {
            citations,
            confidence,
        }
    }

    /// One page (1-based) of ranked hits, each document at most once.
    pub fn search_page(
        &self,
        query: &str,
        docs: &[KbDocument],
        config: &RetrievalConfig,
        page: usize,
        page_size: usize,
    ) -> Vec<KbSearchHit> {
        let query = query.trim();
        let start = page.saturating_sub(1).saturating_mul(page_size);
        let mut seen = HashSet::new();

        self.rank(query, docs, config)
            .into_iter()
            .take(config.top_k)
            .skip(start)
            .take(page_size)
            .filter(|scored| seen.insert(scored.doc.id.clone()))
            .map(|scored| KbSearchHit {
                doc_id: scored.doc.id.clone(),
                title: scored.doc.title.clone(),
                snippet: best_snippet(query, &scored.doc.body, config.snippet_window),
                score: scored.score,
                source_url: scored.doc.source_url.clone(),
            })
            .collect()
    }
}
