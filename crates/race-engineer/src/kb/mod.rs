//! Retrieval-augmented knowledge base.
//!
//! Markdown notes under the knowledge base directory are split into chunks,
//! embedded, and stored in `SQLite`. Questions are answered by retrieving the
//! most similar chunks and handing them to the chat model as context.
//!
//! Embeddings are only recomputed when the documents, the embedding model or
//! the chunking parameters change; a blake3 fingerprint over all of them is
//! kept next to the chunks.

mod documents;
mod splitter;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::KnowledgeBaseConfig;
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, ChatModel, Embedder};
use crate::storage::{Storage, StoredChunk};

pub use documents::{load_documents, Document};
pub use splitter::TextSplitter;

/// Texts sent to the embedder per request.
const EMBED_BATCH: usize = 32;

/// A retrieved chunk and its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    /// Source document.
    pub source: String,
    /// Chunk text.
    pub content: String,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// Knowledge base state as seen on disk and in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KbStatus {
    /// Documents found under the knowledge base directory.
    pub documents: usize,
    /// Chunks currently stored.
    pub stored_chunks: usize,
    /// Whether the stored chunks were built from the current documents.
    pub up_to_date: bool,
}

/// An indexed knowledge base ready for retrieval.
pub struct KnowledgeBase {
    chunks: Vec<StoredChunk>,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    top_k: usize,
}

impl KnowledgeBase {
    /// Load the documents and build (or reuse) the index.
    ///
    /// Returns `None` when there is nothing to index. With `force`, chunks
    /// are re-embedded even if the fingerprint matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the documents cannot be listed, embedding fails,
    /// or storage fails.
    pub async fn build(
        config: &KnowledgeBaseConfig,
        storage: &Storage,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        force: bool,
    ) -> Result<Option<Self>> {
        let documents = load_documents(&config.dir, &config.glob)?;
        if documents.is_empty() {
            info!("Knowledge base is empty ({})", config.dir.display());
            return Ok(None);
        }

        let fp = fingerprint(&documents, embedder.model(), config);
        if !force && storage.kb_fingerprint()?.as_deref() == Some(fp.as_str()) {
            let chunks = storage.load_kb_chunks()?;
            if !chunks.is_empty() {
                debug!("Reusing {} stored knowledge base chunks", chunks.len());
                return Ok(Some(Self::from_chunks(chunks, embedder, chat, config.top_k)));
            }
        }

        let splitter = TextSplitter::new(config.chunk_size, config.chunk_overlap)?;
        let pieces: Vec<(String, usize, String)> = documents
            .iter()
            .flat_map(|doc| {
                splitter
                    .split(&doc.content)
                    .into_iter()
                    .enumerate()
                    .map(|(i, text)| (doc.source.clone(), i, text))
            })
            .collect();
        if pieces.is_empty() {
            info!("Knowledge base documents contain no text");
            return Ok(None);
        }

        info!(
            "Embedding {} chunks from {} documents with {}",
            pieces.len(),
            documents.len(),
            embedder.model()
        );
        let mut chunks = Vec::with_capacity(pieces.len());
        for batch in pieces.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|(_, _, t)| t.clone()).collect();
            let vectors = embedder.embed(&texts).await?;
            if vectors.len() != texts.len() {
                return Err(Error::knowledge_base(format!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    texts.len()
                )));
            }
            for ((source, index, content), embedding) in batch.iter().cloned().zip(vectors) {
                chunks.push(StoredChunk {
                    source,
                    chunk_index: index,
                    content,
                    embedding,
                });
            }
        }
        storage.replace_kb_chunks(&fp, &chunks)?;

        Ok(Some(Self::from_chunks(chunks, embedder, chat, config.top_k)))
    }

    /// Knowledge base built from already embedded chunks.
    #[must_use]
    pub fn from_chunks(
        chunks: Vec<StoredChunk>,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        top_k: usize,
    ) -> Self {
        Self {
            chunks,
            embedder,
            chat,
            top_k,
        }
    }

    /// Report whether the stored index matches the documents on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the documents cannot be listed or storage fails.
    pub fn status(
        config: &KnowledgeBaseConfig,
        storage: &Storage,
        embedding_model: &str,
    ) -> Result<KbStatus> {
        let documents = load_documents(&config.dir, &config.glob)?;
        let stored_chunks = usize::try_from(storage.stats()?.kb_chunks).unwrap_or(0);
        let up_to_date = !documents.is_empty()
            && storage.kb_fingerprint()?.as_deref()
                == Some(fingerprint(&documents, embedding_model, config).as_str());
        Ok(KbStatus {
            documents: documents.len(),
            stored_chunks,
            up_to_date,
        })
    }

    /// Number of indexed chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// The `k` chunks most similar to `query`, best first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query cannot be embedded.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if self.chunks.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::knowledge_base("no embedding returned for query"))?;

        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine_similarity(&query_embedding, &c.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                source: self.chunks[i].source.clone(),
                content: self.chunks[i].content.clone(),
                score,
            })
            .collect())
    }

    /// Answer `question` from the retrieved context.
    ///
    /// # Errors
    ///
    /// Returns an error if retrieval or the chat model fails.
    pub async fn ask(&self, question: &str) -> Result<String> {
        let context = self.retrieve(question, self.top_k).await?;
        let prompt = qa_prompt(&context, question);
        let answer = self.chat.complete(&[ChatMessage::user(prompt)], &[]).await?;
        Ok(answer.trim().to_string())
    }
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("chunks", &self.chunks.len())
            .field("embedding_model", &self.embedder.model())
            .field("top_k", &self.top_k)
            .finish()
    }
}

/// Fingerprint of the documents and indexing parameters.
#[must_use]
pub fn fingerprint(documents: &[Document], embedding_model: &str, config: &KnowledgeBaseConfig) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(embedding_model.as_bytes());
    hasher.update(&(config.chunk_size as u64).to_le_bytes());
    hasher.update(&(config.chunk_overlap as u64).to_le_bytes());
    for doc in documents {
        hasher.update(doc.source.as_bytes());
        hasher.update(&[0]);
        hasher.update(doc.content.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

fn qa_prompt(context: &[ScoredChunk], question: &str) -> String {
    let context = context
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Use the following pieces of context to answer the question at the end. \
         If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n\
         {context}\n\nQuestion: {question}\nHelpful Answer:"
    )
}

/// Cosine similarity; 0 for empty, mismatched or zero vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
