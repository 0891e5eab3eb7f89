//! Grounded question answering over the index.
//!
//! One exchange emits, in order: typing on, the ranked sources, zero or more
//! partial answer fragments, the full accumulated answer with
//! `is_complete: true`, typing off. Retrieval failures degrade to empty
//! sources, generation failures surface as a complete answer explaining
//! what went wrong, and the typing indicator always turns off.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use docrag_shared::{ChatEvent, DocRagError, LlmConfig, Result, SourcePassage};

use crate::retrieval::HybridRetriever;

/// Sources retrieved per question.
const TOP_K: usize = 4;

/// Incremental answer text.
pub type AnswerStream = BoxStream<'static, Result<String>>;

/// Turns a question plus retrieved passages into answer text.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, question: &str, sources: &[SourcePassage]) -> Result<AnswerStream>;
}

/// Ordered events of one chat exchange.
pub struct ChatStream {
    rx: mpsc::Receiver<ChatEvent>,
}

impl ChatStream {
    /// Next event, or `None` once the exchange is finished.
    pub async fn next(&mut self) -> Option<ChatEvent> {
        self.rx.recv().await
    }

    /// Drain the stream, returning every event in order.
    pub async fn collect(mut self) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

/// Run one chat exchange in the background, yielding events as they happen.
pub fn ask(
    retriever: Arc<HybridRetriever>,
    generator: Arc<dyn AnswerGenerator>,
    question: String,
) -> ChatStream {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let _ = tx.send(ChatEvent::Typing { is_typing: true }).await;
        run_exchange(&retriever, generator.as_ref(), &question, &tx).await;
        let _ = tx.send(ChatEvent::Typing { is_typing: false }).await;
    });

    ChatStream { rx }
}

async fn run_exchange(
    retriever: &HybridRetriever,
    generator: &dyn AnswerGenerator,
    question: &str,
    tx: &mpsc::Sender<ChatEvent>,
) {
    // Retrieval trouble degrades to an answer without sources, not a crash.
    let sources = match retriever.search(question, TOP_K).await {
        Ok(sources) => sources,
        Err(err) => {
            warn!(error = %err, "retrieval failed, answering without sources");
            Vec::new()
        }
    };

    let _ = tx
        .send(ChatEvent::Sources {
            sources: sources.clone(),
        })
        .await;

    if sources.is_empty() {
        let _ = tx
            .send(ChatEvent::Answer {
                text: "No indexed documentation matches that question. \
                       Add a site first, or try different wording."
                    .to_string(),
                is_complete: true,
            })
            .await;
        return;
    }

    let mut answer_stream = match generator.generate(question, &sources).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "answer generation failed");
            let _ = tx
                .send(ChatEvent::Answer {
                    text: format!("Answer generation failed: {err}"),
                    is_complete: true,
                })
                .await;
            return;
        }
    };

    let mut full = String::new();
    while let Some(fragment) = answer_stream.next().await {
        match fragment {
            Ok(text) => {
                full.push_str(&text);
                let _ = tx
                    .send(ChatEvent::Answer {
                        text,
                        is_complete: false,
                    })
                    .await;
            }
            Err(err) => {
                warn!(error = %err, "answer stream broke mid-generation");
                full.push_str(&format!("\n\n(answer interrupted: {err})"));
                break;
            }
        }
    }

    let _ = tx
        .send(ChatEvent::Answer {
            text: full,
            is_complete: true,
        })
        .await;
}

// ---------------------------------------------------------------------------
// HTTP generator (OpenAI-compatible chat completions)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

/// Answer synthesis via an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpGenerator {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(
            &config.endpoint,
            &config.model,
            std::env::var(&config.api_key_env).ok(),
        )
    }

    pub fn new(endpoint: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl AnswerGenerator for HttpGenerator {
    async fn generate(&self, question: &str, sources: &[SourcePassage]) -> Result<AnswerStream> {
        let context = sources
            .iter()
            .map(|s| format!("## {} ({})\n{}", s.title, s.url, s.preview))
            .collect::<Vec<_>>()
            .join("\n\n");

        let body = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You answer questions about software documentation. \
                                Use only the provided context. If the context does not \
                                contain the answer, say so. Cite source URLs."
                },
                {
                    "role": "user",
                    "content": format!("Context:\n\n{context}\n\nQuestion: {question}")
                }
            ],
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DocRagError::embedding_transient(format!("llm request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DocRagError::embedding_exhausted(format!(
                "llm returned {status}: {message}"
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| DocRagError::embedding_exhausted(format!("malformed llm reply: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| DocRagError::embedding_exhausted("llm reply had no choices"))?;

        debug!(answer_len = content.len(), "llm answer received");
        Ok(stream::once(async move { Ok(content) }).boxed())
    }
}

// ---------------------------------------------------------------------------
// Offline extractive generator
// ---------------------------------------------------------------------------

/// Keyless fallback: stitches an answer out of the retrieved passages, one
/// fragment per source so callers still see incremental output.
pub struct ExtractiveGenerator;

#[async_trait]
impl AnswerGenerator for ExtractiveGenerator {
    async fn generate(&self, _question: &str, sources: &[SourcePassage]) -> Result<AnswerStream> {
        let mut fragments = vec![Ok(
            "From the indexed documentation:\n\n".to_string()
        )];
        fragments.extend(sources.iter().map(|s| {
            Ok(format!("- **{}** — {}\n  ({})\n", s.title, s.preview, s.url))
        }));
        Ok(stream::iter(fragments).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrag_embedder::{Embedder, HashEmbedder};
    use docrag_shared::{Chunk, ChunkId, Site};
    use docrag_storage::Storage;
    use uuid::Uuid;

    async fn seeded_retriever(tag: &str) -> (Arc<HybridRetriever>, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("docrag-chat-{tag}-{}", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&dir.join("test.db")).await.unwrap());
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));

        let site = Site::new("https://docs.example.com", "docs");
        storage.insert_site(&site).await.unwrap();
        let chunk = Chunk {
            id: ChunkId::new(),
            site_id: site.id,
            source_url: "https://docs.example.com/install".into(),
            title: "Installation".into(),
            position: 0,
            text: "Install the tool with the package manager.".into(),
        };
        let embeddings = embedder.embed(&[chunk.text.clone()]).await.unwrap();
        storage.upsert_chunks(&[chunk], &embeddings).await.unwrap();

        (
            Arc::new(HybridRetriever::new(storage, embedder)),
            dir,
        )
    }

    #[tokio::test]
    async fn exchange_emits_events_in_order() {
        let (retriever, dir) = seeded_retriever("order").await;
        let events = ask(
            retriever,
            Arc::new(ExtractiveGenerator),
            "how do I install".into(),
        )
        .collect()
        .await;

        assert!(matches!(events[0], ChatEvent::Typing { is_typing: true }));
        assert!(matches!(events[1], ChatEvent::Sources { .. }));
        assert!(matches!(
            events.last(),
            Some(ChatEvent::Typing { is_typing: false })
        ));

        // Partial fragments precede exactly one complete answer.
        let answers: Vec<&ChatEvent> = events
            .iter()
            .filter(|e| matches!(e, ChatEvent::Answer { .. }))
            .collect();
        assert!(answers.len() >= 2);
        let complete: Vec<bool> = answers
            .iter()
            .map(|e| matches!(e, ChatEvent::Answer { is_complete: true, .. }))
            .collect();
        assert_eq!(complete.iter().filter(|c| **c).count(), 1);
        assert!(complete.last().copied().unwrap());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn final_answer_accumulates_fragments() {
        let (retriever, dir) = seeded_retriever("accumulate").await;
        let events = ask(
            retriever,
            Arc::new(ExtractiveGenerator),
            "install".into(),
        )
        .collect()
        .await;

        let mut partial = String::new();
        let mut final_text = String::new();
        for event in &events {
            if let ChatEvent::Answer { text, is_complete } = event {
                if *is_complete {
                    final_text = text.clone();
                } else {
                    partial.push_str(text);
                }
            }
        }
        assert_eq!(partial, final_text);
        assert!(final_text.contains("Installation"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn empty_index_answers_gracefully() {
        let dir = std::env::temp_dir().join(format!("docrag-chat-empty-{}", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&dir.join("test.db")).await.unwrap());
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
        let retriever = Arc::new(HybridRetriever::new(storage, embedder));

        let events = ask(retriever, Arc::new(ExtractiveGenerator), "anything".into())
            .collect()
            .await;

        let ChatEvent::Sources { sources } = &events[1] else {
            panic!("expected Sources");
        };
        assert!(sources.is_empty());
        assert!(events.iter().any(|e| matches!(
            e,
            ChatEvent::Answer { is_complete: true, .. }
        )));
        assert!(matches!(
            events.last(),
            Some(ChatEvent::Typing { is_typing: false })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
