//! Retrieval collaborator consumed by the agent loop. Ranking and storage live
//! behind [`KnowledgeBase`]; [`InMemoryKnowledgeBase`] scores by keyword overlap
//! and serves tests and local demos.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

const SNIPPET_CHARS: usize = 240;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub title: String,
    pub url: Option<String>,
    pub source: String,
    pub snippet: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub items: Vec<SearchHit>,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenedChunk {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
    pub source: String,
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenResponse {
    pub items: Vec<OpenedChunk>,
}

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("knowledge base unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn search(
        &self,
        project_key: &str,
        query: &str,
        top_k: usize,
    ) -> Result<SearchResponse, KnowledgeError>;

    /// Unknown ids are skipped rather than reported.
    async fn open(
        &self,
        project_key: &str,
        ids: &[String],
        max_chars_per_chunk: usize,
    ) -> Result<OpenResponse, KnowledgeError>;
}

#[derive(Default)]
pub struct InMemoryKnowledgeBase {
    chunks: RwLock<HashMap<String, Vec<OpenedChunk>>>,
}

impl InMemoryKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, project_key: impl Into<String>, chunk: OpenedChunk) {
        let mut guard = self.chunks.write().await;
        let chunks = guard.entry(project_key.into()).or_default();
        chunks.retain(|existing| existing.id != chunk.id);
        chunks.push(chunk);
    }
}

fn terms(text: &str) -> BTreeSet<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|term| term.chars().count() > 1)
        .map(str::to_lowercase)
        .collect()
}

fn clip(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledgeBase {
    async fn search(
        &self,
        project_key: &str,
        query: &str,
        top_k: usize,
    ) -> Result<SearchResponse, KnowledgeError> {
        let wanted = terms(query);
        let guard = self.chunks.read().await;
        let mut items: Vec<SearchHit> = guard
            .get(project_key)
            .map(|chunks| chunks.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|chunk| {
                if wanted.is_empty() {
                    return None;
                }
                let haystack = terms(&format!("{} {}", chunk.title, chunk.text));
                let matched = wanted.intersection(&haystack).count();
                (matched > 0).then(|| SearchHit {
                    id: chunk.id.clone(),
                    score: matched as f32 / wanted.len() as f32,
                    title: chunk.title.clone(),
                    url: chunk.url.clone(),
                    source: chunk.source.clone(),
                    snippet: clip(&chunk.text, SNIPPET_CHARS),
                })
            })
            .collect();

        items.sort_by(|left, right| {
            right.score.total_cmp(&left.score).then_with(|| left.id.cmp(&right.id))
        });
        items.truncate(top_k);

        Ok(SearchResponse { query: query.to_string(), count: items.len(), items })
    }

    async fn open(
        &self,
        project_key: &str,
        ids: &[String],
        max_chars_per_chunk: usize,
    ) -> Result<OpenResponse, KnowledgeError> {
        let guard = self.chunks.read().await;
        let Some(chunks) = guard.get(project_key) else {
            return Ok(OpenResponse::default());
        };
        let items = ids
            .iter()
            .filter_map(|id| chunks.iter().find(|chunk| &chunk.id == id))
            .map(|chunk| OpenedChunk {
                text: clip(&chunk.text, max_chars_per_chunk),
                ..chunk.clone()
            })
            .collect();
        Ok(OpenResponse { items })
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryKnowledgeBase, KnowledgeBase, OpenedChunk};

    fn chunk(id: &str, title: &str, text: &str) -> OpenedChunk {
        OpenedChunk {
            id: id.to_string(),
            title: title.to_string(),
            url: None,
            source: "docs".to_string(),
            text: text.to_string(),
        }
    }

    async fn seeded() -> InMemoryKnowledgeBase {
        let kb = InMemoryKnowledgeBase::new();
        kb.insert("acme", chunk("c1", "Deploy guide", "Run the deploy script from main.")).await;
        kb.insert("acme", chunk("c2", "Rollback", "Rollback uses the previous deploy tag.")).await;
        kb.insert("acme", chunk("c3", "Holidays", "Office closes in December.")).await;
        kb.insert("other", chunk("o1", "Deploy", "Different project.")).await;
        kb
    }

    #[tokio::test]
    async fn search_ranks_by_overlap_within_project() {
        let kb = seeded().await;
        let response = kb.search("acme", "how do I deploy from main?", 5).await.expect("search");

        let ids: Vec<&str> = response.items.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(response.count, 2);
        assert!(response.items[0].score > response.items[1].score);
    }

    #[tokio::test]
    async fn open_clips_text_and_skips_unknown_ids() {
        let kb = seeded().await;
        let response = kb
            .open("acme", &["c2".to_string(), "missing".to_string()], 8)
            .await
            .expect("open");

        assert_eq!(response.items.len(), 1);
        assert_eq!(response.items[0].text, "Rollback");
    }
}
