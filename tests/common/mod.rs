//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use quarry::embedding::{EmbeddingError, EmbeddingProvider};
use quarry::llm::{LanguageModel, LlmError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const HASH_DIM: usize = 32;

/// Bag-of-words embedding: each word increments one hashed bucket.
/// Texts sharing vocabulary end up close in cosine space.
pub struct HashBagEmbedder;

impl EmbeddingProvider for HashBagEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut v = vec![0.0; HASH_DIM];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = blake3::hash(word.to_lowercase().as_bytes());
            let bucket = hash.as_bytes()[0] as usize % (HASH_DIM - 1);
            v[bucket] += 1.0;
        }
        // keep every vector non-zero
        v[HASH_DIM - 1] = 0.05;
        Ok(v)
    }

    fn dimension(&self) -> usize {
        HASH_DIM
    }

    fn model_name(&self) -> &str {
        "hash-bag"
    }
}

pub struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::GenerationError("model unavailable".to_string()))
    }

    fn dimension(&self) -> usize {
        HASH_DIM
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

/// Blocks longer than any timeout used in tests
pub struct SlowEmbedder(pub Duration);

impl EmbeddingProvider for SlowEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        std::thread::sleep(self.0);
        HashBagEmbedder.embed(text)
    }

    fn dimension(&self) -> usize {
        HASH_DIM
    }

    fn model_name(&self) -> &str {
        "slow"
    }
}

/// Language model that replays canned responses.
///
/// Once a single response remains it is returned for every further call.
pub struct ScriptedModel {
    responses: Mutex<Vec<Result<String, LlmError>>>,
    pub prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            responses.remove(0)
        } else {
            responses[0].clone()
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
