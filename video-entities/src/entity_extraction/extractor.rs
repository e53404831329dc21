//! Batch entity extraction over a pool of blocking workers.

use super::{BertTokenClassifier, Entity, TokenClassifier};
use crate::config::DataScriptsConfig;
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Labels dropped unless configured otherwise: numbers, money and time expressions.
pub const DEFAULT_EXCLUDE_LABELS: &[&str] = &["CARDINAL", "MONEY", "DATE", "TIME"];

const DEFAULT_WORKERS: usize = 4;

/// Extracts entities from batches of texts.
///
/// Cloning is cheap; clones share the underlying model.
#[derive(Debug, Clone)]
pub struct EntityExtractor {
    classifier: Arc<dyn TokenClassifier>,
    exclude_labels: Arc<HashSet<String>>,
    workers: usize,
}

impl EntityExtractor {
    /// Create an extractor over `classifier` with the default label exclusions.
    pub fn new(classifier: Arc<dyn TokenClassifier>) -> Self {
        Self {
            classifier,
            exclude_labels: Arc::new(DEFAULT_EXCLUDE_LABELS.iter().map(|l| l.to_string()).collect()),
            workers: DEFAULT_WORKERS,
        }
    }

    /// Load the pretrained model named by `config` and apply its tunables.
    pub fn from_config(config: &DataScriptsConfig) -> Result<Self> {
        let classifier = BertTokenClassifier::load(&config.model_path, config.max_tokens)?;
        Ok(Self::new(Arc::new(classifier))
            .with_exclude_labels(config.exclude_labels.iter().cloned())
            .with_workers(config.workers))
    }

    /// Replace the set of labels dropped from results.
    pub fn with_exclude_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_labels = Arc::new(labels.into_iter().map(Into::into).collect());
        self
    }

    /// Set the number of blocking workers. Zero is treated as one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Extract entities from the text `text` selects out of each item.
    ///
    /// Returns one list per item, in item order. Items without text get an
    /// empty list.
    pub async fn extract_batch<T, F>(&self, items: &[T], text: F) -> Result<Vec<Vec<Entity>>>
    where
        F: Fn(&T) -> Option<&str>,
    {
        let texts = items
            .iter()
            .map(|item| text(item).unwrap_or_default().to_string())
            .collect();
        self.extract_texts(texts).await
    }

    /// Extract entities from each text, preserving order.
    pub async fn extract_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<Entity>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let total = texts.len();
        let chunk_size = total.div_ceil(self.workers);
        debug!(
            texts = total,
            workers = self.workers,
            classifier = self.classifier.name(),
            "extracting entities"
        );

        let tasks = texts.chunks(chunk_size).map(|chunk| {
            let chunk = chunk.to_vec();
            let extractor = self.clone();
            tokio::task::spawn_blocking(move || {
                chunk
                    .iter()
                    .map(|text| extractor.extract_one(text))
                    .collect::<Result<Vec<_>>>()
            })
        });

        let chunks = futures::future::try_join_all(tasks)
            .await
            .map_err(|e| Error::Extraction(format!("extraction worker failed: {}", e)))?;

        let mut results = Vec::with_capacity(total);
        for chunk in chunks {
            results.extend(chunk?);
        }
        Ok(results)
    }

    fn extract_one(&self, text: &str) -> Result<Vec<Entity>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let spans = self.classifier.classify(text)?;
        Ok(spans
            .into_iter()
            .filter(|span| !self.exclude_labels.contains(&span.label))
            .map(Entity::from)
            .collect())
    }
}
