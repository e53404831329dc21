//! Traits for entity extraction functionality.

use super::RawSpan;
use crate::Result;

/// A pretrained model labelling spans of a single text.
///
/// Implementations are CPU or GPU bound and are called from blocking worker
/// threads, possibly concurrently.
pub trait TokenClassifier: Send + Sync + std::fmt::Debug {
    /// Find the labelled spans in `text`, in order of appearance.
    fn classify(&self, text: &str) -> Result<Vec<RawSpan>>;

    /// Get the name of this classifier for identification purposes.
    fn name(&self) -> &str;
}
