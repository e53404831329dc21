//! Named-entity extraction over batches of texts.
//!
//! A pretrained [`TokenClassifier`] finds labelled spans in a single text;
//! [`EntityExtractor`] fans a batch of texts out over blocking workers,
//! drops excluded labels and returns one entity list per input, in order.

mod bert;
mod extractor;
mod traits;
mod types;

pub use bert::{BertTokenClassifier, MIN_WINDOW_TOKENS};
pub use extractor::{DEFAULT_EXCLUDE_LABELS, EntityExtractor};
pub use traits::TokenClassifier;
pub use types::{Entity, RawSpan};
