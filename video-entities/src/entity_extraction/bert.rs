//! BERT token-classification model run through candle.
//!
//! Loads a Hugging Face style model directory: `config.json` (including
//! `id2label`), `tokenizer.json` and `model.safetensors`. Token predictions are
//! merged into spans with BIO tags, using character offsets.
//!
//! Texts longer than the model window are encoded as overlapping windows. Each
//! character range is tagged once, by the first window that covers it.

use super::{RawSpan, TokenClassifier};
use crate::{Error, Result};
use candle_core::{D, DType, Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use serde_json::Value;
use std::path::Path;
use tokenizers::{Encoding, Tokenizer, TruncationParams};
use tracing::{debug, info};

/// Upper bound on the tokens shared by consecutive windows.
const MAX_WINDOW_STRIDE: usize = 64;

/// Smallest usable window, leaving room for special tokens and the stride.
pub const MIN_WINDOW_TOKENS: usize = 8;

/// Pretrained BERT named-entity model.
pub struct BertTokenClassifier {
    model: BertModel,
    classifier: Linear,
    tokenizer: Tokenizer,
    id2label: Vec<String>,
    device: Device,
    name: String,
}

impl std::fmt::Debug for BertTokenClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BertTokenClassifier")
            .field("name", &self.name)
            .field("labels", &self.id2label)
            .field("device", &self.device)
            .finish()
    }
}

/// Get available device
fn get_device() -> Result<Device> {
    if candle_core::utils::cuda_is_available() {
        Ok(Device::new_cuda(0)?)
    } else if candle_core::utils::metal_is_available() {
        Ok(Device::new_metal(0)?)
    } else {
        Ok(Device::Cpu)
    }
}

impl BertTokenClassifier {
    /// Load the model from `model_dir`, splitting inputs into windows of `max_tokens`.
    pub fn load(model_dir: &Path, max_tokens: usize) -> Result<Self> {
        if max_tokens < MIN_WINDOW_TOKENS {
            return Err(Error::Extraction(format!(
                "max_tokens must be at least {}, got {}",
                MIN_WINDOW_TOKENS, max_tokens
            )));
        }

        let config_path = model_dir.join("config.json");
        let raw_config = std::fs::read_to_string(&config_path).map_err(|e| {
            Error::Extraction(format!("Failed to read {}: {}", config_path.display(), e))
        })?;
        let config_json: Value = serde_json::from_str(&raw_config)?;
        let config: BertConfig = serde_json::from_value(config_json.clone())?;
        let id2label = parse_id2label(&config_json)?;
        let hidden_size = config_json["hidden_size"]
            .as_u64()
            .ok_or_else(|| Error::Extraction("config.json has no hidden_size".to_string()))?
            as usize;

        let device = get_device()?;
        info!(model = %model_dir.display(), labels = id2label.len(), device = ?device, "loading NER model");

        let weights_path = model_dir.join("model.safetensors");
        let tensors = candle_core::safetensors::load(&weights_path, &device)?;
        // token classification checkpoints nest the encoder under `bert.`
        let nested = tensors.keys().any(|k| k.starts_with("bert."));
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);

        let model = if nested {
            BertModel::load(vb.pp("bert"), &config)?
        } else {
            BertModel::load(vb.clone(), &config)?
        };
        let classifier = candle_nn::linear(hidden_size, id2label.len(), vb.pp("classifier"))?;

        let tokenizer_path = model_dir.join("tokenizer.json");
        let mut tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            Error::Extraction(format!("Failed to load tokenizer {}: {}", tokenizer_path.display(), e))
        })?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_tokens,
                stride: window_stride(max_tokens),
                ..Default::default()
            }))
            .map_err(|e| Error::Extraction(format!("Invalid truncation settings: {}", e)))?;
        tokenizer.with_padding(None);

        Ok(Self {
            model,
            classifier,
            tokenizer,
            id2label,
            device,
            name: format!("bert:{}", model_dir.display()),
        })
    }

    fn label(&self, id: u32) -> &str {
        self.id2label
            .get(id as usize)
            .map(String::as_str)
            .unwrap_or("O")
    }

    /// Predicted label id for every token of one window.
    fn predict(&self, window: &Encoding) -> Result<Vec<u32>> {
        let input_ids = Tensor::new(window.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(window.get_type_ids(), &self.device)?.unsqueeze(0)?;
        let attention_mask = Tensor::new(window.get_attention_mask(), &self.device)?.unsqueeze(0)?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        Ok(self
            .classifier
            .forward(&hidden)?
            .squeeze(0)?
            .argmax(D::Minus1)?
            .to_vec1::<u32>()?)
    }
}

impl TokenClassifier for BertTokenClassifier {
    fn classify(&self, text: &str) -> Result<Vec<RawSpan>> {
        let encoding = self
            .tokenizer
            .encode_char_offsets(text, true)
            .map_err(|e| Error::Extraction(format!("Failed to encode text: {}", e)))?;

        let windows: Vec<&Encoding> = std::iter::once(&encoding)
            .chain(encoding.get_overflowing())
            .filter(|window| !window.get_ids().is_empty())
            .collect();
        if windows.len() > 1 {
            debug!(windows = windows.len(), chars = text.chars().count(), "classifying long text");
        }

        let mut tags: Vec<TokenTag<'_>> = Vec::new();
        for window in windows {
            let predictions = self.predict(window)?;
            let window_tags = predictions
                .iter()
                .zip(window.get_offsets())
                .zip(window.get_special_tokens_mask())
                .zip(window.get_word_ids())
                .filter(|(((_, (start, end)), special), _)| **special == 0 && start < end)
                .map(|(((id, (start, end)), _), word)| TokenTag {
                    label: self.label(*id),
                    start: *start,
                    end: *end,
                    word: *word,
                });
            merge_window(&mut tags, window_tags);
        }

        Ok(decode_bio(text, &tags))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Tokens shared by consecutive windows, kept well below the window size.
fn window_stride(max_tokens: usize) -> usize {
    (max_tokens / 8).min(MAX_WINDOW_STRIDE)
}

/// Append a window's tags, skipping tokens an earlier window already tagged.
fn merge_window<'a>(tags: &mut Vec<TokenTag<'a>>, window: impl Iterator<Item = TokenTag<'a>>) {
    let mut covered = tags.last().map_or(0, |tag| tag.end);
    for tag in window {
        if tag.start < covered {
            continue;
        }
        covered = tag.end;
        tags.push(tag);
    }
}

/// Read `id2label` from a model config into an index-addressed list.
pub(crate) fn parse_id2label(config: &Value) -> Result<Vec<String>> {
    let map = config["id2label"]
        .as_object()
        .ok_or_else(|| Error::Extraction("config.json has no id2label map".to_string()))?;

    let mut labels = vec!["O".to_string(); map.len()];
    for (id, label) in map {
        let id: usize = id
            .parse()
            .map_err(|_| Error::Extraction(format!("Invalid label id '{}'", id)))?;
        let label = label
            .as_str()
            .ok_or_else(|| Error::Extraction(format!("Label {} is not a string", id)))?;
        if id >= labels.len() {
            labels.resize(id + 1, "O".to_string());
        }
        labels[id] = label.to_string();
    }
    Ok(labels)
}

/// One predicted token with its character span.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TokenTag<'a> {
    pub label: &'a str,
    pub start: usize,
    pub end: usize,
    pub word: Option<u32>,
}

/// Split `B-PER` into (`Some('B')`, `PER`); plain labels have no prefix.
fn split_tag(tag: &str) -> (Option<char>, &str) {
    match tag.split_once('-') {
        Some((prefix, entity)) if prefix == "B" || prefix == "I" => {
            (prefix.chars().next(), entity)
        }
        _ => (None, tag),
    }
}

/// Merge tagged tokens into entity spans.
///
/// A token continues the open span when it has the same entity label and is
/// either part of the same word or not tagged `B-`.
pub(crate) fn decode_bio(text: &str, tags: &[TokenTag<'_>]) -> Vec<RawSpan> {
    struct Open<'a> {
        label: &'a str,
        start: usize,
        end: usize,
        word: Option<u32>,
    }

    let chars: Vec<char> = text.chars().collect();
    let close = |open: Open<'_>, spans: &mut Vec<RawSpan>| {
        let end = open.end.min(chars.len());
        let start = open.start.min(end);
        let span_text: String = chars[start..end].iter().collect();
        spans.push(RawSpan::new(span_text, open.label, start, end));
    };

    let mut spans = Vec::new();
    let mut current: Option<Open<'_>> = None;

    for tag in tags {
        let (prefix, label) = split_tag(tag.label);
        if label == "O" {
            if let Some(open) = current.take() {
                close(open, &mut spans);
            }
            continue;
        }

        let continues = current.as_ref().is_some_and(|open| {
            let same_word = tag.word.is_some() && open.word == tag.word;
            open.label == label && (same_word || prefix != Some('B'))
        });

        if continues {
            if let Some(open) = current.as_mut() {
                open.end = tag.end;
                open.word = tag.word;
            }
        } else {
            if let Some(open) = current.take() {
                close(open, &mut spans);
            }
            current = Some(Open {
                label,
                start: tag.start,
                end: tag.end,
                word: tag.word,
            });
        }
    }

    if let Some(open) = current.take() {
        close(open, &mut spans);
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tag(label: &str, start: usize, end: usize, word: u32) -> TokenTag<'_> {
        TokenTag {
            label,
            start,
            end,
            word: Some(word),
        }
    }

    #[test]
    fn test_begin_inside_merge_into_one_span() {
        let text = "Barack Obama spoke";
        let tags = vec![
            tag("B-PER", 0, 6, 0),
            tag("I-PER", 7, 12, 1),
            tag("O", 13, 18, 2),
        ];

        let spans = decode_bio(text, &tags);

        assert_eq!(spans, vec![RawSpan::new("Barack Obama", "PER", 0, 12)]);
    }

    #[test]
    fn test_label_change_splits_spans() {
        let text = "Obama Google";
        let tags = vec![tag("B-PER", 0, 5, 0), tag("I-ORG", 6, 12, 1)];

        let spans = decode_bio(text, &tags);

        assert_eq!(
            spans,
            vec![
                RawSpan::new("Obama", "PER", 0, 5),
                RawSpan::new("Google", "ORG", 6, 12),
            ]
        );
    }

    #[test]
    fn test_consecutive_begin_tags_are_separate_entities() {
        let text = "Paris London";
        let tags = vec![tag("B-LOC", 0, 5, 0), tag("B-LOC", 6, 12, 1)];

        let spans = decode_bio(text, &tags);

        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].text, "London");
    }

    #[test]
    fn test_subword_tokens_join_their_word() {
        let text = "Zelenskyy said";
        let tags = vec![
            tag("B-PER", 0, 4, 0),
            tag("B-PER", 4, 7, 0),
            tag("I-PER", 7, 9, 0),
            tag("O", 10, 14, 1),
        ];

        let spans = decode_bio(text, &tags);

        assert_eq!(spans, vec![RawSpan::new("Zelenskyy", "PER", 0, 9)]);
    }

    #[test]
    fn test_offsets_are_characters_not_bytes() {
        let text = "Señor Müller";
        let tags = vec![tag("B-PER", 6, 12, 1)];

        let spans = decode_bio(text, &tags);

        assert_eq!(spans, vec![RawSpan::new("Müller", "PER", 6, 12)]);
    }

    #[test]
    fn test_unprefixed_labels() {
        let text = "Apple Inc makes phones";
        let tags = vec![tag("ORG", 0, 5, 0), tag("ORG", 6, 9, 1), tag("O", 10, 15, 2)];

        let spans = decode_bio(text, &tags);

        assert_eq!(spans, vec![RawSpan::new("Apple Inc", "ORG", 0, 9)]);
    }

    #[test]
    fn test_parse_id2label() {
        let config = json!({ "id2label": { "0": "O", "2": "I-PER", "1": "B-PER" } });

        let labels = parse_id2label(&config).unwrap();

        assert_eq!(labels, vec!["O", "B-PER", "I-PER"]);
    }

    #[test]
    fn test_parse_id2label_requires_map() {
        assert!(parse_id2label(&json!({})).is_err());
        assert!(parse_id2label(&json!({ "id2label": { "x": "O" } })).is_err());
    }

    /// Write a model directory whose every word token is tagged `B-PER`:
    /// no encoder layers, zero embeddings and a classifier bias on label 1.
    fn write_person_model(dir: &Path) {
        let hidden = 4;
        let device = Device::Cpu;

        let config = json!({
            "vocab_size": 4,
            "hidden_size": hidden,
            "num_hidden_layers": 0,
            "num_attention_heads": 1,
            "intermediate_size": hidden,
            "hidden_act": "gelu",
            "hidden_dropout_prob": 0.0,
            "max_position_embeddings": 512,
            "type_vocab_size": 2,
            "initializer_range": 0.02,
            "layer_norm_eps": 1e-12,
            "pad_token_id": 0,
            "id2label": { "0": "O", "1": "B-PER", "2": "I-PER" }
        });
        std::fs::write(dir.join("config.json"), config.to_string()).unwrap();

        let mut tensors = std::collections::HashMap::new();
        let zeros = |rows: usize| Tensor::zeros((rows, hidden), DType::F32, &device).unwrap();
        tensors.insert("bert.embeddings.word_embeddings.weight", zeros(4));
        tensors.insert("bert.embeddings.position_embeddings.weight", zeros(512));
        tensors.insert("bert.embeddings.token_type_embeddings.weight", zeros(2));
        tensors.insert(
            "bert.embeddings.LayerNorm.weight",
            Tensor::ones(hidden, DType::F32, &device).unwrap(),
        );
        tensors.insert(
            "bert.embeddings.LayerNorm.bias",
            Tensor::zeros(hidden, DType::F32, &device).unwrap(),
        );
        tensors.insert("classifier.weight", zeros(3));
        tensors.insert(
            "classifier.bias",
            Tensor::new(&[0f32, 5.0, 0.0], &device).unwrap(),
        );
        candle_core::safetensors::save(&tensors, dir.join("model.safetensors")).unwrap();

        let special = |id: u32, content: &str| {
            json!({
                "id": id, "content": content, "single_word": false, "lstrip": false,
                "rstrip": false, "normalized": false, "special": true
            })
        };
        let tokenizer = json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [special(0, "[UNK]"), special(1, "[CLS]"), special(2, "[SEP]")],
            "normalizer": null,
            "pre_tokenizer": { "type": "WhitespaceSplit" },
            "post_processor": {
                "type": "TemplateProcessing",
                "single": [
                    { "SpecialToken": { "id": "[CLS]", "type_id": 0 } },
                    { "Sequence": { "id": "A", "type_id": 0 } },
                    { "SpecialToken": { "id": "[SEP]", "type_id": 0 } }
                ],
                "pair": [
                    { "SpecialToken": { "id": "[CLS]", "type_id": 0 } },
                    { "Sequence": { "id": "A", "type_id": 0 } },
                    { "SpecialToken": { "id": "[SEP]", "type_id": 0 } },
                    { "Sequence": { "id": "B", "type_id": 1 } },
                    { "SpecialToken": { "id": "[SEP]", "type_id": 1 } }
                ],
                "special_tokens": {
                    "[CLS]": { "id": "[CLS]", "ids": [1], "tokens": ["[CLS]"] },
                    "[SEP]": { "id": "[SEP]", "ids": [2], "tokens": ["[SEP]"] }
                }
            },
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": { "[UNK]": 0, "[CLS]": 1, "[SEP]": 2, "obama": 3 },
                "unk_token": "[UNK]"
            }
        });
        std::fs::write(dir.join("tokenizer.json"), tokenizer.to_string()).unwrap();
    }

    #[test]
    fn test_short_text_fits_one_window() {
        let dir = tempfile::tempdir().unwrap();
        write_person_model(dir.path());
        let model = BertTokenClassifier::load(dir.path(), 512).unwrap();

        let spans = model.classify(&vec!["obama"; 10].join(" ")).unwrap();

        assert_eq!(spans.len(), 10);
        assert_eq!(spans[0], RawSpan::new("obama", "PER", 0, 5));
    }

    #[test]
    fn test_long_text_is_tagged_to_the_end() {
        let dir = tempfile::tempdir().unwrap();
        write_person_model(dir.path());
        let model = BertTokenClassifier::load(dir.path(), 512).unwrap();
        let text = vec!["obama"; 800].join(" ");

        let spans = model.classify(&text).unwrap();

        assert_eq!(spans.len(), 800);
        assert_eq!(spans.last().map(|s| s.end_char), Some(text.chars().count()));
        assert!(spans.windows(2).all(|pair| pair[0].end_char < pair[1].start_char));
    }

    #[test]
    fn test_window_floor() {
        let dir = tempfile::tempdir().unwrap();
        write_person_model(dir.path());

        assert!(BertTokenClassifier::load(dir.path(), MIN_WINDOW_TOKENS - 1).is_err());
        assert!(BertTokenClassifier::load(dir.path(), MIN_WINDOW_TOKENS).is_ok());
    }

    #[test]
    fn test_merge_window_skips_overlap() {
        let mut tags = vec![tag("B-PER", 0, 5, 0), tag("B-PER", 6, 11, 1)];
        let overlap = vec![
            tag("O", 6, 11, 1),
            tag("B-ORG", 12, 18, 2),
            tag("B-ORG", 19, 25, 3),
        ];

        merge_window(&mut tags, overlap.into_iter());

        let starts: Vec<usize> = tags.iter().map(|t| t.start).collect();
        assert_eq!(starts, vec![0, 6, 12, 19]);
        assert_eq!(tags[1].label, "B-PER");
    }

    #[test]
    fn test_window_stride() {
        assert_eq!(window_stride(512), 64);
        assert_eq!(window_stride(128), 16);
        assert_eq!(window_stride(MIN_WINDOW_TOKENS), 1);
    }

    #[test]
    fn test_split_tag() {
        assert_eq!(split_tag("B-PER"), (Some('B'), "PER"));
        assert_eq!(split_tag("I-WORK_OF_ART"), (Some('I'), "WORK_OF_ART"));
        assert_eq!(split_tag("O"), (None, "O"));
        assert_eq!(split_tag("NON-PROFIT"), (None, "NON-PROFIT"));
    }
}
