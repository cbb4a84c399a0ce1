/// WordPiece tokenizer wrapper around the HuggingFace `tokenizers` crate.
///
/// Produces padded, row-major batches ready to be handed to ONNX Runtime.
use std::path::Path;

use anyhow::Result;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

/// all-MiniLM-L6-v2 was trained with sequences of at most 256 word pieces.
pub const DEFAULT_MAX_LENGTH: usize = 256;

pub struct BertTokenizer {
    inner: Tokenizer,
}

/// A padded batch, flattened row-major as `[batch_size, seq_len]`.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBatch {
    pub batch_size: usize,
    pub seq_len: usize,
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Vec<i64>,
}

impl EncodedBatch {
    /// Attention mask row for item `i`.
    pub fn mask_row(&self, i: usize) -> &[i64] {
        &self.attention_mask[i * self.seq_len..(i + 1) * self.seq_len]
    }
}

impl BertTokenizer {
    /// Load `tokenizer.json` from the model directory, truncating to `max_length`.
    pub fn from_model_dir(model_dir: &Path, max_length: usize) -> Result<Self> {
        let tokenizer_path = model_dir.join("tokenizer.json");

        anyhow::ensure!(
            tokenizer_path.exists(),
            "tokenizer.json not found in {}",
            model_dir.display()
        );

        let mut inner = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

        inner
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("invalid truncation settings: {e}"))?;

        // Pad every batch to its longest member
        inner.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        Ok(Self { inner })
    }

    /// Tokenize a batch of texts into one padded, flattened encoding.
    pub fn encode_batch(&self, texts: &[&str]) -> Result<EncodedBatch> {
        let encodings = self
            .inner
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("failed to encode batch: {e}"))?;

        let batch_size = encodings.len();
        let seq_len = encodings.first().map_or(0, |e| e.get_ids().len());

        let mut batch = EncodedBatch {
            batch_size,
            seq_len,
            input_ids: Vec::with_capacity(batch_size * seq_len),
            attention_mask: Vec::with_capacity(batch_size * seq_len),
            token_type_ids: Vec::with_capacity(batch_size * seq_len),
        };

        for enc in &encodings {
            anyhow::ensure!(
                enc.get_ids().len() == seq_len,
                "tokenizer returned ragged batch"
            );
            batch
                .input_ids
                .extend(enc.get_ids().iter().map(|&id| i64::from(id)));
            batch
                .attention_mask
                .extend(enc.get_attention_mask().iter().map(|&m| i64::from(m)));
            batch
                .token_type_ids
                .extend(enc.get_type_ids().iter().map(|&t| i64::from(t)));
        }

        Ok(batch)
    }

    /// Get the vocabulary size.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_row() {
        let batch = EncodedBatch {
            batch_size: 2,
            seq_len: 3,
            input_ids: vec![101, 7, 102, 101, 102, 0],
            attention_mask: vec![1, 1, 1, 1, 1, 0],
            token_type_ids: vec![0; 6],
        };
        assert_eq!(batch.mask_row(0), &[1, 1, 1]);
        assert_eq!(batch.mask_row(1), &[1, 1, 0]);
    }

    /// Requires the downloaded tokenizer.json.
    /// Run with: cargo test tokenizer -- --ignored
    #[test]
    #[ignore]
    fn test_encode_batch_with_real_model() {
        let model_dir = Path::new("models/all-MiniLM-L6-v2");
        if !model_dir.join("tokenizer.json").exists() {
            eprintln!("Skipping: model files not downloaded");
            return;
        }

        let tokenizer = BertTokenizer::from_model_dir(model_dir, DEFAULT_MAX_LENGTH).unwrap();
        let batch = tokenizer
            .encode_batch(&["Hello", "PowerShell execution policy bypass"])
            .unwrap();

        assert_eq!(batch.batch_size, 2);
        assert_eq!(batch.input_ids.len(), 2 * batch.seq_len);
        // The short item is padded
        assert!(batch.mask_row(0).contains(&0));
    }

    #[test]
    fn test_tokenizer_missing_file() {
        let result = BertTokenizer::from_model_dir(Path::new("/nonexistent/path"), 256);
        assert!(result.is_err());
    }
}
