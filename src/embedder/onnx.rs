/// ONNX Runtime embedder using the `ort` crate.
///
/// Runs a sentence-transformers model (all-MiniLM-L6-v2 by default) over
/// padded batches, applies attention-masked mean pooling and L2-normalizes
/// each row.
use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use super::tokenizer::{BertTokenizer, DEFAULT_MAX_LENGTH, EncodedBatch};
use super::{Embedder, EmbedderError, l2_normalize};

/// Texts per inference call.
const INFERENCE_BATCH: usize = 32;

pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: BertTokenizer,
    model_name: String,
    dimensions: usize,
}

impl OnnxEmbedder {
    /// Load `model.onnx` and `tokenizer.json` from `model_dir`.
    pub fn new(model_dir: &Path, model_name: &str, dimensions: usize) -> Result<Self, EmbedderError> {
        let model_path = model_dir.join("model.onnx");

        if !model_path.exists() {
            return Err(EmbedderError::ModelLoadFailed(format!(
                "model.onnx not found in {}",
                model_dir.display()
            )));
        }

        info!("Initializing ONNX Runtime...");

        let session = Session::builder()
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("session builder error: {e}")))?
            .with_intra_threads(4)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("model load error: {e}")))?;

        let tokenizer = BertTokenizer::from_model_dir(model_dir, DEFAULT_MAX_LENGTH)
            .map_err(|e| EmbedderError::TokenizerError(e.to_string()))?;

        info!(
            "Loaded {model_name} (vocab size: {})",
            tokenizer.vocab_size()
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    fn run_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let batch = self
            .tokenizer
            .encode_batch(texts)
            .map_err(|e| EmbedderError::TokenizerError(e.to_string()))?;
        let shape = [batch.batch_size, batch.seq_len];

        let input_ids = Tensor::from_array((shape, batch.input_ids.clone()))
            .map_err(|e| EmbedderError::InferenceFailed(format!("input_ids error: {e}")))?;
        let attention_mask = Tensor::from_array((shape, batch.attention_mask.clone()))
            .map_err(|e| EmbedderError::InferenceFailed(format!("attention_mask error: {e}")))?;
        let token_type_ids = Tensor::from_array((shape, batch.token_type_ids.clone()))
            .map_err(|e| EmbedderError::InferenceFailed(format!("token_type_ids error: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbedderError::InferenceFailed(format!("lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids,
            ])
            .map_err(|e| EmbedderError::InferenceFailed(format!("inference failed: {e}")))?;

        // last_hidden_state: [batch_size, seq_len, hidden_size]
        let (_shape, hidden) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("output extraction: {e}")))?;

        let expected = batch.batch_size * batch.seq_len * self.dimensions;
        if hidden.len() != expected {
            return Err(EmbedderError::InferenceFailed(format!(
                "unexpected output size {} (expected {expected})",
                hidden.len()
            )));
        }

        Ok(pool_batch(hidden, &batch, self.dimensions))
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        self.run_batch(&[text])?
            .pop()
            .ok_or_else(|| EmbedderError::InferenceFailed("empty output".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut out = Vec::with_capacity(texts.len());
        for group in texts.chunks(INFERENCE_BATCH) {
            debug!("Running ONNX inference on {} texts", group.len());
            out.extend(self.run_batch(group)?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Mean-pool and normalize every row of a flattened hidden-state batch.
fn pool_batch(hidden: &[f32], batch: &EncodedBatch, hidden_size: usize) -> Vec<Vec<f32>> {
    let row_len = batch.seq_len * hidden_size;
    (0..batch.batch_size)
        .map(|i| {
            let rows = &hidden[i * row_len..(i + 1) * row_len];
            l2_normalize(&mean_pooling(rows, batch.mask_row(i), batch.seq_len, hidden_size))
        })
        .collect()
}

/// Mean pooling over hidden states weighted by attention mask.
///
/// `hidden_data` is one item's `[seq_len, hidden_size]` block.
fn mean_pooling(
    hidden_data: &[f32],
    attention_mask: &[i64],
    seq_len: usize,
    hidden_size: usize,
) -> Vec<f32> {
    let mut result = vec![0.0f32; hidden_size];
    let mut mask_sum: f32 = 0.0;

    for t in 0..seq_len {
        let mask = attention_mask[t] as f32;
        mask_sum += mask;

        for h in 0..hidden_size {
            result[h] += hidden_data[t * hidden_size + h] * mask;
        }
    }

    if mask_sum > 0.0 {
        for v in &mut result {
            *v /= mask_sum;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_pooling_with_padding() {
        // 2 tokens, hidden_size=2, second token is padding
        let hidden = vec![1.0, 2.0, 10.0, 20.0];
        let result = mean_pooling(&hidden, &[1, 0], 2, 2);
        assert_eq!(result, vec![1.0, 2.0]);
    }

    #[test]
    fn test_pool_batch_rows_are_independent() {
        let batch = EncodedBatch {
            batch_size: 2,
            seq_len: 2,
            input_ids: vec![0; 4],
            attention_mask: vec![1, 1, 1, 0],
            token_type_ids: vec![0; 4],
        };
        // item 0: tokens (3,0),(1,0) -> mean (2,0); item 1: (0,5) + padding
        let hidden = vec![3.0, 0.0, 1.0, 0.0, 0.0, 5.0, 9.0, 9.0];
        let pooled = pool_batch(&hidden, &batch, 2);
        assert_eq!(pooled, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    /// Integration test requiring actual model files.
    #[test]
    #[ignore]
    fn test_onnx_embed_batch() {
        let model_dir = Path::new("models/all-MiniLM-L6-v2");
        if !model_dir.join("model.onnx").exists() {
            eprintln!("Skipping: model files not downloaded");
            return;
        }

        let embedder =
            OnnxEmbedder::new(model_dir, "sentence-transformers/all-MiniLM-L6-v2", 384).unwrap();
        let results = embedder
            .embed_batch(&["credential dumping", "OS credential dumping from LSASS"])
            .unwrap();
        assert_eq!(results.len(), 2);
        for vec in &results {
            assert_eq!(vec.len(), 384);
            let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 0.01, "expected unit vector, got {norm}");
        }
    }
}
