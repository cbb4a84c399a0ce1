/// OpenAI embeddings provider using the `/v1/embeddings` endpoint.
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedder, EmbedderError};
use crate::openai::{ApiError, OpenAiClient};

/// Inputs per request.
const MAX_INPUTS_PER_REQUEST: usize = 512;

/// Sent in place of blank inputs, which the endpoint rejects.
const BLANK_INPUT: &str = " ";

pub struct OpenAiEmbedder {
    client: OpenAiClient,
    model: String,
    dims: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: Secret<String>, base_url: &str) -> Self {
        Self {
            client: OpenAiClient::new(api_key, base_url),
            model: "text-embedding-3-small".to_string(),
            dims: 1536,
        }
    }

    pub fn with_model(mut self, model: String, dims: usize) -> Self {
        self.model = model;
        self.dims = dims;
        self
    }

    fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let input: Vec<&str> = texts
            .iter()
            .map(|&t| if t.trim().is_empty() { BLANK_INPUT } else { t })
            .collect();
        let req = EmbeddingRequest {
            model: &self.model,
            input: &input,
        };
        let resp: EmbeddingResponse = self.client.post_json("embeddings", &req)?;

        if resp.data.len() != texts.len() {
            return Err(ApiError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                resp.data.len()
            ))
            .into());
        }

        // Responses carry `index`; restore request order.
        let mut data = resp.data;
        data.sort_by_key(|d| d.index);

        let mut vectors = Vec::with_capacity(data.len());
        for d in data {
            if d.embedding.len() != self.dims {
                return Err(ApiError::InvalidResponse(format!(
                    "model {} returned {} dimensions, expected {}",
                    self.model,
                    d.embedding.len(),
                    self.dims
                ))
                .into());
            }
            vectors.push(d.embedding);
        }
        Ok(vectors)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl Embedder for OpenAiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| ApiError::InvalidResponse("empty embedding response".to_string()).into())
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut out = Vec::with_capacity(texts.len());
        for group in texts.chunks(MAX_INPUTS_PER_REQUEST) {
            debug!("Embedding {} texts with {}", group.len(), self.model);
            out.extend(self.request(group)?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn embedder_for(server: &mockito::Server, dims: usize) -> OpenAiEmbedder {
        OpenAiEmbedder::new(Secret::new("sk-test".to_string()), &server.url())
            .with_model("text-embedding-3-small".to_string(), dims)
    }

    #[test]
    fn test_embed_batch_orders_by_index() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/embeddings")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "text-embedding-3-small",
                "input": ["first", "second"],
            })))
            .with_status(200)
            .with_body(
                r#"{"data": [
                    {"index": 1, "embedding": [0.0, 1.0, 0.0]},
                    {"index": 0, "embedding": [1.0, 0.0, 0.0]}
                ]}"#,
            )
            .create();

        let embedder = embedder_for(&server, 3);
        let vectors = embedder.embed_batch(&["first", "second"]).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
        mock.assert();
    }

    #[test]
    fn test_blank_input_is_never_sent_empty() {
        let mut server = mockito::Server::new();
        let rejected = server
            .mock("POST", "/v1/embeddings")
            .match_body(Matcher::PartialJson(serde_json::json!({"input": [""]})))
            .with_status(400)
            .expect(0)
            .create();
        let accepted = server
            .mock("POST", "/v1/embeddings")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "input": [" ", "query"],
            })))
            .with_status(200)
            .with_body(
                r#"{"data": [
                    {"index": 0, "embedding": [1.0, 0.0, 0.0]},
                    {"index": 1, "embedding": [0.0, 1.0, 0.0]}
                ]}"#,
            )
            .create();

        let embedder = embedder_for(&server, 3);
        let vectors = embedder.embed_batch(&["", "query"]).unwrap();
        assert_eq!(vectors.len(), 2);
        accepted.assert();
        rejected.assert();
    }

    #[test]
    fn test_dimension_mismatch_is_invalid_response() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/v1/embeddings")
            .with_status(200)
            .with_body(r#"{"data": [{"index": 0, "embedding": [1.0, 0.0]}]}"#)
            .create();

        let embedder = embedder_for(&server, 3);
        let err = embedder.embed("hello").unwrap_err();
        assert!(matches!(
            err,
            EmbedderError::Api(ApiError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_auth_failure_propagates() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/v1/embeddings")
            .with_status(401)
            .with_body(r#"{"error": {"message": "Incorrect API key provided"}}"#)
            .create();

        let embedder = embedder_for(&server, 3);
        match embedder.embed("hello") {
            Err(EmbedderError::Api(e)) => assert!(e.is_authentication_error()),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[test]
    fn test_reports_model_and_dimensions() {
        let embedder = OpenAiEmbedder::new(Secret::new("sk".to_string()), "https://api.openai.com");
        assert_eq!(embedder.model_name(), "text-embedding-3-small");
        assert_eq!(embedder.dimensions(), 1536);
    }
}
