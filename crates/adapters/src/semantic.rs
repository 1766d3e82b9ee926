use std::time::Duration;

use homecloud_application::{ApplicationError, SemanticHit, SemanticIndex};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const COLLECTION: &str = "media";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Embeds queries through the AI service and looks them up in Qdrant.
#[derive(Debug, Clone)]
pub struct HttpSemanticIndex {
    ai_url: String,
    qdrant_url: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(alias = "vector")]
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct PointSearchRequest<'a> {
    vector: &'a [f32],
    limit: u32,
    with_payload: bool,
}

#[derive(Deserialize)]
struct PointSearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
}

fn external(error: impl std::fmt::Display) -> ApplicationError {
    ApplicationError::External(error.to_string())
}

impl HttpSemanticIndex {
    pub fn new(ai_url: impl Into<String>, qdrant_url: impl Into<String>) -> Self {
        Self {
            ai_url: ai_url.into().trim_end_matches('/').to_string(),
            qdrant_url: qdrant_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn client() -> Result<Client, ApplicationError> {
        Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(external)
    }

    fn embed(&self, client: &Client, query: &str) -> Result<Vec<f32>, ApplicationError> {
        let response: EmbedResponse = client
            .post(format!("{}/embed", self.ai_url))
            .json(&EmbedRequest { text: query })
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(external)?
            .json()
            .map_err(external)?;
        if response.embedding.is_empty() {
            return Err(ApplicationError::External(
                "embedding service returned an empty vector".to_string(),
            ));
        }
        Ok(response.embedding)
    }
}

/// Keeps hits whose point id is a positive integer; UUID ids cannot map to rows.
fn hits_from(response: PointSearchResponse) -> Vec<SemanticHit> {
    response
        .result
        .into_iter()
        .filter_map(|point| {
            let id = point.id.as_i64().filter(|id| *id > 0)?;
            Some(SemanticHit {
                id,
                score: point.score,
            })
        })
        .collect()
}

impl SemanticIndex for HttpSemanticIndex {
    fn search(&self, query: &str, limit: u32) -> Result<Vec<SemanticHit>, ApplicationError> {
        let client = Self::client()?;
        let vector = self.embed(&client, query)?;

        let response: PointSearchResponse = client
            .post(format!(
                "{}/collections/{COLLECTION}/points/search",
                self.qdrant_url
            ))
            .json(&PointSearchRequest {
                vector: &vector,
                limit,
                with_payload: true,
            })
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(external)?
            .json()
            .map_err(external)?;

        let hits = hits_from(response);
        debug!(query, hits = hits.len(), "semantic search");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_accepts_either_field_name() {
        let a: EmbedResponse =
            serde_json::from_str(r#"{"embedding":[0.5,1.0]}"#).expect("embedding");
        let b: EmbedResponse = serde_json::from_str(r#"{"vector":[0.25]}"#).expect("vector");
        assert_eq!(a.embedding, vec![0.5, 1.0]);
        assert_eq!(b.embedding, vec![0.25]);
    }

    #[test]
    fn point_ids_that_are_not_row_ids_are_dropped() {
        let response: PointSearchResponse = serde_json::from_str(
            r#"{"result":[
                {"id":7,"score":0.9,"payload":{"path":"/data/a.jpg"}},
                {"id":"5c56c793-69f3-4fbf-87e6-c4bf54c28c26","score":0.8},
                {"id":3,"score":0.7}
            ],"status":"ok","time":0.001}"#,
        )
        .expect("parse");

        assert_eq!(
            hits_from(response),
            vec![
                SemanticHit { id: 7, score: 0.9 },
                SemanticHit { id: 3, score: 0.7 },
            ]
        );
    }

    #[test]
    fn base_urls_lose_trailing_slashes() {
        let index = HttpSemanticIndex::new("http://ai:5000/", "http://qdrant:6333//");
        assert_eq!(index.ai_url, "http://ai:5000");
        assert_eq!(index.qdrant_url, "http://qdrant:6333");
    }
}
