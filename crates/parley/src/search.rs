//! Web search collaborator used by the research workflow
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

pub const TAVILY_DEFAULT_HOST: &str = "https://api.tavily.com";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub query: String,
    /// Short answer synthesised by the backend, when it offers one
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub results: Vec<SearchResult>,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<SearchResponse>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TavilyConfig {
    #[serde(default = "default_tavily_host")]
    pub host: String,
    pub api_key: String,
}

fn default_tavily_host() -> String {
    TAVILY_DEFAULT_HOST.to_string()
}

pub struct TavilyClient {
    client: Client,
    config: TavilyConfig,
}

impl TavilyClient {
    pub fn new(config: TavilyConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl SearchBackend for TavilyClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<SearchResponse> {
        let url = format!("{}/search", self.config.host.trim_end_matches('/'));
        let payload = json!({
            "query": query,
            "max_results": max_results,
            "include_answer": true,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let mut parsed: SearchResponse = response.json().await?;
                if parsed.query.is_empty() {
                    parsed.query = query.to_string();
                }
                Ok(parsed)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(anyhow!("Search for '{}' failed: {} {}", query, status, body))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup(response: ResponseTemplate) -> (MockServer, TavilyClient) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("Authorization", "Bearer tvly-test"))
            .and(body_partial_json(json!({"max_results": 5})))
            .respond_with(response)
            .mount(&server)
            .await;
        let client = TavilyClient::new(TavilyConfig {
            host: server.uri(),
            api_key: "tvly-test".to_string(),
        })
        .unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn test_search_parses_answer_and_results() -> Result<()> {
        let (_server, client) = setup(ResponseTemplate::new(200).set_body_json(json!({
            "query": "induction hob efficiency",
            "answer": "Induction hobs are about 85% efficient.",
            "results": [
                {"title": "Hobs compared", "url": "https://example.com/hobs", "content": "...", "score": 0.9}
            ],
            "response_time": 1.2
        })))
        .await;

        let response = client.search("induction hob efficiency", 5).await?;
        assert_eq!(
            response.answer.as_deref(),
            Some("Induction hobs are about 85% efficient.")
        );
        assert_eq!(response.results[0].url, "https://example.com/hobs");
        Ok(())
    }

    #[tokio::test]
    async fn test_search_failure_names_query() {
        let (_server, client) = setup(ResponseTemplate::new(432).set_body_string("plan limit")).await;
        let err = client.search("aga cookers", 5).await.unwrap_err();
        assert!(err.to_string().contains("aga cookers"));
        assert!(err.to_string().contains("plan limit"));
    }
}
