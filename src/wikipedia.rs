use crate::error::{CodeSwitchError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

const USER_AGENT: &str = concat!("codeswitch/", env!("CARGO_PKG_VERSION"));

/// Anything that can produce rendered article markup for a title.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    async fn fetch(&self, title: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    parse: Option<ParsedPage>,
}

#[derive(Debug, Deserialize)]
struct ParsedPage {
    text: HashMap<String, String>,
}

/// Client for the MediaWiki `action=parse` API.
pub struct WikipediaClient {
    client: reqwest::Client,
    api_url: String,
}

impl WikipediaClient {
    /// `client` should carry the fetch timeout.
    pub fn new(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
        }
    }
}

#[async_trait]
impl ArticleSource for WikipediaClient {
    async fn fetch(&self, title: &str) -> Result<String> {
        let response = self
            .client
            .get(&self.api_url)
            .header("User-Agent", USER_AGENT)
            .query(&[
                ("action", "parse"),
                ("page", title),
                ("format", "json"),
                ("prop", "text"),
                ("redirects", "1"),
            ])
            .send()
            .await
            .map_err(|e| CodeSwitchError::Fetch(format!("error making request: {}", e)))?;

        if !response.status().is_success() {
            return Err(CodeSwitchError::Fetch(format!(
                "Wikipedia API returned status code: {}",
                response.status().as_u16()
            )));
        }

        let body: ParseResponse = response
            .json()
            .await
            .map_err(|e| CodeSwitchError::Fetch(format!("error parsing JSON response: {}", e)))?;

        let html = body
            .parse
            .and_then(|mut page| page.text.remove("*"))
            .ok_or_else(|| {
                CodeSwitchError::Fetch(format!(
                    "no content found in Wikipedia response for '{}'",
                    title
                ))
            })?;

        info!("Fetched article '{}' ({} bytes)", title, html.len());
        Ok(html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{header_exists, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn client_for(server: &MockServer) -> WikipediaClient {
        WikipediaClient::new(reqwest::Client::new(), format!("{}/w/api.php", server.uri()))
    }

    #[tokio::test]
    async fn test_fetch_extracts_nested_html() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/w/api.php"))
            .and(query_param("action", "parse"))
            .and(query_param("page", "Stockholm"))
            .and(query_param("prop", "text"))
            .and(query_param("redirects", "1"))
            .and(header_exists("User-Agent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "parse": {
                    "title": "Stockholm",
                    "text": { "*": "<p>Stockholm is the capital of Sweden.</p>" }
                }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let html = client_for(&mock_server).fetch("Stockholm").await.expect("Should fetch");
        assert_eq!(html, "<p>Stockholm is the capital of Sweden.</p>");
    }

    #[tokio::test]
    async fn test_missing_page_is_fetch_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": { "code": "missingtitle", "info": "The page you specified doesn't exist." }
            })))
            .mount(&mock_server)
            .await;

        let err = client_for(&mock_server).fetch("Nope").await.unwrap_err();
        assert_eq!(err.code(), "fetch_error");
        assert!(err.to_string().contains("no content found"));
    }

    #[tokio::test]
    async fn test_non_200_is_fetch_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let err = client_for(&mock_server).fetch("Stockholm").await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_invalid_json_is_fetch_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&mock_server)
            .await;

        let err = client_for(&mock_server).fetch("Stockholm").await.unwrap_err();
        assert!(err.to_string().contains("error parsing JSON"));
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_fetch_error() {
        let client = WikipediaClient::new(reqwest::Client::new(), "http://127.0.0.1:1/w/api.php");
        let err = client.fetch("Stockholm").await.unwrap_err();
        assert_eq!(err.code(), "fetch_error");
    }
}
