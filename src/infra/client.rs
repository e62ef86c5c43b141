//! Client for the status path of a running prerender server.

use reqwest::{Client, Url};
use thiserror::Error;

use crate::domain::entities::RenderStatus;
use prerender_api_types::STATUS_PATH;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server responded with {status}: {body}")]
    Server { status: u16, body: String },
}

#[derive(Debug, Clone)]
pub struct StatusClient {
    client: Client,
    base: Url,
}

impl StatusClient {
    pub fn new(server: &str) -> Result<Self, ClientError> {
        let base = Url::parse(server)?.join("/")?;
        let client = Client::builder().user_agent(Self::user_agent()).build()?;
        Ok(Self { client, base })
    }

    pub fn user_agent() -> &'static str {
        concat!("prerender-cli/", env!("CARGO_PKG_VERSION"))
    }

    /// URL of the status request for `page_url`.
    pub fn status_url(&self, page_url: &str, language: Option<&str>) -> Result<Url, ClientError> {
        let mut url = self.base.join(STATUS_PATH.trim_start_matches('/'))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("url", page_url);
            if let Some(language) = language {
                query.append_pair("language", language);
            }
        }
        Ok(url)
    }

    pub async fn status(
        &self,
        page_url: &str,
        language: Option<&str>,
    ) -> Result<RenderStatus, ClientError> {
        let response = self
            .client
            .get(self.status_url(page_url, language)?)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Server {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_url_encodes_page_url() {
        let client = StatusClient::new("http://localhost:3000/ignored/path").expect("client");
        let url = client
            .status_url("https://example.com/page?x=1&y=2", Some("en"))
            .expect("url");
        assert_eq!(url.path(), "/__render/status");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("url".to_string(), "https://example.com/page?x=1&y=2".to_string()),
                ("language".to_string(), "en".to_string()),
            ]
        );
    }

    #[test]
    fn invalid_server_is_rejected() {
        assert!(matches!(
            StatusClient::new("not a url"),
            Err(ClientError::Url(_))
        ));
    }
}
