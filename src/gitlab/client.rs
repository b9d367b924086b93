use std::time::Duration;

use log::warn;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

use crate::auth::Token;
use crate::error::{CiGraphError, Result};

/// Transport settings for the GitLab REST API.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 5,
            retry_delay: Duration::from_secs(5),
        }
    }
}

pub struct GitLabClient {
    client: Client,
    api_url: Url,
    token: Option<Token>,
    options: ClientOptions,
}

impl GitLabClient {
    pub fn new(base_url: &str, token: Option<Token>, options: ClientOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("cigraph/", env!("CARGO_PKG_VERSION")))
            .timeout(options.timeout)
            .build()
            .map_err(|e| CiGraphError::Config(format!("Failed to create HTTP client: {e}")))?;

        let api_url = Url::parse(base_url)
            .map_err(|e| CiGraphError::Config(format!("Invalid base URL: {e}")))?
            .join("api/v4/")
            .map_err(|e| CiGraphError::Config(format!("Invalid API base URL: {e}")))?;

        Ok(Self {
            client,
            api_url,
            token,
            options,
        })
    }

    fn auth_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.token {
            request.bearer_auth(token.as_str())
        } else {
            request
        }
    }

    /// Construct project base URL
    pub(super) fn project_url(&self, project: &str) -> Result<Url> {
        self.api_url
            .join(&format!("projects/{}/", urlencoding::encode(project)))
            .map_err(|e| CiGraphError::Config(format!("Invalid project URL: {e}")))
    }

    /// GET a JSON document, retrying on network errors, rate limits and server errors.
    ///
    /// Returns the decoded body together with the response headers, which carry
    /// the pagination cursor.
    pub(super) async fn get_json<T>(&self, url: Url) -> Result<(T, HeaderMap)>
    where
        T: DeserializeOwned,
    {
        let max_retries = self.options.max_retries;
        let mut retry_count = 0;

        loop {
            let request = self.auth_request(self.client.get(url.clone()));

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                    if retry_count >= max_retries {
                        return Err(e.into());
                    }
                    warn!(
                        "Network error ({e}), retrying in {}s ({}/{max_retries})...",
                        self.options.retry_delay.as_secs(),
                        retry_count + 1,
                    );
                    tokio::time::sleep(self.options.retry_delay).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();

            if status == 429 || status.is_server_error() {
                if retry_count >= max_retries {
                    return Err(CiGraphError::ApiErrorAfterRetries {
                        status: status.as_u16(),
                        retries: max_retries,
                    });
                }

                warn!(
                    "GitLab API error (status {status}). Waiting {} seconds before retry {}/{max_retries}...",
                    self.options.retry_delay.as_secs(),
                    retry_count + 1,
                );

                tokio::time::sleep(self.options.retry_delay).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error response".to_string());
                return Err(CiGraphError::Api {
                    status: status.as_u16(),
                    message: error_text,
                });
            }

            let headers = response.headers().clone();
            let body = response.json::<T>().await?;
            return Ok((body, headers));
        }
    }
}
