use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client, Proxy, RequestBuilder, Response};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::resilience::retry::RetrySettings;
use crate::utils::constants::{CONNECTION_RETRIES, DEFAULT_CONNECTION_TIMEOUT_SECS};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Can't connect to server ({0})")]
    Connect(String),

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build http client: {0}")]
    Client(String),
}

/// Options for building a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub headers: HashMap<String, String>,
    pub timeout: Duration,
    /// Verify the server TLS certificate.
    pub verify: bool,
    /// URL prefix -> proxy URL.
    pub proxies: HashMap<String, String>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            headers: HashMap::new(),
            timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
            verify: true,
            proxies: HashMap::new(),
        }
    }
}

/// Request payload for [`ConnectionManager::raw_post`] and friends.
#[derive(Debug, Clone, Copy)]
pub enum RequestBody<'a> {
    Empty,
    Form(&'a [(String, String)]),
    Json(&'a Value),
}

/// Connection to a Keycloak server: base URL, default headers, timeout and proxies.
///
/// Transport failures are retried once before being reported, which resets
/// connections the server closed while idle.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    base_url: Url,
    headers: HashMap<String, String>,
    timeout: Duration,
    verify: bool,
    proxies: HashMap<String, String>,
    client: Client,
    retry: RetrySettings,
}

impl ConnectionManager {
    pub fn new(base_url: &str, options: ConnectionOptions) -> Result<Self, ConnectionError> {
        let base_url = parse_base_url(base_url)?;

        let mut builder = Client::builder().danger_accept_invalid_certs(!options.verify);
        for (prefix, proxy_url) in &options.proxies {
            let proxy_target = Url::parse(proxy_url).map_err(|e| ConnectionError::InvalidUrl {
                url: proxy_url.clone(),
                reason: e.to_string(),
            })?;
            let prefix = prefix.clone();
            builder = builder.proxy(Proxy::custom(move |url| {
                url.as_str()
                    .starts_with(prefix.as_str())
                    .then(|| proxy_target.clone())
            }));
        }
        let client = builder
            .build()
            .map_err(|e| ConnectionError::Client(e.to_string()))?;

        Ok(Self {
            base_url,
            headers: options.headers,
            timeout: options.timeout,
            verify: options.verify,
            proxies: options.proxies,
            client,
            retry: RetrySettings::with_retries(CONNECTION_RETRIES),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn verify(&self) -> bool {
        self.verify
    }

    pub fn proxies(&self) -> &HashMap<String, String> {
        &self.proxies
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn param_header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn exist_param_header(&self, key: &str) -> bool {
        self.param_header(key).is_some()
    }

    pub fn add_param_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn del_param_header(&mut self, key: &str) {
        self.headers.remove(key);
    }

    pub fn clean_headers(&mut self) {
        self.headers.clear();
    }

    /// Resolves `path` against the base URL.
    pub fn url(&self, path: &str) -> Result<Url, ConnectionError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ConnectionError::InvalidUrl {
                url: path.to_owned(),
                reason: e.to_string(),
            })
    }

    pub async fn raw_get(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Response, ConnectionError> {
        let url = self.url(path)?;
        self.send(|| self.client.get(url.clone()).query(query), None).await
    }

    pub async fn raw_post(
        &self,
        path: &str,
        body: RequestBody<'_>,
        extra_headers: Option<&HashMap<String, String>>,
    ) -> Result<Response, ConnectionError> {
        let url = self.url(path)?;
        self.send(
            || with_body(self.client.post(url.clone()), body),
            extra_headers,
        )
        .await
    }

    pub async fn raw_put(
        &self,
        path: &str,
        body: RequestBody<'_>,
        extra_headers: Option<&HashMap<String, String>>,
    ) -> Result<Response, ConnectionError> {
        let url = self.url(path)?;
        self.send(
            || with_body(self.client.put(url.clone()), body),
            extra_headers,
        )
        .await
    }

    pub async fn raw_delete(
        &self,
        path: &str,
        body: RequestBody<'_>,
    ) -> Result<Response, ConnectionError> {
        let url = self.url(path)?;
        self.send(|| with_body(self.client.delete(url.clone()), body), None)
            .await
    }

    /// Applies default and extra headers plus the timeout, then sends with one retry.
    /// Extra headers win over defaults and never leak into them.
    async fn send<F>(
        &self,
        build: F,
        extra_headers: Option<&HashMap<String, String>>,
    ) -> Result<Response, ConnectionError>
    where
        F: Fn() -> RequestBuilder,
    {
        self.retry
            .run_with_retry(|| {
                let mut request = build().timeout(self.timeout);
                for (key, value) in &self.headers {
                    if extra_headers.is_some_and(|extra| extra.contains_key(key)) {
                        continue;
                    }
                    request = request.header(key.as_str(), value.as_str());
                }
                if let Some(extra) = extra_headers {
                    for (key, value) in extra {
                        request = request.header(key.as_str(), value.as_str());
                    }
                }
                async move { request.send().await }
            })
            .await
            .inspect(|response| debug!(url = %response.url(), status = %response.status(), "response received"))
            .map_err(|e| ConnectionError::Connect(e.to_string()))
    }
}

fn with_body(request: RequestBuilder, body: RequestBody<'_>) -> RequestBuilder {
    match body {
        RequestBody::Empty => request,
        RequestBody::Form(form) => request.form(form),
        RequestBody::Json(json) => request.json(json),
    }
}

fn parse_base_url(base_url: &str) -> Result<Url, ConnectionError> {
    // joining drops the last path segment unless it ends with '/'
    let normalized = if base_url.ends_with('/') {
        base_url.to_owned()
    } else {
        format!("{base_url}/")
    };
    let url = Url::parse(&normalized).map_err(|e| ConnectionError::InvalidUrl {
        url: base_url.to_owned(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConnectionError::InvalidUrl {
            url: base_url.to_owned(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}
