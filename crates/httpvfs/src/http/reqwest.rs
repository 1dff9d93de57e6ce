use async_trait::async_trait;
use dashmap::DashMap;
use futures::{StreamExt, TryStreamExt};
use std::time::Duration;

use super::{HttpClient, HttpRequest, HttpResponse, Method};
use crate::vfs::{ConnectionError, VfsError, VfsResult};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// [`HttpClient`] backed by `reqwest`, with one pooled client per proxy.
#[derive(Debug)]
pub struct ReqwestHttpClient {
    connect_timeout: Duration,
    clients: DashMap<Option<String>, reqwest::Client>,
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            clients: DashMap::new(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn client_for(&self, proxy: Option<&url::Url>) -> VfsResult<reqwest::Client> {
        let key = proxy.map(|p| p.to_string());
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(concat!("httpvfs/", env!("CARGO_PKG_VERSION")));
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| ConnectionError::new(format!("invalid proxy {proxy}"), e))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| ConnectionError::new("could not create http client", e))?;
        self.clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> VfsResult<HttpResponse> {
        let client = self.client_for(request.proxy.as_ref())?;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
        };
        let what = format!("{} {}", request.method, request.url);

        let mut builder = client.request(method, request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        tracing::trace!(request = %what, "sending");
        let response = builder
            .send()
            .await
            .map_err(|e| ConnectionError::new(what.clone(), e))?;

        let status = response.status().as_u16();
        let url = response.url().clone();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response
            .bytes_stream()
            .map_err(move |e| VfsError::from(ConnectionError::new(format!("reading {what}"), e)))
            .boxed();

        Ok(HttpResponse::new(status, url, headers, body))
    }
}
