//! HTTP transport capability.
//!
//! Drivers never talk to `reqwest` directly; they send [`HttpRequest`]s
//! through a [`DynHttpClient`] so tests can substitute
//! [`testing::StubHttpClient`].

mod reqwest;
pub mod testing;

pub use self::reqwest::ReqwestHttpClient;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use url::Url;

use crate::action::ReadStream;
use crate::vfs::{ConnectionError, VfsError, VfsResult};

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    /// Proxy for this request only.
    pub proxy: Option<Url>,
}

impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body", &self.body.as_deref().map(String::from_utf8_lossy))
            .field("proxy", &self.proxy.as_ref().map(Url::as_str))
            .finish()
    }
}

impl HttpRequest {
    fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
            proxy: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn head(url: Url) -> Self {
        Self::new(Method::Head, url)
    }

    /// A POST carrying `body` as JSON.
    pub fn post_json(url: Url, body: &serde_json::Value) -> VfsResult<Self> {
        let mut req = Self::new(Method::Post, url);
        req.body = Some(Bytes::from(serde_json::to_vec(body)?));
        Ok(req.with_header("content-type", "application/json"))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_proxy(mut self, proxy: Option<Url>) -> Self {
        self.proxy = proxy;
        self
    }
}

/// Response with a streaming body.
pub struct HttpResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: Url,
    pub headers: Vec<(String, String)>,
    body: BoxStream<'static, VfsResult<Bytes>>,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    pub fn new(
        status: u16,
        url: Url,
        headers: Vec<(String, String)>,
        body: BoxStream<'static, VfsResult<Bytes>>,
    ) -> Self {
        Self {
            status,
            url,
            headers,
            body,
        }
    }

    /// A response whose body is already in memory.
    pub fn from_bytes(status: u16, url: Url, headers: Vec<(String, String)>, body: Bytes) -> Self {
        let body = if body.is_empty() {
            stream::empty().boxed()
        } else {
            stream::once(async move { Ok(body) }).boxed()
        };
        Self::new(status, url, headers, body)
    }

    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")?.trim().parse().ok()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Map non-success statuses onto errors.
    ///
    /// 404 and 410 are `NotFound`, 401 and 403 `PermissionDenied`, anything
    /// else a connection error.
    pub fn error_for_status(self) -> VfsResult<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let target = self.url.to_string();
        Err(match self.status {
            404 | 410 => VfsError::not_found(target),
            401 | 403 => VfsError::permission_denied(target),
            status => ConnectionError::msg(format!("{target} returned status {status}")).into(),
        })
    }

    /// Buffer the whole body.
    pub async fn bytes(self) -> VfsResult<Bytes> {
        let buf = self
            .body
            .try_fold(BytesMut::new(), |mut buf, chunk| async move {
                buf.extend_from_slice(&chunk);
                Ok(buf)
            })
            .await?;
        Ok(buf.freeze())
    }

    /// Buffer the body as UTF-8, replacing invalid sequences.
    pub async fn text(self) -> VfsResult<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Buffer the body as JSON.
    pub async fn json(self) -> VfsResult<serde_json::Value> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Hand the body to a read stream, with `content-length` as the total.
    pub fn into_read_stream(self) -> ReadStream {
        let total = self.content_length();
        ReadStream::from_body(self.body, total)
    }
}

/// Sends requests.
#[async_trait]
pub trait HttpClient: Send + Sync + std::fmt::Debug {
    /// Send `request`. Transport failures are `VfsError::Connection`; any
    /// status, including errors, is a response.
    async fn send(&self, request: HttpRequest) -> VfsResult<HttpResponse>;
}

pub type DynHttpClient = Arc<dyn HttpClient>;
