//! Test utilities for the http module.
//!
//! [`StubHttpClient`] answers from a route table and records every request,
//! so driver and volume tests never touch the network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use url::Url;

use super::{HttpClient, HttpRequest, HttpResponse, Method};
use crate::vfs::{ConnectionError, VfsResult};

/// Server header sent by Python's `http.server`.
pub const SIMPLE_HTTP_SERVER: &str = "SimpleHTTP/0.6 Python/3.12.3";

/// A canned response.
#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    chunk_size: Option<usize>,
    delay: Option<Duration>,
    fail: Option<String>,
}

impl StubResponse {
    /// 200 with `body` and a matching `content-length`.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self::status(200)
            .with_header("content-length", body.len().to_string())
            .with_body(body)
    }

    /// Empty response with `status`.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
            chunk_size: None,
            delay: None,
            fail: None,
        }
    }

    /// The request fails before any response arrives.
    pub fn connection_error(message: impl Into<String>) -> Self {
        let mut resp = Self::status(0);
        resp.fail = Some(message.into());
        resp
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Deliver the body in chunks of `size` bytes.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Wait before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A request seen by the stub.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub body: Option<Bytes>,
    pub proxy: Option<Url>,
}

impl RecordedRequest {
    /// The body parsed as JSON, if any.
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(self.body.as_deref()?).ok()
    }
}

/// Route-table HTTP client.
///
/// Routes match on method and URL without query or fragment. Responses queued
/// on one route are served in order; the last one repeats. Unknown routes
/// answer 404.
#[derive(Debug, Default)]
pub struct StubHttpClient {
    routes: Mutex<HashMap<(Method, String), VecDeque<StubResponse>>>,
    log: Mutex<Vec<RecordedRequest>>,
    served: Arc<AtomicUsize>,
}

fn route_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.to_string()
}

fn parse(url: &str) -> Url {
    Url::parse(url).unwrap_or_else(|e| panic!("stub route {url:?}: {e}"))
}

impl StubHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `response` for `method url`.
    pub fn on(&self, method: Method, url: &str, response: StubResponse) -> &Self {
        self.routes
            .lock()
            .entry((method, route_key(&parse(url))))
            .or_default()
            .push_back(response);
        self
    }

    pub fn on_get(&self, url: &str, response: StubResponse) -> &Self {
        self.on(Method::Get, url, response)
    }

    pub fn on_head(&self, url: &str, response: StubResponse) -> &Self {
        self.on(Method::Head, url, response)
    }

    pub fn on_post(&self, url: &str, response: StubResponse) -> &Self {
        self.on(Method::Post, url, response)
    }

    /// Serve a directory the way Python's `http.server` does.
    ///
    /// `entries` are hrefs; directories end with `/`.
    pub fn simple_http_dir(&self, url: &str, entries: &[&str]) -> &Self {
        let path = parse(url).path().to_string();
        let items: String = entries
            .iter()
            .map(|e| format!("<li><a href=\"{e}\">{e}</a></li>\n"))
            .collect();
        let body = format!(
            "<!DOCTYPE HTML>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
             <title>Directory listing for {path}</title>\n</head>\n<body>\n\
             <h1>Directory listing for {path}</h1>\n<hr>\n<ul>\n{items}</ul>\n<hr>\n</body>\n</html>\n"
        );
        let resp = StubResponse::ok(body)
            .with_header("server", SIMPLE_HTTP_SERVER)
            .with_header("content-type", "text/html; charset=utf-8");
        self.on_head(url, resp.clone());
        self.on_get(url, resp)
    }

    /// Serve a file the way Python's `http.server` does.
    pub fn simple_http_file(&self, url: &str, content: &str, content_type: &str) -> &Self {
        let resp = StubResponse::ok(content.to_string())
            .with_header("server", SIMPLE_HTTP_SERVER)
            .with_header("content-type", content_type)
            .with_header("last-modified", "Tue, 15 Nov 1994 08:12:31 GMT");
        self.on_head(url, resp.clone());
        self.on_get(url, resp)
    }

    /// Every request seen so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().clone()
    }

    /// Requests seen for `method url`, ignoring the query.
    pub fn count(&self, method: Method, url: &str) -> usize {
        let key = route_key(&parse(url));
        self.log
            .lock()
            .iter()
            .filter(|r| r.method == method && route_key(&r.url) == key)
            .count()
    }

    pub fn total(&self) -> usize {
        self.log.lock().len()
    }

    /// Body chunks of chunked responses pulled by readers so far.
    pub fn chunks_served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    fn next_response(&self, method: Method, url: &Url) -> Option<StubResponse> {
        let mut routes = self.routes.lock();
        let queue = routes.get_mut(&(method, route_key(url)))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl HttpClient for StubHttpClient {
    async fn send(&self, request: HttpRequest) -> VfsResult<HttpResponse> {
        self.log.lock().push(RecordedRequest {
            method: request.method,
            url: request.url.clone(),
            body: request.body.clone(),
            proxy: request.proxy.clone(),
        });

        let Some(resp) = self.next_response(request.method, &request.url) else {
            return Ok(HttpResponse::from_bytes(404, request.url, Vec::new(), Bytes::new()));
        };
        if let Some(delay) = resp.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = resp.fail {
            return Err(ConnectionError::msg(message).into());
        }

        let body = if request.method == Method::Head {
            Bytes::new()
        } else {
            resp.body
        };
        match resp.chunk_size {
            Some(size) if !body.is_empty() => {
                let chunks: Vec<VfsResult<Bytes>> = body
                    .chunks(size)
                    .map(|c| Ok(Bytes::copy_from_slice(c)))
                    .collect();
                let served = self.served.clone();
                let body = stream::iter(chunks).inspect(move |_| {
                    served.fetch_add(1, Ordering::SeqCst);
                });
                Ok(HttpResponse::new(resp.status, request.url, resp.headers, body.boxed()))
            }
            _ => Ok(HttpResponse::from_bytes(resp.status, request.url, resp.headers, body)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_routes_in_order_last_sticky() {
        let stub = StubHttpClient::new();
        stub.on_get("http://h/a", StubResponse::ok("one"));
        stub.on_get("http://h/a", StubResponse::ok("two"));

        let url = Url::parse("http://h/a?x=1").unwrap();
        let texts = [
            stub.send(HttpRequest::get(url.clone())).await.unwrap().text().await.unwrap(),
            stub.send(HttpRequest::get(url.clone())).await.unwrap().text().await.unwrap(),
            stub.send(HttpRequest::get(url)).await.unwrap().text().await.unwrap(),
        ];
        assert_eq!(texts, ["one", "two", "two"]);
        assert_eq!(stub.count(Method::Get, "http://h/a"), 3);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let stub = StubHttpClient::new();
        let resp = stub
            .send(HttpRequest::head(Url::parse("http://h/missing").unwrap()))
            .await
            .unwrap();
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn test_chunks_counted_as_pulled() {
        let stub = StubHttpClient::new();
        stub.on_get("http://h/c", StubResponse::ok("abcdefgh").with_chunk_size(3));
        let resp = stub
            .send(HttpRequest::get(Url::parse("http://h/c").unwrap()))
            .await
            .unwrap();
        assert_eq!(stub.chunks_served(), 0);
        assert_eq!(&resp.bytes().await.unwrap()[..], b"abcdefgh");
        assert_eq!(stub.chunks_served(), 3);
    }

    #[tokio::test]
    async fn test_head_has_no_body() {
        let stub = StubHttpClient::new();
        stub.simple_http_file("http://h/f.md", "content", "text/markdown");
        let resp = stub
            .send(HttpRequest::head(Url::parse("http://h/f.md").unwrap()))
            .await
            .unwrap();
        assert_eq!(resp.content_length(), Some(7));
        assert!(resp.bytes().await.unwrap().is_empty());
    }
}
