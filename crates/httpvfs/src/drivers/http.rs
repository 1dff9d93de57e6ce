//! Generic HTTP driver.
//!
//! Probes a URL with HEAD. Servers known to render directory listings get
//! their listing page scraped into child entries; anything else is a single
//! file described by its response headers.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::DateTime;
use futures::FutureExt;
use percent_encoding::percent_decode_str;
use regex::Regex;
use tracing::{debug, trace, warn};
use url::Url;

use crate::action::{
    Capabilities, Context, DirEntry, Driver, DynAction, ReadStream, RemoteAction,
};
use crate::http::{DynHttpClient, HttpRequest, HttpResponse};
use crate::vfs::{VfsError, VfsResult};

/// `server` header prefixes of implementations whose listings we can scrape.
pub const LISTING_SERVERS: &[&str] = &["SimpleHTTP"];

/// Text that marks a body as a directory listing page.
pub const LISTING_MARKER: &str = "Directory listing for";

/// Responses declaring at least this many bytes are never fetched for
/// scraping; at ~1 KiB per row a listing would need ~10000 entries.
pub const OPAQUE_BODY_THRESHOLD: u64 = 10 * 1024 * 1024;

static HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href="((?:\\"|[^"])*)""#).expect("href pattern compiles")
});

/// Whether `server` names a directory-listing implementation.
pub fn is_listing_server(server: &str) -> bool {
    LISTING_SERVERS.iter().any(|p| server.starts_with(p))
}

/// Last non-empty path segment of `url`, percent-decoded.
pub fn name_from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.rev().find(|s| !s.is_empty())?;
    Some(percent_decode_str(segment).decode_utf8_lossy().into_owned())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    /// HEAD first and look at the `server` header.
    Head,
    /// Known listing server; GET directly.
    Listing,
}

/// Action for one URL.
#[derive(Clone)]
pub struct HttpAction {
    url: Url,
    http: DynHttpClient,
    probe: Probe,
}

impl std::fmt::Debug for HttpAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAction")
            .field("url", &self.url.as_str())
            .field("probe", &self.probe)
            .finish()
    }
}

impl HttpAction {
    /// Action for a URL whose server is not known yet.
    pub fn new(url: Url, http: DynHttpClient) -> Self {
        Self {
            url,
            http,
            probe: Probe::Head,
        }
    }

    /// Action for a URL found in a listing page.
    pub fn listing_child(url: Url, http: DynHttpClient) -> Self {
        Self {
            url,
            http,
            probe: Probe::Listing,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn request(&self, req: HttpRequest, ctx: &Context) -> HttpRequest {
        req.with_proxy(ctx.proxy.clone())
    }

    fn shared(&self) -> DynAction {
        Arc::new(self.clone())
    }

    async fn probe_head(&self, ctx: &Context) -> VfsResult<DirEntry> {
        debug!(url = %self.url, "HEAD");
        let res = self
            .http
            .send(self.request(HttpRequest::head(self.url.clone()), ctx))
            .await?
            .error_for_status()?;

        let listing = res.header("server").is_some_and(is_listing_server);
        if !listing {
            return self.file_entry(&res, false);
        }
        if !is_html(&res) || is_opaque(&res) {
            trace!(url = %self.url, "listing server, opaque body");
            return self.file_entry(&res, true);
        }
        self.fetch_listing(ctx).await
    }

    async fn fetch_listing(&self, ctx: &Context) -> VfsResult<DirEntry> {
        debug!(url = %self.url, "GET listing");
        let res = self
            .http
            .send(self.request(HttpRequest::get(self.url.clone()), ctx))
            .await?
            .error_for_status()?;

        // Headers are only needed if this turns out to be a plain file.
        let file = self.file_entry(&res, true)?;
        if !is_html(&res) || is_opaque(&res) {
            trace!(url = %self.url, "opaque body, not scraped");
            return Ok(file);
        }
        let base = res.url.clone();
        let body = res.text().await?;
        if !body.contains(LISTING_MARKER) {
            return Ok(file);
        }

        let children = self.scrape(&base, &body);
        debug!(url = %self.url, entries = children.len(), "scraped listing");
        let name = name_from_url(&self.url).unwrap_or_else(|| "/".to_string());
        Ok(DirEntry::loaded_dir(name, children, self.shared()))
    }

    fn scrape(&self, base: &Url, body: &str) -> Vec<DirEntry> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for cap in HREF.captures_iter(body) {
            let href = cap[1].replace("\\\"", "\"");
            if href.is_empty() || href.starts_with('?') || href.starts_with('#') {
                continue;
            }
            let is_dir = href.ends_with('/');
            let raw = href.trim_end_matches('/');
            if raw.contains('/') || raw.contains('?') {
                warn!(href = %href, "skipping listing entry outside this directory");
                continue;
            }
            let name = percent_decode_str(raw).decode_utf8_lossy().into_owned();
            if name.is_empty() || name == "." || name == ".." {
                continue;
            }
            let url = match base.join(&href) {
                Ok(url) => url,
                Err(e) => {
                    warn!(href = %href, error = %e, "skipping unparseable listing entry");
                    continue;
                }
            };
            if !seen.insert(name.clone()) {
                continue;
            }
            trace!(name = %name, dir = is_dir, "listing entry");

            let action: DynAction = Arc::new(Self::listing_child(url, self.http.clone()));
            entries.push(if is_dir {
                DirEntry::unloaded_dir(action).with_name(name)
            } else {
                DirEntry::file(action).with_name(name).loaded(false)
            });
        }
        entries
    }

    /// Describe a file from response headers.
    ///
    /// Unknown servers only get text (or untyped) bodies; anything else is
    /// not implemented.
    fn file_entry(&self, res: &HttpResponse, any_type: bool) -> VfsResult<DirEntry> {
        if !any_type {
            if let Some(ct) = res.header("content-type") {
                if !ct.starts_with("text") {
                    return Err(VfsError::not_implemented(format!(
                        "{} has content-type {ct}",
                        self.url
                    )));
                }
            }
        }

        let mut entry = DirEntry::file(self.shared());
        if let Some(name) = name_from_url(&self.url) {
            entry = entry.with_name(name);
        }
        if let Some(size) = res.content_length() {
            entry = entry.with_size(size);
        }
        if let Some(modified) = res
            .header("last-modified")
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        {
            entry = entry.with_modified(modified.into());
        }
        Ok(entry)
    }
}

fn is_opaque(res: &HttpResponse) -> bool {
    res.content_length().is_some_and(|n| n >= OPAQUE_BODY_THRESHOLD)
}

fn is_html(res: &HttpResponse) -> bool {
    res.header("content-type")
        .is_none_or(|ct| ct.trim_start().starts_with("text/html"))
}

#[async_trait]
impl RemoteAction for HttpAction {
    fn capabilities(&self) -> Capabilities {
        Capabilities::STREAM
    }

    async fn load_remote(&self, ctx: &Context) -> VfsResult<DirEntry> {
        match self.probe {
            Probe::Head => self.probe_head(ctx).await,
            Probe::Listing => self.fetch_listing(ctx).await,
        }
    }

    fn create_read_stream(&self, ctx: &Context) -> ReadStream {
        let http = self.http.clone();
        let req = self.request(HttpRequest::get(self.url.clone()), ctx);
        ReadStream::deferred(
            async move {
                debug!(url = %req.url, "GET stream");
                let res = http.send(req).await?.error_for_status()?;
                Ok(res.into_read_stream())
            }
            .boxed(),
        )
    }
}

/// Fallback driver for any `http(s)` URL.
#[derive(Debug, Default)]
pub struct HttpDriver;

impl Driver for HttpDriver {
    fn name(&self) -> &str {
        "http"
    }

    fn accepts(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
    }

    fn create_action(&self, url: &Url, http: DynHttpClient) -> VfsResult<DynAction> {
        if !self.accepts(url) {
            return Err(VfsError::invalid_url(format!("unsupported scheme: {url}")));
        }
        Ok(Arc::new(HttpAction::new(url.clone(), http)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::EntryKind;
    use crate::http::testing::{StubHttpClient, StubResponse, SIMPLE_HTTP_SERVER};
    use crate::http::Method;
    use futures::StreamExt;
    use std::time::Duration;

    fn action(stub: &Arc<StubHttpClient>, url: &str) -> HttpAction {
        HttpAction::new(Url::parse(url).unwrap(), stub.clone())
    }

    fn children(entry: &DirEntry) -> Vec<(String, bool)> {
        match &entry.kind {
            EntryKind::LoadedDir { children } => children
                .iter()
                .map(|c| (c.name.clone().unwrap(), c.file_type().is_dir()))
                .collect(),
            other => panic!("expected listing, got {other:?}"),
        }
    }

    #[test]
    fn test_name_from_url() {
        let url = Url::parse("http://h/a/My%20File.md").unwrap();
        assert_eq!(name_from_url(&url).as_deref(), Some("My File.md"));
        let url = Url::parse("http://h/dir/").unwrap();
        assert_eq!(name_from_url(&url).as_deref(), Some("dir"));
        assert_eq!(name_from_url(&Url::parse("http://h/").unwrap()), None);
    }

    #[test]
    fn test_listing_server_prefix() {
        assert!(is_listing_server("SimpleHTTP/0.6 Python/3.12.3"));
        assert!(!is_listing_server("nginx/1.25"));
    }

    #[tokio::test]
    async fn test_listing_scraped() {
        let stub = Arc::new(StubHttpClient::new());
        stub.simple_http_dir("http://h/", &["Dir1/", "File1.md", "Html.html"]);

        let entry = action(&stub, "http://h/").load_remote(&Context::new()).await.unwrap();
        assert_eq!(
            children(&entry),
            vec![
                ("Dir1".to_string(), true),
                ("File1.md".to_string(), false),
                ("Html.html".to_string(), false),
            ]
        );
        match &entry.kind {
            EntryKind::LoadedDir { children } => assert!(children.iter().all(|c| !c.is_loaded())),
            _ => unreachable!(),
        }
        assert_eq!(stub.count(Method::Head, "http://h/"), 1);
        assert_eq!(stub.count(Method::Get, "http://h/"), 1);
    }

    #[tokio::test]
    async fn test_listing_decodes_and_skips() {
        let stub = Arc::new(StubHttpClient::new());
        stub.simple_http_dir(
            "http://h/d/",
            &["../", "?C=N;O=D", "My%20Notes.txt", "My%20Notes.txt", "sub/", "/abs/x"],
        );

        let entry = action(&stub, "http://h/d/").load_remote(&Context::new()).await.unwrap();
        assert_eq!(
            children(&entry),
            vec![("My Notes.txt".to_string(), false), ("sub".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_listing_child_urls_resolve_against_directory() {
        let stub = Arc::new(StubHttpClient::new());
        stub.simple_http_dir("http://h/d", &["x.md"]);
        stub.simple_http_file("http://h/d/x.md", "hi", "text/markdown");

        let entry = action(&stub, "http://h/d").load_remote(&Context::new()).await.unwrap();
        let EntryKind::LoadedDir { children } = entry.kind else {
            panic!("expected listing");
        };
        let body = children[0]
            .action
            .create_read_stream(&Context::new())
            .collect_bytes()
            .await
            .unwrap();
        assert_eq!(&body[..], b"hi");
    }

    #[tokio::test]
    async fn test_text_file_without_listing_server() {
        let stub = Arc::new(StubHttpClient::new());
        stub.on_head(
            "http://h/readme.txt",
            StubResponse::ok("hello")
                .with_header("content-type", "text/plain")
                .with_header("last-modified", "Tue, 15 Nov 1994 08:12:31 GMT"),
        );

        let entry = action(&stub, "http://h/readme.txt")
            .load_remote(&Context::new())
            .await
            .unwrap();
        assert!(entry.file_type().is_file());
        assert!(entry.is_loaded());
        assert_eq!(entry.size, Some(5));
        assert_eq!(entry.name.as_deref(), Some("readme.txt"));
        assert!(entry.modified.is_some());
        assert_eq!(stub.count(Method::Get, "http://h/readme.txt"), 0);
    }

    #[tokio::test]
    async fn test_binary_without_listing_server_is_not_implemented() {
        let stub = Arc::new(StubHttpClient::new());
        stub.on_head(
            "http://h/a.bin",
            StubResponse::ok("x").with_header("content-type", "application/octet-stream"),
        );
        let err = action(&stub, "http://h/a.bin")
            .load_remote(&Context::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::NotImplemented(_)));
    }

    #[tokio::test]
    async fn test_untyped_response_is_file() {
        let stub = Arc::new(StubHttpClient::new());
        stub.on_head("http://h/raw", StubResponse::ok("abc"));
        let entry = action(&stub, "http://h/raw").load_remote(&Context::new()).await.unwrap();
        assert!(entry.file_type().is_file());
    }

    #[tokio::test]
    async fn test_large_listing_body_is_opaque() {
        let stub = Arc::new(StubHttpClient::new());
        stub.on_head(
            "http://h/big.html",
            StubResponse::status(200)
                .with_header("server", "SimpleHTTP/0.6 Python/3.12.3")
                .with_header("content-type", "text/html")
                .with_header("content-length", OPAQUE_BODY_THRESHOLD.to_string()),
        );
        let entry = action(&stub, "http://h/big.html")
            .load_remote(&Context::new())
            .await
            .unwrap();
        assert!(entry.file_type().is_file());
        assert_eq!(entry.size, Some(OPAQUE_BODY_THRESHOLD));
        assert_eq!(stub.count(Method::Get, "http://h/big.html"), 0);
    }

    #[tokio::test]
    async fn test_large_listing_child_is_not_scraped() {
        let stub = Arc::new(StubHttpClient::new());
        let declared = 4 * OPAQUE_BODY_THRESHOLD;
        stub.on_get(
            "http://h/d/huge.html",
            StubResponse::status(200)
                .with_header("server", SIMPLE_HTTP_SERVER)
                .with_header("content-type", "text/html")
                .with_header("content-length", declared.to_string())
                .with_body(format!("<h1>{LISTING_MARKER} /d/huge.html</h1><a href=\"x\">x</a>")),
        );
        let child = HttpAction::listing_child(Url::parse("http://h/d/huge.html").unwrap(), stub.clone());
        let entry = child.load_remote(&Context::new()).await.unwrap();
        assert!(entry.file_type().is_file());
        assert_eq!(entry.size, Some(declared));
        assert_eq!(stub.count(Method::Head, "http://h/d/huge.html"), 0);
    }

    #[tokio::test]
    async fn test_stream_transport_failure_is_stream_item() {
        let stub = Arc::new(StubHttpClient::new());
        stub.on_get("http://h/f", StubResponse::connection_error("connection reset"));
        let err = action(&stub, "http://h/f")
            .create_read_stream(&Context::new())
            .collect_bytes()
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::Connection(_)));
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_transfer() {
        let stub = Arc::new(StubHttpClient::new());
        stub.on_get("http://h/f", StubResponse::ok(vec![b'x'; 40]).with_chunk_size(4));
        let mut stream = action(&stub, "http://h/f").create_read_stream(&Context::new());
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 4);
        drop(stream);
        tokio::task::yield_now().await;
        assert_eq!(stub.chunks_served(), 1);
        assert_eq!(stub.count(Method::Get, "http://h/f"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_pending_stream_abandons_request() {
        let stub = Arc::new(StubHttpClient::new());
        stub.on_get(
            "http://h/slow",
            StubResponse::ok("late body")
                .with_chunk_size(2)
                .with_delay(Duration::from_secs(60)),
        );
        let mut stream = action(&stub, "http://h/slow").create_read_stream(&Context::new());
        let pending = tokio::time::timeout(Duration::from_millis(10), stream.next()).await;
        assert!(pending.is_err());
        drop(stream);
        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(stub.count(Method::Get, "http://h/slow"), 1);
        assert_eq!(stub.chunks_served(), 0);
    }

    #[tokio::test]
    async fn test_html_without_marker_is_file() {
        let stub = Arc::new(StubHttpClient::new());
        stub.simple_http_file("http://h/Html.html", "<html>hi</html>", "text/html");
        let entry = action(&stub, "http://h/Html.html")
            .load_remote(&Context::new())
            .await
            .unwrap();
        assert!(entry.file_type().is_file());
        assert_eq!(entry.size, Some(15));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let stub = Arc::new(StubHttpClient::new());
        stub.on_head("http://h/secret", StubResponse::status(403));
        let err = action(&stub, "http://h/gone").load_remote(&Context::new()).await.unwrap_err();
        assert!(matches!(err, VfsError::NotFound(_)));
        let err = action(&stub, "http://h/secret")
            .load_remote(&Context::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_stream_uses_context_proxy() {
        let stub = Arc::new(StubHttpClient::new());
        stub.on_get("http://h/f", StubResponse::ok("body"));
        let proxy = Url::parse("http://127.0.0.1:8080").unwrap();
        let ctx = Context::new().with_proxy(proxy.clone());

        let stream = action(&stub, "http://h/f").create_read_stream(&ctx);
        assert_eq!(stub.total(), 0);
        let progress = stream.progress();
        assert_eq!(&stream.collect_bytes().await.unwrap()[..], b"body");
        assert_eq!(progress.borrow().total, Some(4));
        assert_eq!(stub.requests()[0].proxy, Some(proxy));
    }

    #[test]
    fn test_driver_rejects_other_schemes() {
        let stub: DynHttpClient = Arc::new(StubHttpClient::new());
        let url = Url::parse("ftp://h/x").unwrap();
        assert!(HttpDriver.create_action(&url, stub).is_err());
    }
}
