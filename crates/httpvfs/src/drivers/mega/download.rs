//! Ranged, decrypting downloads.

use futures::FutureExt;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use super::api::SharedApiContext;
use super::crypto::ContentDecryptor;
use super::error::ProtocolError;
use super::nodes::{DownloadId, MegaNode};
use crate::action::{Context, ReadStream, SkipBytes};
use crate::http::HttpRequest;
use crate::vfs::{VfsError, VfsResult};

/// Download options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    /// First plaintext byte to deliver.
    pub start: u64,
    /// Last plaintext byte to deliver, inclusive. Defaults to the last byte.
    pub end: Option<u64>,
    /// Parallel connections. Only 1 is supported.
    pub max_connections: u32,
    /// Ask for an https download URL.
    pub force_https: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            start: 0,
            end: None,
            max_connections: 1,
            force_https: true,
        }
    }
}

impl DownloadOptions {
    pub fn range(start: u64, end: Option<u64>) -> Self {
        Self {
            start,
            end,
            ..Default::default()
        }
    }
}

/// Stream the decrypted content of `node`.
///
/// Returns at once; the metadata request and the ranged fetch run when the
/// stream is first polled, and their failures arrive as stream errors.
pub fn download(api: SharedApiContext, ctx: &Context, node: &MegaNode, options: DownloadOptions) -> ReadStream {
    if node.is_directory {
        return ReadStream::failed(VfsError::is_a_directory(node.node_id.clone()));
    }
    if options.max_connections != 1 {
        return ReadStream::failed(VfsError::not_implemented(format!(
            "download with {} connections",
            options.max_connections
        )));
    }

    let ctx = ctx.clone();
    let node = node.clone();
    ReadStream::deferred(async move { open(api, ctx, node, options).await }.boxed())
}

async fn open(api: SharedApiContext, ctx: Context, node: MegaNode, options: DownloadOptions) -> VfsResult<ReadStream> {
    let start = options.start;
    let aligned = start - start % 16;
    let ssl = if options.force_https { 2 } else { 0 };

    let meta = match &node.download_id {
        DownloadId::Public(id) => {
            api.request(&ctx, &[], json!({"a": "g", "g": 1, "ssl": ssl, "p": id}))
                .await?
        }
        DownloadId::Shared { folder, node: id } => {
            api.request(&ctx, &[("n", folder.as_str())], json!({"a": "g", "g": 1, "ssl": ssl, "n": id}))
                .await?
        }
    };

    let gateway = meta
        .get("g")
        .and_then(Value::as_str)
        .filter(|g| g.starts_with("http"))
        .ok_or_else(|| ProtocolError::malformed("MEGA returned no download URL, possibly rate limited"))?;
    let size = meta.get("s").and_then(Value::as_u64).unwrap_or(node.size);

    let end = match options.end {
        Some(end) => end,
        None if size == 0 => return Ok(ReadStream::empty()),
        None => size - 1,
    };
    if start > end {
        return Err(VfsError::InvalidRange(format!(
            "start {start} is past end {end} of {}",
            node.node_id
        )));
    }

    let url = Url::parse(&format!("{gateway}/{aligned}-{end}"))?;
    debug!(node = %node.node_id, start, aligned, end, "MEGA ranged fetch");
    let res = api
        .http()
        .send(HttpRequest::get(url).with_proxy(ctx.proxy.clone()))
        .await?;
    if res.status != 200 {
        let err = ProtocolError::from_status(res.status, format!("MEGA download returned status {}", res.status))
            .with_response(&res);
        return Err(err.into());
    }

    let mut stream = res
        .into_read_stream()
        .pipe(ContentDecryptor::new(&node.key, node.nonce, aligned));
    if aligned != start {
        stream = stream.pipe(SkipBytes::new(start - aligned));
    }
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::mega::api::ApiContext;
    use crate::http::testing::{StubHttpClient, StubResponse};
    use crate::http::Method;
    use std::sync::Arc;

    const CS: &str = "https://g.api.mega.co.nz/cs";
    const GATEWAY: &str = "https://gfs.example.net/dl/abc";
    const KEY: [u8; 16] = [0x42; 16];
    const NONCE: [u8; 8] = [0x24; 8];

    fn plaintext() -> Vec<u8> {
        (0..40u8).map(|b| b'a' + (b % 26)).collect()
    }

    fn ciphertext() -> Vec<u8> {
        let mut data = plaintext();
        ContentDecryptor::new(&KEY, NONCE, 0).apply(&mut data);
        data
    }

    fn node() -> MegaNode {
        MegaNode {
            node_id: "N".into(),
            download_id: DownloadId::Shared {
                folder: "F".into(),
                node: "N".into(),
            },
            is_directory: false,
            key: KEY,
            nonce: NONCE,
            size: 40,
            timestamp: None,
            owner: None,
            attributes: None,
            children: Vec::new(),
            parent: None,
        }
    }

    fn setup() -> (Arc<StubHttpClient>, SharedApiContext) {
        let stub = Arc::new(StubHttpClient::new());
        stub.on_post(CS, StubResponse::ok(json!([{"g": GATEWAY, "s": 40}]).to_string()));
        let api = Arc::new(ApiContext::new(stub.clone()));
        (stub, api)
    }

    #[tokio::test]
    async fn test_range_alignment() {
        let (stub, api) = setup();
        stub.on_get(&format!("{GATEWAY}/0-19"), StubResponse::ok(ciphertext()[..20].to_vec()));

        let out = download(api, &Context::new(), &node(), DownloadOptions::range(5, Some(19)))
            .collect_bytes()
            .await
            .unwrap();
        assert_eq!(out.len(), 15);
        assert_eq!(&out[..], &plaintext()[5..20]);
        assert_eq!(stub.count(Method::Get, &format!("{GATEWAY}/0-19")), 1);

        let meta = stub.requests()[0].clone();
        assert!(meta.url.query().unwrap().ends_with("&n=F"));
        assert_eq!(meta.json().unwrap(), json!([{"a": "g", "g": 1, "ssl": 2, "n": "N"}]));
    }

    #[tokio::test]
    async fn test_full_download_in_chunks() {
        let (stub, api) = setup();
        stub.on_get(
            &format!("{GATEWAY}/0-39"),
            StubResponse::ok(ciphertext()).with_chunk_size(7),
        );
        let stream = download(api, &Context::new(), &node(), DownloadOptions::default());
        let progress = stream.progress();
        let out = stream.collect_bytes().await.unwrap();
        assert_eq!(&out[..], &plaintext()[..]);
        assert_eq!(progress.borrow().transferred, 40);
        assert_eq!(progress.borrow().total, Some(40));
    }

    #[tokio::test]
    async fn test_aligned_start_skips_nothing() {
        let (stub, api) = setup();
        stub.on_get(&format!("{GATEWAY}/16-39"), StubResponse::ok(ciphertext()[16..].to_vec()));
        let out = download(api, &Context::new(), &node(), DownloadOptions::range(16, None))
            .collect_bytes()
            .await
            .unwrap();
        assert_eq!(&out[..], &plaintext()[16..]);
    }

    #[tokio::test]
    async fn test_start_past_end_is_stream_error() {
        let (_stub, api) = setup();
        let err = download(api, &Context::new(), &node(), DownloadOptions::range(50, None))
            .collect_bytes()
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::InvalidRange(_)));
    }

    #[tokio::test]
    async fn test_missing_gateway_url() {
        let stub = Arc::new(StubHttpClient::new());
        stub.on_post(CS, StubResponse::ok(json!([{"s": 40}]).to_string()));
        let api = Arc::new(ApiContext::new(stub.clone()));
        let err = download(api, &Context::new(), &node(), DownloadOptions::default())
            .collect_bytes()
            .await
            .unwrap_err();
        assert!(err.as_protocol().is_some());
    }

    #[tokio::test]
    async fn test_non_200_fetch() {
        let (stub, api) = setup();
        stub.on_get(
            &format!("{GATEWAY}/0-39"),
            StubResponse::status(509).with_header("x-mega-time-left", "12"),
        );
        let err = download(api, &Context::new(), &node(), DownloadOptions::default())
            .collect_bytes()
            .await
            .unwrap_err();
        let proto = err.as_protocol().unwrap();
        assert_eq!(proto.status, Some(509));
        assert_eq!(proto.time_left, Some(12));
    }

    #[tokio::test]
    async fn test_transport_failure_on_fetch_is_stream_item() {
        let (stub, api) = setup();
        stub.on_get(&format!("{GATEWAY}/0-39"), StubResponse::connection_error("reset by peer"));
        let stream = download(api, &Context::new(), &node(), DownloadOptions::default());
        assert_eq!(stub.total(), 0);
        let err = stream.collect_bytes().await.unwrap_err();
        assert!(matches!(err, VfsError::Connection(_)));
        assert!(err.to_string().contains("reset by peer"));
        assert_eq!(stub.count(Method::Get, &format!("{GATEWAY}/0-39")), 1);
    }

    #[tokio::test]
    async fn test_dropped_download_stops_pulling_chunks() {
        use futures::StreamExt;

        let (stub, api) = setup();
        stub.on_get(
            &format!("{GATEWAY}/0-39"),
            StubResponse::ok(ciphertext()).with_chunk_size(8),
        );
        let mut stream = download(api, &Context::new(), &node(), DownloadOptions::default());
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(&first[..], &plaintext()[..8]);
        drop(stream);
        assert_eq!(stub.chunks_served(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_options_fail_without_io() {
        let (stub, api) = setup();
        let opts = DownloadOptions {
            max_connections: 4,
            ..Default::default()
        };
        let err = download(api.clone(), &Context::new(), &node(), opts)
            .collect_bytes()
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::NotImplemented(_)));

        let mut dir = node();
        dir.is_directory = true;
        let err = download(api, &Context::new(), &dir, DownloadOptions::default())
            .collect_bytes()
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::IsADirectory(_)));
        assert_eq!(stub.total(), 0);
    }

    #[tokio::test]
    async fn test_public_file_request_shape() {
        let (stub, api) = setup();
        stub.on_get(&format!("{GATEWAY}/0-39"), StubResponse::ok(ciphertext()));
        let mut public = node();
        public.download_id = DownloadId::Public("PUB".into());
        download(api, &Context::new(), &public, DownloadOptions::default())
            .collect_bytes()
            .await
            .unwrap();
        assert_eq!(
            stub.requests()[0].json().unwrap(),
            json!([{"a": "g", "g": 1, "ssl": 2, "p": "PUB"}])
        );
    }
}
