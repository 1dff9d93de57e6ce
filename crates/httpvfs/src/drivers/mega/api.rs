//! MEGA request envelope.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use super::error::ProtocolError;
use crate::action::Context;
use crate::http::{DynHttpClient, HttpRequest};
use crate::vfs::{VfsError, VfsResult};

/// Public API gateway.
pub const DEFAULT_GATEWAY: &str = "https://g.api.mega.co.nz/";

/// Longest wait between EAGAIN retries.
pub const MAX_BACKOFF: Duration = Duration::from_secs(64);

/// `2^attempt` seconds, capped at [`MAX_BACKOFF`].
fn backoff(attempt: u32) -> Duration {
    let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

/// State shared by every node loaded through the same link.
#[derive(Debug)]
pub struct ApiContext {
    session_id: Option<String>,
    counter: AtomicU64,
    gateway: Url,
    keepalive: bool,
    max_retries: u32,
    sequence: Mutex<Option<String>>,
    http: DynHttpClient,
}

pub type SharedApiContext = Arc<ApiContext>;

impl ApiContext {
    /// Anonymous context on the public gateway. The request counter starts at
    /// a random value.
    pub fn new(http: DynHttpClient) -> Self {
        let gateway = Url::parse(DEFAULT_GATEWAY).expect("default gateway is a valid URL");
        Self {
            session_id: None,
            counter: AtomicU64::new(u64::from(rand::random::<u32>())),
            gateway,
            keepalive: false,
            max_retries: 0,
            sequence: Mutex::new(None),
            http,
        }
    }

    pub fn with_gateway(mut self, gateway: Url) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn with_session_id(mut self, sid: impl Into<String>) -> Self {
        self.session_id = Some(sid.into());
        self
    }

    /// Retry `EAGAIN` responses up to `n` times with exponential backoff.
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Track the server sequence number reported in responses.
    pub fn with_keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_counter(self, start: u64) -> Self {
        self.counter.store(start, Ordering::SeqCst);
        self
    }

    pub fn http(&self) -> &DynHttpClient {
        &self.http
    }

    pub fn gateway(&self) -> &Url {
        &self.gateway
    }

    /// Last sequence number seen while keepalive is on.
    pub fn sequence_number(&self) -> Option<String> {
        self.sequence.lock().clone()
    }

    fn endpoint(&self, query: &[(&str, &str)]) -> VfsResult<Url> {
        let mut url = self.gateway.join("cs")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("id", &self.counter.fetch_add(1, Ordering::SeqCst).to_string());
            if let Some(sid) = &self.session_id {
                pairs.append_pair("sid", sid);
            }
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    /// Send one command and return its response object.
    ///
    /// A bare negative integer, alone or as the sole array element, is a
    /// [`ProtocolError`].
    pub async fn request(&self, ctx: &Context, query: &[(&str, &str)], body: Value) -> VfsResult<Value> {
        let mut attempt = 0u32;
        loop {
            match self.request_once(ctx, query, &body).await {
                Err(VfsError::Protocol(e)) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let wait = backoff(attempt);
                    warn!(attempt, ?wait, "MEGA busy, retrying");
                    tokio::time::sleep(wait).await;
                }
                other => return other,
            }
        }
    }

    async fn request_once(&self, ctx: &Context, query: &[(&str, &str)], body: &Value) -> VfsResult<Value> {
        let url = self.endpoint(query)?;
        debug!(url = %url, verb = %body["a"], "MEGA request");
        let req = HttpRequest::post_json(url, &json!([body]))?.with_proxy(ctx.proxy.clone());
        let res = self.http.send(req).await?;

        if !res.is_success() {
            let err = ProtocolError::from_status(res.status, format!("MEGA API returned status {}", res.status))
                .with_response(&res);
            return Err(err.into());
        }
        let carrier = ProtocolError::from_code(0).with_response(&res);
        let value = res.json().await?;

        let first = match value {
            Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            Value::Array(_) => return Err(ProtocolError::malformed("empty MEGA response").into()),
            other => other,
        };
        if let Some(code) = first.as_i64() {
            if code < 0 {
                let mut err = ProtocolError::from_code(code).with_time_left(carrier.time_left);
                err.status = carrier.status;
                return Err(err.into());
            }
        }
        if self.keepalive {
            if let Some(sn) = first.get("sn").and_then(Value::as_str) {
                *self.sequence.lock() = Some(sn.to_string());
            }
        }
        Ok(first)
    }
}
