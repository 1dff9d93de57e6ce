//! MEGA API error codes.

use thiserror::Error;

use crate::http::HttpResponse;

/// Response header carrying the seconds left on a rate limit.
pub const TIME_LEFT_HEADER: &str = "x-mega-time-left";

pub const EAGAIN: i64 = -3;
pub const ERATELIMIT: i64 = -4;
pub const ENOENT: i64 = -9;
pub const EKEY: i64 = -14;
pub const EBLOCKED: i64 = -16;

/// Names and descriptions indexed by `-code - 1`.
const CODES: [(&str, &str); 18] = [
    ("EINTERNAL", "An internal error has occurred"),
    ("EARGS", "Invalid arguments were passed to the command"),
    (
        "EAGAIN",
        "A temporary congestion or server malfunction prevented the request from being processed",
    ),
    ("ERATELIMIT", "Command weight per time quota exceeded"),
    ("EFAILED", "The upload failed"),
    (
        "ETOOMANY",
        "Too many concurrent IP addresses are accessing this upload target URL",
    ),
    (
        "ERANGE",
        "The upload file packet is out of range or not on a chunk boundary",
    ),
    ("EEXPIRED", "The upload target URL has expired"),
    ("ENOENT", "Object (typically, node or user) not found"),
    ("ECIRCULAR", "Circular linkage attempted"),
    (
        "EACCESS",
        "Access violation (e.g., trying to write to a read-only share)",
    ),
    ("EEXIST", "Trying to create an object that already exists"),
    ("EINCOMPLETE", "Trying to access an incomplete resource"),
    ("EKEY", "A decryption operation failed"),
    ("ESID", "Invalid or expired user session"),
    ("EBLOCKED", "User blocked"),
    ("EOVERQUOTA", "Request over quota"),
    ("ETEMPUNAVAIL", "Resource temporarily not available"),
];

fn lookup(code: i64) -> Option<(&'static str, &'static str)> {
    let index = usize::try_from(-code - 1).ok()?;
    CODES.get(index).copied()
}

/// A negative MEGA response code, or a failed MEGA HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.description())]
pub struct ProtocolError {
    /// Negative API code; 0 when the failure carried no code.
    pub code: i64,
    /// HTTP status of the response that carried the error.
    pub status: Option<u16>,
    /// Seconds until a rate limit lifts.
    pub time_left: Option<u64>,
    message: Option<String>,
}

impl ProtocolError {
    /// Error for a negative response code.
    pub fn from_code(code: i64) -> Self {
        Self {
            code,
            status: None,
            time_left: None,
            message: None,
        }
    }

    /// Error for a non-success HTTP status with no API code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            code: 0,
            status: Some(status),
            time_left: None,
            message: Some(message.into()),
        }
    }

    /// Error for a response that had no usable shape.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            code: 0,
            status: None,
            time_left: None,
            message: Some(message.into()),
        }
    }

    /// Record status and rate-limit header of the response that carried this
    /// error. A time-left header on an uncoded error marks it rate limited.
    pub fn with_response(self, res: &HttpResponse) -> Self {
        let time_left = res.header(TIME_LEFT_HEADER).and_then(|v| v.trim().parse().ok());
        self.with_status(res.status).with_time_left(time_left)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_time_left(mut self, time_left: Option<u64>) -> Self {
        if time_left.is_some() {
            self.time_left = time_left;
            if self.code == 0 {
                self.code = ERATELIMIT;
            }
        }
        self
    }

    /// Symbolic name of the code, e.g. `ENOENT`.
    pub fn name(&self) -> Option<&'static str> {
        lookup(self.code).map(|(name, _)| name)
    }

    /// Human-readable description.
    pub fn description(&self) -> String {
        let mut out = match (lookup(self.code), &self.message) {
            (Some((name, text)), _) => format!("{name} ({}): {text}", self.code),
            (None, Some(message)) => message.clone(),
            (None, None) => format!("MEGA error ({})", self.code),
        };
        if let Some(status) = self.status {
            if !(200..300).contains(&status) {
                out.push_str(&format!(" [status {status}]"));
            }
        }
        if let Some(secs) = self.time_left {
            out.push_str(&format!(" [{secs}s left]"));
        }
        out
    }

    pub fn is_rate_limited(&self) -> bool {
        self.code == ERATELIMIT || self.time_left.is_some()
    }

    /// Whether a retry may succeed without changing the request.
    pub fn is_transient(&self) -> bool {
        self.code == EAGAIN
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ENOENT
    }
}
