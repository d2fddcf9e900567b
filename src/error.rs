//! Error types for request execution.
//!
//! One crate-level [`Error`] covers every terminal outcome a caller can observe. It is `Clone`
//! so a [`LazyResponse`](crate::LazyResponse) can hand the identical failure to every body-read
//! invocation that shares one execution.
use crate::request::Request;
use crate::response::{BodyKind, Response};
use http::Method;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Classification of a failed attempt, matched against
/// [`RetryPolicy::error_codes`](crate::RetryPolicy::error_codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCode {
    /// The per-attempt timeout elapsed.
    Timeout,
    /// Connection could not be established.
    Connect,
    /// Host name resolution failed.
    Dns,
    /// The peer reset or closed the connection mid-exchange.
    ConnectionReset,
    /// Reading the response failed after headers arrived.
    Read,
    /// Anything the transport could not classify further.
    Other,
}

impl ErrorCode {
    /// Every classification, in declaration order.
    pub const ALL: [ErrorCode; 6] = [
        ErrorCode::Timeout,
        ErrorCode::Connect,
        ErrorCode::Dns,
        ErrorCode::ConnectionReset,
        ErrorCode::Read,
        ErrorCode::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Timeout => "timeout",
            ErrorCode::Connect => "connect",
            ErrorCode::Dns => "dns",
            ErrorCode::ConnectionReset => "connection_reset",
            ErrorCode::Read => "read",
            ErrorCode::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a [`Fetch`](crate::Fetch) capability.
#[derive(Debug, Clone)]
pub struct FetchError {
    code: ErrorCode,
    message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl FetchError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), source: None }
    }

    /// Attach the transport's underlying error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Connect, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Other, message)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.code, self.message)
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// A non-ok response was the terminal outcome.
///
/// `message` is public so `before_error` hooks can enrich it (for example with the response
/// body text) before the error reaches the caller.
#[derive(Debug, Clone)]
pub struct HttpError {
    pub message: String,
    pub request: Request,
    pub response: Response,
}

impl HttpError {
    pub fn new(request: Request, response: Response) -> Self {
        let status = response.status();
        let reason = status.canonical_reason().map(|r| format!(" {r}")).unwrap_or_default();
        let message = format!(
            "Request failed with status code {}{}: {} {}",
            status.as_u16(),
            reason,
            request.method(),
            request.url()
        );
        Self { message, request, response }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

/// The per-attempt timeout fired before the fetch capability answered.
#[derive(Debug, Clone)]
pub struct TimeoutError {
    pub request: Request,
    pub timeout: Duration,
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Request timed out: {} {}", self.request.method(), self.request.url())
    }
}

impl std::error::Error for TimeoutError {}

/// Unified error for every request outcome that is not a response.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Merged options are invalid. Never retried.
    #[error("invalid options: {0}")]
    Configuration(String),
    /// URL or body could not be assembled. Never retried.
    #[error("failed to build request: {0}")]
    RequestBuild(String),
    /// The fetch capability failed.
    #[error("network failure: {0}")]
    Network(#[source] FetchError),
    /// A non-ok response was the terminal outcome.
    #[error(transparent)]
    Http(Box<HttpError>),
    /// The per-attempt timeout fired.
    #[error(transparent)]
    Timeout(Box<TimeoutError>),
    /// The caller-supplied signal fired. Never retried.
    #[error("request cancelled: {method} {url}")]
    Cancelled { method: Method, url: String },
    /// A second, different body read was attempted on one response.
    #[error("response body already consumed as {consumed}; cannot read it as {requested}")]
    BodyAlreadyConsumed { consumed: BodyKind, requested: BodyKind },
    /// A before-retry hook stopped the call, so there is no body to read.
    #[error("no response: retrying was stopped by a before_retry hook")]
    NoResponse,
    /// The response body did not parse as the requested representation.
    #[error("failed to decode response body as {kind}: {message}")]
    Decode { kind: BodyKind, message: String },
    /// Raised by user hook code.
    #[error("hook failed: {0}")]
    Hook(String),
    /// The task driving the call was cancelled by its runtime before finishing.
    #[error("request task ended early: {0}")]
    Interrupted(String),
}

impl Error {
    pub fn hook(message: impl Into<String>) -> Self {
        Error::Hook(message.into())
    }

    pub(crate) fn http(request: Request, response: Response) -> Self {
        Error::Http(Box::new(HttpError::new(request, response)))
    }

    pub(crate) fn timeout(request: Request, timeout: Duration) -> Self {
        Error::Timeout(Box::new(TimeoutError { request, timeout }))
    }

    pub(crate) fn cancelled(request: &Request) -> Self {
        Error::Cancelled { method: request.method().clone(), url: request.url().to_string() }
    }

    /// Retry classification for errors raised by the transport or the timeout.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Network(e) => Some(e.code()),
            Error::Timeout(_) => Some(ErrorCode::Timeout),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    pub fn is_http(&self) -> bool {
        matches!(self, Error::Http(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    pub fn is_body_already_consumed(&self) -> bool {
        matches!(self, Error::BodyAlreadyConsumed { .. })
    }

    /// Borrow the HTTP error details if this is an `Http` variant.
    pub fn as_http(&self) -> Option<&HttpError> {
        match self {
            Error::Http(e) => Some(e),
            _ => None,
        }
    }

    /// Mutably borrow the HTTP error details, e.g. to rewrite the message in a hook.
    pub fn as_http_mut(&mut self) -> Option<&mut HttpError> {
        match self {
            Error::Http(e) => Some(e),
            _ => None,
        }
    }

    /// The response attached to an `Http` error.
    pub fn response(&self) -> Option<&Response> {
        self.as_http().map(|e| &e.response)
    }

    pub fn status(&self) -> Option<http::StatusCode> {
        self.response().map(Response::status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use std::error::Error as _;
    use url::Url;

    fn request() -> Request {
        Request::new(Method::GET, Url::parse("https://example.com/users").unwrap())
    }

    #[derive(Debug)]
    struct Refused;

    impl fmt::Display for Refused {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "connection refused")
        }
    }

    impl std::error::Error for Refused {}

    #[test]
    fn http_error_message_names_status_method_and_url() {
        let err = Error::http(request(), Response::new(StatusCode::NOT_FOUND));
        assert_eq!(
            err.to_string(),
            "Request failed with status code 404 Not Found: GET https://example.com/users"
        );
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert!(err.is_http());
    }

    #[test]
    fn timeout_error_message() {
        let err = Error::timeout(request(), Duration::from_millis(100));
        assert_eq!(err.to_string(), "Request timed out: GET https://example.com/users");
        assert_eq!(err.code(), Some(ErrorCode::Timeout));
        assert!(err.is_timeout());
    }

    #[test]
    fn network_error_exposes_code_and_source() {
        let err = Error::Network(FetchError::connect("refused").with_source(Refused));
        assert_eq!(err.code(), Some(ErrorCode::Connect));
        let source = err.source().expect("fetch error source");
        assert_eq!(source.source().unwrap().to_string(), "connection refused");
    }

    #[test]
    fn cancelled_and_configuration_have_no_code() {
        assert_eq!(Error::cancelled(&request()).code(), None);
        assert_eq!(Error::Configuration("bad".into()).code(), None);
    }

    #[test]
    fn http_message_can_be_rewritten() {
        let mut err = Error::http(request(), Response::new(StatusCode::BAD_GATEWAY));
        if let Some(http) = err.as_http_mut() {
            http.message = "upstream down".into();
        }
        assert_eq!(err.to_string(), "upstream down");
    }

    #[test]
    fn error_codes_render_snake_case() {
        let rendered: Vec<_> = ErrorCode::ALL.iter().map(ErrorCode::to_string).collect();
        assert_eq!(rendered, ["timeout", "connect", "dns", "connection_reset", "read", "other"]);
    }
}
