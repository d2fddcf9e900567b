//! Outbound request assembly.
//!
//! [`PreparedRequest::new`] resolves the URL, headers and body for a call once; every attempt
//! then gets a fresh clone through [`PreparedRequest::build`]. Bodies are buffered as [`Bytes`],
//! so a retry replays exactly the same payload without re-reading any stream.

use crate::options::{NormalizedOptions, RequestBody};
use crate::response::BodyKind;
use crate::{Error, Result};
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use http::Method;
use url::{form_urlencoded, Url};

/// An outbound HTTP request as handed to the fetch capability.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url, headers: HeaderMap::new(), body: None }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn method_mut(&mut self) -> &mut Method {
        &mut self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn set_body(&mut self, body: Option<Bytes>) {
        self.body = body;
    }
}

/// What a call targets.
#[derive(Debug, Clone)]
pub enum Input {
    /// Absolute URL, or a path joined onto `prefix_url`.
    Url(String),
    Parsed(Url),
    /// Used as the base; options layer their headers and body on top.
    Request(Request),
}

impl Input {
    pub(crate) fn method(&self) -> Option<&Method> {
        match self {
            Input::Request(request) => Some(request.method()),
            _ => None,
        }
    }
}

impl From<&str> for Input {
    fn from(url: &str) -> Self {
        Input::Url(url.to_string())
    }
}

impl From<String> for Input {
    fn from(url: String) -> Self {
        Input::Url(url)
    }
}

impl From<&String> for Input {
    fn from(url: &String) -> Self {
        Input::Url(url.clone())
    }
}

impl From<Url> for Input {
    fn from(url: Url) -> Self {
        Input::Parsed(url)
    }
}

impl From<Request> for Input {
    fn from(request: Request) -> Self {
        Input::Request(request)
    }
}

/// The resolved request for one call. Mutations made here persist across attempts.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    template: Request,
}

impl PreparedRequest {
    pub fn new(input: &Input, options: &NormalizedOptions) -> Result<Self> {
        let mut url = resolve_url(input, options.prefix_url.as_deref())?;
        if let Some(params) = options.search_params.as_ref().filter(|p| !p.is_empty()) {
            url.query_pairs_mut().extend_pairs(params.iter());
        }

        let (mut headers, inherited_body) = match input {
            Input::Request(request) => (request.headers.clone(), request.body.clone()),
            _ => (HeaderMap::new(), None),
        };
        for name in options.headers.keys() {
            headers.remove(name);
        }
        for (name, value) in &options.headers {
            headers.append(name.clone(), value.clone());
        }

        let body = match &options.body {
            RequestBody::Empty => inherited_body,
            RequestBody::Json(value) => {
                let encoded = serde_json::to_vec(value).map_err(|e| {
                    Error::RequestBuild(format!("json payload is not serializable: {e}"))
                })?;
                default_header(&mut headers, CONTENT_TYPE, "application/json");
                Some(Bytes::from(encoded))
            }
            RequestBody::Bytes(bytes) => Some(bytes.clone()),
            RequestBody::Form(pairs) => {
                let encoded = form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs)
                    .finish();
                default_header(&mut headers, CONTENT_TYPE, "application/x-www-form-urlencoded");
                Some(Bytes::from(encoded))
            }
        };

        Ok(Self { template: Request { method: options.method.clone(), url, headers, body } })
    }

    pub fn request(&self) -> &Request {
        &self.template
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.template
    }

    /// Advertise the representation a body read expects, unless the caller chose one.
    pub(crate) fn accept(&mut self, kind: BodyKind) {
        default_header(&mut self.template.headers, ACCEPT, kind.accept());
    }

    /// Fresh request for attempt `attempt` (0-based).
    pub fn build(&self, attempt: u32) -> Request {
        tracing::trace!(
            attempt,
            method = %self.template.method,
            url = %self.template.url,
            "built request"
        );
        self.template.clone()
    }
}

/// Build the outbound request for `attempt` directly from `input` and `options`.
pub fn build(input: &Input, options: &NormalizedOptions, attempt: u32) -> Result<Request> {
    Ok(PreparedRequest::new(input, options)?.build(attempt))
}

fn resolve_url(input: &Input, prefix: Option<&str>) -> Result<Url> {
    let raw = match input {
        Input::Parsed(url) => return Ok(url.clone()),
        Input::Request(request) => return Ok(request.url.clone()),
        Input::Url(raw) => raw,
    };
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let Some(prefix) = prefix else {
                return Err(Error::RequestBuild(format!(
                    "relative URL `{raw}` requires a prefix_url"
                )));
            };
            if raw.starts_with('/') {
                return Err(Error::RequestBuild(format!(
                    "`{raw}` must not begin with a slash when using prefix_url"
                )));
            }
            let joined = format!("{prefix}{raw}");
            Url::parse(&joined)
                .map_err(|e| Error::RequestBuild(format!("invalid URL `{joined}`: {e}")))
        }
        Err(e) => Err(Error::RequestBuild(format!("invalid URL `{raw}`: {e}"))),
    }
}

fn default_header(headers: &mut HeaderMap, name: HeaderName, value: &'static str) {
    if !headers.contains_key(&name) {
        headers.insert(name, HeaderValue::from_static(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;

    fn normalized(options: Options) -> NormalizedOptions {
        options.normalize().unwrap()
    }

    #[test]
    fn joins_prefix_and_relative_input() {
        let options = normalized(Options::new().prefix_url("https://api.test/v1"));
        let request = build(&"users/42".into(), &options, 0).unwrap();
        assert_eq!(request.url().as_str(), "https://api.test/v1/users/42");
    }

    #[test]
    fn absolute_input_ignores_prefix() {
        let options = normalized(Options::new().prefix_url("https://api.test/v1"));
        let request = build(&"https://other.test/x".into(), &options, 0).unwrap();
        assert_eq!(request.url().as_str(), "https://other.test/x");
    }

    #[test]
    fn leading_slash_with_prefix_is_rejected() {
        let options = normalized(Options::new().prefix_url("https://api.test"));
        let err = build(&"/users".into(), &options, 0).unwrap_err();
        assert!(matches!(err, Error::RequestBuild(msg) if msg.contains("must not begin")));
    }

    #[test]
    fn relative_input_without_prefix_is_rejected() {
        let err = build(&"users".into(), &NormalizedOptions::default(), 0).unwrap_err();
        assert!(matches!(err, Error::RequestBuild(_)));
    }

    #[test]
    fn appends_search_params() {
        let options = normalized(Options::new().search_params([("page", "2"), ("q", "a b")]));
        let request = build(&"https://api.test/items?sort=asc".into(), &options, 0).unwrap();
        assert_eq!(request.url().query(), Some("sort=asc&page=2&q=a+b"));
    }

    #[test]
    fn json_sets_content_type_unless_present() {
        let payload = serde_json::json!({"name": "kit"});
        let options = normalized(Options::new().json(&payload));
        let request = build(&"https://api.test/pets".into(), &options, 0).unwrap();
        assert_eq!(request.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(request.body().unwrap().as_ref(), br#"{"name":"kit"}"#);

        let custom = normalized(
            Options::new().json(&payload).header("content-type", "application/vnd.pets+json"),
        );
        let request = build(&"https://api.test/pets".into(), &custom, 0).unwrap();
        assert_eq!(request.headers()[CONTENT_TYPE], "application/vnd.pets+json");
    }

    #[test]
    fn form_body_is_urlencoded() {
        let options = normalized(Options::new().form([("a", "1"), ("b", "x y")]));
        let request = build(&"https://api.test/form".into(), &options, 0).unwrap();
        assert_eq!(request.headers()[CONTENT_TYPE], "application/x-www-form-urlencoded");
        assert_eq!(request.body().unwrap().as_ref(), b"a=1&b=x+y");
    }

    #[test]
    fn every_attempt_gets_an_identical_fresh_body() {
        let options = normalized(Options::new().method(Method::PUT).body("payload"));
        let prepared = PreparedRequest::new(&"https://api.test/blob".into(), &options).unwrap();

        let first = prepared.build(0);
        let second = prepared.build(1);

        assert_eq!(first.body(), second.body());
        assert_eq!(second.method(), Method::PUT);
    }

    #[test]
    fn request_input_keeps_its_headers_and_body() {
        let base = Request::new(Method::POST, Url::parse("https://api.test/upload").unwrap())
            .with_header(HeaderName::from_static("x-keep"), HeaderValue::from_static("1"))
            .with_header(HeaderName::from_static("x-over"), HeaderValue::from_static("old"))
            .with_body("original");
        let options = normalized(Options::new().method(Method::POST).header("x-over", "new"));

        let request = build(&base.into(), &options, 0).unwrap();

        assert_eq!(request.headers()["x-keep"], "1");
        assert_eq!(request.headers()["x-over"], "new");
        assert_eq!(request.body().unwrap().as_ref(), b"original");
    }

    #[test]
    fn accept_respects_caller_choice() {
        let options = normalized(Options::new().header("accept", "application/xml"));
        let mut prepared = PreparedRequest::new(&"https://api.test".into(), &options).unwrap();
        prepared.accept(BodyKind::Json);
        assert_eq!(prepared.request().headers()[ACCEPT], "application/xml");

        let defaults = NormalizedOptions::default();
        let mut bare = PreparedRequest::new(&"https://api.test".into(), &defaults).unwrap();
        bare.accept(BodyKind::Json);
        assert_eq!(bare.request().headers()[ACCEPT], "application/json");
    }
}
