//! Fluent request construction.
//!
//! ```rust,ignore
//! use requests::Builder;
//!
//! #[derive(serde::Serialize)]
//! struct Search<'a> {
//!     q: &'a str,
//!     page: u32,
//! }
//!
//! let results: serde_json::Value = Builder::default()
//!     .url("https://api.example.com/search")
//!     .query(&Search { q: "rust", page: 2 })
//!     .header_add("Accept", "application/json")
//!     .build()?
//!     .want_json()
//!     .await?;
//! ```

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use http::{Method, Uri};
use serde::Serialize;
use tokio::io::AsyncRead;
use url::Url;

use crate::codec::{marshal_headers, marshal_query};
use crate::error::{Error, Result};
use crate::request::{Body, Request};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Accumulates the parts of a request. Every setter consumes and returns
/// the builder; the first failure is kept and returned by [`Builder::build`].
#[derive(Debug, Default)]
pub struct Builder {
    method: Method,
    scheme: String,
    /// Host, with the port when one was given.
    host: String,
    path: String,
    query: String,
    headers: HeaderMap,
    body: Body,
    error: Option<Error>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace scheme, host, path and query from an absolute URL.
    pub fn url(mut self, url: &str) -> Self {
        match Url::parse(url) {
            Ok(parsed) => {
                self.scheme = parsed.scheme().to_string();
                self.host = match (parsed.host_str(), parsed.port()) {
                    (Some(host), Some(port)) => format!("{}:{}", host, port),
                    (Some(host), None) => host.to_string(),
                    (None, _) => String::new(),
                };
                self.path = parsed.path().to_string();
                self.query = parsed.query().unwrap_or_default().to_string();
            }
            Err(e) => self.fail(Error::UrlParse(e)),
        }
        self
    }

    pub fn method<M>(mut self, method: M) -> Self
    where
        M: TryInto<Method>,
        M::Error: std::fmt::Display,
    {
        match method.try_into() {
            Ok(method) => self.method = method,
            Err(e) => self.fail(Error::http_protocol(format!("Invalid method: {}", e))),
        }
        self
    }

    pub fn scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    /// Host, optionally with `:port`.
    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    /// Raw body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::Bytes(body.into());
        self
    }

    /// Body read to the end when the request is sent.
    pub fn body_reader<R>(mut self, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.body = Body::Reader(Box::new(reader));
        self
    }

    /// Form-encoded body; sets `Content-Type` unless already present.
    pub fn body_form<T: Serialize + ?Sized>(mut self, form: &T) -> Self {
        match marshal_query(form) {
            Ok(encoded) => {
                self.body = Body::Bytes(Bytes::from(encoded));
                self.default_content_type(FORM_CONTENT_TYPE);
            }
            Err(e) => self.fail(e),
        }
        self
    }

    /// JSON body; sets `Content-Type` unless already present.
    pub fn body_json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(encoded) => {
                self.body = Body::Bytes(Bytes::from(encoded));
                self.default_content_type(JSON_CONTENT_TYPE);
            }
            Err(e) => self.fail(Error::Json(e)),
        }
        self
    }

    /// Append a struct as query parameters.
    pub fn query<T: Serialize + ?Sized>(mut self, query: &T) -> Self {
        match marshal_query(query) {
            Ok(encoded) => self.query_string(&encoded),
            Err(e) => {
                self.fail(e);
                self
            }
        }
    }

    /// Append a raw, already encoded query, joined with `&`.
    pub fn query_string(mut self, query: &str) -> Self {
        if query.is_empty() {
            return self;
        }
        if !self.query.is_empty() {
            self.query.push('&');
        }
        self.query.push_str(query);
        self
    }

    /// Merge a struct as headers, replacing existing values per name.
    pub fn header<T: Serialize + ?Sized>(mut self, headers: &T) -> Self {
        match marshal_headers(headers) {
            Ok(map) => self.replace_headers(map),
            Err(e) => self.fail(e),
        }
        self
    }

    /// Append one header value.
    pub fn header_add(mut self, key: &str, value: &str) -> Self {
        let name = HeaderName::from_bytes(key.as_bytes());
        let value = HeaderValue::from_str(value);
        match (name, value) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            (Err(e), _) => self.fail(Error::InvalidHeader(format!("{}: {}", key, e))),
            (_, Err(e)) => self.fail(Error::InvalidHeader(format!("{}: {}", key, e))),
        }
        self
    }

    /// Replace values per name with those in `headers`.
    pub fn header_update(mut self, headers: HeaderMap) -> Self {
        self.replace_headers(headers);
        self
    }

    /// Assemble `scheme://host/path?query`.
    pub fn build_url(&self) -> Result<Url> {
        if self.scheme.is_empty() {
            return Err(Error::missing("URL scheme"));
        }
        if self.host.is_empty() {
            return Err(Error::missing("URL host"));
        }

        let mut raw = format!("{}://{}", self.scheme, self.host);
        if !self.path.is_empty() && !self.path.starts_with('/') {
            raw.push('/');
        }
        raw.push_str(&self.path.replace('?', "%3F").replace('#', "%23"));
        if !self.query.is_empty() {
            raw.push('?');
            raw.push_str(&self.query);
        }
        Ok(Url::parse(&raw)?)
    }

    /// Create the request. No transport is bound yet.
    pub fn build(mut self) -> Result<Request> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        let url = self.build_url()?;
        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|e| Error::http_protocol(format!("Invalid URI {}: {}", url, e)))?;

        let mut request = http::Request::new(self.body);
        *request.method_mut() = self.method;
        *request.uri_mut() = uri;
        *request.headers_mut() = self.headers;
        Ok(Request::new(request))
    }

    fn fail(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn default_content_type(&mut self, value: &'static str) {
        self.headers
            .entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_static(value));
    }

    fn replace_headers(&mut self, headers: HeaderMap) {
        let mut current: Option<HeaderName> = None;
        for (name, value) in headers {
            match name {
                Some(name) => {
                    self.headers.insert(name.clone(), value);
                    current = Some(name);
                }
                None => {
                    if let Some(name) = &current {
                        self.headers.append(name.clone(), value);
                    }
                }
            }
        }
    }
}
