//! A fetch-style request API: one call takes a request description and
//! resolves to a response whose body is read on demand.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Method};
use url::Url;

use crate::error::{Error, Result};
use crate::transport::SharedTransport;

mod client;
pub mod decode;
mod response;

pub(crate) use client::default_user_agent;
pub use client::Client;
pub use response::{
    BufferedResponseFactory, FetchResponse, ResponseBody, ResponseFactory, ResponseParts,
};

pub const DEFAULT_MAX_REDIRECTS: usize = 20;

/// What to do when a response is a redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectPolicy {
    #[default]
    Follow,
    /// Fail the call with [`Error::Redirect`].
    Error,
    /// Hand the redirect response back as is.
    Manual,
}

#[derive(Clone)]
pub struct FetchOptions {
    pub redirect: RedirectPolicy,
    pub max_redirects: usize,
    /// Ask for compressed responses and decode them.
    pub compress: bool,
    /// Carry this call over a specific transport instead of the client's.
    pub transport: Option<SharedTransport>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            redirect: RedirectPolicy::Follow,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            compress: cfg!(feature = "compression"),
            transport: None,
        }
    }
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("redirect", &self.redirect)
            .field("max_redirects", &self.max_redirects)
            .field("compress", &self.compress)
            .field("transport", &self.transport.as_ref().map(|_| "custom"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub options: FetchOptions,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            options: FetchOptions::default(),
        }
    }

    pub fn get(url: &str) -> Result<Self> {
        Ok(Self::new(Method::GET, Url::parse(url)?))
    }

    pub fn post(url: &str, body: impl Into<Bytes>) -> Result<Self> {
        Ok(Self::new(Method::POST, Url::parse(url)?).body(body))
    }

    /// Append a header, keeping any existing values for the same name.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| Error::InvalidArgs(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| {
                Error::InvalidArgs(format!("invalid value for header '{}': {}", name, e))
            })?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn redirect(mut self, policy: RedirectPolicy) -> Self {
        self.options.redirect = policy;
        self
    }

    pub fn transport(mut self, transport: SharedTransport) -> Self {
        self.options.transport = Some(transport);
        self
    }
}

/// Anything that performs a fetch.
pub trait Fetch: Send + Sync {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<FetchResponse>>;
}

impl<F: Fetch + ?Sized> Fetch for Arc<F> {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<FetchResponse>> {
        (**self).fetch(request)
    }
}

impl<F: Fetch + ?Sized> Fetch for Box<F> {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<FetchResponse>> {
        (**self).fetch(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_builder_keeps_duplicates() {
        let request = FetchRequest::get("http://example.test/")
            .unwrap()
            .header("Accept", "text/html")
            .unwrap()
            .header("accept", "application/json")
            .unwrap();
        let values: Vec<_> = request.headers.get_all("accept").iter().collect();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn rejects_bad_header_names() {
        let err = FetchRequest::get("http://example.test/")
            .unwrap()
            .header("bad name", "x")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgs(_)));
    }
}
