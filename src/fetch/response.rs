use std::fmt;

use bytes::Bytes;
use http::Extensions;
use hyper::{Body, HeaderMap, StatusCode, Version};
use serde::de::DeserializeOwned;
use url::Url;

use super::decode::{self, ContentEncoding};
use crate::error::Result;
use crate::har::Entry;

/// A response body that can be read once.
pub struct ResponseBody {
    inner: Inner,
}

enum Inner {
    /// Still on the wire; decoded with `encoding` once read.
    Streaming {
        body: Body,
        encoding: ContentEncoding,
    },
    Buffered(Bytes),
}

impl ResponseBody {
    pub fn streaming(body: Body, encoding: ContentEncoding) -> Self {
        Self {
            inner: Inner::Streaming { body, encoding },
        }
    }

    pub fn buffered(bytes: impl Into<Bytes>) -> Self {
        Self {
            inner: Inner::Buffered(bytes.into()),
        }
    }

    pub fn empty() -> Self {
        Self::buffered(Bytes::new())
    }

    /// Read the whole body, decoding any content coding.
    pub async fn bytes(self) -> Result<Bytes> {
        match self.inner {
            Inner::Streaming { body, encoding } => {
                let raw = hyper::body::to_bytes(body).await?;
                decode::decode(raw, &encoding)
            }
            Inner::Buffered(bytes) => Ok(bytes),
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Streaming { encoding, .. } => f
                .debug_struct("ResponseBody::Streaming")
                .field("encoding", encoding)
                .finish(),
            Inner::Buffered(bytes) => f
                .debug_struct("ResponseBody::Buffered")
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

/// Everything about a response except its body.
#[derive(Debug)]
pub struct ResponseParts {
    pub status: StatusCode,
    pub status_text: String,
    pub version: Version,
    pub headers: HeaderMap,
    /// The URL the response came from, after redirects.
    pub url: Url,
    pub redirected: bool,
    pub extensions: Extensions,
}

impl ResponseParts {
    pub fn new(status: StatusCode, url: Url) -> Self {
        Self {
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            url,
            redirected: false,
            extensions: Extensions::new(),
        }
    }
}

/// The result of a fetch call.
#[derive(Debug)]
pub struct FetchResponse {
    parts: ResponseParts,
    body: ResponseBody,
}

impl FetchResponse {
    pub fn from_parts(parts: ResponseParts, body: ResponseBody) -> Self {
        Self { parts, body }
    }

    pub fn into_parts(self) -> (ResponseParts, ResponseBody) {
        (self.parts, self.body)
    }

    pub fn status(&self) -> StatusCode {
        self.parts.status
    }

    pub fn status_text(&self) -> &str {
        &self.parts.status_text
    }

    pub fn version(&self) -> Version {
        self.parts.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn url(&self) -> &Url {
        &self.parts.url
    }

    pub fn redirected(&self) -> bool {
        self.parts.redirected
    }

    /// True for 2xx statuses.
    pub fn ok(&self) -> bool {
        self.parts.status.is_success()
    }

    pub fn extensions(&self) -> &Extensions {
        &self.parts.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.parts.extensions
    }

    /// The HAR entry recorded for this response, when it was captured.
    pub fn har_entry(&self) -> Option<&Entry> {
        self.parts.extensions.get::<Entry>()
    }

    pub async fn bytes(self) -> Result<Bytes> {
        self.body.bytes().await
    }

    pub async fn text(self) -> Result<String> {
        let bytes = self.body.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.body.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Builds the response handed back to the caller after capture has read
/// the original body.
pub trait ResponseFactory: Send + Sync {
    fn rebuild(&self, parts: ResponseParts, body: Bytes) -> FetchResponse;
}

/// Serves the already-read body from memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferedResponseFactory;

impl ResponseFactory for BufferedResponseFactory {
    fn rebuild(&self, parts: ResponseParts, body: Bytes) -> FetchResponse {
        FetchResponse::from_parts(parts, ResponseBody::buffered(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("http://example.test/data").unwrap()
    }

    #[tokio::test]
    async fn buffered_factory_keeps_metadata() {
        let mut parts = ResponseParts::new(StatusCode::CREATED, url());
        parts.redirected = true;
        parts
            .headers
            .insert("x-trace", "abc".parse().unwrap());

        let response = BufferedResponseFactory.rebuild(parts, Bytes::from_static(b"{\"n\":3}"));
        assert!(response.ok());
        assert!(response.redirected());
        assert_eq!(response.status_text(), "Created");
        assert_eq!(response.headers()["x-trace"], "abc");
        assert!(response.har_entry().is_none());

        let value: serde_json::Value = response.json().await.unwrap();
        assert_eq!(value["n"], 3);
    }

    #[tokio::test]
    async fn har_entry_reads_extension() {
        let mut response = FetchResponse::from_parts(
            ResponseParts::new(StatusCode::NOT_FOUND, url()),
            ResponseBody::empty(),
        );
        let mut entry = Entry::default();
        entry.response.status = 404;
        response.extensions_mut().insert(entry);

        assert!(!response.ok());
        assert_eq!(response.har_entry().unwrap().response.status, 404);
        assert_eq!(response.text().await.unwrap(), "");
    }
}
