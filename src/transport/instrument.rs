use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::Stream;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use hyper::{Body, Request, Response};
use pin_project_lite::pin_project;
use url::Url;

use super::{BodyProgress, Lifecycle, LifecycleListener, Probe, Transport};
use crate::correlation::{redirect, CorrelationStore, CorrelationToken, PendingEntry, HEADER_NAME};
use crate::error::{Error, Result};
use crate::har::{self, Content, Entry, PostData};
use crate::normalize::{self, HeaderSource};
use crate::timing::Timestamps;

/// Records HAR entries for requests carrying a correlation header.
///
/// Requests without the header pass straight through to the inner
/// transport. For tracked requests, the lifecycle milestones reported by
/// the inner transport are timestamped, and once response headers arrive a
/// partial entry is stored under the token for the fetch layer to finish.
pub struct Instrumented<T> {
    inner: T,
    store: CorrelationStore,
}

impl<T: Transport> Instrumented<T> {
    pub fn new(inner: T, store: CorrelationStore) -> Self {
        Self { inner, store }
    }

    pub fn store(&self) -> &CorrelationStore {
        &self.store
    }

    async fn track(
        &self,
        token: CorrelationToken,
        request: Request<Body>,
        outer: Probe,
    ) -> Result<Response<Body>> {
        let url = request_url(&request)?;
        let tracker = Arc::new(Tracker::new(outer));
        let draft = RequestDraft::capture(&request, url);

        let response = self
            .inner
            .send(request, Probe::new(tracker.clone()))
            .await?;

        let (parts, body) = response.into_parts();
        let progress = Arc::new(BodyProgress::default());
        let (entry, timestamps) = tracker.build_entry(draft, &parts);
        redirect::link(
            &self.store,
            &token,
            PendingEntry::new(entry, timestamps, progress.clone()),
        );
        tracing::debug!(token = %token, status = parts.status.as_u16(), "stored partial entry");

        let body = Body::wrap_stream(CountingBody {
            inner: body,
            progress,
        });
        Ok(Response::from_parts(parts, body))
    }
}

impl<T: Transport> Transport for Instrumented<T> {
    fn send(&self, request: Request<Body>, probe: Probe) -> BoxFuture<'_, Result<Response<Body>>> {
        let token = request
            .headers()
            .get(HEADER_NAME)
            .and_then(CorrelationToken::from_header);
        let Some(token) = token else {
            return self.inner.send(request, probe);
        };
        Box::pin(self.track(token, request, probe))
    }
}

fn request_url(request: &Request<Body>) -> Result<Url> {
    let uri = request.uri();
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(Error::UnsupportedRequest(format!(
            "cannot derive a URL from request target '{uri}'"
        )));
    }
    Ok(Url::parse(&uri.to_string())?)
}

/// The request half of an entry, taken before the request is handed off.
struct RequestDraft {
    request: har::Request,
    mime_type: Option<String>,
    declared_length: Option<u64>,
}

impl RequestDraft {
    fn capture(request: &Request<Body>, url: Url) -> Self {
        let headers = request.headers();
        let har_request = har::Request {
            method: request.method().to_string(),
            http_version: format!("{:?}", request.version()),
            cookies: normalize::request_cookies(headers),
            headers: normalize::build_headers(HeaderSource::Map(headers)),
            query_string: normalize::query_string(&url),
            url: url.into(),
            post_data: None,
            headers_size: -1,
            body_size: -1,
        };
        Self {
            request: har_request,
            mime_type: normalize::header_value(headers, CONTENT_TYPE),
            declared_length: normalize::header_value(headers, CONTENT_LENGTH)
                .and_then(|value| value.trim().parse().ok()),
        }
    }

    fn finish(mut self, body: Option<Bytes>) -> har::Request {
        let body = match (body, self.declared_length) {
            (Some(body), _) => body,
            (None, Some(0)) => Bytes::new(),
            (None, _) => return self.request,
        };
        self.request.body_size = body.len() as i64;
        if body.is_empty() {
            return self.request;
        }

        let form = self
            .mime_type
            .as_deref()
            .map(normalize::is_form_urlencoded)
            .unwrap_or(false);
        self.request.post_data = Some(if form {
            PostData {
                mime_type: self.mime_type,
                text: None,
                params: Some(normalize::form_params(&body)),
            }
        } else {
            PostData {
                mime_type: self.mime_type,
                text: Some(String::from_utf8_lossy(&body).into_owned()),
                params: None,
            }
        });
        self.request
    }
}

#[derive(Default)]
struct TrackerState {
    body: Option<BytesMut>,
    remote: Option<SocketAddr>,
    connection_id: Option<u64>,
}

/// Timestamps the milestones of one tracked request.
struct Tracker {
    forward: Probe,
    timestamps: Mutex<Timestamps>,
    state: Mutex<TrackerState>,
}

impl Tracker {
    fn new(forward: Probe) -> Self {
        Self {
            forward,
            timestamps: Mutex::new(Timestamps::now()),
            state: Mutex::new(TrackerState::default()),
        }
    }

    fn timestamps(&self) -> MutexGuard<'_, Timestamps> {
        self.timestamps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn build_entry(
        &self,
        draft: RequestDraft,
        parts: &http::response::Parts,
    ) -> (Entry, Timestamps) {
        let timestamps = *self.timestamps();
        let mut state = self.state();
        let body = state.body.take().map(BytesMut::freeze);

        let headers = &parts.headers;
        let status_text = parts
            .extensions
            .get::<hyper::ext::ReasonPhrase>()
            .map(|reason| String::from_utf8_lossy(reason.as_bytes()).into_owned())
            .or_else(|| parts.status.canonical_reason().map(str::to_string))
            .unwrap_or_default();

        let response = har::Response {
            status: parts.status.as_u16(),
            status_text,
            http_version: format!("{:?}", parts.version),
            cookies: normalize::response_cookies(headers),
            headers: normalize::build_headers(HeaderSource::Map(headers)),
            content: Content {
                size: -1,
                mime_type: normalize::header_value(headers, CONTENT_TYPE),
                ..Content::default()
            },
            redirect_url: normalize::header_value(headers, LOCATION).unwrap_or_default(),
            headers_size: -1,
            body_size: 0,
        };

        let entry = Entry {
            pageref: None,
            started_date_time: har::format_timestamp(timestamps.started_at),
            time: 0.0,
            request: draft.finish(body),
            response,
            cache: Default::default(),
            timings: Default::default(),
            server_ip_address: state.remote.map(|remote| remote.ip().to_string()),
            connection: state.connection_id.map(|id| id.to_string()),
        };
        (entry, timestamps)
    }
}

impl LifecycleListener for Tracker {
    fn on_event(&self, event: Lifecycle, at: Instant) {
        {
            let mut ts = self.timestamps();
            match &event {
                Lifecycle::Socket { .. } => {
                    ts.socket.get_or_insert(at);
                }
                Lifecycle::Lookup { .. } => ts.lookup = Some(at),
                Lifecycle::Connect(_) => ts.connect = Some(at),
                Lifecycle::SecureConnect => ts.secure_connect = Some(at),
                Lifecycle::Sent => ts.sent = Some(at),
                Lifecycle::FirstByte => {
                    ts.first_byte.get_or_insert(at);
                }
                Lifecycle::RequestBody(_) => {}
            }
        }

        match &event {
            Lifecycle::RequestBody(chunk) => {
                self.state()
                    .body
                    .get_or_insert_with(BytesMut::new)
                    .extend_from_slice(chunk);
            }
            Lifecycle::Connect(peer)
            | Lifecycle::Socket {
                pooled: Some(peer),
            } => {
                let mut state = self.state();
                state.remote = Some(peer.remote);
                state.connection_id = Some(peer.connection_id);
            }
            _ => {}
        }

        self.forward.emit_at(event, at);
    }
}

pin_project! {
    /// Counts raw response body bytes as the caller reads them.
    struct CountingBody {
        #[pin]
        inner: Body,
        progress: Arc<BodyProgress>,
    }
}

impl Stream for CountingBody {
    type Item = std::result::Result<Bytes, hyper::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let polled = this.inner.poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) => this.progress.add(chunk.len()),
            Poll::Ready(None) => this.progress.finish(Instant::now()),
            _ => {}
        }
        polled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::adapter;
    use hyper::StatusCode;

    fn echo_transport() -> impl Transport {
        adapter::from_fn(|request: Request<Body>| async move {
            let body = hyper::body::to_bytes(request.into_body()).await?;
            Ok::<_, Error>(
                Response::builder()
                    .status(StatusCode::OK)
                    .header(CONTENT_TYPE, "text/plain")
                    .header("set-cookie", "id=7; Path=/")
                    .body(Body::from(body))?,
            )
        })
    }

    #[tokio::test]
    async fn untracked_requests_pass_through() {
        let store = CorrelationStore::new();
        let transport = Instrumented::new(echo_transport(), store.clone());
        let request = Request::get("http://example.test/")
            .body(Body::empty())
            .unwrap();

        let response = transport.send(request, Probe::detached()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn tracked_request_stores_partial_entry() {
        let store = CorrelationStore::new();
        let transport = Instrumented::new(echo_transport(), store.clone());
        let token = CorrelationToken::generate();
        let request = Request::post("http://example.test/submit?x=1")
            .header(HEADER_NAME, token.to_header_value())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header("cookie", "a=1")
            .body(Body::from("foo=1&bar=2&bar=3"))
            .unwrap();

        let response = transport.send(request, Probe::detached()).await.unwrap();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"foo=1&bar=2&bar=3");

        let pending = store.take(&token).expect("entry stored under token");
        let entry = &pending.entry;
        assert_eq!(entry.request.method, "POST");
        assert_eq!(entry.request.url, "http://example.test/submit?x=1");
        assert_eq!(entry.request.query_string.len(), 1);
        assert_eq!(entry.request.cookies[0].name, "a");
        assert_eq!(entry.request.body_size, 17);
        let post_data = entry.request.post_data.as_ref().unwrap();
        let params = post_data.params.as_ref().unwrap();
        assert_eq!(params.len(), 3);
        assert_eq!(entry.response.status, 200);
        assert_eq!(entry.response.status_text, "OK");
        assert_eq!(entry.response.cookies[0].name, "id");
        assert_eq!(entry.response.content.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(pending.progress.raw_bytes(), 17);
        assert!(pending.progress.finished_at().is_some());
        assert!(pending.timestamps.sent.is_some());
    }

    #[tokio::test]
    async fn relative_target_fails_fast_when_tracked() {
        let store = CorrelationStore::new();
        let transport = Instrumented::new(echo_transport(), store.clone());
        let request = Request::get("/relative")
            .header(HEADER_NAME, CorrelationToken::generate().to_header_value())
            .body(Body::empty())
            .unwrap();

        let err = transport.send(request, Probe::detached()).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedRequest(_)));
        assert!(store.is_empty());
    }
}
