//! HAR capture around any [`Fetch`] implementation.
//!
//! [`HarFetch`] tags each call with a fresh correlation token, routes it
//! through a transport instrumented against its own [`CorrelationStore`],
//! and once the wrapped fetch resolves, turns what the transport recorded
//! into finished entries: every redirect hop first, the final exchange
//! last. The final entry is also attached to the returned response.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::correlation::{redirect, CorrelationStore, CorrelationToken, PendingEntry, HEADER_NAME};
use crate::error::Result;
use crate::fetch::{BufferedResponseFactory, Fetch, FetchRequest, FetchResponse, ResponseFactory};
use crate::har::{Entry, SharedHarLog, DEFAULT_PAGE_ID};
use crate::transport::{HyperTransport, Instrumented, SharedTransport, Transport, TransportConfig};

pub mod finalize;

/// Invoked once per finished entry, redirect hops first.
pub type EntryCallback = Arc<dyn Fn(&Entry) + Send + Sync>;

/// Where the entries of a call go.
#[derive(Clone, Default)]
pub enum HarTarget {
    /// Do not capture this call.
    Off,
    /// Capture, attach the entry to the response, log nothing.
    #[default]
    On,
    /// Capture and append every entry to the log.
    Log(SharedHarLog),
}

impl fmt::Debug for HarTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarTarget::Off => f.write_str("Off"),
            HarTarget::On => f.write_str("On"),
            HarTarget::Log(log) => write!(f, "Log({} entries)", log.len()),
        }
    }
}

/// How response bodies are recorded.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub bodies: bool,
    pub max_body_size: Option<usize>,
    /// Skip bodies whose MIME type is not textual.
    pub text_only: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            bodies: true,
            max_body_size: None,
            text_only: false,
        }
    }
}

/// Settings applied to every call unless the call overrides them.
#[derive(Clone, Default)]
pub struct HarDefaults {
    pub har: HarTarget,
    pub page_ref: Option<String>,
    pub on_har_entry: Option<EntryCallback>,
    pub capture: CaptureOptions,
}

/// Per-call overrides.
#[derive(Clone, Default)]
pub struct CallOptions {
    pub har: Option<HarTarget>,
    pub page_ref: Option<String>,
    pub on_har_entry: Option<EntryCallback>,
}

impl CallOptions {
    pub fn har(mut self, target: HarTarget) -> Self {
        self.har = Some(target);
        self
    }

    pub fn page_ref(mut self, page_ref: impl Into<String>) -> Self {
        self.page_ref = Some(page_ref.into());
        self
    }

    pub fn on_har_entry(mut self, callback: impl Fn(&Entry) + Send + Sync + 'static) -> Self {
        self.on_har_entry = Some(Arc::new(callback));
        self
    }
}

/// Wrap `fetch` with the given defaults over a default [`HyperTransport`].
pub fn with_har<F: Fetch>(fetch: F, defaults: HarDefaults) -> Result<HarFetch<F>> {
    HarFetch::builder(fetch).defaults(defaults).build()
}

pub struct HarFetchBuilder<F> {
    fetch: F,
    defaults: HarDefaults,
    transport: Option<SharedTransport>,
    transport_config: TransportConfig,
    factory: Arc<dyn ResponseFactory>,
    store: Option<CorrelationStore>,
}

impl<F: Fetch> HarFetchBuilder<F> {
    pub fn defaults(mut self, defaults: HarDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// The transport instrumented for calls that do not bring their own.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn shared_transport(mut self, transport: SharedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Settings for the default transport, used when none is supplied.
    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = config;
        self
    }

    pub fn response_factory(mut self, factory: impl ResponseFactory + 'static) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    pub fn store(mut self, store: CorrelationStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<HarFetch<F>> {
        let inner: SharedTransport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new(self.transport_config)?),
        };
        let store = self.store.unwrap_or_default();
        Ok(HarFetch {
            fetch: self.fetch,
            transport: Arc::new(Instrumented::new(inner, store.clone())),
            store,
            defaults: self.defaults,
            factory: self.factory,
        })
    }
}

/// A [`Fetch`] that records a HAR entry for every physical request.
pub struct HarFetch<F> {
    fetch: F,
    store: CorrelationStore,
    transport: SharedTransport,
    defaults: HarDefaults,
    factory: Arc<dyn ResponseFactory>,
}

impl<F: Fetch> HarFetch<F> {
    pub fn builder(fetch: F) -> HarFetchBuilder<F> {
        HarFetchBuilder {
            fetch,
            defaults: HarDefaults::default(),
            transport: None,
            transport_config: TransportConfig::default(),
            factory: Arc::new(BufferedResponseFactory),
            store: None,
        }
    }

    /// The in-flight table shared with the instrumented transports.
    pub fn store(&self) -> &CorrelationStore {
        &self.store
    }

    pub fn defaults(&self) -> &HarDefaults {
        &self.defaults
    }

    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        self.fetch_with(request, CallOptions::default()).await
    }

    pub async fn fetch_with(
        &self,
        mut request: FetchRequest,
        options: CallOptions,
    ) -> Result<FetchResponse> {
        let target = options.har.unwrap_or_else(|| self.defaults.har.clone());
        if matches!(target, HarTarget::Off) {
            return self.fetch.fetch(request).await;
        }

        let token = CorrelationToken::generate();
        request.headers.insert(HEADER_NAME, token.to_header_value());
        let transport: SharedTransport = match request.options.transport.take() {
            Some(custom) => Arc::new(Instrumented::new(custom, self.store.clone())),
            None => self.transport.clone(),
        };
        request.options.transport = Some(transport);

        let guard = StoreGuard::new(&self.store, token);
        let response = self.fetch.fetch(request).await?;
        let Some(pending) = guard.take() else {
            tracing::debug!("correlation header did not reach the transport; nothing captured");
            return Ok(response);
        };

        let page_ref = options
            .page_ref
            .or_else(|| self.defaults.page_ref.clone())
            .unwrap_or_else(|| DEFAULT_PAGE_ID.to_string());
        let (entries, mut response) = self.complete(pending, response, &page_ref).await?;

        let callback = options
            .on_har_entry
            .or_else(|| self.defaults.on_har_entry.clone());
        for entry in &entries {
            if let HarTarget::Log(log) = &target {
                log.push(entry.clone());
            }
            if let Some(callback) = &callback {
                callback(entry);
            }
        }

        if let Some(last) = entries.into_iter().last() {
            response.extensions_mut().insert(last);
        }
        Ok(response)
    }

    async fn complete(
        &self,
        pending: PendingEntry,
        response: FetchResponse,
        page_ref: &str,
    ) -> Result<(Vec<Entry>, FetchResponse)> {
        let mut chain = redirect::flatten(pending);
        redirect::apply_page_ref(&mut chain, page_ref);

        let Some(last) = chain.pop() else {
            return Ok((Vec::new(), response));
        };
        let mut entries: Vec<Entry> = chain.into_iter().map(finalize::finish_ancestor).collect();
        let (entry, response) =
            finalize::finish(last, response, &self.defaults.capture, self.factory.as_ref()).await?;
        entries.push(entry);
        Ok((entries, response))
    }
}

impl<F: Fetch> Fetch for HarFetch<F> {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<FetchResponse>> {
        Box::pin(self.fetch_with(request, CallOptions::default()))
    }
}

/// Removes a token's entry if the call settles without claiming it,
/// including when the call's future is dropped.
struct StoreGuard<'a> {
    store: &'a CorrelationStore,
    token: Option<CorrelationToken>,
}

impl<'a> StoreGuard<'a> {
    fn new(store: &'a CorrelationStore, token: CorrelationToken) -> Self {
        Self {
            store,
            token: Some(token),
        }
    }

    fn take(mut self) -> Option<PendingEntry> {
        let token = self.token.take()?;
        self.store.take(&token)
    }
}

impl Drop for StoreGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if self.store.delete(&token) {
                tracing::debug!(token = %token, "discarded entry of unsettled request");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::fetch::Client;
    use crate::transport::adapter;
    use hyper::{Body, Request, Response, StatusCode};
    use std::sync::Mutex;

    fn client() -> Client {
        Client::new(client_transport())
    }

    fn har_fetch() -> HarFetch<Client> {
        HarFetch::builder(client())
            .transport(adapter::from_fn(|_request: Request<Body>| async {
                Ok::<_, Error>(Response::new(Body::from("default transport")))
            }))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn client_transport_is_replaced_by_instrumented_default() {
        let fetch = har_fetch();
        let response = fetch
            .fetch(FetchRequest::get("http://example.test/").unwrap())
            .await
            .unwrap();
        assert!(response.har_entry().is_some());
        assert_eq!(response.text().await.unwrap(), "default transport");
        assert!(fetch.store().is_empty());
    }

    #[tokio::test]
    async fn per_call_transport_is_instrumented_and_chained() {
        let fetch = har_fetch();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let log = SharedHarLog::default();

        let request = FetchRequest::get("http://example.test/start")
            .unwrap()
            .transport(Arc::new(client_transport()));
        let options = CallOptions::default()
            .har(HarTarget::Log(log.clone()))
            .page_ref("flow")
            .on_har_entry(move |entry| sink.lock().unwrap().push(entry.request.url.clone()));

        let response = fetch.fetch_with(request, options).await.unwrap();
        let entry = response.har_entry().cloned().unwrap();
        assert_eq!(entry.request.url, "http://example.test/end");
        assert_eq!(response.text().await.unwrap(), "done");

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["http://example.test/start", "http://example.test/end"]
        );
        let logged = log.entries();
        assert_eq!(logged.len(), 2);
        assert!(logged.iter().all(|e| e.pageref.as_deref() == Some("flow")));
        assert_eq!(logged[0].response.status, 302);
        assert!(fetch.store().is_empty());
    }

    fn client_transport() -> impl Transport {
        adapter::from_fn(|request: Request<Body>| async move {
            let response = match request.uri().path() {
                "/start" => Response::builder()
                    .status(StatusCode::FOUND)
                    .header("location", "/end")
                    .body(Body::from("see /end"))?,
                _ => Response::builder().body(Body::from("done"))?,
            };
            Ok::<_, Error>(response)
        })
    }

    #[tokio::test]
    async fn failures_leave_no_entry_behind() {
        let fetch = har_fetch();
        let request = FetchRequest::get("http://example.test/fail")
            .unwrap()
            .transport(Arc::new(adapter::from_fn(|_request: Request<Body>| async {
                Err::<Response<Body>, _>(Error::Body("connection reset".to_string()))
            })));
        let err = fetch.fetch(request).await.unwrap_err();
        assert!(matches!(err, Error::Body(_)));
        assert_eq!(fetch.store().len(), 0);
    }

    #[tokio::test]
    async fn off_target_skips_capture() {
        let fetch = har_fetch();
        let called = Arc::new(Mutex::new(0));
        let counter = called.clone();
        let options = CallOptions::default()
            .har(HarTarget::Off)
            .on_har_entry(move |_| *counter.lock().unwrap() += 1);

        let response = fetch
            .fetch_with(FetchRequest::get("http://example.test/").unwrap(), options)
            .await
            .unwrap();
        assert!(response.har_entry().is_none());
        assert_eq!(*called.lock().unwrap(), 0);
    }

    #[test]
    fn dropped_guard_deletes_token() {
        let store = CorrelationStore::new();
        let token = CorrelationToken::generate();
        store.set(
            token.clone(),
            PendingEntry::new(
                Entry::default(),
                crate::timing::Timestamps::now(),
                Arc::new(crate::transport::BodyProgress::default()),
            ),
        );
        drop(StoreGuard::new(&store, token));
        assert!(store.is_empty());
    }
}
