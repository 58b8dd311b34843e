//! The transport seam: something that turns a request into a response and
//! reports lifecycle milestones to an optional [`Probe`] along the way.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use hyper::{Body, Request, Response};

use crate::error::Result;

pub mod adapter;
mod connector;
mod instrument;
mod io;

pub use connector::{HyperTransport, TransportConfig};
pub use instrument::Instrumented;

/// The far end of a connection and the transport's id for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub remote: SocketAddr,
    pub connection_id: u64,
}

/// Milestones a transport reports while carrying one request.
#[derive(Debug, Clone)]
pub enum Lifecycle {
    /// A connection was assigned to the request. `pooled` is set when an
    /// idle keep-alive connection was reused; a fresh connection reports
    /// its peer with `Connect`.
    Socket { pooled: Option<Peer> },
    /// The hostname resolved.
    Lookup { address: IpAddr },
    /// The TCP connection is established.
    Connect(Peer),
    /// The TLS handshake finished.
    SecureConnect,
    /// A chunk of the request body on its way to the connection.
    RequestBody(Bytes),
    /// The last request byte was written.
    Sent,
    /// The first response byte was read.
    FirstByte,
}

pub trait LifecycleListener: Send + Sync {
    fn on_event(&self, event: Lifecycle, at: Instant);
}

/// Where a transport reports lifecycle milestones. A detached probe
/// discards everything.
#[derive(Clone, Default)]
pub struct Probe {
    listener: Option<Arc<dyn LifecycleListener>>,
}

impl Probe {
    pub fn new(listener: Arc<dyn LifecycleListener>) -> Self {
        Self {
            listener: Some(listener),
        }
    }

    pub fn detached() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        self.listener.is_some()
    }

    pub fn emit(&self, event: Lifecycle) {
        self.emit_at(event, Instant::now());
    }

    pub fn emit_at(&self, event: Lifecycle, at: Instant) {
        if let Some(listener) = &self.listener {
            listener.on_event(event, at);
        }
    }
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Issues requests. Implementations must treat a detached probe as "no one
/// is listening" and behave exactly as they would without one.
pub trait Transport: Send + Sync {
    fn send(&self, request: Request<Body>, probe: Probe) -> BoxFuture<'_, Result<Response<Body>>>;
}

pub type SharedTransport = Arc<dyn Transport>;

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, request: Request<Body>, probe: Probe) -> BoxFuture<'_, Result<Response<Body>>> {
        (**self).send(request, probe)
    }
}

/// Raw response body bytes seen by an instrumented transport, and when the
/// body ended.
#[derive(Debug, Default)]
pub struct BodyProgress {
    raw_bytes: AtomicU64,
    finished_at: Mutex<Option<Instant>>,
}

impl BodyProgress {
    pub fn add(&self, len: usize) {
        self.raw_bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn raw_bytes(&self) -> u64 {
        self.raw_bytes.load(Ordering::Relaxed)
    }

    pub fn finish(&self, at: Instant) {
        let mut finished = self
            .finished_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        finished.get_or_insert(at);
    }

    pub fn finished_at(&self) -> Option<Instant> {
        *self
            .finished_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
