use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{poll_fn, BoxFuture};
use futures_util::{FutureExt, TryStreamExt};
use hyper::body::HttpBody;
use hyper::client::conn::{self, SendRequest};
use hyper::header::{HeaderValue, CONTENT_LENGTH, HOST};
use hyper::{Body, Request, Response, Uri};
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use super::io::{MaybeTlsStream, ProbeSlot, TrackedIo};
use super::{Lifecycle, Peer, Probe, Transport};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Option<Duration>,
    /// Idle keep-alive connections kept per scheme/host/port.
    pub max_idle_per_host: usize,
    /// Extra PEM root certificates trusted alongside the webpki roots.
    pub ca_file: Option<PathBuf>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(30)),
            max_idle_per_host: 8,
            ca_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Scheme {
    Http,
    Https,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl PoolKey {
    fn from_uri(uri: &Uri) -> Result<Self> {
        let scheme = match uri.scheme_str() {
            Some(s) if s.eq_ignore_ascii_case("http") => Scheme::Http,
            Some(s) if s.eq_ignore_ascii_case("https") => Scheme::Https,
            Some(other) => {
                return Err(Error::UnsupportedRequest(format!(
                    "unsupported scheme '{other}' in {uri}"
                )))
            }
            None => {
                return Err(Error::UnsupportedRequest(format!(
                    "request target '{uri}' has no scheme"
                )))
            }
        };
        let host = uri
            .host()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| {
                Error::UnsupportedRequest(format!("request target '{uri}' has no host"))
            })?;
        let port = uri.port_u16().unwrap_or(match scheme {
            Scheme::Http => 80,
            Scheme::Https => 443,
        });
        Ok(Self {
            scheme,
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
        })
    }

    fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        match (self.scheme, self.port) {
            (Scheme::Http, 80) | (Scheme::Https, 443) => host,
            (_, port) => format!("{host}:{port}"),
        }
    }
}

struct PooledConnection {
    id: u64,
    remote: SocketAddr,
    sender: SendRequest<Body>,
    slot: ProbeSlot,
}

/// HTTP/1.1 transport over tokio sockets with rustls for HTTPS and a
/// keep-alive pool. Reports every lifecycle milestone to the probe it is
/// given.
pub struct HyperTransport {
    config: TransportConfig,
    tls: TlsConnector,
    pool: Mutex<HashMap<PoolKey, Vec<PooledConnection>>>,
    next_connection_id: AtomicU64,
}

impl HyperTransport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let tls = TlsConnector::from(Arc::new(tls_config(&config)?));
        Ok(Self {
            config,
            tls,
            pool: Mutex::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
        })
    }

    fn pool(&self) -> MutexGuard<'_, HashMap<PoolKey, Vec<PooledConnection>>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of idle connections currently pooled.
    pub fn idle_connections(&self) -> usize {
        self.pool().values().map(Vec::len).sum()
    }

    /// Take a pooled connection that can carry a request right now.
    /// Closed connections found along the way are evicted; busy ones stay.
    fn checkout(&self, key: &PoolKey) -> Option<PooledConnection> {
        let mut pool = self.pool();
        let idle = pool.get_mut(key)?;
        let mut index = 0;
        while index < idle.len() {
            match readiness(&mut idle[index].sender) {
                Readiness::Ready => return Some(idle.swap_remove(index)),
                Readiness::Busy => index += 1,
                Readiness::Closed => {
                    let closed = idle.swap_remove(index);
                    tracing::debug!(connection = closed.id, "evicting closed connection");
                }
            }
        }
        None
    }

    fn checkin(&self, key: PoolKey, mut conn: PooledConnection) {
        if self.config.max_idle_per_host == 0
            || matches!(readiness(&mut conn.sender), Readiness::Closed)
        {
            return;
        }
        let mut pool = self.pool();
        let idle = pool.entry(key).or_default();
        if idle.len() < self.config.max_idle_per_host {
            idle.push(conn);
        }
    }

    async fn resolve(&self, key: &PoolKey, probe: &Probe) -> Result<SocketAddr> {
        if let Ok(ip) = key.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, key.port));
        }
        let address = tokio::net::lookup_host((key.host.as_str(), key.port))
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no addresses found for {}", key.host),
                )
            })?;
        probe.emit(Lifecycle::Lookup {
            address: address.ip(),
        });
        Ok(address)
    }

    async fn connect(&self, key: &PoolKey, probe: &Probe) -> Result<PooledConnection> {
        probe.emit(Lifecycle::Socket { pooled: None });

        let remote = self.resolve(key, probe).await?;
        let tcp = match self.config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, TcpStream::connect(remote))
                .await
                .map_err(|_| Error::Timeout(key.host_header()))??,
            None => TcpStream::connect(remote).await?,
        };
        tcp.set_nodelay(true)?;

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        probe.emit(Lifecycle::Connect(Peer {
            remote,
            connection_id: id,
        }));

        let stream = match key.scheme {
            Scheme::Http => MaybeTlsStream::Plain(tcp),
            Scheme::Https => {
                let server_name = ServerName::try_from(key.host.clone())
                    .map_err(|err| {
                        Error::Tls(format!("invalid server name {}: {err}", key.host))
                    })?;
                let tls = self
                    .tls
                    .connect(server_name, tcp)
                    .await
                    .map_err(|err| {
                        Error::Tls(format!("handshake with {} failed: {err}", key.host))
                    })?;
                probe.emit(Lifecycle::SecureConnect);
                MaybeTlsStream::Tls(Box::new(tls))
            }
        };

        let slot = ProbeSlot::default();
        let io = TrackedIo::new(stream, slot.clone());
        let (sender, connection) = conn::Builder::new().handshake::<_, Body>(io).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::debug!(connection = id, error = %err, "connection closed with error");
            }
        });
        tracing::debug!(connection = id, remote = %remote, "opened connection");

        Ok(PooledConnection {
            id,
            remote,
            sender,
            slot,
        })
    }

    async fn execute(&self, request: Request<Body>, probe: Probe) -> Result<Response<Body>> {
        let key = PoolKey::from_uri(request.uri())?;

        let mut conn = match self.checkout(&key) {
            Some(conn) => {
                tracing::debug!(connection = conn.id, "reusing pooled connection");
                probe.emit(Lifecycle::Socket {
                    pooled: Some(Peer {
                        remote: conn.remote,
                        connection_id: conn.id,
                    }),
                });
                conn
            }
            None => self.connect(&key, &probe).await?,
        };

        let request = into_origin_form(request, &key)?;
        let request = tee_body(request, &probe);

        conn.slot.install(probe);
        let result = conn.sender.send_request(request).await;
        conn.slot.clear();

        let response = result?;
        self.checkin(key, conn);
        Ok(response)
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: Request<Body>, probe: Probe) -> BoxFuture<'_, Result<Response<Body>>> {
        Box::pin(self.execute(request, probe))
    }
}

enum Readiness {
    Ready,
    /// Still carrying the previous response.
    Busy,
    Closed,
}

fn readiness(sender: &mut SendRequest<Body>) -> Readiness {
    match poll_fn(|cx| sender.poll_ready(cx)).now_or_never() {
        Some(Ok(())) => Readiness::Ready,
        Some(Err(_)) => Readiness::Closed,
        None => Readiness::Busy,
    }
}

fn tls_config(config: &TransportConfig) -> Result<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = &config.ca_file {
        let mut reader = BufReader::new(File::open(path)?);
        for cert in rustls_pemfile::certs(&mut reader) {
            roots.add(cert?).map_err(|err| {
                Error::Tls(format!("invalid certificate in {}: {err}", path.display()))
            })?;
        }
    }

    let mut tls = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    tls.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(tls)
}

/// HTTP/1.1 origin servers expect `/path?query` plus a `Host` header
/// rather than the absolute URL.
fn into_origin_form(request: Request<Body>, key: &PoolKey) -> Result<Request<Body>> {
    let (mut parts, body) = request.into_parts();
    let origin: Uri = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|pq| !pq.is_empty())
        .unwrap_or("/")
        .parse()
        .map_err(http::Error::from)?;
    parts.uri = origin;
    if !parts.headers.contains_key(HOST) {
        let host = HeaderValue::from_str(&key.host_header()).map_err(http::Error::from)?;
        parts.headers.insert(HOST, host);
    }
    Ok(Request::from_parts(parts, body))
}

/// Forward every request body chunk to the probe as it is handed to the
/// connection.
fn tee_body(request: Request<Body>, probe: &Probe) -> Request<Body> {
    if !probe.is_attached() || request.body().is_end_stream() {
        return request;
    }
    let (mut parts, body) = request.into_parts();
    if !parts.headers.contains_key(CONTENT_LENGTH) {
        if let Some(len) = HttpBody::size_hint(&body).exact() {
            parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        }
    }
    let probe = probe.clone();
    let body = Body::wrap_stream(
        body.inspect_ok(move |chunk| probe.emit(Lifecycle::RequestBody(chunk.clone()))),
    );
    Request::from_parts(parts, body)
}
