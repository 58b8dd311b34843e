use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Instant;

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use super::{Lifecycle, Probe};

struct Observer {
    probe: Probe,
    last_write: Option<Instant>,
    saw_first_byte: bool,
}

/// The socket-level observer of a pooled connection. Installed for the
/// duration of one request and cleared as soon as its response head
/// arrives, so nothing leaks into the next request on the same connection.
#[derive(Clone, Default)]
pub(crate) struct ProbeSlot {
    observer: Arc<Mutex<Option<Observer>>>,
}

impl ProbeSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Observer>> {
        self.observer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn install(&self, probe: Probe) {
        if !probe.is_attached() {
            return;
        }
        *self.lock() = Some(Observer {
            probe,
            last_write: None,
            saw_first_byte: false,
        });
    }

    pub(crate) fn clear(&self) {
        self.lock().take();
    }

    fn wrote(&self) {
        if let Some(observer) = self.lock().as_mut() {
            observer.last_write = Some(Instant::now());
        }
    }

    fn read(&self) {
        let mut guard = self.lock();
        let Some(observer) = guard.as_mut() else {
            return;
        };
        if observer.saw_first_byte {
            return;
        }
        observer.saw_first_byte = true;
        let now = Instant::now();
        // The request is fully written by the time the peer answers; the
        // last write before the first read marks it.
        observer
            .probe
            .emit_at(Lifecycle::Sent, observer.last_write.unwrap_or(now));
        observer.probe.emit_at(Lifecycle::FirstByte, now);
    }
}

pin_project! {
    /// Connection IO that reports write and first-read instants to the
    /// installed observer.
    pub(crate) struct TrackedIo<S> {
        #[pin]
        inner: S,
        slot: ProbeSlot,
    }
}

impl<S> TrackedIo<S> {
    pub(crate) fn new(inner: S, slot: ProbeSlot) -> Self {
        Self { inner, slot }
    }
}

impl<S: AsyncRead> AsyncRead for TrackedIo<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        let result = this.inner.poll_read(cx, buf);
        if matches!(result, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            this.slot.read();
        }
        result
    }
}

impl<S: AsyncWrite> AsyncWrite for TrackedIo<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let result = this.inner.poll_write(cx, buf);
        if matches!(result, Poll::Ready(Ok(n)) if n > 0) {
            this.slot.wrote();
        }
        result
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let result = this.inner.poll_write_vectored(cx, bufs);
        if matches!(result, Poll::Ready(Ok(n)) if n > 0) {
            this.slot.wrote();
        }
        result
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

pub(crate) enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LifecycleListener;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl LifecycleListener for Recorder {
        fn on_event(&self, event: Lifecycle, _at: Instant) {
            self.0.lock().unwrap().push(format!("{event:?}"));
        }
    }

    #[tokio::test]
    async fn reports_sent_and_first_byte_once_per_install() {
        let (client, mut server) = tokio::io::duplex(64);
        let slot = ProbeSlot::default();
        let recorder = Arc::new(Recorder::default());
        let mut io = TrackedIo::new(client, slot.clone());

        slot.install(Probe::new(recorder.clone()));
        io.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        server.write_all(b"HTTP/1.1 200 OK\r\n").await.unwrap();
        let mut buf = [0u8; 8];
        io.read(&mut buf).await.unwrap();
        io.read(&mut buf).await.unwrap();
        slot.clear();

        server.write_all(b"late").await.unwrap();
        io.read(&mut buf).await.unwrap();

        let events = recorder.0.lock().unwrap().clone();
        assert_eq!(events, vec!["Sent".to_string(), "FirstByte".to_string()]);
    }
}
