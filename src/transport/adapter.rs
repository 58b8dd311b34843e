//! Turn any async request handler into a [`Transport`].
//!
//! The wrapped function is not modified; the adapter reports the
//! milestones it can see from the outside (connection acquisition, the
//! request body, hand-off and response) and nothing finer grained.

use std::future::Future;

use futures_util::future::BoxFuture;
use hyper::body::HttpBody;
use hyper::{Body, Request, Response};

use super::{Lifecycle, Probe, Transport};
use crate::error::Result;

pub struct FnTransport<F> {
    handler: F,
}

pub fn from_fn<F, Fut>(handler: F) -> FnTransport<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<Body>>> + Send + 'static,
{
    FnTransport { handler }
}

impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<Body>>> + Send + 'static,
{
    fn send(&self, request: Request<Body>, probe: Probe) -> BoxFuture<'_, Result<Response<Body>>> {
        if !probe.is_attached() {
            return Box::pin((self.handler)(request));
        }

        Box::pin(async move {
            probe.emit(Lifecycle::Socket { pooled: None });

            let request = if request.body().is_end_stream() {
                request
            } else {
                let (parts, body) = request.into_parts();
                let bytes = hyper::body::to_bytes(body).await?;
                probe.emit(Lifecycle::RequestBody(bytes.clone()));
                Request::from_parts(parts, Body::from(bytes))
            };
            probe.emit(Lifecycle::Sent);

            let response = (self.handler)(request).await?;
            probe.emit(Lifecycle::FirstByte);
            Ok(response)
        })
    }
}
