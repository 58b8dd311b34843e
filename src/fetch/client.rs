use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use hyper::header::{
    HeaderValue, ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION,
    USER_AGENT,
};
use hyper::{Body, Method, Request, Response, StatusCode, Uri};
use url::Url;

use super::decode::{ContentEncoding, ACCEPTED_CODINGS};
use super::response::{FetchResponse, ResponseBody, ResponseParts};
use super::{Fetch, FetchOptions, FetchRequest, RedirectPolicy};
use crate::error::{Error, Result};
use crate::transport::{Probe, SharedTransport, Transport};

/// Reference [`Fetch`] implementation over any [`Transport`].
#[derive(Clone)]
pub struct Client {
    transport: SharedTransport,
    user_agent: String,
}

impl Client {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::from_shared(Arc::new(transport))
    }

    pub fn from_shared(transport: SharedTransport) -> Self {
        Self {
            transport,
            user_agent: default_user_agent(),
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse> {
        let FetchRequest {
            mut method,
            mut url,
            mut headers,
            mut body,
            options,
        } = request;
        let transport = options
            .transport
            .clone()
            .unwrap_or_else(|| self.transport.clone());

        self.apply_default_headers(&mut headers, &options)?;

        let mut redirects = 0;
        loop {
            let outgoing = build_request(&method, &url, &headers, body.clone())?;
            let response = transport.send(outgoing, Probe::detached()).await?;

            let location = redirect_location(&response);
            let Some(location) = location else {
                return Ok(into_fetch_response(response, url, redirects > 0, &options));
            };

            match options.redirect {
                RedirectPolicy::Manual => {
                    return Ok(into_fetch_response(response, url, redirects > 0, &options));
                }
                RedirectPolicy::Error => {
                    return Err(Error::Redirect(format!(
                        "{} redirected to {} but redirects are disabled",
                        url, location
                    )));
                }
                RedirectPolicy::Follow => {}
            }
            if redirects >= options.max_redirects {
                return Err(Error::Redirect(format!(
                    "stopped after {} redirects at {}",
                    redirects, url
                )));
            }

            let next = url.join(&location)?;
            let status = response.status();
            // The hop is finished only once its body has been read.
            hyper::body::to_bytes(response.into_body()).await?;

            if rewrites_to_get(status, &method) {
                method = Method::GET;
                body = None;
                headers.remove(CONTENT_TYPE);
                headers.remove(CONTENT_LENGTH);
            }
            if next.origin() != url.origin() {
                headers.remove(AUTHORIZATION);
            }
            tracing::debug!(
                from = %url,
                to = %next,
                status = status.as_u16(),
                "following redirect"
            );

            url = next;
            redirects += 1;
        }
    }

    fn apply_default_headers(
        &self,
        headers: &mut hyper::HeaderMap,
        options: &FetchOptions,
    ) -> Result<()> {
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        }
        if !headers.contains_key(USER_AGENT) {
            let agent = HeaderValue::from_str(&self.user_agent)
                .map_err(|e| Error::InvalidArgs(format!("invalid user agent: {}", e)))?;
            headers.insert(USER_AGENT, agent);
        }
        if options.compress
            && cfg!(feature = "compression")
            && !headers.contains_key(ACCEPT_ENCODING)
        {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(ACCEPTED_CODINGS));
        }
        Ok(())
    }
}

impl Fetch for Client {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<FetchResponse>> {
        Box::pin(self.execute(request))
    }
}

pub(crate) fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

fn build_request(
    method: &Method,
    url: &Url,
    headers: &hyper::HeaderMap,
    body: Option<Bytes>,
) -> Result<Request<Body>> {
    let mut target = url.clone();
    target.set_fragment(None);
    let uri: Uri = target.as_str().parse().map_err(http::Error::from)?;

    let mut request = Request::builder()
        .method(method.clone())
        .uri(uri)
        .body(Body::empty())?;
    *request.headers_mut() = headers.clone();

    if let Some(body) = body {
        if !request.headers().contains_key(CONTENT_LENGTH) {
            request
                .headers_mut()
                .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }
        *request.body_mut() = Body::from(body);
    }
    Ok(request)
}

fn redirect_location(response: &Response<Body>) -> Option<String> {
    if !response.status().is_redirection() {
        return None;
    }
    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// 303 always becomes a GET; 301 and 302 do so for POST, as browsers do.
fn rewrites_to_get(status: StatusCode, method: &Method) -> bool {
    match status {
        StatusCode::SEE_OTHER => *method != Method::HEAD,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => *method == Method::POST,
        _ => false,
    }
}

fn into_fetch_response(
    response: Response<Body>,
    url: Url,
    redirected: bool,
    options: &FetchOptions,
) -> FetchResponse {
    let (parts, body) = response.into_parts();
    let status_text = parts
        .extensions
        .get::<hyper::ext::ReasonPhrase>()
        .map(|reason| String::from_utf8_lossy(reason.as_bytes()).into_owned())
        .or_else(|| parts.status.canonical_reason().map(str::to_string))
        .unwrap_or_default();
    let encoding = if options.compress {
        ContentEncoding::from_headers(&parts.headers)
    } else {
        ContentEncoding::identity()
    };

    FetchResponse::from_parts(
        ResponseParts {
            status: parts.status,
            status_text,
            version: parts.version,
            headers: parts.headers,
            url,
            redirected,
            extensions: parts.extensions,
        },
        ResponseBody::streaming(body, encoding),
    )
}
