#![allow(dead_code)]

use std::convert::Infallible;
use std::fs::File;
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use hyper::header::{CONTENT_ENCODING, CONTENT_TYPE, LOCATION, SET_COOKIE};
use hyper::server::conn::Http;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use tokio_rustls::TlsAcceptor;

pub const GZIP_LINE: &str = "the quick brown fox jumps over the lazy dog\n";
pub const GZIP_REPEAT: usize = 50;

/// Start a local HTTP/1.1 server on its own thread and runtime.
pub fn spawn_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let make = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle)) });
            Server::from_tcp(listener).unwrap().serve(make).await.unwrap();
        });
    });
    addr
}

/// Start the same routes behind TLS, with a certificate for `localhost` and
/// `127.0.0.1` signed by `tests/fixtures/ca.pem`.
pub fn spawn_tls_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(server_tls_config()));

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            loop {
                let (tcp, _) = listener.accept().await.unwrap();
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let Ok(tls) = acceptor.accept(tcp).await else {
                        return;
                    };
                    let _ = Http::new()
                        .serve_connection(tls, service_fn(handle))
                        .await;
                });
            }
        });
    });
    addr
}

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn server_tls_config() -> rustls::ServerConfig {
    let mut cert_reader = BufReader::new(File::open(fixture("server.pem")).unwrap());
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let mut key_reader = BufReader::new(File::open(fixture("server.key")).unwrap());
    let key = rustls_pemfile::private_key(&mut key_reader).unwrap().unwrap();
    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap()
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}

/// An address nothing listens on.
pub fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

async fn handle(request: Request<Body>) -> Result<Response<Body>, Infallible> {
    let path = request.uri().path().to_string();
    let response = match path.as_str() {
        "/get" => Response::builder()
            .header(CONTENT_TYPE, "application/json")
            .header(SET_COOKIE, "session=abc; Path=/; HttpOnly")
            .header(SET_COOKIE, "=a=5%%")
            .body(Body::from(r#"{"ok":true}"#)),
        "/gzip" => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(GZIP_LINE.repeat(GZIP_REPEAT).as_bytes())
                .unwrap();
            Response::builder()
                .header(CONTENT_TYPE, "text/plain")
                .header(CONTENT_ENCODING, "gzip")
                .body(Body::from(encoder.finish().unwrap()))
        }
        "/layered" => {
            let mut gzip = GzEncoder::new(Vec::new(), Compression::default());
            gzip.write_all(GZIP_LINE.repeat(GZIP_REPEAT).as_bytes()).unwrap();
            let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
            zlib.write_all(&gzip.finish().unwrap()).unwrap();
            Response::builder()
                .header(CONTENT_TYPE, "text/plain")
                .header(CONTENT_ENCODING, "gzip, deflate")
                .body(Body::from(zlib.finish().unwrap()))
        }
        "/post" => {
            let content_type = request.headers().get(CONTENT_TYPE).cloned();
            let body = hyper::body::to_bytes(request.into_body()).await.unwrap();
            let mut builder = Response::builder();
            if let Some(content_type) = content_type {
                builder = builder.header(CONTENT_TYPE, content_type);
            }
            builder.body(Body::from(body))
        }
        "/slow" => {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Response::builder().body(Body::from("slow"))
        }
        "/to-stall" => Response::builder()
            .status(StatusCode::FOUND)
            .header(LOCATION, "/stall")
            .body(Body::from("stalling")),
        "/stall" => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Response::builder().body(Body::from("stalled"))
        }
        "/binary" => Response::builder()
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(Body::from(vec![0xffu8, 0x00, 0xfe, 0x01])),
        p if p.starts_with("/redirect/") => {
            let remaining: u32 = p["/redirect/".len()..].parse().unwrap_or(0);
            if remaining == 0 {
                Response::builder()
                    .header(CONTENT_TYPE, "text/plain")
                    .body(Body::from("done"))
            } else {
                Response::builder()
                    .status(StatusCode::FOUND)
                    .header(LOCATION, format!("/redirect/{}", remaining - 1))
                    .body(Body::from("redirecting"))
            }
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("not found")),
    };
    Ok(response.unwrap())
}
