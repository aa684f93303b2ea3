//! Local HTTP backends for proxy tests

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Backend answering `"<METHOD> <path> <x-user-id> <body>"`.
///
/// Paths starting with `/missing` answer 404, `/broken` answers 500.
pub async fn spawn_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let service = service_fn(|req: Request<Incoming>| async move {
                    let method = req.method().to_string();
                    let path = req.uri().path().to_string();
                    let user = req
                        .headers()
                        .get("x-user-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-")
                        .to_string();
                    let body = req.into_body().collect().await?.to_bytes();

                    let status = if path.starts_with("/missing") {
                        StatusCode::NOT_FOUND
                    } else if path.starts_with("/broken") {
                        StatusCode::INTERNAL_SERVER_ERROR
                    } else {
                        StatusCode::OK
                    };

                    let reply = format!(
                        "{} {} {} {}",
                        method,
                        path,
                        user,
                        String::from_utf8_lossy(&body)
                    );
                    let mut response = Response::new(Full::new(Bytes::from(reply)));
                    *response.status_mut() = status;
                    Ok::<_, hyper::Error>(response)
                });

                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

/// An address nothing listens on
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
