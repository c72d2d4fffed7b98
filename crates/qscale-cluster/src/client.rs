//! Minimal HTTP/1.1 client over a fresh TCP connection per request.
//!
//! Scale calls are rare (at most one per service per cooldown), so there
//! is no connection pooling. Only plain `http://` is supported; TLS to the
//! API server is expected to be terminated by `kubectl proxy` or a sidecar.

use std::time::Duration;

use ::http::{Method, Request, StatusCode, Uri};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use tracing::debug;

use crate::error::{ClusterError, ClusterResult};

/// A buffered response.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub body: Bytes,
}

impl Response {
    /// Body as lossy UTF-8, for error messages.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// One outgoing request against `endpoint` (`host:port`).
#[derive(Debug, Clone)]
pub struct Call<'a> {
    pub endpoint: &'a str,
    pub method: Method,
    pub path: &'a str,
    pub bearer: Option<&'a str>,
    pub body: Option<(&'static str, Vec<u8>)>,
    pub timeout: Duration,
}

impl<'a> Call<'a> {
    /// Request without auth or body.
    pub fn new(endpoint: &'a str, method: Method, path: &'a str, timeout: Duration) -> Self {
        Self {
            endpoint,
            method,
            path,
            bearer: None,
            body: None,
            timeout,
        }
    }

    /// Send `Authorization: Bearer <token>` when a token is given.
    pub fn bearer(mut self, token: Option<&'a str>) -> Self {
        self.bearer = token;
        self
    }

    /// Attach a request body with the given content type.
    pub fn json(mut self, content_type: &'static str, body: Vec<u8>) -> Self {
        self.body = Some((content_type, body));
        self
    }

    /// Send the request, failing with `Timeout` after the configured limit.
    pub async fn send(self) -> ClusterResult<Response> {
        let what = format!("{} http://{}{}", self.method, self.endpoint, self.path);
        match tokio::time::timeout(self.timeout, self.send_inner()).await {
            Ok(result) => result,
            Err(_) => Err(ClusterError::Timeout(what)),
        }
    }

    async fn send_inner(self) -> ClusterResult<Response> {
        let stream = tokio::net::TcpStream::connect(self.endpoint)
            .await
            .map_err(|source| ClusterError::Connect {
                endpoint: self.endpoint.to_string(),
                source,
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(self.path)
            .header("host", self.endpoint)
            .header("user-agent", "qscale/0.1")
            .header("accept", "application/json");
        if let Some(token) = self.bearer {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let body = match self.body {
            Some((content_type, bytes)) => {
                builder = builder.header("content-type", content_type);
                Full::new(Bytes::from(bytes))
            }
            None => Full::new(Bytes::new()),
        };
        let req = builder.body(body)?;

        let resp = sender.send_request(req).await?;
        let status = resp.status();
        let body = resp.into_body().collect().await?.to_bytes();
        debug!(method = %self.method, path = self.path, %status, "cluster call complete");

        Ok(Response { status, body })
    }
}

/// Split an `http://host[:port]/path` URL into (`host:port`, `/path`).
pub fn split_http_url(url: &str) -> ClusterResult<(String, String)> {
    let invalid = |reason: &str| ClusterError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let uri: Uri = url.parse().map_err(|_| invalid("not a URI"))?;
    match uri.scheme_str() {
        Some("http") => {}
        Some(other) => return Err(invalid(&format!("unsupported scheme {other}"))),
        None => return Err(invalid("missing scheme")),
    }
    let host = uri.host().ok_or_else(|| invalid("missing host"))?;
    let port = uri.port_u16().unwrap_or(80);
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    Ok((format!("{host}:{port}"), path))
}

#[cfg(test)]
pub(crate) mod testing {
    //! A one-shot fake HTTP server for adapter tests.

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serve a single request with `status` and `body`; the raw request
    /// text is delivered on the returned channel.
    pub async fn serve_once(status: u16, body: &str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let body = body.to_string();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                if let Some(head_end) = find(&buf, b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
                    let len = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if buf.len() >= head_end + 4 + len || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let resp = format!(
                "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(resp.as_bytes()).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });

        (addr, rx)
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_url_with_port_and_path() {
        let (endpoint, path) = split_http_url("http://hooks.local:8080/robot/send?token=abc").unwrap();
        assert_eq!(endpoint, "hooks.local:8080");
        assert_eq!(path, "/robot/send?token=abc");
    }

    #[test]
    fn split_url_defaults() {
        let (endpoint, path) = split_http_url("http://hooks.local").unwrap();
        assert_eq!(endpoint, "hooks.local:80");
        assert_eq!(path, "/");
    }

    #[test]
    fn https_is_rejected() {
        let err = split_http_url("https://hooks.local/x").unwrap_err();
        assert!(matches!(err, ClusterError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn send_posts_body_and_reads_response() {
        let (addr, request) = testing::serve_once(200, r#"{"ok":true}"#).await;

        let resp = Call::new(&addr, Method::POST, "/hook", Duration::from_secs(2))
            .bearer(Some("s3cret"))
            .json("application/json", br#"{"a":1}"#.to_vec())
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body_text(), r#"{"ok":true}"#);

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /hook HTTP/1.1"));
        assert!(request.contains("authorization: Bearer s3cret"));
        assert!(request.ends_with(r#"{"a":1}"#));
    }

    #[tokio::test]
    async fn connection_refused_is_connect_error() {
        let err = Call::new("127.0.0.1:1", Method::GET, "/", Duration::from_millis(500))
            .send()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClusterError::Connect { .. } | ClusterError::Timeout(_)
        ));
    }
}
