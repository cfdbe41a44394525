//! Read-through adapter for the legacy HTTP source.
//!
//! `GET {base}/{url-encoded key}` returning `{"key": …, "value": …}` on a
//! hit and 404 on a miss. Anything else (transport error, timeout, odd
//! status, malformed body) is logged and reported as a miss, so a sick
//! legacy system costs cache hits, not read availability.

use async_trait::async_trait;
use cachemesh_kv::legacy::LegacySource;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LegacySetupError {
    #[error("invalid legacy base URL {url:?}: {reason}")]
    BadBaseUrl { url: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
}

/// The legacy endpoint's hit payload. The echoed key is ignored.
#[derive(Debug, Deserialize)]
struct LegacyEntry {
    value: String,
}

#[derive(Debug, Clone)]
pub struct HttpLegacySource {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl HttpLegacySource {
    /// `base_url` comes from `LEGACY_API_URL`; `timeout` bounds each fetch
    /// end to end (connect, request and body).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LegacySetupError> {
        let base_url = reqwest::Url::parse(base_url).map_err(|e| LegacySetupError::BadBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(LegacySetupError::BadBaseUrl {
                url: base_url.to_string(),
                reason: "URL cannot carry a key path segment".to_string(),
            });
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LegacySetupError::Client)?;
        Ok(Self { client, base_url })
    }

    fn url_for(&self, key: &str) -> reqwest::Url {
        let mut url = self.base_url.clone();
        // Checked in `new`: the URL is a base, so path segments exist.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(key);
        }
        url
    }
}

#[async_trait]
impl LegacySource for HttpLegacySource {
    async fn fetch(&self, key: &str) -> Option<Vec<u8>> {
        let url = self.url_for(key);
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(key, error = %e, "legacy fetch failed, treating as miss");
                return None;
            }
        };

        match response.status() {
            reqwest::StatusCode::OK => match response.json::<LegacyEntry>().await {
                Ok(entry) => Some(entry.value.into_bytes()),
                Err(e) => {
                    tracing::warn!(key, error = %e, "legacy payload unreadable, treating as miss");
                    None
                }
            },
            reqwest::StatusCode::NOT_FOUND => None,
            status => {
                tracing::warn!(key, %status, "unexpected legacy status, treating as miss");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    /// Minimal stand-in for the legacy HTTP API: one known key under
    /// `/legacy/data`, a path that always errors, 404 for the rest.
    async fn fake_legacy(
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let (status, body) = match req.uri().path() {
            "/legacy/data/user:1001" => (
                StatusCode::OK,
                r#"{"key": "user:1001", "value": "Dr. Heisenberg"}"#,
            ),
            "/legacy/data/spaced%20key" => (
                StatusCode::OK,
                r#"{"key": "spaced key", "value": "encoded"}"#,
            ),
            "/legacy/data/broken" => (StatusCode::OK, "this is not json"),
            "/legacy/data/flaky" => (StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            _ => (StatusCode::NOT_FOUND, r#"{"detail": "Key not found"}"#),
        };
        Ok(Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap())
    }

    async fn spawn_fake_legacy() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = TokioIo::new(stream);
                tokio::spawn(async move {
                    let _ = http1::Builder::new()
                        .serve_connection(io, service_fn(fake_legacy))
                        .await;
                });
            }
        });
        addr
    }

    fn source_for(addr: SocketAddr) -> HttpLegacySource {
        HttpLegacySource::new(
            &format!("http://{addr}/legacy/data"),
            Duration::from_millis(500),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_hit_decodes_value() {
        let addr = spawn_fake_legacy().await;
        let source = source_for(addr);
        assert_eq!(
            source.fetch("user:1001").await,
            Some(b"Dr. Heisenberg".to_vec())
        );
    }

    #[tokio::test]
    async fn test_miss_on_404() {
        let addr = spawn_fake_legacy().await;
        let source = source_for(addr);
        assert_eq!(source.fetch("user:9999").await, None);
    }

    #[tokio::test]
    async fn test_key_is_url_encoded() {
        let addr = spawn_fake_legacy().await;
        let source = source_for(addr);
        assert_eq!(source.fetch("spaced key").await, Some(b"encoded".to_vec()));
    }

    #[tokio::test]
    async fn test_server_error_is_a_miss() {
        let addr = spawn_fake_legacy().await;
        let source = source_for(addr);
        assert_eq!(source.fetch("flaky").await, None);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_a_miss() {
        let addr = spawn_fake_legacy().await;
        let source = source_for(addr);
        assert_eq!(source.fetch("broken").await, None);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_miss() {
        // Port 1 refuses connections promptly on loopback.
        let source =
            HttpLegacySource::new("http://127.0.0.1:1/legacy/data", Duration::from_millis(300))
                .unwrap();
        assert_eq!(source.fetch("anything").await, None);
    }

    #[test]
    fn test_rejects_unusable_base_url() {
        assert!(HttpLegacySource::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpLegacySource::new("mailto:x@y", Duration::from_secs(1)).is_err());
    }
}
