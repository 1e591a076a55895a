// Transport construction for the daemon API
//
// Remote builders are reached over HTTP(S) with keep-alive disabled and a
// static Authorization header. Local daemons are usually a unix socket, which
// reqwest can't dial, so that path drives a hyper connection over the socket.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONNECTION};
use reqwest::Method;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::errors::ConnectError;

/// Bound on connect + TLS handshake
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on waiting for response headers once a request is sent
pub const RESPONSE_HEADER_TIMEOUT: Duration = Duration::from_secs(60);

/// Options for building a transport
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Use HTTPS with default trust roots for `tcp://` hosts
    pub tls: bool,
    /// Static Authorization header value attached to every request
    pub authorization: Option<String>,
}

/// `Basic base64("<app>:<token>")`
pub fn basic_auth(app_name: &str, token: &str) -> String {
    let auth = format!("{}:{}", app_name, token);
    format!("Basic {}", STANDARD.encode(auth.as_bytes()))
}

/// A response with the body fully read
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// Header names are lowercased
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim().to_string()
    }

    /// Map non-2xx statuses to errors; 401 is the distinguished terminal case
    pub fn error_for_status(self) -> Result<Self, ConnectError> {
        match self.status {
            s if (200..300).contains(&s) => Ok(self),
            401 => Err(ConnectError::Unauthorized),
            status => Err(ConnectError::Http {
                status,
                message: self.text(),
            }),
        }
    }
}

/// How requests reach the daemon
#[derive(Debug, Clone)]
pub enum Transport {
    Http {
        client: reqwest::Client,
        base_url: String,
    },
    Unix {
        socket: PathBuf,
    },
}

impl Transport {
    /// Build a transport for a docker host string
    ///
    /// Accepts `unix://<path>`, `tcp://<host>:<port>`, `http://` and `https://`.
    pub fn build(host: &str, options: &TransportOptions) -> Result<Self, ConnectError> {
        if let Some(path) = host.strip_prefix("unix://") {
            return Ok(Transport::Unix {
                socket: PathBuf::from(path),
            });
        }

        let base_url = if let Some(addr) = host.strip_prefix("tcp://") {
            let scheme = if options.tls { "https" } else { "http" };
            format!("{}://{}", scheme, addr)
        } else if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            return Err(ConnectError::ClientBuild(format!(
                "unsupported docker host: {}",
                host
            )));
        };

        let mut headers = HeaderMap::new();
        if let Some(auth) = &options.authorization {
            let mut value = HeaderValue::from_str(auth)
                .map_err(|e| ConnectError::ClientBuild(format!("invalid auth header: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONNECTION, HeaderValue::from_static("close"));

        // Keep-alive stays off: reused connections to the builder deadlock the
        // proxy in front of it during concurrent layer fetches.
        let client = reqwest::Client::builder()
            .connect_timeout(TLS_HANDSHAKE_TIMEOUT)
            .pool_max_idle_per_host(0)
            .default_headers(headers)
            .build()
            .map_err(|e| ConnectError::ClientBuild(e.to_string()))?;

        debug!(base_url = %base_url, "Built HTTP transport");
        Ok(Transport::Http { client, base_url })
    }

    /// Send a request and read the whole response
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<RawResponse, ConnectError> {
        match self {
            Transport::Http { client, base_url } => {
                let url = format!("{}{}", base_url, path);
                let send = client.request(method, &url).query(query).send();
                let response = tokio::time::timeout(RESPONSE_HEADER_TIMEOUT, send)
                    .await
                    .map_err(|_| {
                        ConnectError::Io(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "timed out waiting for response headers",
                        ))
                    })??;

                let status = response.status().as_u16();
                let headers = collect_headers(response.headers());
                let body = response.bytes().await?.to_vec();

                Ok(RawResponse {
                    status,
                    headers,
                    body,
                })
            }
            Transport::Unix { socket } => unix_request(socket, method, path, query).await,
        }
    }
}

fn encode_query(path: &str, query: &[(&str, &str)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }
    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query)
        .finish();
    format!("{}?{}", path, encoded)
}

#[cfg(target_family = "unix")]
async fn unix_request(
    socket: &std::path::Path,
    method: Method,
    path: &str,
    query: &[(&str, &str)],
) -> Result<RawResponse, ConnectError> {
    use hyper::{Body, Request};
    use reqwest::header::{HOST, USER_AGENT};
    use tokio::net::UnixStream;

    let stream = tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, UnixStream::connect(socket))
        .await
        .map_err(|_| {
            ConnectError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out connecting to docker socket",
            ))
        })??;

    let (mut sender, connection) = hyper::client::conn::handshake(stream).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!(error = %e, "Docker socket connection ended with error");
        }
    });

    let request = Request::builder()
        .method(method)
        .uri(encode_query(path, query))
        .header(HOST, "docker")
        .header(USER_AGENT, concat!("remote-builder/", env!("CARGO_PKG_VERSION")))
        .header(CONNECTION, "close")
        .body(Body::empty())
        .map_err(|e| ConnectError::ClientBuild(format!("invalid daemon request: {}", e)))?;

    let response = tokio::time::timeout(RESPONSE_HEADER_TIMEOUT, sender.send_request(request))
        .await
        .map_err(|_| {
            ConnectError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out waiting for response headers",
            ))
        })??;

    let status = response.status().as_u16();
    let headers = collect_headers(response.headers());
    let body = hyper::body::to_bytes(response.into_body()).await?.to_vec();

    Ok(RawResponse {
        status,
        headers,
        body,
    })
}

#[cfg(not(target_family = "unix"))]
async fn unix_request(
    socket: &std::path::Path,
    _method: Method,
    _path: &str,
    _query: &[(&str, &str)],
) -> Result<RawResponse, ConnectError> {
    Err(ConnectError::ClientBuild(format!(
        "unix sockets are not supported on this platform: {}",
        socket.display()
    )))
}

/// Lowercased header names; repeated headers are joined with ", "
fn collect_headers(map: &HeaderMap) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = HashMap::new();
    for (name, value) in map {
        let Ok(value) = value.to_str() else {
            continue;
        };
        headers
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    headers
}
