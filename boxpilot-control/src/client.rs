//! HTTP client bound to the kernel's local control API.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ControlError;
use crate::model::{
    LogEvent, LogLevel, MemorySample, ProxyListing, TrafficSample, VersionInfo,
};
use crate::stream::EventStream;

/// Address the embedded template's control API listens on.
pub const DEFAULT_CONTROLLER: &str = "127.0.0.1:9090";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct ControlClient {
    base: Url,
    addr: String,
    secret: Option<String>,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Serialize)]
struct SelectBody<'a> {
    name: &'a str,
}

impl ControlClient {
    /// `addr` is `host:port` (or a full `http://` URL). A wildcard listen
    /// address is dialed through loopback.
    pub fn new(addr: &str, secret: Option<String>) -> Result<Self, ControlError> {
        let raw = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };
        let mut base =
            Url::parse(&raw).map_err(|_| ControlError::InvalidAddress(addr.to_string()))?;
        if base.cannot_be_a_base() || base.host_str().is_none() {
            return Err(ControlError::InvalidAddress(addr.to_string()));
        }
        if matches!(base.host_str(), Some("0.0.0.0") | Some("[::]")) {
            base.set_host(Some("127.0.0.1"))
                .map_err(|_| ControlError::InvalidAddress(addr.to_string()))?;
        }

        // Loopback traffic must never be routed through a proxy, least of
        // all the one this client controls.
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(ControlError::Transport)?;

        Ok(Self {
            base,
            addr: addr.to_string(),
            secret: secret.filter(|s| !s.is_empty()),
            http,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    // -----------------------------------------------------------------------
    // Request / response
    // -----------------------------------------------------------------------

    pub async fn version_info(&self) -> Result<VersionInfo, ControlError> {
        let response = self
            .send(self.request(Method::GET, &["version"]).timeout(REQUEST_TIMEOUT))
            .await?;
        self.decode(response).await
    }

    /// Kernel version string. `Unreachable` is how callers learn the kernel
    /// is not running.
    pub async fn version(&self) -> Result<String, ControlError> {
        Ok(self.version_info().await?.version)
    }

    pub async fn proxies(&self) -> Result<ProxyListing, ControlError> {
        let response = self
            .send(self.request(Method::GET, &["proxies"]).timeout(REQUEST_TIMEOUT))
            .await?;
        self.decode(response).await
    }

    /// Select `name` in routing group `group`. Rejections carry the kernel's
    /// own message unmodified.
    pub async fn switch_proxy(&self, group: &str, name: &str) -> Result<(), ControlError> {
        let request = self
            .request(Method::PUT, &["proxies", group])
            .timeout(REQUEST_TIMEOUT)
            .json(&SelectBody { name });
        let response = self.send(request).await?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(group, name, "proxy selection updated");
            return Ok(());
        }
        let message = error_message(response).await;
        Err(match status {
            StatusCode::NOT_FOUND => ControlError::UnknownGroup {
                group: group.to_string(),
                message,
            },
            StatusCode::BAD_REQUEST => ControlError::UnknownMember {
                group: group.to_string(),
                name: name.to_string(),
                message,
            },
            other => ControlError::Rejected {
                status: other.as_u16(),
                message,
            },
        })
    }

    // -----------------------------------------------------------------------
    // Streams
    // -----------------------------------------------------------------------

    pub async fn logs(&self, level: LogLevel) -> Result<EventStream<LogEvent>, ControlError> {
        self.open_stream(&["logs"], &[("level", level.as_str())]).await
    }

    pub async fn memory(&self) -> Result<EventStream<MemorySample>, ControlError> {
        self.open_stream(&["memory"], &[]).await
    }

    pub async fn traffic(&self) -> Result<EventStream<TrafficSample>, ControlError> {
        self.open_stream(&["traffic"], &[]).await
    }

    /// No overall timeout: the response body lives as long as the kernel.
    async fn open_stream<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<EventStream<T>, ControlError> {
        let mut url = self.url(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        let response = self.send(self.authorize(self.http.get(url))).await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(ControlError::Rejected {
                status,
                message: error_message(response).await,
            });
        }
        Ok(EventStream::new(response))
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        self.authorize(self.http.request(method, self.url(segments)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.secret {
            Some(secret) => request.bearer_auth(secret),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ControlError> {
        request.send().await.map_err(|err| {
            if err.is_connect() {
                ControlError::Unreachable {
                    addr: self.addr.clone(),
                    source: err,
                }
            } else {
                ControlError::Transport(err)
            }
        })
    }

    async fn decode<T: DeserializeOwned>(&self, response: Response) -> Result<T, ControlError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ControlError::Rejected {
                status: status.as_u16(),
                message: error_message(response).await,
            });
        }
        let body = response.bytes().await.map_err(ControlError::Transport)?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// `{"message": ...}` when the kernel sent one, else the raw body, else the
/// status reason.
async fn error_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if let Ok(api) = serde_json::from_str::<ApiMessage>(&body) {
        return api.message;
    }
    let body = body.trim();
    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        body.to_string()
    }
}
