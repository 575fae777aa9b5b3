//! Kernel configuration document model.
//!
//! Only the fields synthesis reads or rewrites are typed; everything else
//! (protocol parameters, DNS, route rules, ...) is carried verbatim through
//! `#[serde(flatten)]` maps so unknown kernel options survive a round trip.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level kernel configuration (template or synthesized result).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    #[serde(default)]
    pub inbounds: Vec<Inbound>,
    #[serde(default)]
    pub outbounds: Vec<Outbound>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// One inbound listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inbound {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One outbound: a concrete endpoint, a routing group, or a built-in
/// (`direct`, `block`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Member tags; present only on routing groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbounds: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsBlock>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Transport-security block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TlsBlock {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

/// Subscription feed payload: a bare outbound list.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionDocument {
    #[serde(default)]
    pub outbounds: Vec<Outbound>,
}

impl Outbound {
    /// Only endpoints that name a server can carry traffic.
    pub fn has_server(&self) -> bool {
        self.server.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    pub fn is_group(&self) -> bool {
        self.outbounds.is_some()
    }

    /// Drop a disabled TLS block; the kernel rejects disabled blocks that
    /// still carry certificate or SNI fields.
    pub fn normalize_tls(&mut self) {
        if self.tls.as_ref().is_some_and(|tls| !tls.enabled) {
            self.tls = None;
        }
    }
}

impl KernelConfig {
    /// Control API address from `experimental.clash_api.external_controller`.
    pub fn controller_addr(&self) -> Option<&str> {
        self.clash_api()?
            .get("external_controller")?
            .as_str()
            .filter(|s| !s.is_empty())
    }

    /// Bearer secret from `experimental.clash_api.secret`.
    pub fn controller_secret(&self) -> Option<&str> {
        self.clash_api()?
            .get("secret")?
            .as_str()
            .filter(|s| !s.is_empty())
    }

    /// Address of the `mixed` (HTTP + SOCKS) inbound, used as the system
    /// proxy target. An unspecified or missing listen address maps to loopback.
    pub fn proxy_listen(&self) -> Option<SocketAddr> {
        let inbound = self.inbounds.iter().find(|i| i.kind == "mixed")?;
        let port = inbound.listen_port?;
        let ip = inbound
            .listen
            .as_deref()
            .and_then(|raw| raw.parse::<IpAddr>().ok())
            .filter(|ip| !ip.is_unspecified())
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        Some(SocketAddr::new(ip, port))
    }

    fn clash_api(&self) -> Option<&Map<String, Value>> {
        self.rest
            .get("experimental")?
            .get("clash_api")?
            .as_object()
    }
}
