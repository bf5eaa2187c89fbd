//! Outbound URL guard
//!
//! Rejects requests whose target is loopback, private, link-local or a cloud
//! metadata endpoint before any connection is made. [`PublicOnlyResolver`]
//! repeats the address check at connect time, so a hostname that re-resolves
//! to a blocked address after [`UrlGuard::check`] still cannot be reached.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::{Host, Url};

use crate::error::NodeError;

const BLOCKED_HOSTNAMES: &[&str] = &["localhost", "metadata", "metadata.google.internal"];
const BLOCKED_HOST_SUFFIXES: &[&str] = &[".localhost", ".internal"];

/// Validates outbound URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlGuard {
    /// Resolve hostnames and check every resolved address
    pub resolve_dns: bool,
}

impl Default for UrlGuard {
    fn default() -> Self {
        Self { resolve_dns: true }
    }
}

impl UrlGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check IP literals and hostnames only, without DNS lookups
    pub fn literal_only() -> Self {
        Self { resolve_dns: false }
    }

    /// Parse and validate `raw`, returning the parsed URL when allowed
    pub async fn check(&self, raw: &str) -> Result<Url, NodeError> {
        let url = Url::parse(raw.trim())
            .map_err(|e| NodeError::invalid_argument(format!("Invalid URL '{raw}': {e}")))?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(deny(raw, format!("scheme '{scheme}' is not allowed")));
            }
        }

        match url.host() {
            None => {
                return Err(NodeError::invalid_argument(format!(
                    "URL '{raw}' must include a host"
                )))
            }
            Some(Host::Ipv4(ip)) => check_ip(raw, IpAddr::V4(ip))?,
            Some(Host::Ipv6(ip)) => check_ip(raw, IpAddr::V6(ip))?,
            Some(Host::Domain(domain)) => {
                check_hostname(raw, domain)?;
                if self.resolve_dns {
                    let port = url.port_or_known_default().unwrap_or(80);
                    let addrs = tokio::net::lookup_host((domain, port)).await.map_err(|e| {
                        NodeError::Collaborator(
                            anyhow::Error::new(e).context(format!("failed to resolve host '{domain}'")),
                        )
                    })?;
                    for addr in addrs {
                        check_ip(raw, addr.ip())?;
                    }
                }
            }
        }

        Ok(url)
    }
}

/// A hostname resolved to an address the guard blocks
#[derive(Debug, thiserror::Error)]
#[error("host '{host}' resolves to blocked address {addr}")]
pub struct BlockedHostError {
    pub host: String,
    pub addr: IpAddr,
}

/// DNS resolver for outbound clients that fails any lookup yielding a
/// blocked address
#[derive(Debug, Clone, Copy, Default)]
pub struct PublicOnlyResolver;

impl Resolve for PublicOnlyResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(resolve_public(name.as_str().to_string()))
    }
}

async fn resolve_public(host: String) -> Result<Addrs, Box<dyn std::error::Error + Send + Sync>> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0)).await?.collect();
    if let Some(blocked) = addrs.iter().find(|addr| is_blocked_ip(addr.ip())) {
        warn!(host = %host, addr = %blocked.ip(), "Blocked outbound connection");
        return Err(Box::new(BlockedHostError {
            addr: blocked.ip(),
            host,
        }));
    }
    Ok(Box::new(addrs.into_iter()))
}

fn deny(raw: &str, reason: String) -> NodeError {
    warn!(url = raw, %reason, "Blocked outbound request");
    NodeError::security(format!("Request to '{raw}' blocked: {reason}"))
}

fn check_hostname(raw: &str, domain: &str) -> Result<(), NodeError> {
    let host = domain.trim_end_matches('.').to_ascii_lowercase();
    let blocked = BLOCKED_HOSTNAMES.contains(&host.as_str())
        || BLOCKED_HOST_SUFFIXES
            .iter()
            .any(|suffix| host.ends_with(suffix));
    if blocked {
        return Err(deny(raw, format!("host '{host}' is internal")));
    }
    Ok(())
}

fn check_ip(raw: &str, ip: IpAddr) -> Result<(), NodeError> {
    if is_blocked_ip(ip) {
        return Err(deny(raw, format!("address {ip} is not publicly routable")));
    }
    Ok(())
}

/// Whether `ip` is loopback, private, link-local or otherwise not public
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        // 0.0.0.0/8
        || a == 0
        // 100.64.0.0/10 shared address space
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = embedded_v4(ip) {
        return is_blocked_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

/// IPv4 address carried in an IPv4-mapped (`::ffff:a.b.c.d`),
/// IPv4-compatible (`::a.b.c.d`) or NAT64 (`64:ff9b::a.b.c.d`) address
fn embedded_v4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return Some(v4);
    }
    let segments = ip.segments();
    let tail = Ipv4Addr::from(((segments[6] as u32) << 16) | segments[7] as u32);
    match segments {
        // :: and ::1 are handled as IPv6
        [0, 0, 0, 0, 0, 0, 0, 0 | 1] => None,
        [0, 0, 0, 0, 0, 0, _, _] => Some(tail),
        [0x64, 0xff9b, 0, 0, 0, 0, _, _] => Some(tail),
        _ => None,
    }
}
