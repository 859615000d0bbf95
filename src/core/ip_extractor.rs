//! Client identity extraction for rate limiting
//!
//! The rate limiter keys on the client IP. Proxy headers are only honoured
//! when the direct peer is an explicitly trusted proxy, otherwise anyone could
//! pick their own limiter by forging a header.

use log::{debug, warn};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use warp::http::HeaderMap;

use crate::config::ServerConfig;

/// Headers checked, in order, when the peer is a trusted proxy
const PROXY_HEADERS: [&str; 3] = ["cf-connecting-ip", "x-forwarded-for", "x-real-ip"];

/// Configuration for IP extraction behavior
#[derive(Debug, Clone, Default)]
pub struct IpExtractionConfig {
    pub trust_proxy_headers: bool,
    pub trusted_proxies: Vec<IpAddr>,
}

impl IpExtractionConfig {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            trust_proxy_headers: config.trust_proxy_headers,
            trusted_proxies: config.trusted_proxies.clone(),
        }
    }
}

/// Extract the client IP used as the rate-limit identity
pub fn extract_client_ip(
    headers: &HeaderMap,
    remote_addr: Option<SocketAddr>,
    config: &IpExtractionConfig,
) -> IpAddr {
    let direct_ip = remote_addr.map(|addr| addr.ip());

    let behind_trusted_proxy = config.trust_proxy_headers
        && direct_ip.map_or(false, |ip| config.trusted_proxies.contains(&ip));

    if behind_trusted_proxy {
        for name in PROXY_HEADERS {
            if let Some(ip) = header_ip(headers, name) {
                debug!("Extracted IP from {}: {}", name, ip);
                return ip;
            }
        }
        warn!("Trusted proxy sent no usable client IP header, using proxy IP");
    }

    match direct_ip {
        Some(ip) => ip,
        None => {
            warn!("No peer address available, falling back to localhost");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    let value = headers.get(name)?.to_str().ok()?;
    // X-Forwarded-For is "client, proxy1, proxy2"; the leftmost is the client
    let candidate = value.split(',').next().unwrap_or("").trim();
    match candidate.parse::<IpAddr>() {
        Ok(ip) => Some(ip),
        Err(_) => {
            warn!("Invalid IP format in {} header: {}", name, candidate);
            None
        }
    }
}
