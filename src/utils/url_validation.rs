//! URL validation for configured endpoints
//!
//! The backend must be reached over HTTP(S) and the realtime provider over
//! WebSocket. Plain `http`/`ws` is accepted but logged when the host is not
//! local, since credentials travel over these connections.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use tracing::warn;
use url::{Host, Url};

/// Errors that can occur during URL validation
#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be one of {expected}, got: {actual}")]
    SchemeNotAllowed {
        expected: &'static str,
        actual: String,
    },

    #[error("URL must have a host")]
    MissingHost,
}

/// Checks if an IPv4 address is loopback or private
pub fn is_local_ipv4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

/// Checks if an IPv6 address is loopback or unique-local
pub fn is_local_ipv6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    let segments = ip.segments();
    // Link-local (fe80::/10) and unique local (fc00::/7)
    segments[0] & 0xFFC0 == 0xFE80 || segments[0] & 0xFE00 == 0xFC00
}

/// Whether the URL points at this machine or a private network.
fn is_local_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain == "localhost" || domain.ends_with(".localhost"),
        Some(Host::Ipv4(ip)) => is_local_ipv4(&ip),
        Some(Host::Ipv6(ip)) => is_local_ipv6(&ip),
        None => false,
    }
}

fn validate_scheme(
    url_str: &str,
    secure: &'static str,
    plain: &'static str,
    expected: &'static str,
) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    let scheme = url.scheme();
    if scheme != secure && scheme != plain {
        return Err(UrlValidationError::SchemeNotAllowed {
            expected,
            actual: scheme.to_string(),
        });
    }

    if url.host().is_none() {
        return Err(UrlValidationError::MissingHost);
    }

    if scheme == plain && !is_local_host(&url) {
        warn!(
            "Endpoint {} uses unencrypted {} to a non-local host",
            url, plain
        );
    }

    Ok(url)
}

/// Validate the credential issuer / prompt store base URL.
pub fn validate_backend_url(url_str: &str) -> Result<Url, UrlValidationError> {
    validate_scheme(url_str, "https", "http", "http, https")
}

/// Validate a realtime WebSocket endpoint.
pub fn validate_realtime_url(url_str: &str) -> Result<Url, UrlValidationError> {
    validate_scheme(url_str, "wss", "ws", "ws, wss")
}

/// Whether an IP literal is local. Exposed for callers that resolved a host.
pub fn is_local_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_local_ipv4(v4),
        IpAddr::V6(v6) => is_local_ipv6(v6),
    }
}
