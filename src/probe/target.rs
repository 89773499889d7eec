//! Probe target validation.
//!
//! Re-run immediately before every probe: the DNS answer, not just the
//! configured hostname, decides whether a target is reachable by policy.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use url::Url;

use super::TargetError;

/// Parse and vet an HTTP probe URL: scheme must be http or https and the
/// host must not resolve to a private or reserved address.
pub async fn validate_http_target(raw: &str, allow_private: bool) -> Result<(), TargetError> {
    let url = parse_http_url(raw)?;
    let host = url
        .host_str()
        .ok_or_else(|| TargetError::Invalid("url has no host".to_string()))?;
    let port = url.port_or_known_default().unwrap_or(80);
    resolve_tcp_target(host, port, allow_private).await?;
    Ok(())
}

pub fn parse_http_url(raw: &str) -> Result<Url, TargetError> {
    let url = Url::parse(raw).map_err(|e| TargetError::Invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(TargetError::Invalid(format!("unsupported scheme: {}", other)));
        }
    }
    if url.host_str().is_none() {
        return Err(TargetError::Invalid("url has no host".to_string()));
    }
    Ok(url)
}

/// Resolve a host to the first policy-allowed address.
pub async fn resolve_tcp_target(
    host: &str,
    port: u16,
    allow_private: bool,
) -> Result<SocketAddr, TargetError> {
    if port == 0 {
        return Err(TargetError::Invalid("port must be in 1..=65535".to_string()));
    }

    // Literal addresses skip DNS
    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        if !allow_private && ip_is_disallowed(&ip) {
            return Err(TargetError::Disallowed(ip.to_string()));
        }
        return Ok(SocketAddr::new(ip, port));
    }

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| TargetError::Dns(e.to_string()))?
        .collect();

    if addrs.is_empty() {
        return Err(TargetError::Dns(format!("no addresses found for {}", host)));
    }

    if allow_private {
        return Ok(addrs[0]);
    }
    if let Some(bad) = addrs.iter().find(|a| ip_is_disallowed(&a.ip())) {
        return Err(TargetError::Disallowed(bad.ip().to_string()));
    }
    Ok(addrs[0])
}

/// RFC1918, loopback, link-local, CGNAT, documentation and reserved ranges.
pub fn ip_is_disallowed(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4_is_disallowed(v4),
        IpAddr::V6(v6) => v6_is_disallowed(v6),
    }
}

fn v4_is_disallowed(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        // CGNAT 100.64.0.0/10
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        // IETF protocol assignments 192.0.0.0/24
        || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0)
        // Class E reserved
        || octets[0] >= 240
}

fn v6_is_disallowed(ip: &Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return v4_is_disallowed(&mapped);
    }
    let segments = ip.segments();
    ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        // Unique local fc00::/7
        || (segments[0] & 0xfe00) == 0xfc00
        // Link-local fe80::/10
        || (segments[0] & 0xffc0) == 0xfe80
}
