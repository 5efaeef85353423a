//! SSRF protection: classify resolved IP addresses before dialing.
//!
//! The fetcher talks to arbitrary user-supplied URLs, so every address a
//! hostname resolves to is checked here before a connection is opened.
//! Rejected ranges: loopback, link-local (which covers cloud metadata
//! endpoints like 169.254.169.254), RFC 1918 private, unique-local IPv6
//! (fc00::/7), unspecified and multicast.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SsrfError {
    #[error("access to localhost is forbidden")]
    Localhost,
    #[error("access to link-local addresses is forbidden")]
    LinkLocal,
    #[error("access to private IP addresses is forbidden")]
    Private,
}

/// Checks whether an IP address is safe to dial.
///
/// Callers must validate every address returned by DNS and accept the
/// hostname only if all of them pass.
pub fn validate_ip(ip: IpAddr) -> Result<(), SsrfError> {
    match ip {
        IpAddr::V4(v4) => validate_v4(v4),
        IpAddr::V6(v6) => {
            // ::ffff:a.b.c.d carries an IPv4 address; classify the inner one
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return validate_v4(mapped);
            }
            validate_v6(v6)
        }
    }
}

fn validate_v4(ip: Ipv4Addr) -> Result<(), SsrfError> {
    if ip.is_loopback() {
        return Err(SsrfError::Localhost);
    }
    if ip.is_link_local() {
        return Err(SsrfError::LinkLocal);
    }
    if ip.is_private() || ip.is_unspecified() || ip.is_multicast() || ip.is_broadcast() {
        return Err(SsrfError::Private);
    }
    Ok(())
}

fn validate_v6(ip: Ipv6Addr) -> Result<(), SsrfError> {
    if ip.is_loopback() {
        return Err(SsrfError::Localhost);
    }
    // fe80::/10
    if (ip.segments()[0] & 0xffc0) == 0xfe80 {
        return Err(SsrfError::LinkLocal);
    }
    // fc00::/7 unique-local
    if (ip.segments()[0] & 0xfe00) == 0xfc00 {
        return Err(SsrfError::Private);
    }
    if ip.is_unspecified() || ip.is_multicast() {
        return Err(SsrfError::Private);
    }
    Ok(())
}
