//! SSRF-hardened HTTP client and the `Transport` seam the tests replace.
//!
//! SSRF enforcement lives in a custom DNS resolver so validation happens
//! at connection establishment, not as a separate pre-check that a
//! re-resolving attacker could race. Hosts given as IP literals bypass
//! DNS entirely, so those are validated before the request is dispatched.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hyper::client::connect::dns::Name;
use reqwest::dns::{Addrs, Resolve, Resolving};
use reqwest::header::{self, HeaderMap};
use reqwest::StatusCode;

use crate::ssrf;

/// Identifies the reader to feed origins, with a contact route.
pub const USER_AGENT: &str =
    "Feedloom/0.1 (+https://github.com/feedloom/feedloom; mailto:ops@feedloom.dev)";

/// Stable prefix on connection errors caused by SSRF validation, so the
/// fetch walk can classify them as permanent.
pub const SSRF_SENTINEL: &str = "security validation failed";

/// An HTTP response with its body already read, capped at the configured
/// byte limit. Redirects arrive here intact; nothing is auto-followed.
#[derive(Debug, Clone)]
pub struct FeedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl FeedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// The one seam the test suite replaces: a conditional GET.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FeedResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Fallback deadline when the caller's own timeout is broader
    pub request_timeout: Duration,
    /// Response body byte cap
    pub max_body_bytes: usize,
    /// SSRF address validation; disabled only by loopback-bound tests
    pub validate_addresses: bool,
}

/// `reqwest` wrapper: fixed User-Agent, no auto-redirects, SSRF-validating
/// resolver, capped body reads.
pub struct SafeHttpClient {
    client: reqwest::Client,
    max_body_bytes: usize,
    validate_addresses: bool,
}

impl SafeHttpClient {
    pub fn new(cfg: HttpClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(cfg.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none());

        if cfg.validate_addresses {
            builder = builder.dns_resolver(Arc::new(ValidatingResolver));
        }

        let client = builder.build().context("failed to build HTTP client")?;

        Ok(Self {
            client,
            max_body_bytes: cfg.max_body_bytes,
            validate_addresses: cfg.validate_addresses,
        })
    }
}

#[async_trait]
impl Transport for SafeHttpClient {
    async fn execute(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FeedResponse> {
        if self.validate_addresses {
            reject_forbidden_ip_literal(url)?;
        }

        let mut request = self.client.get(url);

        if let Some(etag) = etag.filter(|v| !v.is_empty()) {
            request = request.header(header::IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = last_modified.filter(|v| !v.is_empty()) {
            request = request.header(header::IF_MODIFIED_SINCE, last_modified);
        }

        let mut response = request
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        let status = response.status();
        let headers = response.headers().clone();

        // Read at most max_body_bytes; anything beyond is dropped so a
        // hostile origin can't balloon memory through the decompressor.
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("failed to read response body from {}", url))?
        {
            let remaining = self.max_body_bytes - body.len();
            if chunk.len() >= remaining {
                body.extend_from_slice(&chunk[..remaining]);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FeedResponse {
            status,
            headers,
            body,
        })
    }
}

/// URLs addressing an IP directly never hit the resolver, so the same
/// validation is applied up front.
fn reject_forbidden_ip_literal(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url).with_context(|| format!("invalid URL: {}", url))?;

    let ip = match parsed.host() {
        Some(url::Host::Ipv4(ip)) => Some(std::net::IpAddr::V4(ip)),
        Some(url::Host::Ipv6(ip)) => Some(std::net::IpAddr::V6(ip)),
        _ => None,
    };

    if let (Some(ip), Some(host)) = (ip, parsed.host_str()) {
        if let Err(err) = ssrf::validate_ip(ip) {
            anyhow::bail!("{} for {}: {}", SSRF_SENTINEL, host, err);
        }
    }

    Ok(())
}

/// DNS resolver that refuses to return any forbidden address. A hostname
/// is accepted only if every address it resolves to passes validation.
struct ValidatingResolver;

impl Resolve for ValidatingResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let host = name.as_str().to_string();

            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
                .await
                .map_err(|err| -> Box<dyn std::error::Error + Send + Sync> {
                    format!("DNS resolution failed for {}: {}", host, err).into()
                })?
                .collect();

            if addrs.is_empty() {
                return Err(format!("no IP addresses found for {}", host).into());
            }

            for addr in &addrs {
                if let Err(err) = ssrf::validate_ip(addr.ip()) {
                    tracing::warn!(host = %host, ip = %addr.ip(), error = %err, "SSRF validation failed");
                    return Err(format!("{} for {}: {}", SSRF_SENTINEL, host, err).into());
                }
            }

            let iter: Addrs = Box::new(addrs.into_iter());
            Ok(iter)
        })
    }
}

/// True if any error in the chain came from SSRF validation. The check
/// walks the whole chain because reqwest buries connect errors a few
/// levels deep.
pub fn is_ssrf_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.to_string().contains(SSRF_SENTINEL))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssrf_error_detected_anywhere_in_chain() {
        let inner = anyhow::anyhow!("{} for evil.test: access to localhost is forbidden", SSRF_SENTINEL);
        let wrapped = inner.context("request to http://evil.test failed");
        assert!(is_ssrf_error(&wrapped));

        let plain = anyhow::anyhow!("connection reset by peer");
        assert!(!is_ssrf_error(&plain));
    }

    #[test]
    fn ip_literal_hosts_are_validated() {
        assert!(reject_forbidden_ip_literal("http://169.254.169.254/meta").is_err());
        assert!(reject_forbidden_ip_literal("http://127.0.0.1/feed").is_err());
        assert!(reject_forbidden_ip_literal("http://[::1]/feed").is_err());
        assert!(reject_forbidden_ip_literal("http://93.184.216.34/feed").is_ok());
        assert!(reject_forbidden_ip_literal("https://example.com/feed").is_ok());

        let err = reject_forbidden_ip_literal("http://10.0.0.8/rss").unwrap_err();
        assert!(err.to_string().starts_with(SSRF_SENTINEL));
    }
}
