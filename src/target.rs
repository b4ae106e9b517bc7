//! Target resolution
//!
//! Turns whatever the operator typed after `-d` into a `TargetDescriptor`:
//! - bare domain / hostname, optionally with `:port` or a trailing path
//! - IPv4 and IPv6 literals (IPv6 may be bracketed)
//! - full URLs with a scheme
//!
//! Resolution is purely syntactic. No DNS lookups happen here.

use crate::{ReconError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use url::Url;

/// Kind of input the operator supplied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Domain,
    Ipv4,
    Ipv6,
    Url,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetKind::Domain => "domain",
            TargetKind::Ipv4 => "ipv4",
            TargetKind::Ipv6 => "ipv6",
            TargetKind::Url => "url",
        };
        f.write_str(name)
    }
}

/// Canonical description of the scan target, shared by every stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Input exactly as given (trimmed)
    pub raw: String,
    pub kind: TargetKind,
    /// Lower-cased host without scheme, port, path or IPv6 brackets
    pub host: String,
    /// Explicit port carried by the input, if any
    pub port: Option<u16>,
    /// Scheme + authority, `https://<host>` when no scheme was given
    pub base_url: String,
}

impl TargetDescriptor {
    /// True when the host is an IP literal rather than a name
    pub fn is_ip(&self) -> bool {
        self.host.parse::<std::net::IpAddr>().is_ok()
    }

    /// Host formatted for use inside a URL authority
    pub fn url_host(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    /// `host:port` pair for TLS probing; falls back to 443
    pub fn tls_authority(&self) -> String {
        let port = match (self.port, self.base_url.starts_with("http://")) {
            (Some(port), false) => port,
            _ => 443,
        };
        format!("{}:{}", self.url_host(), port)
    }

    /// Filesystem-safe slug used to name the run directory
    pub fn sanitized(&self) -> String {
        let slug: String = self
            .host
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let slug = slug.trim_matches('.').to_string();
        if slug.is_empty() {
            "target".to_string()
        } else {
            slug
        }
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.host, self.kind)
    }
}

impl FromStr for TargetDescriptor {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self> {
        resolve(s)
    }
}

/// Resolve a user-supplied target string
pub fn resolve(input: &str) -> Result<TargetDescriptor> {
    let raw = input.trim();
    if raw.is_empty() {
        return Err(ReconError::InvalidTarget("Target cannot be empty".to_string()));
    }
    if raw.chars().any(char::is_whitespace) {
        return Err(ReconError::InvalidTarget(format!(
            "Target '{}' contains whitespace",
            raw
        )));
    }

    if raw.contains("://") {
        return resolve_url(raw);
    }

    if let Some(target) = resolve_ipv6(raw) {
        return Ok(target);
    }

    // Drop any path component before looking at host[:port]
    let authority = raw.split(['/', '?', '#']).next().unwrap_or(raw);
    let (host, port) = split_host_port(authority, raw)?;

    if let Ok(ipv4) = Ipv4Addr::from_str(host) {
        let host = ipv4.to_string();
        return Ok(TargetDescriptor {
            raw: raw.to_string(),
            kind: TargetKind::Ipv4,
            base_url: https_base(&host, port),
            host,
            port,
        });
    }

    let host = validate_hostname(host, raw)?;
    Ok(TargetDescriptor {
        raw: raw.to_string(),
        kind: TargetKind::Domain,
        base_url: https_base(&host, port),
        host,
        port,
    })
}

fn resolve_url(raw: &str) -> Result<TargetDescriptor> {
    let url = Url::parse(raw)
        .map_err(|e| ReconError::InvalidTarget(format!("Invalid URL '{}': {}", raw, e)))?;

    let host = match url.host() {
        Some(url::Host::Domain(domain)) => validate_hostname(domain, raw)?,
        Some(url::Host::Ipv4(ip)) => ip.to_string(),
        Some(url::Host::Ipv6(ip)) => ip.to_string(),
        None => {
            return Err(ReconError::InvalidTarget(format!(
                "URL '{}' has no host",
                raw
            )))
        }
    };

    let port = url.port();
    let authority = if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.clone()
    };
    let base_url = match port {
        Some(port) => format!("{}://{}:{}", url.scheme(), authority, port),
        None => format!("{}://{}", url.scheme(), authority),
    };

    Ok(TargetDescriptor {
        raw: raw.to_string(),
        kind: TargetKind::Url,
        host,
        port,
        base_url,
    })
}

fn resolve_ipv6(raw: &str) -> Option<TargetDescriptor> {
    // [2001:db8::1] or [2001:db8::1]:8443
    if let Some(rest) = raw.strip_prefix('[') {
        let (addr, tail) = rest.split_once(']')?;
        let ip = Ipv6Addr::from_str(addr).ok()?;
        let port = match tail.strip_prefix(':') {
            Some(p) => Some(p.parse::<u16>().ok()?),
            None if tail.is_empty() || tail.starts_with('/') => None,
            None => return None,
        };
        let host = ip.to_string();
        return Some(TargetDescriptor {
            raw: raw.to_string(),
            kind: TargetKind::Ipv6,
            base_url: https_base(&format!("[{}]", host), port),
            host,
            port,
        });
    }

    let ip = Ipv6Addr::from_str(raw).ok()?;
    let host = ip.to_string();
    Some(TargetDescriptor {
        raw: raw.to_string(),
        kind: TargetKind::Ipv6,
        base_url: https_base(&format!("[{}]", host), None),
        host,
        port: None,
    })
}

fn split_host_port<'a>(authority: &'a str, raw: &str) -> Result<(&'a str, Option<u16>)> {
    match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                ReconError::InvalidTarget(format!("Invalid port in target '{}'", raw))
            })?;
            if port == 0 {
                return Err(ReconError::InvalidTarget("Port 0 is not valid".to_string()));
            }
            Ok((host, Some(port)))
        }
        None => Ok((authority, None)),
    }
}

fn validate_hostname(host: &str, raw: &str) -> Result<String> {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return Err(ReconError::InvalidTarget(format!("No host in target '{}'", raw)));
    }
    if host.len() > 253 {
        return Err(ReconError::InvalidTarget(format!("Hostname too long: {}", raw)));
    }

    for label in host.split('.') {
        // a leading '-' would turn the host into a tool option
        let valid = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ReconError::InvalidTarget(format!(
                "Invalid hostname label '{}' in '{}'",
                label, raw
            )));
        }
    }

    Ok(host)
}

fn https_base(host: &str, port: Option<u16>) -> String {
    match port {
        Some(port) => format!("https://{}:{}", host, port),
        None => format!("https://{}", host),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bare_domain() {
        let t = resolve("Example.COM").unwrap();
        assert_eq!(t.kind, TargetKind::Domain);
        assert_eq!(t.host, "example.com");
        assert_eq!(t.base_url, "https://example.com");
        assert_eq!(t.port, None);
    }

    #[test]
    fn test_domain_with_port_and_path() {
        let t = resolve("app.example.com:8443/login").unwrap();
        assert_eq!(t.kind, TargetKind::Domain);
        assert_eq!(t.host, "app.example.com");
        assert_eq!(t.port, Some(8443));
        assert_eq!(t.base_url, "https://app.example.com:8443");
        assert_eq!(t.tls_authority(), "app.example.com:8443");
    }

    #[test]
    fn test_ipv4_literal() {
        let t = resolve("192.168.1.10").unwrap();
        assert_eq!(t.kind, TargetKind::Ipv4);
        assert!(t.is_ip());
        assert_eq!(t.base_url, "https://192.168.1.10");
    }

    #[test]
    fn test_ipv6_literals() {
        let bare = resolve("2001:db8::1").unwrap();
        assert_eq!(bare.kind, TargetKind::Ipv6);
        assert_eq!(bare.host, "2001:db8::1");
        assert_eq!(bare.base_url, "https://[2001:db8::1]");

        let bracketed = resolve("[2001:db8::1]:8443").unwrap();
        assert_eq!(bracketed.port, Some(8443));
        assert_eq!(bracketed.tls_authority(), "[2001:db8::1]:8443");
        assert_eq!(bracketed.sanitized(), "2001_db8__1");
    }

    #[test]
    fn test_url_keeps_scheme() {
        let t = resolve("http://Example.com:8080/admin?x=1").unwrap();
        assert_eq!(t.kind, TargetKind::Url);
        assert_eq!(t.host, "example.com");
        assert_eq!(t.base_url, "http://example.com:8080");
        // plain http targets still probe TLS on the default port
        assert_eq!(t.tls_authority(), "example.com:443");
    }

    #[test]
    fn test_https_url_default_port_is_dropped() {
        let t = resolve("https://example.com/").unwrap();
        assert_eq!(t.port, None);
        assert_eq!(t.base_url, "https://example.com");
    }

    #[test]
    fn test_rejects_empty_and_garbage() {
        assert!(matches!(resolve(""), Err(ReconError::InvalidTarget(_))));
        assert!(matches!(resolve("   "), Err(ReconError::InvalidTarget(_))));
        assert!(resolve("exa mple.com").is_err());
        assert!(resolve("example..com").is_err());
        assert!(resolve("example.com:99999").is_err());
        assert!(resolve("https://").is_err());
        assert!(resolve("--script-updatedb").is_err());
        assert!(resolve("-sn").is_err());
        assert!(resolve("-iL/etc/passwd").is_err());
        assert!(resolve("host-.example.com").is_err());
        assert!(resolve("https://-oN.example.com/").is_err());
    }

    #[test]
    fn test_sanitized_slug() {
        let t = resolve("sub.example.com").unwrap();
        assert_eq!(t.sanitized(), "sub.example.com");
    }

    proptest! {
        #[test]
        fn prop_valid_domains_have_host(labels in proptest::collection::vec("[a-z0-9]([a-z0-9-]{0,19}[a-z0-9])?", 1..5)) {
            let input = labels.join(".");
            let t = resolve(&input).unwrap();
            prop_assert!(!t.host.is_empty());
            prop_assert!(!t.sanitized().is_empty());
            prop_assert!(t.base_url.starts_with("https://"));
        }

        #[test]
        fn prop_ipv4_always_resolves(a in 0u8..=255, b in 0u8..=255, c in 0u8..=255, d in 0u8..=255) {
            let input = format!("{}.{}.{}.{}", a, b, c, d);
            let t = resolve(&input).unwrap();
            prop_assert_eq!(t.kind, TargetKind::Ipv4);
            prop_assert_eq!(t.host, input);
        }
    }
}
