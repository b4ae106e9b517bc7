//! Typed facts extracted from tool output
//!
//! Each stage extracts its facts exactly once, right after its tools finish.
//! Later stages read them through `RunResults` accessors instead of
//! re-parsing raw output files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Service detected on an open port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub port: u16,
    pub protocol: String,
    pub name: String,
    pub product: Option<String>,
    pub version: Option<String>,
}

/// Leaf certificate presented by the target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject: Option<String>,
    pub issuer: Option<String>,
    pub not_before: Option<String>,
    pub not_after: Option<String>,
}

/// Result of the HTTP header and TLS certificate probe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpProbe {
    /// Status line code of the final response after redirects
    pub status: Option<u16>,
    /// Headers of the final response, lower-cased names
    pub headers: BTreeMap<String, String>,
    pub certificate: Option<CertificateInfo>,
}

/// Technology reported by the web fingerprinter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Technology {
    pub name: String,
    pub detail: Option<String>,
}

/// Path found by directory discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPath {
    pub path: String,
    pub status: Option<u16>,
}

/// Finding reported by the vulnerability-template scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub template_id: String,
    pub severity: String,
    pub matched_at: String,
    pub name: Option<String>,
}

/// Facts produced by one stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StageFacts {
    #[default]
    None,
    Subdomains(Vec<String>),
    HttpProbe(HttpProbe),
    OpenPorts(Vec<u16>),
    Services(Vec<ServiceInfo>),
    Web {
        technologies: Vec<Technology>,
        paths: Vec<DiscoveredPath>,
    },
    Findings(Vec<Finding>),
}

impl StageFacts {
    /// One-line human summary used in the console table
    pub fn summary(&self) -> String {
        match self {
            StageFacts::None => "-".to_string(),
            StageFacts::Subdomains(subs) => format!("{} live subdomain(s)", subs.len()),
            StageFacts::HttpProbe(probe) => {
                let status = probe
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "no HTTP response".to_string());
                let cert = if probe.certificate.is_some() { ", certificate captured" } else { "" };
                format!("HTTP {}{}", status, cert)
            }
            StageFacts::OpenPorts(ports) => {
                if ports.is_empty() {
                    "no open ports".to_string()
                } else {
                    let list: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
                    format!("open: {}", list.join(","))
                }
            }
            StageFacts::Services(services) => format!("{} service(s) identified", services.len()),
            StageFacts::Web { technologies, paths } => {
                format!("{} technolog(ies), {} path(s)", technologies.len(), paths.len())
            }
            StageFacts::Findings(findings) => format!("{} finding(s)", findings.len()),
        }
    }
}
