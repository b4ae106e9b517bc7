//! HTTP header and TLS certificate parsing (curl -I, openssl)

use crate::pipeline::facts::CertificateInfo;
use std::collections::BTreeMap;

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// Status and headers of the last response in a `curl -sS -I -L` dump.
///
/// With `-L` curl prints one header block per hop; only the final one
/// describes the page the target actually serves.
pub fn parse_headers(output: &str) -> (Option<u16>, BTreeMap<String, String>) {
    let mut status = None;
    let mut headers = BTreeMap::new();

    for line in output.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with("HTTP/") {
            status = line.split_whitespace().nth(1).and_then(|code| code.parse().ok());
            headers.clear();
            continue;
        }
        if status.is_none() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if !name.is_empty() && !name.contains(' ') {
                headers.insert(name.to_ascii_lowercase(), value.trim().to_string());
            }
        }
    }

    (status, headers)
}

/// First PEM certificate block in `openssl s_client -showcerts` output
pub fn extract_pem(output: &str) -> Option<String> {
    let start = output.find(PEM_BEGIN)?;
    let end = output[start..].find(PEM_END)? + start + PEM_END.len();
    Some(format!("{}\n", &output[start..end]))
}

/// Subject, issuer and validity from `openssl x509 -noout -subject -issuer -dates`
pub fn parse_x509(output: &str) -> Option<CertificateInfo> {
    let mut info = CertificateInfo::default();

    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else { continue };
        let value = Some(value.trim().to_string());
        match key.trim() {
            "subject" => info.subject = value,
            "issuer" => info.issuer = value,
            "notBefore" => info.not_before = value,
            "notAfter" => info.not_after = value,
            _ => {}
        }
    }

    (info != CertificateInfo::default()).then_some(info)
}
