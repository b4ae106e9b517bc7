//! Certificate transparency (crt.sh JSON) parsing

use crate::{ReconError, Result};
use serde::Deserialize;
use std::collections::BTreeSet;

#[derive(Debug, Deserialize)]
struct CertificateEntry {
    name_value: String,
}

/// Extract unique, sorted names under `domain` from a crt.sh JSON response.
///
/// `name_value` may hold several names separated by newlines. Wildcard
/// prefixes are stripped and names outside `domain` are dropped.
pub fn parse(body: &str, domain: &str) -> Result<Vec<String>> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let entries: Vec<CertificateEntry> = serde_json::from_str(body)
        .map_err(|e| ReconError::ParseError(format!("crt.sh response is not valid JSON: {}", e)))?;

    let domain = domain.to_ascii_lowercase();
    let suffix = format!(".{}", domain);

    let names: BTreeSet<String> = entries
        .iter()
        .flat_map(|entry| entry.name_value.split('\n'))
        .map(|name| name.trim().trim_start_matches("*.").to_ascii_lowercase())
        .filter(|name| !name.is_empty() && !name.contains('*'))
        .filter(|name| *name == domain || name.ends_with(&suffix))
        .collect();

    Ok(names.into_iter().collect())
}
