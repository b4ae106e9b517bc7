//! nuclei `-jsonl` output parsing

use crate::pipeline::facts::Finding;
use log::debug;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct NucleiLine {
    #[serde(rename = "template-id", alias = "templateID")]
    template_id: String,
    #[serde(default)]
    info: NucleiInfo,
    #[serde(rename = "matched-at", alias = "matched", default)]
    matched_at: Option<String>,
    #[serde(default)]
    host: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NucleiInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    severity: Option<String>,
}

/// Findings from JSON lines. Lines that are not findings are ignored.
pub fn parse(output: &str) -> Vec<Finding> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .filter_map(|line| match serde_json::from_str::<NucleiLine>(line) {
            Ok(entry) => Some(Finding {
                template_id: entry.template_id,
                severity: entry.info.severity.unwrap_or_else(|| "unknown".to_string()),
                matched_at: entry.matched_at.or(entry.host).unwrap_or_default(),
                name: entry.info.name,
            }),
            Err(e) => {
                debug!("Skipping unparsable nuclei line: {}", e);
                None
            }
        })
        .collect()
}
