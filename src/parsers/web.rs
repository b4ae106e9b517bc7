//! whatweb and gobuster output parsing

use crate::pipeline::facts::{DiscoveredPath, Technology};
use once_cell::sync::Lazy;
use regex::Regex;

static GOBUSTER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https?://[^/\s]+)?(/\S*)\s+\(Status:\s*(\d{3})\)").expect("gobuster regex")
});

/// Technologies from `whatweb --color=never` output.
///
/// Each report line looks like
/// `https://example.com [200 OK] HTTPServer[nginx], Title[Example]`.
/// Redirect hops produce several lines; plugins are deduplicated by name.
pub fn parse_whatweb(output: &str) -> Vec<Technology> {
    let mut technologies: Vec<Technology> = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if !line.starts_with("http://") && !line.starts_with("https://") {
            continue;
        }
        let Some((_, report)) = line.split_once(char::is_whitespace) else { continue };

        for item in split_top_level(report) {
            // bare "[200 OK]" status marker
            if item.starts_with('[') {
                continue;
            }
            let (name, detail) = match item.split_once('[') {
                Some((name, rest)) => (name.trim(), Some(rest.trim_end_matches(']').to_string())),
                None => (item, None),
            };
            if name.is_empty() || technologies.iter().any(|t| t.name == name) {
                continue;
            }
            technologies.push(Technology {
                name: name.to_string(),
                detail: detail.filter(|d| !d.is_empty()),
            });
        }
    }

    technologies
}

/// Paths from `gobuster dir -q` output
pub fn parse_gobuster(output: &str) -> Vec<DiscoveredPath> {
    output
        .lines()
        .filter_map(|line| {
            let caps = GOBUSTER_LINE.captures(line.trim())?;
            Some(DiscoveredPath {
                path: caps[1].to_string(),
                status: caps[2].parse().ok(),
            })
        })
        .collect()
}

/// Split on commas that are not inside brackets
fn split_top_level(report: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in report.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(report[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(report[start..].trim());

    // "[200 OK] HTTPServer[nginx]" shares one item with the status marker
    items
        .into_iter()
        .flat_map(|item| match item.strip_prefix('[').and_then(|s| s.split_once("] ")) {
            Some((_, rest)) => vec![rest.trim()],
            None => vec![item],
        })
        .filter(|item| !item.is_empty())
        .collect()
}
