//! nmap output parsing
//!
//! The pipeline asks nmap for XML on stdout (`-oX -`). When the output is not
//! XML (an older wrapper, a stub, a killed run that never printed the
//! header) the normal text report is scanned instead.

use crate::pipeline::facts::ServiceInfo;
use log::debug;
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

static TEXT_PORT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,5})/(tcp|udp|sctp)\s+(\S+)(?:\s+(\S+))?(?:\s+(.+?))?\s*$")
        .expect("port line regex")
});

/// One `<port>` element (or text report line)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortEntry {
    pub port: u16,
    pub protocol: String,
    pub state: String,
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
}

impl PortEntry {
    pub fn is_open(&self) -> bool {
        self.state == "open"
    }
}

/// Parse nmap output, XML if possible and text otherwise
pub fn parse(output: &str) -> Vec<PortEntry> {
    if output.contains("<nmaprun") {
        parse_xml(output)
    } else {
        parse_text(output)
    }
}

/// Sorted, deduplicated open ports
pub fn open_ports(entries: &[PortEntry]) -> Vec<u16> {
    let mut ports: Vec<u16> = entries.iter().filter(|e| e.is_open()).map(|e| e.port).collect();
    ports.sort_unstable();
    ports.dedup();
    ports
}

/// Service facts for every open port
pub fn services(entries: &[PortEntry]) -> Vec<ServiceInfo> {
    entries
        .iter()
        .filter(|e| e.is_open())
        .map(|e| ServiceInfo {
            port: e.port,
            protocol: e.protocol.clone(),
            name: e.service.clone().unwrap_or_else(|| "unknown".to_string()),
            product: e.product.clone(),
            version: e.version.clone(),
        })
        .collect()
}

fn parse_xml(xml: &str) -> Vec<PortEntry> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<PortEntry> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"port" => current = port_start(&e),
                _ => apply_child(&e, current.as_mut()),
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                // <port .../> carries no state, nothing to keep
                b"port" => {}
                _ => apply_child(&e, current.as_mut()),
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"port" => {
                if let Some(entry) = current.take() {
                    entries.push(entry);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("nmap XML truncated at byte {}: {}", reader.buffer_position(), e);
                break;
            }
        }
    }

    entries
}

fn port_start(element: &BytesStart<'_>) -> Option<PortEntry> {
    let port = attribute(element, b"portid")?.parse().ok()?;
    Some(PortEntry {
        port,
        protocol: attribute(element, b"protocol").unwrap_or_else(|| "tcp".to_string()),
        ..Default::default()
    })
}

fn apply_child(element: &BytesStart<'_>, current: Option<&mut PortEntry>) {
    let Some(entry) = current else { return };
    match element.name().as_ref() {
        b"state" => {
            if let Some(state) = attribute(element, b"state") {
                entry.state = state;
            }
        }
        b"service" => {
            entry.service = attribute(element, b"name");
            entry.product = attribute(element, b"product");
            entry.version = attribute(element, b"version");
        }
        _ => {}
    }
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
        .filter(|v| !v.is_empty())
}

fn parse_text(output: &str) -> Vec<PortEntry> {
    output
        .lines()
        .filter_map(|line| {
            let caps = TEXT_PORT_LINE.captures(line.trim())?;
            let port = caps.get(1)?.as_str().parse().ok()?;
            let rest = caps.get(5).map(|m| m.as_str().to_string());
            let (product, version) = match rest {
                Some(rest) => match rest.split_once(' ') {
                    Some((product, version)) => (Some(product.to_string()), Some(version.to_string())),
                    None => (Some(rest), None),
                },
                None => (None, None),
            };
            Some(PortEntry {
                port,
                protocol: caps[2].to_string(),
                state: caps[3].to_string(),
                service: caps.get(4).map(|m| m.as_str().to_string()),
                product,
                version,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -Pn -sV -p 22,80,443 -oX - example.com">
<host><status state="up" reason="user-set"/>
<address addr="93.184.216.34" addrtype="ipv4"/>
<ports>
<port protocol="tcp" portid="22"><state state="open" reason="syn-ack"/><service name="ssh" product="OpenSSH" version="8.9p1 Ubuntu 3ubuntu0.6" method="probed" conf="10"><cpe>cpe:/a:openbsd:openssh:8.9p1</cpe></service></port>
<port protocol="tcp" portid="80"><state state="open" reason="syn-ack"/><service name="http" product="nginx" method="probed" conf="10"/></port>
<port protocol="tcp" portid="443"><state state="filtered" reason="no-response"/><service name="https" method="table" conf="3"/></port>
</ports>
</host>
</nmaprun>"#;

    #[test]
    fn test_xml_ports_and_services() {
        let entries = parse(XML);
        assert_eq!(entries.len(), 3);
        assert_eq!(open_ports(&entries), vec![22, 80]);

        let services = services(&entries);
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].name, "ssh");
        assert_eq!(services[0].product.as_deref(), Some("OpenSSH"));
        assert_eq!(services[0].version.as_deref(), Some("8.9p1 Ubuntu 3ubuntu0.6"));
        assert_eq!(services[1].version, None);
    }

    #[test]
    fn test_truncated_xml_keeps_finished_ports() {
        let cut = &XML[..XML.find("portid=\"443\"").unwrap()];
        let entries = parse(cut);
        assert_eq!(open_ports(&entries), vec![22, 80]);
    }

    #[test]
    fn test_text_fallback() {
        let text = "\
Starting Nmap 7.94
PORT    STATE  SERVICE VERSION
22/tcp  open   ssh     OpenSSH 8.9p1
80/tcp  open   http
113/tcp closed ident
";
        let entries = parse(text);
        assert_eq!(open_ports(&entries), vec![22, 80]);
        let services = services(&entries);
        assert_eq!(services[0].product.as_deref(), Some("OpenSSH"));
        assert_eq!(services[0].version.as_deref(), Some("8.9p1"));
        assert_eq!(services[1].product, None);
    }

    #[test]
    fn test_garbage_yields_nothing() {
        assert!(parse("stub nmap output\n").is_empty());
    }
}
