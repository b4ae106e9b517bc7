//! Shell stubs standing in for the real recon tools

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const ALL_TOOLS: &[&str] = &["curl", "openssl", "nmap", "whatweb", "gobuster", "nuclei"];

/// nmap XML with a single open port
pub const NMAP_XML_OPEN_22: &str = r#"<?xml version="1.0"?>
<nmaprun scanner="nmap"><host><ports>
<port protocol="tcp" portid="22"><state state="open"/><service name="ssh" product="OpenSSH" version="9.6"/></port>
</ports></host></nmaprun>"#;

/// nmap XML with nothing open
pub const NMAP_XML_NONE: &str = r#"<?xml version="1.0"?>
<nmaprun scanner="nmap"><host><ports></ports></host></nmaprun>"#;

pub struct StubTools {
    dir: TempDir,
}

impl StubTools {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create stub dir"),
        }
    }

    /// Every tool echoes fixed text and exits 0
    pub fn all_echo() -> Self {
        let stubs = Self::new();
        for tool in ALL_TOOLS {
            stubs.echo(tool);
        }
        stubs
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn search_path(&self) -> String {
        self.dir.path().to_string_lossy().into_owned()
    }

    /// Install `name` as a shell script with `body`
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write stub");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("Failed to chmod stub");
        path
    }

    pub fn echo(&self, name: &str) -> PathBuf {
        self.script(name, &format!("echo \"stub {} output\"\nexit 0", name))
    }

    /// Print `text` verbatim
    pub fn print(&self, name: &str, text: &str) -> PathBuf {
        self.script(name, &format!("cat <<'STUB_EOF'\n{}\nSTUB_EOF", text))
    }

    pub fn remove(&self, name: &str) {
        fs::remove_file(self.dir.path().join(name)).expect("Failed to remove stub");
    }
}

/// A readable, empty wordlist
pub fn wordlist(dir: &Path) -> PathBuf {
    let path = dir.join("words.txt");
    fs::write(&path, "admin\nlogin\n").expect("Failed to write wordlist");
    path
}

/// Run directories created under `root`
pub fn run_dirs(root: &Path) -> Vec<PathBuf> {
    match fs::read_dir(root) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect(),
        Err(_) => Vec::new(),
    }
}
