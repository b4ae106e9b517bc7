//! Parsers for the output of each external tool
//!
//! Parsers are lenient: tools killed on timeout leave truncated output
//! behind, so every parser keeps whatever it could read before the damage.

pub mod crtsh;
pub mod http;
pub mod nmap;
pub mod nuclei;
pub mod web;
