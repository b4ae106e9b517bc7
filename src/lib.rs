//! Deimos - a bounded, dependency-aware reconnaissance pipeline
//!
//! Drives curl, openssl, nmap, whatweb, gobuster and nuclei against a single
//! authorized target. Every tool runs under a hard timeout, its raw output is
//! kept in a per-run directory, and a run log records what happened to each
//! stage. Intrusive tools are only written out as templates, never executed.

pub mod config;
pub mod error;
pub mod output;
pub mod parsers;
pub mod pipeline;
pub mod runner;
pub mod stages;
pub mod store;
pub mod target;
pub mod templates;

// Re-export commonly used types
pub use config::RunConfig;
pub use error::{ReconError, StageIssue};
pub use pipeline::facts::StageFacts;
pub use pipeline::stage::{RunResults, StageKind, StageResult, StageState};
pub use pipeline::{Pipeline, RunContext, RunSummary};
pub use runner::{ToolInvocation, ToolOutcome, ToolRunner};
pub use store::ResultStore;
pub use target::{resolve, TargetDescriptor, TargetKind};

pub type Result<T> = std::result::Result<T, ReconError>;
